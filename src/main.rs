//! PayRail Gateway
//!
//! Entry point for the payment gateway. Boot order:
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌─────────────┐    ┌──────────┐
//! │  Config  │───▶│  Durable  │───▶│ Coordinator │───▶│   HTTP   │
//! │  (YAML)  │    │   state   │    │ + recovery  │    │   API    │
//! └──────────┘    └───────────┘    └─────────────┘    └──────────┘
//! ```
//!
//! Durable state: master account book (JSON document), transaction journal
//! and outcome ledger (both JSON lines). The recovery worker sweeps the
//! journal before the listener comes up, so interrupted settlements finish
//! before new traffic arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use payrail::auth::AuthService;
use payrail::config::AppConfig;
use payrail::coordinator::{PaymentCoordinator, RecoveryWorker, TxnJournal, WorkerConfig};
use payrail::gateway;
use payrail::gateway::state::AppState;
use payrail::ledger::OutcomeLedger;
use payrail::money::parse_amount;
use payrail::participant::HttpParticipantDirectory;
use payrail::registry::BankRegistry;
use payrail::replay::ReplayGuard;
use payrail::store::{Account, AccountStore, JsonStore};
use payrail::txid::TxnIdGenerator;
use payrail::types::BankId;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

/// Create configured accounts that do not exist yet
fn seed_accounts(store: &dyn AccountStore, config: &AppConfig) -> anyhow::Result<usize> {
    let mut created = 0;
    for seed in &config.seed_accounts {
        if store.get(&seed.owner).is_some() {
            continue;
        }
        let balance = parse_amount(&seed.balance)
            .with_context(|| format!("Seed balance for {} unusable", seed.owner))?;
        let hash = AuthService::hash_password(&seed.password)
            .with_context(|| format!("Seed password for {} unusable", seed.owner))?;
        store
            .upsert(Account::new(
                &seed.owner,
                BankId::from(seed.bank.as_str()),
                balance,
                hash,
            ))
            .with_context(|| format!("Seeding {} failed", seed.owner))?;
        created += 1;
    }
    Ok(created)
}

#[tokio::main]
async fn main() {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = payrail::logging::init_logging(&config);

    tracing::info!("Starting PayRail gateway in {} env", env);
    println!("=== PayRail Gateway ===");

    // Durable state
    let store: Arc<dyn AccountStore> = Arc::new(
        JsonStore::load(config.data.accounts_file()).expect("Failed to load account store"),
    );
    let journal =
        Arc::new(TxnJournal::open(config.data.journal_file()).expect("Failed to open journal"));
    let ledger = Arc::new(
        OutcomeLedger::open(config.data.outcome_log_file()).expect("Failed to open outcome log"),
    );

    let created = seed_accounts(store.as_ref(), &config).expect("Failed to seed accounts");
    if created > 0 {
        println!("🌱 Seeded {} accounts", created);
    }

    // Coordinator wiring
    let registry = Arc::new(BankRegistry::from_config(&config.banks));
    let directory = Arc::new(HttpParticipantDirectory::new(
        registry.clone(),
        Duration::from_millis(config.coordinator.rpc_timeout_ms),
    ));
    let replay = Arc::new(ReplayGuard::new(ledger.clone()));
    let txid = Arc::new(
        TxnIdGenerator::new(config.txid.datacenter_id, config.txid.machine_id)
            .expect("Failed to create transaction id generator"),
    );
    let coordinator = Arc::new(PaymentCoordinator::new(
        store.clone(),
        journal,
        ledger,
        replay,
        registry.clone(),
        directory,
        txid.clone(),
    ));

    // Finish what a previous run started before taking new traffic
    let worker = RecoveryWorker::new(
        coordinator.clone(),
        WorkerConfig {
            scan_interval: Duration::from_secs(config.coordinator.recovery_scan_interval_secs),
            ..WorkerConfig::default()
        },
    );
    let settled = worker.startup_sweep().await;
    if settled > 0 {
        println!("♻️  Settled {} interrupted transactions", settled);
    }
    tokio::spawn(async move {
        worker.run().await;
    });

    let auth = Arc::new(AuthService::new(
        &config.auth.jwt_secret,
        config.auth.token_ttl_hours,
    ));
    let state = Arc::new(AppState::new(store, registry.clone(), auth, txid, coordinator));

    println!("🏦 Banks registered: {}", registry.bank_ids().len());

    let port = get_port_override().unwrap_or(config.gateway.port);
    gateway::run_server(&config.gateway.host, port, state).await;
}
