//! PayRail bank node
//!
//! Serves one bank's account shard: the 2PC participant endpoints the
//! gateway drives, plus balance and health for that bank's customers.
//! Which bank this process is comes from the `bank_node` config section,
//! overridable with `--bank` and `--port` for running several nodes off
//! one config file.

use std::sync::Arc;

use anyhow::Context;

use payrail::auth::AuthService;
use payrail::config::AppConfig;
use payrail::money::parse_amount;
use payrail::participant::Participant;
use payrail::participant::server::{BankNodeState, run_server};
use payrail::store::{Account, AccountStore, JsonStore};
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

fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

fn get_bank_override() -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--bank" && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

/// Create this bank's configured accounts that do not exist yet
fn seed_accounts(
    store: &dyn AccountStore,
    config: &AppConfig,
    bank_id: &str,
) -> anyhow::Result<usize> {
    let mut created = 0;
    for seed in config.seed_accounts.iter().filter(|s| s.bank == bank_id) {
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

    let node = config
        .bank_node
        .clone()
        .expect("Config has no bank_node section");
    let bank_id = get_bank_override().unwrap_or(node.bank_id);
    let port = get_port_override().unwrap_or(node.port);

    tracing::info!(bank = %bank_id, "Starting PayRail bank node in {} env", env);
    println!("=== PayRail Bank Node: {} ===", bank_id);

    let store: Arc<dyn AccountStore> = Arc::new(
        JsonStore::load(config.data.bank_accounts_file(&bank_id))
            .expect("Failed to load bank account store"),
    );

    let created =
        seed_accounts(store.as_ref(), &config, &bank_id).expect("Failed to seed accounts");
    if created > 0 {
        println!("🌱 Seeded {} accounts", created);
    }

    let participant = Arc::new(Participant::new(BankId::from(bank_id.as_str()), store.clone()));
    let auth = Arc::new(AuthService::new(
        &config.auth.jwt_secret,
        config.auth.token_ttl_hours,
    ));
    let state = Arc::new(BankNodeState {
        participant,
        store,
        auth,
    });

    run_server(&node.host, port, state).await;
}
