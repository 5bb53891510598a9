//! PayRail command-line client
//!
//! Non-interactive subcommands against the gateway:
//!
//! ```text
//! pay_client balance                  Show the logged-in user's balance
//! pay_client pay <receiver> <amount>  Send money, queueing on failure
//! pay_client drain                    Retry queued payments once
//! pay_client watch                    Keep retrying, report balance changes
//! ```
//!
//! Credentials come from `PAYRAIL_USER` and `PAYRAIL_PASSWORD`. Pending
//! payments are drained on every start, so a payment queued while the
//! gateway was down goes out the next time any subcommand runs.

use std::sync::Arc;
use std::time::Duration;

use payrail::client::{
    DrainReport, GatewayApi, GatewayClient, PendingPayment, PendingQueue, RetryWorker,
};
use payrail::config::AppConfig;
use payrail::error::PaymentError;
use payrail::money::parse_amount;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Positional arguments with flag pairs stripped
fn get_command() -> Vec<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--env" | "-e" => i += 2,
            _ => {
                out.push(args[i].clone());
                i += 1;
            }
        }
    }
    out
}

fn usage() -> ! {
    eprintln!("Usage: pay_client [--env <env>] <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  balance                  Show the logged-in user's balance");
    eprintln!("  pay <receiver> <amount>  Send money, queueing on failure");
    eprintln!("  drain                    Retry queued payments once");
    eprintln!("  watch                    Keep retrying, report balance changes");
    eprintln!();
    eprintln!("Credentials: PAYRAIL_USER and PAYRAIL_PASSWORD environment variables");
    std::process::exit(2);
}

fn credentials() -> (String, String) {
    let user = match std::env::var("PAYRAIL_USER") {
        Ok(u) if !u.is_empty() => u,
        _ => {
            eprintln!("❌ PAYRAIL_USER is not set");
            std::process::exit(2);
        }
    };
    let password = match std::env::var("PAYRAIL_PASSWORD") {
        Ok(p) => p,
        Err(_) => {
            eprintln!("❌ PAYRAIL_PASSWORD is not set");
            std::process::exit(2);
        }
    };
    (user, password)
}

fn print_drain(report: &DrainReport) {
    if report.confirmed > 0 {
        println!(
            "📤 Confirmed {} queued payment(s), {} still pending",
            report.confirmed, report.remaining
        );
    } else if report.remaining > 0 {
        println!("⏳ {} payment(s) still pending", report.remaining);
    }
}

async fn show_balance(client: &GatewayClient) {
    match client.balance().await {
        Ok(b) if b.balance < 0 => println!("⚠️  Session expired, log in again"),
        Ok(b) => {
            let shown = b.display.unwrap_or_else(|| b.balance.to_string());
            println!("💰 Balance: {}", shown);
        }
        Err(e) => eprintln!("❌ Balance query failed: {}", e),
    }
}

async fn pay(
    client: &GatewayClient,
    queue: &PendingQueue,
    user: &str,
    receiver: &str,
    amount: &str,
) {
    // Catch typos before anything goes on the wire or into the queue
    if let Err(e) = parse_amount(amount) {
        eprintln!("❌ {}", e);
        std::process::exit(2);
    }

    // Draw the id first so a retry of this exact payment is idempotent
    let txn_id = match client.next_txn_id().await {
        Ok(id) => id,
        Err(e) => {
            let intent = PendingPayment::new(receiver, amount);
            if let Err(qe) = queue.enqueue(user, intent) {
                eprintln!("❌ Could not queue payment: {}", qe);
                std::process::exit(1);
            }
            println!("📥 Gateway unavailable ({}), payment queued for retry", e);
            return;
        }
    };

    match client.pay(receiver, amount, Some(txn_id)).await {
        Ok(resp) => {
            println!("✅ {} (txn {})", resp.message, resp.transaction_id);
        }
        Err(PaymentError::Replay) => {
            println!("✅ Already settled (txn {})", txn_id);
        }
        Err(e) => {
            let mut intent = PendingPayment::new(receiver, amount);
            intent.txn_id = Some(txn_id);
            if let Err(qe) = queue.enqueue(user, intent) {
                eprintln!("❌ Payment failed ({}) and could not be queued: {}", e, qe);
                std::process::exit(1);
            }
            println!("📥 Payment not confirmed ({}), queued for retry", e);
        }
    }
}

async fn watch(
    client: Arc<GatewayClient>,
    queue: Arc<PendingQueue>,
    user: &str,
    retry_interval: Duration,
) -> ! {
    let _worker = RetryWorker::spawn(queue, client.clone(), user, retry_interval);
    println!(
        "👀 Watching balance, retrying pending payments every {}s",
        retry_interval.as_secs()
    );

    let mut last = i64::MIN;
    loop {
        if let Ok(b) = client.balance().await
            && b.balance != last
        {
            last = b.balance;
            match b.display {
                Some(display) => println!("💰 Balance: {}", display),
                None => println!("⚠️  Session expired, log in again"),
            }
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

#[tokio::main]
async fn main() {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = payrail::logging::init_logging(&config);

    let command = get_command();
    if command.is_empty() {
        usage();
    }

    let (user, password) = credentials();
    let client = Arc::new(
        GatewayClient::new(
            &config.client.gateway_url,
            Duration::from_millis(config.client.request_timeout_ms),
        )
        .expect("Failed to build gateway client"),
    );
    let queue = Arc::new(
        PendingQueue::load(config.data.pending_file()).expect("Failed to load pending queue"),
    );

    if let Err(e) = client.login(&user, &password).await {
        eprintln!("❌ Login failed: {}", e);
        std::process::exit(1);
    }

    // Flush whatever earlier runs could not confirm
    let startup_report = match queue.drain(&user, client.as_ref()).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("❌ Draining pending payments failed: {}", e);
            std::process::exit(1);
        }
    };
    print_drain(&startup_report);

    match command[0].as_str() {
        "balance" => show_balance(&client).await,
        "pay" => {
            if command.len() != 3 {
                usage();
            }
            pay(&client, &queue, &user, &command[1], &command[2]).await;
        }
        "drain" => {
            // The startup pass above was the drain; just conclude
            if startup_report.confirmed == 0 && startup_report.remaining == 0 {
                println!("✅ Nothing pending");
            }
        }
        "watch" => {
            watch(
                client,
                queue,
                &user,
                Duration::from_secs(config.client.retry_interval_secs),
            )
            .await
        }
        _ => usage(),
    }
}
