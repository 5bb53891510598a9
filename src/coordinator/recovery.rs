//! Recovery Worker
//!
//! Background worker that re-drives committed settlements interrupted
//! before completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use super::PaymentCoordinator;
use super::journal::TxnRecord;

/// Configuration for the recovery worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan the journal
    pub scan_interval: Duration,
    /// How long a COMMITTED record must sit untouched before the worker
    /// re-drives it; keeps the scan off settlements a live request owns
    pub stale_threshold: Duration,
    /// Maximum settlements to re-drive per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Recovery Worker
///
/// At startup, aborts attempts stranded before COMMITTED and settles the
/// rest. Afterwards, periodically scans for COMMITTED records that stopped
/// moving and re-drives their settlement. Settlement is idempotent per
/// transaction id, so a re-drive never moves funds twice.
pub struct RecoveryWorker {
    coordinator: Arc<PaymentCoordinator>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(coordinator: Arc<PaymentCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(coordinator: Arc<PaymentCoordinator>) -> Self {
        Self::new(coordinator, WorkerConfig::default())
    }

    /// Run the recovery worker loop
    ///
    /// This method runs forever. Call [`startup_sweep`](Self::startup_sweep)
    /// once before serving traffic; the loop itself only handles records
    /// that go stale while the process is up.
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting recovery worker"
        );

        loop {
            tokio::time::sleep(self.config.scan_interval).await;
            self.scan_and_recover().await;
        }
    }

    /// Clean up after the previous run: presumed abort for everything
    /// stranded before COMMITTED, then settle whatever did commit.
    pub async fn startup_sweep(&self) -> usize {
        let aborted = self.coordinator.abort_stalled().await;
        if aborted > 0 {
            info!(count = aborted, "Aborted attempts stranded by previous run");
        }

        // Everything committed at this point predates this process, so no
        // staleness gate applies.
        let committed = self.coordinator.journal().in_flight();
        if committed.is_empty() {
            return 0;
        }
        info!(count = committed.len(), "Settling transactions committed by previous run");
        self.recover_batch(committed).await
    }

    /// Run a single scan cycle over stale committed records
    pub async fn scan_and_recover(&self) -> usize {
        let threshold = chrono::Duration::seconds(self.config.stale_threshold.as_secs() as i64);
        let cutoff = Utc::now() - threshold;
        let stale: Vec<TxnRecord> = self
            .coordinator
            .journal()
            .in_flight()
            .into_iter()
            .filter(|record| record.updated_at < cutoff)
            .collect();

        if stale.is_empty() {
            debug!("No stalled settlements found");
            return 0;
        }

        info!(count = stale.len(), "Found stalled settlements to recover");
        self.recover_batch(stale).await
    }

    async fn recover_batch(&self, records: Vec<TxnRecord>) -> usize {
        let mut recovered = 0;

        for record in records.iter().take(self.config.batch_size) {
            debug!(
                txn_id = %record.id,
                attempt = record.attempt,
                "Re-driving settlement"
            );

            match self.coordinator.settle(record).await {
                Ok(receipt) => {
                    info!(txn_id = %record.id, "Settlement recovered: {}", receipt.message);
                    recovered += 1;
                }
                Err(e) => {
                    error!(
                        txn_id = %record.id,
                        error = %e,
                        "Settlement still failing, will retry next scan"
                    );
                }
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered settlements this scan");
        }
        recovered
    }
}
