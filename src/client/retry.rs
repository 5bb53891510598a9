//! Background retry worker for the pending-payment queue

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use super::api::GatewayApi;
use super::pending::PendingQueue;

/// Handle to a background task draining one user's pending queue.
///
/// The task drains on a fixed interval and whenever
/// [`drain_soon`](Self::drain_soon) is called. Dropping the handle stops
/// the schedule after the pass in progress; it never cancels a drain
/// midway.
pub struct RetryWorker {
    trigger: Arc<Notify>,
    _shutdown: watch::Sender<()>,
}

impl RetryWorker {
    pub fn spawn(
        queue: Arc<PendingQueue>,
        api: Arc<dyn GatewayApi>,
        user: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let user = user.into();
        let trigger = Arc::new(Notify::new());
        let task_trigger = trigger.clone();
        let (shutdown, mut stopped) = watch::channel(());

        tokio::spawn(async move {
            info!(
                user = %user,
                interval_secs = interval.as_secs(),
                "Starting pending-payment retry worker"
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = task_trigger.notified() => {}
                    // Resolves with Err once the handle is dropped
                    res = stopped.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }

                if queue.is_empty(&user) {
                    continue;
                }
                match queue.drain(&user, api.as_ref()).await {
                    Ok(report) if report.confirmed > 0 => {
                        info!(
                            user = %user,
                            confirmed = report.confirmed,
                            remaining = report.remaining,
                            "Drained pending payments"
                        );
                    }
                    Ok(report) => {
                        debug!(user = %user, remaining = report.remaining, "Nothing confirmed this pass");
                    }
                    Err(e) => {
                        warn!(user = %user, error = %e, "Drain pass failed");
                    }
                }
            }
            debug!(user = %user, "Retry worker stopped");
        });

        Self {
            trigger,
            _shutdown: shutdown,
        }
    }

    /// Ask for a drain pass now instead of waiting out the interval
    pub fn drain_soon(&self) {
        self.trigger.notify_one();
    }
}
