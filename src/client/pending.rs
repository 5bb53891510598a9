//! Durable pending-payment queue
//!
//! Payments that could not be confirmed (no id available, declined,
//! gateway unreachable) wait here per user, in submission order. The
//! whole queue is rewritten through a tmp file and renamed into place
//! after every mutation, so a crash never leaves a half-written file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::api::GatewayApi;
use crate::error::PaymentError;
use crate::types::TxnId;

/// One queued payment intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayment {
    pub receiver: String,
    /// Decimal string as the user typed it, e.g. "40.00"
    pub amount: String,
    /// Assigned before first submit so every retry is idempotent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<TxnId>,
}

impl PendingPayment {
    pub fn new(receiver: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            receiver: receiver.into(),
            amount: amount.into(),
            txn_id: None,
        }
    }
}

/// What one drain pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Intents confirmed (or found already settled) and removed
    pub confirmed: usize,
    /// Intents still queued after the pass
    pub remaining: usize,
}

type QueueData = BTreeMap<String, Vec<PendingPayment>>;

/// File-backed pending queue, ordered per user
pub struct PendingQueue {
    path: PathBuf,
    data: Mutex<QueueData>,
}

impl PendingQueue {
    /// Load an existing queue, or start empty if the file is absent
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PaymentError> {
        let path = path.into();
        let data: QueueData = if path.exists() {
            let bytes = fs::read(&path)?;
            if bytes.is_empty() {
                QueueData::default()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            QueueData::default()
        };

        let queued: usize = data.values().map(Vec::len).sum();
        if queued > 0 {
            info!(path = %path.display(), queued, "Pending payments loaded");
        }

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &QueueData) -> Result<(), PaymentError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    /// Append an intent to the user's queue
    pub fn enqueue(&self, user: &str, intent: PendingPayment) -> Result<(), PaymentError> {
        let mut data = self.data.lock().unwrap();
        data.entry(user.to_string()).or_default().push(intent);
        self.persist(&data)
    }

    /// Snapshot of the user's queue in submission order
    pub fn list(&self, user: &str) -> Vec<PendingPayment> {
        self.data
            .lock()
            .unwrap()
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self, user: &str) -> usize {
        self.data
            .lock()
            .unwrap()
            .get(user)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, user: &str) -> bool {
        self.len(user) == 0
    }

    /// Stamp the first matching unassigned intent with a transaction id
    fn assign_txn_id(
        &self,
        user: &str,
        intent: &PendingPayment,
        id: TxnId,
    ) -> Result<(), PaymentError> {
        let mut data = self.data.lock().unwrap();
        let entries = data
            .get_mut(user)
            .ok_or_else(|| PaymentError::InvalidState("no pending queue for user".to_string()))?;
        let slot = entries
            .iter_mut()
            .find(|e| {
                e.txn_id.is_none() && e.receiver == intent.receiver && e.amount == intent.amount
            })
            .ok_or_else(|| PaymentError::InvalidState("pending intent vanished".to_string()))?;
        slot.txn_id = Some(id);
        self.persist(&data)
    }

    /// Drop the intent carrying this id
    fn remove_confirmed(&self, user: &str, id: TxnId) -> Result<(), PaymentError> {
        let mut data = self.data.lock().unwrap();
        if let Some(entries) = data.get_mut(user)
            && let Some(pos) = entries.iter().position(|e| e.txn_id == Some(id))
        {
            entries.remove(pos);
            if entries.is_empty() {
                data.remove(user);
            }
            return self.persist(&data);
        }
        Ok(())
    }

    /// Walk the user's queue in order, submitting each intent once.
    ///
    /// An intent without an id gets one first, and the assignment is
    /// persisted before the submit so a crash cannot cause a second id
    /// for the same intent. Confirmed and already-settled intents are
    /// removed; everything else stays queued untouched for the next pass.
    pub async fn drain(
        &self,
        user: &str,
        api: &dyn GatewayApi,
    ) -> Result<DrainReport, PaymentError> {
        let intents = self.list(user);
        let mut confirmed = 0;

        for intent in intents {
            let txn_id = match intent.txn_id {
                Some(id) => id,
                None => match api.next_txn_id().await {
                    Ok(id) => {
                        self.assign_txn_id(user, &intent, id)?;
                        id
                    }
                    Err(e) => {
                        warn!(
                            receiver = %intent.receiver,
                            error = %e,
                            "No transaction id available, intent stays queued"
                        );
                        continue;
                    }
                },
            };

            match api.pay(&intent.receiver, &intent.amount, Some(txn_id)).await {
                Ok(receipt) => {
                    self.remove_confirmed(user, txn_id)?;
                    confirmed += 1;
                    info!(
                        txn_id = %txn_id,
                        receiver = %intent.receiver,
                        "Pending payment confirmed: {}",
                        receipt.message
                    );
                }
                Err(PaymentError::Replay) => {
                    // Settled on an earlier attempt we never heard back from
                    self.remove_confirmed(user, txn_id)?;
                    confirmed += 1;
                    info!(txn_id = %txn_id, receiver = %intent.receiver, "Pending payment was already settled");
                }
                Err(e) => {
                    warn!(
                        txn_id = %txn_id,
                        receiver = %intent.receiver,
                        error = %e,
                        "Pending payment still unconfirmed"
                    );
                }
            }
        }

        Ok(DrainReport {
            confirmed,
            remaining: self.len(user),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::api::MockGateway;

    fn queue_in(dir: &tempfile::TempDir) -> PendingQueue {
        PendingQueue::load(dir.path().join("pending_payments.json")).unwrap()
    }

    #[test]
    fn test_enqueue_survives_reload_in_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = queue_in(&dir);
            queue
                .enqueue("alice", PendingPayment::new("bob", "40.00"))
                .unwrap();
            queue
                .enqueue("alice", PendingPayment::new("carol", "1.25"))
                .unwrap();
            queue
                .enqueue("dave", PendingPayment::new("bob", "9.99"))
                .unwrap();
        }

        let queue = queue_in(&dir);
        let alice = queue.list("alice");
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].receiver, "bob");
        assert_eq!(alice[1].receiver, "carol");
        assert_eq!(queue.len("dave"), 1);
        assert!(queue.is_empty("nobody"));
    }

    #[tokio::test]
    async fn test_drain_confirms_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        let api = MockGateway::new();

        queue
            .enqueue("alice", PendingPayment::new("bob", "40.00"))
            .unwrap();
        queue
            .enqueue("alice", PendingPayment::new("carol", "1.25"))
            .unwrap();

        let report = queue.drain("alice", &api).await.unwrap();
        assert_eq!(report, DrainReport { confirmed: 2, remaining: 0 });
        assert!(queue.is_empty("alice"));

        // Both intents got fresh ids before submit
        assert_eq!(api.txid_count(), 2);
        let submitted = api.payments();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].0, "bob");
        assert_eq!(submitted[1].0, "carol");

        // A reloaded queue agrees
        let queue = queue_in(&dir);
        assert!(queue.is_empty("alice"));
    }

    #[tokio::test]
    async fn test_drain_keeps_failed_intents_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        let api = MockGateway::new();
        api.set_fail_for("carol");

        queue
            .enqueue("alice", PendingPayment::new("bob", "40.00"))
            .unwrap();
        queue
            .enqueue("alice", PendingPayment::new("carol", "1.25"))
            .unwrap();

        let report = queue.drain("alice", &api).await.unwrap();
        assert_eq!(report, DrainReport { confirmed: 1, remaining: 1 });

        // The failed intent keeps its place and its assigned id, so the
        // next pass retries the same transaction
        let kept = queue.list("alice");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].receiver, "carol");
        let assigned = kept[0].txn_id.unwrap();

        let reloaded = queue_in(&dir);
        assert_eq!(reloaded.list("alice")[0].txn_id, Some(assigned));

        api.clear_fail_for();
        let report = queue.drain("alice", &api).await.unwrap();
        assert_eq!(report, DrainReport { confirmed: 1, remaining: 0 });
        // Retry reused the persisted id instead of drawing a new one
        let submitted = api.payments();
        assert_eq!(submitted.last().unwrap().2, assigned.raw());
    }

    #[tokio::test]
    async fn test_drain_removes_already_settled_intent() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        let api = MockGateway::new();

        let mut intent = PendingPayment::new("bob", "40.00");
        intent.txn_id = Some(TxnId::new(77));
        queue.enqueue("alice", intent).unwrap();
        api.mark_settled(77);

        let report = queue.drain("alice", &api).await.unwrap();
        assert_eq!(report, DrainReport { confirmed: 1, remaining: 0 });
        assert!(queue.is_empty("alice"));
    }

    #[tokio::test]
    async fn test_drain_leaves_intent_unassigned_when_txid_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        let api = MockGateway::new();
        api.set_fail_txid(true);

        queue
            .enqueue("alice", PendingPayment::new("bob", "40.00"))
            .unwrap();

        let report = queue.drain("alice", &api).await.unwrap();
        assert_eq!(report, DrainReport { confirmed: 0, remaining: 1 });
        // No id, no submit: the intent is exactly as enqueued
        assert_eq!(queue.list("alice")[0].txn_id, None);
        assert_eq!(api.pay_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_assigns_ids_fifo_to_identical_intents() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        let api = MockGateway::new();
        api.set_fail_for("bob");

        // Two identical intents; ids must go to the front one first
        queue
            .enqueue("alice", PendingPayment::new("bob", "5.00"))
            .unwrap();
        queue
            .enqueue("alice", PendingPayment::new("bob", "5.00"))
            .unwrap();

        queue.drain("alice", &api).await.unwrap();
        let kept = queue.list("alice");
        assert_eq!(kept.len(), 2);
        let first = kept[0].txn_id.unwrap();
        let second = kept[1].txn_id.unwrap();
        assert!(first.raw() < second.raw());
    }
}
