//! Payment Coordinator
//!
//! Drives a payment end to end: replay check, validation, 2PC against the
//! receiving bank, then settlement (sender debit, receiver credit) gated
//! behind a durably journaled COMMITTED record. Everything after COMMITTED
//! is idempotent per transaction id, so the recovery worker can re-drive an
//! interrupted settlement without moving funds twice.

pub mod journal;
pub mod recovery;

pub use journal::{TxnJournal, TxnRecord};
pub use recovery::{RecoveryWorker, WorkerConfig};

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::PaymentError;
use crate::ledger::{OutcomeKind, OutcomeLedger, OutcomeRecord, OutcomeStatus};
use crate::money::format_amount;
use crate::participant::{ParticipantClient, ParticipantDirectory};
use crate::registry::BankRegistry;
use crate::replay::{ReplayCheck, ReplayGuard};
use crate::store::AccountStore;
use crate::txid::TxnIdGenerator;
use crate::types::{BankId, PaymentReceipt, TxnId, TxnStatus};

/// A payment request whose principal has already been authenticated
#[derive(Debug, Clone)]
pub struct PaymentOrder {
    pub sender: String,
    pub receiver: String,
    /// Minor units, already parsed and validated for format
    pub amount: u64,
    /// Client-assigned id (offline retry); `None` draws a fresh one
    pub txn_id: Option<TxnId>,
}

pub struct PaymentCoordinator {
    store: Arc<dyn AccountStore>,
    journal: Arc<TxnJournal>,
    ledger: Arc<OutcomeLedger>,
    replay: Arc<ReplayGuard>,
    registry: Arc<BankRegistry>,
    directory: Arc<dyn ParticipantDirectory>,
    txid: Arc<TxnIdGenerator>,
}

impl PaymentCoordinator {
    pub fn new(
        store: Arc<dyn AccountStore>,
        journal: Arc<TxnJournal>,
        ledger: Arc<OutcomeLedger>,
        replay: Arc<ReplayGuard>,
        registry: Arc<BankRegistry>,
        directory: Arc<dyn ParticipantDirectory>,
        txid: Arc<TxnIdGenerator>,
    ) -> Self {
        Self {
            store,
            journal,
            ledger,
            replay,
            registry,
            directory,
            txid,
        }
    }

    pub fn journal(&self) -> &Arc<TxnJournal> {
        &self.journal
    }

    /// Process one payment to a terminal answer.
    ///
    /// Duplicate ids answer from the cache; settled ids without a cache
    /// entry are refused as replays. Validation declines log a FAILED
    /// outcome but never journal, so a corrected retry may reuse the id.
    pub async fn process_payment(
        &self,
        order: PaymentOrder,
    ) -> Result<PaymentReceipt, PaymentError> {
        let txn_id = match order.txn_id {
            Some(id) => id,
            None => self.txid.next_id()?,
        };

        match self.replay.check(txn_id) {
            ReplayCheck::Cached(receipt) => {
                info!(txn_id = %txn_id, "Duplicate request answered from cache");
                return Ok(receipt);
            }
            ReplayCheck::Replay => {
                warn!(txn_id = %txn_id, "Replay of settled transaction refused");
                return Err(PaymentError::Replay);
            }
            ReplayCheck::Fresh => {}
        }

        let (sender_bank, receiver_bank) = match self.validate(&order) {
            Ok(banks) => banks,
            Err(e) => {
                self.log_validation_failure(txn_id, &order, &e);
                return Err(e);
            }
        };

        let record = self.journal.begin(TxnRecord::new(
            txn_id,
            &order.sender,
            &order.receiver,
            sender_bank,
            receiver_bank,
            order.amount,
        ))?;

        info!(
            txn_id = %txn_id,
            sender = %record.sender,
            receiver = %record.receiver,
            amount = record.amount,
            attempt = record.attempt,
            "Payment initiated: {} -> {}",
            record.sender_bank,
            record.receiver_bank
        );

        let participant = match self.directory.client_for(&record.receiver_bank) {
            Ok(p) => p,
            Err(e) => {
                self.mark(txn_id, TxnStatus::Initiated, TxnStatus::Failed);
                self.log_outcome(&record, OutcomeStatus::Failed, &e.to_string());
                return Err(e);
            }
        };

        // Phase one
        if let Err(e) = participant
            .prepare(txn_id, &record.sender, &record.receiver, record.amount)
            .await
        {
            warn!(txn_id = %txn_id, bank = %record.receiver_bank, error = %e, "Prepare failed, aborting");
            self.abort_participant(participant.as_ref(), txn_id).await;
            self.mark(txn_id, TxnStatus::Initiated, TxnStatus::Failed);
            self.log_outcome(&record, OutcomeStatus::Failed, &e.to_string());
            return Err(e);
        }
        self.journal
            .advance(txn_id, TxnStatus::Initiated, TxnStatus::Prepared)?;

        // Phase two
        if let Err(e) = participant.commit(txn_id).await {
            warn!(txn_id = %txn_id, bank = %record.receiver_bank, error = %e, "Commit failed, aborting");
            self.abort_participant(participant.as_ref(), txn_id).await;
            self.mark(txn_id, TxnStatus::Prepared, TxnStatus::Aborted);
            self.log_outcome(&record, OutcomeStatus::Aborted, &e.to_string());
            return Err(e);
        }

        // Point of no return: COMMITTED hits disk before any balance moves.
        // From here the transaction settles, now or via recovery.
        self.journal
            .advance(txn_id, TxnStatus::Prepared, TxnStatus::Committed)?;

        self.settle(&record).await
    }

    /// Settle a committed transaction: debit, credit, complete, log, cache.
    ///
    /// Every step is idempotent per id; callers may re-drive after a crash.
    /// Any failure here leaves the journal in COMMITTED for the recovery
    /// worker and reports the reconciliation category, never a decline.
    pub(crate) async fn settle(&self, record: &TxnRecord) -> Result<PaymentReceipt, PaymentError> {
        let txn_id = record.id;

        self.store
            .debit_once(txn_id, &record.sender, record.amount)
            .map_err(|e| {
                error!(
                    txn_id = %txn_id,
                    sender = %record.sender,
                    error = %e,
                    "RECONCILIATION REQUIRED: sender debit failed after commit"
                );
                PaymentError::CreditFailed(format!("sender debit failed after commit: {}", e))
            })?;

        // Mirror book at the gateway, same idempotency key as the bank's
        self.store
            .credit_once(txn_id, &record.receiver, record.amount)
            .map_err(|e| {
                error!(
                    txn_id = %txn_id,
                    receiver = %record.receiver,
                    error = %e,
                    "RECONCILIATION REQUIRED: receiver credit failed after commit"
                );
                PaymentError::CreditFailed(format!("receiver credit failed after commit: {}", e))
            })?;

        let participant = self
            .directory
            .client_for(&record.receiver_bank)
            .map_err(|e| PaymentError::CreditFailed(e.to_string()))?;
        if let Err(e) = participant
            .credit(txn_id, &record.sender, &record.receiver, record.amount)
            .await
        {
            error!(
                txn_id = %txn_id,
                bank = %record.receiver_bank,
                error = %e,
                "RECONCILIATION REQUIRED: credit transfer failed after debit"
            );
            return Err(match e {
                PaymentError::CreditFailed(m) => PaymentError::CreditFailed(m),
                other => PaymentError::CreditFailed(other.to_string()),
            });
        }

        // Funds are fully applied; bookkeeping failures below are logged
        // but no longer change the business outcome.
        self.mark(txn_id, TxnStatus::Committed, TxnStatus::Completed);
        self.log_outcome(record, OutcomeStatus::Completed, "settled");

        let receipt = PaymentReceipt {
            txn_id,
            sender: record.sender.clone(),
            receiver: record.receiver.clone(),
            sender_bank: record.sender_bank.clone(),
            receiver_bank: record.receiver_bank.clone(),
            amount: record.amount,
            message: format!(
                "transferred {} to {}",
                format_amount(record.amount),
                record.receiver
            ),
        };
        self.replay.record_success(receipt.clone());

        info!(
            txn_id = %txn_id,
            amount = record.amount,
            "Payment completed: {} -> {}",
            record.sender,
            record.receiver
        );
        Ok(receipt)
    }

    /// Presumed abort for attempts stranded before COMMITTED by a crash.
    ///
    /// Call before serving traffic; once requests are live, pre-commit
    /// records belong to their in-flight request.
    pub async fn abort_stalled(&self) -> usize {
        let mut aborted = 0;
        for record in self.journal.stalled() {
            warn!(
                txn_id = %record.id,
                status = record.status.as_str(),
                "Aborting attempt stranded by previous run"
            );
            match record.status {
                TxnStatus::Initiated => {
                    self.mark(record.id, TxnStatus::Initiated, TxnStatus::Failed);
                    self.log_outcome(&record, OutcomeStatus::Failed, "interrupted before prepare");
                    aborted += 1;
                }
                TxnStatus::Prepared => {
                    if let Ok(participant) = self.directory.client_for(&record.receiver_bank) {
                        self.abort_participant(participant.as_ref(), record.id).await;
                    }
                    self.mark(record.id, TxnStatus::Prepared, TxnStatus::Aborted);
                    self.log_outcome(&record, OutcomeStatus::Aborted, "interrupted before commit");
                    aborted += 1;
                }
                _ => {}
            }
        }
        aborted
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn validate(&self, order: &PaymentOrder) -> Result<(BankId, BankId), PaymentError> {
        if order.sender == order.receiver {
            return Err(PaymentError::SameAccount);
        }

        let sender = self
            .store
            .get(&order.sender)
            .ok_or_else(|| PaymentError::UnknownAccount(order.sender.clone()))?;
        let receiver = self
            .store
            .get(&order.receiver)
            .ok_or_else(|| PaymentError::UnknownAccount(order.receiver.clone()))?;

        if order.amount == 0 {
            return Err(PaymentError::InvalidAmount(
                "amount must be positive".to_string(),
            ));
        }
        if sender.balance() < order.amount {
            return Err(PaymentError::InsufficientFunds);
        }

        match self.registry.is_online(receiver.bank()) {
            Some(true) => {}
            Some(false) => return Err(PaymentError::BankOffline(receiver.bank().to_string())),
            None => return Err(PaymentError::UnknownBank(receiver.bank().to_string())),
        }

        Ok((sender.bank().clone(), receiver.bank().clone()))
    }

    async fn abort_participant(&self, participant: &dyn ParticipantClient, txn_id: TxnId) {
        if let Err(e) = participant.abort(txn_id).await {
            warn!(txn_id = %txn_id, error = %e, "Abort call failed");
        }
    }

    /// Journal transition where failure must not mask the business outcome
    fn mark(&self, txn_id: TxnId, from: TxnStatus, to: TxnStatus) {
        if let Err(e) = self.journal.advance(txn_id, from, to) {
            error!(
                txn_id = %txn_id,
                from = from.as_str(),
                to = to.as_str(),
                error = %e,
                "Journal transition not persisted"
            );
        }
    }

    fn log_outcome(&self, record: &TxnRecord, status: OutcomeStatus, detail: &str) {
        let kind = if record.sender_bank == record.receiver_bank {
            OutcomeKind::Transfer
        } else {
            OutcomeKind::InterbankTransfer
        };
        let entry = OutcomeRecord::new(
            record.id,
            &record.sender,
            &record.receiver,
            record.sender_bank.clone(),
            record.receiver_bank.clone(),
            record.amount,
            kind,
            status,
            detail,
        );
        if let Err(e) = self.ledger.append(&entry) {
            error!(txn_id = %record.id, error = %e, "Outcome entry not persisted");
        }
    }

    /// Validation declines are outcome-logged but never journaled; the id
    /// stays reusable for a corrected retry.
    fn log_validation_failure(&self, txn_id: TxnId, order: &PaymentOrder, e: &PaymentError) {
        let bank_of = |owner: &str| {
            self.store
                .get(owner)
                .map(|a| a.bank().clone())
                .unwrap_or_else(|| BankId::from("unknown"))
        };
        let sender_bank = bank_of(&order.sender);
        let receiver_bank = bank_of(&order.receiver);
        let kind = if sender_bank == receiver_bank {
            OutcomeKind::Transfer
        } else {
            OutcomeKind::InterbankTransfer
        };

        let entry = OutcomeRecord::new(
            txn_id,
            &order.sender,
            &order.receiver,
            sender_bank,
            receiver_bank,
            order.amount,
            kind,
            OutcomeStatus::Failed,
            e.to_string(),
        );
        if let Err(append_err) = self.ledger.append(&entry) {
            error!(txn_id = %txn_id, error = %append_err, "Outcome entry not persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::rpc::MockParticipant;
    use crate::participant::{LocalParticipant, Participant, StaticDirectory};
    use crate::store::{Account, MemoryStore};

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        bank_store: Arc<MemoryStore>,
        registry: Arc<BankRegistry>,
        mock: Arc<MockParticipant>,
        coordinator: PaymentCoordinator,
    }

    /// Gateway book with alice@BankA and bob@BankB; BankB served by a real
    /// in-process participant over its own store, BankC by a mock.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();

        let store = Arc::new(MemoryStore::new());
        store
            .upsert(Account::new("alice", BankId::from("BankA"), 100_00, "h"))
            .unwrap();
        store
            .upsert(Account::new("bob", BankId::from("BankB"), 10_00, "h"))
            .unwrap();
        store
            .upsert(Account::new("carol", BankId::from("BankC"), 5_00, "h"))
            .unwrap();

        let bank_store = Arc::new(MemoryStore::new());
        bank_store
            .upsert(Account::new("bob", BankId::from("BankB"), 10_00, "h"))
            .unwrap();

        let registry = Arc::new(BankRegistry::new());
        registry.register(BankId::from("BankA"), "local".to_string(), true);
        registry.register(BankId::from("BankB"), "local".to_string(), true);
        registry.register(BankId::from("BankC"), "local".to_string(), true);

        let participant = Arc::new(Participant::new(
            BankId::from("BankB"),
            bank_store.clone() as Arc<dyn AccountStore>,
        ));
        let mock = Arc::new(MockParticipant::new("BankC"));

        let directory = Arc::new(StaticDirectory::new());
        directory.insert(Arc::new(LocalParticipant::new(participant)));
        directory.insert(mock.clone());

        let coordinator = build_coordinator(&dir, store.clone(), registry.clone(), directory);
        Fixture {
            dir,
            store,
            bank_store,
            registry,
            mock,
            coordinator,
        }
    }

    fn build_coordinator(
        dir: &tempfile::TempDir,
        store: Arc<MemoryStore>,
        registry: Arc<BankRegistry>,
        directory: Arc<StaticDirectory>,
    ) -> PaymentCoordinator {
        let journal = Arc::new(TxnJournal::open(dir.path().join("txn_journal.log")).unwrap());
        let ledger = Arc::new(OutcomeLedger::open(dir.path().join("transactions.log")).unwrap());
        let replay = Arc::new(ReplayGuard::new(ledger.clone()));
        let txid = Arc::new(TxnIdGenerator::new(0, 0).unwrap());

        PaymentCoordinator::new(
            store,
            journal,
            ledger,
            replay,
            registry,
            directory,
            txid,
        )
    }

    fn order(sender: &str, receiver: &str, amount: u64, txn_id: Option<u64>) -> PaymentOrder {
        PaymentOrder {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
            txn_id: txn_id.map(TxnId::new),
        }
    }

    /// Lines in the outcome log that carry the given terminal status.
    fn outcome_lines(dir: &tempfile::TempDir, status: &str) -> usize {
        let needle = format!("\"{}\"", status);
        std::fs::read_to_string(dir.path().join("transactions.log"))
            .unwrap()
            .lines()
            .filter(|line| line.contains(&needle))
            .count()
    }

    #[tokio::test]
    async fn test_interbank_payment_end_to_end() {
        let f = fixture();

        let receipt = f
            .coordinator
            .process_payment(order("alice", "bob", 40_00, Some(1)))
            .await
            .unwrap();

        assert_eq!(receipt.amount, 40_00);
        assert_eq!(receipt.sender_bank.as_str(), "BankA");
        assert_eq!(receipt.receiver_bank.as_str(), "BankB");
        assert_eq!(receipt.message, "transferred 40.00 to bob");

        // Gateway book and the receiving bank's shard both moved
        assert_eq!(f.store.balance_of("alice"), Some(60_00));
        assert_eq!(f.store.balance_of("bob"), Some(50_00));
        assert_eq!(f.bank_store.balance_of("bob"), Some(50_00));

        let journaled = f.coordinator.journal().get(TxnId::new(1)).unwrap();
        assert_eq!(journaled.status, TxnStatus::Completed);
    }

    #[tokio::test]
    async fn test_duplicate_call_returns_cached_receipt_single_debit() {
        let f = fixture();

        let first = f
            .coordinator
            .process_payment(order("alice", "bob", 40_00, Some(2)))
            .await
            .unwrap();
        let second = f
            .coordinator
            .process_payment(order("alice", "bob", 40_00, Some(2)))
            .await
            .unwrap();

        assert_eq!(first, second);
        // One debit, one credit, despite two calls
        assert_eq!(f.store.balance_of("alice"), Some(60_00));
        assert_eq!(f.bank_store.balance_of("bob"), Some(50_00));
    }

    #[tokio::test]
    async fn test_insufficient_funds_declined_without_journal() {
        let f = fixture();

        let err = f
            .coordinator
            .process_payment(order("alice", "bob", 500_00, Some(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InsufficientFunds));

        assert_eq!(f.store.balance_of("alice"), Some(100_00));
        // Validation declines never journal; the id stays reusable. The
        // decline still lands in the outcome log as FAILED.
        assert!(f.coordinator.journal().get(TxnId::new(3)).is_none());
        assert_eq!(outcome_lines(&f.dir, "FAILED"), 1);

        let receipt = f
            .coordinator
            .process_payment(order("alice", "bob", 40_00, Some(3)))
            .await
            .unwrap();
        assert_eq!(receipt.amount, 40_00);
        assert_eq!(outcome_lines(&f.dir, "COMPLETED"), 1);
        assert_eq!(outcome_lines(&f.dir, "FAILED"), 1);
    }

    #[tokio::test]
    async fn test_validation_declines() {
        let f = fixture();

        let err = f
            .coordinator
            .process_payment(order("alice", "alice", 10_00, Some(4)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::SameAccount));

        let err = f
            .coordinator
            .process_payment(order("alice", "ghost", 10_00, Some(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::UnknownAccount(_)));

        let err = f
            .coordinator
            .process_payment(order("alice", "bob", 0, Some(6)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidAmount(_)));

        // Each decline left its own FAILED line in the outcome log
        assert_eq!(outcome_lines(&f.dir, "FAILED"), 3);
    }

    #[tokio::test]
    async fn test_offline_receiver_bank_declined() {
        let f = fixture();
        f.registry.set_online(&BankId::from("BankB"), false);

        let err = f
            .coordinator
            .process_payment(order("alice", "bob", 40_00, Some(7)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::BankOffline(_)));
        assert_eq!(f.store.balance_of("alice"), Some(100_00));

        // Back online, same id goes through
        f.registry.set_online(&BankId::from("BankB"), true);
        f.coordinator
            .process_payment(order("alice", "bob", 40_00, Some(7)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_prepare_decline_fails_and_reopens() {
        let f = fixture();
        f.mock.set_fail_prepare(true);

        let err = f
            .coordinator
            .process_payment(order("alice", "carol", 10_00, Some(8)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::PrepareDeclined(_)));
        assert_eq!(f.mock.abort_count(), 1);
        assert_eq!(f.store.balance_of("alice"), Some(100_00));
        assert_eq!(
            f.coordinator.journal().get(TxnId::new(8)).unwrap().status,
            TxnStatus::Failed
        );
        assert_eq!(outcome_lines(&f.dir, "FAILED"), 1);

        // The same id reopens once the bank accepts
        f.mock.set_fail_prepare(false);
        let receipt = f
            .coordinator
            .process_payment(order("alice", "carol", 10_00, Some(8)))
            .await
            .unwrap();
        assert_eq!(receipt.receiver, "carol");

        let journaled = f.coordinator.journal().get(TxnId::new(8)).unwrap();
        assert_eq!(journaled.status, TxnStatus::Completed);
        assert_eq!(journaled.attempt, 2);
        assert_eq!(outcome_lines(&f.dir, "COMPLETED"), 1);
        assert_eq!(outcome_lines(&f.dir, "FAILED"), 1);
    }

    #[tokio::test]
    async fn test_prepare_timeout_is_failure_not_hang() {
        let f = fixture();
        f.mock.set_timeout_prepare(true);

        let err = f
            .coordinator
            .process_payment(order("alice", "carol", 10_00, Some(9)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::PrepareTimeout));
        assert_eq!(f.mock.abort_count(), 1);
        assert_eq!(f.store.balance_of("alice"), Some(100_00));
        assert_eq!(
            f.coordinator.journal().get(TxnId::new(9)).unwrap().status,
            TxnStatus::Failed
        );
        assert_eq!(outcome_lines(&f.dir, "FAILED"), 1);
    }

    #[tokio::test]
    async fn test_commit_decline_aborts() {
        let f = fixture();
        f.mock.set_fail_commit(true);

        let err = f
            .coordinator
            .process_payment(order("alice", "carol", 10_00, Some(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::CommitDeclined(_)));
        assert_eq!(f.mock.abort_count(), 1);
        assert_eq!(f.store.balance_of("alice"), Some(100_00));
        assert_eq!(
            f.coordinator.journal().get(TxnId::new(10)).unwrap().status,
            TxnStatus::Aborted
        );
        assert_eq!(outcome_lines(&f.dir, "ABORTED"), 1);
    }

    #[tokio::test]
    async fn test_credit_failure_is_reconciliation_not_decline() {
        let f = fixture();
        f.mock.set_fail_credit(true);

        let err = f
            .coordinator
            .process_payment(order("alice", "carol", 10_00, Some(11)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::CreditFailed(_)));
        assert!(!err.is_decline());

        // Sender is debited; the journal stays COMMITTED for recovery
        assert_eq!(f.store.balance_of("alice"), Some(90_00));
        assert_eq!(
            f.coordinator.journal().get(TxnId::new(11)).unwrap().status,
            TxnStatus::Committed
        );
        assert_eq!(f.coordinator.journal().in_flight().len(), 1);
    }

    #[tokio::test]
    async fn test_generated_id_when_absent() {
        let f = fixture();

        let receipt = f
            .coordinator
            .process_payment(order("alice", "bob", 5_00, None))
            .await
            .unwrap();
        assert!(receipt.txn_id.raw() > 0);
        assert_eq!(f.store.balance_of("alice"), Some(95_00));
    }

    #[tokio::test]
    async fn test_settled_id_refused_after_restart() {
        let f = fixture();

        f.coordinator
            .process_payment(order("alice", "bob", 40_00, Some(12)))
            .await
            .unwrap();

        // A fresh coordinator over the same files has a cold cache but a
        // reloaded ledger index: the id must be refused, not re-settled.
        let directory = Arc::new(StaticDirectory::new());
        let participant = Arc::new(Participant::new(
            BankId::from("BankB"),
            f.bank_store.clone() as Arc<dyn AccountStore>,
        ));
        directory.insert(Arc::new(LocalParticipant::new(participant)));
        let restarted =
            build_coordinator(&f.dir, f.store.clone(), f.registry.clone(), directory);

        let err = restarted
            .process_payment(order("alice", "bob", 40_00, Some(12)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Replay));
        assert_eq!(f.store.balance_of("alice"), Some(60_00));
        assert_eq!(f.bank_store.balance_of("bob"), Some(50_00));
    }
}
