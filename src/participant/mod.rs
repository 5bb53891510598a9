//! Bank Participant
//!
//! Bank-side half of the two-phase commit protocol. Each bank node keeps an
//! in-memory vote table keyed by transaction id; the durable double-credit
//! guard lives in the account store's applied-operation set, so a node that
//! restarts between commit and credit still refuses a duplicate credit.

pub mod rpc;
pub mod server;

pub use rpc::{
    HttpParticipantClient, HttpParticipantDirectory, LocalParticipant, ParticipantClient,
    ParticipantDirectory, StaticDirectory,
};

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{info, warn};

use crate::error::PaymentError;
use crate::store::{AccountStore, ApplyOutcome};
use crate::types::{BankId, TxnId};

/// Vote state for one in-flight transaction on this bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteState {
    /// Prepare accepted, awaiting commit or abort.
    Prepared,
    /// Commit received, awaiting the credit (receiving side) or cleanup.
    Committed,
}

#[derive(Debug, Clone)]
struct PendingTxn {
    sender: String,
    amount: u64,
    state: VoteState,
}

/// Two-phase-commit participant for a single bank.
pub struct Participant {
    bank_id: BankId,
    store: Arc<dyn AccountStore>,
    pending: DashMap<TxnId, PendingTxn>,
}

impl Participant {
    pub fn new(bank_id: BankId, store: Arc<dyn AccountStore>) -> Self {
        Self {
            bank_id,
            store,
            pending: DashMap::new(),
        }
    }

    pub fn bank_id(&self) -> &BankId {
        &self.bank_id
    }

    /// Phase one: vote on a proposed transfer.
    ///
    /// A repeated prepare for a known transaction id is a no-op vote-yes; the
    /// original validation is not re-run. Funds are only checked when the
    /// sender holds an account at this bank, the receiving side votes yes on
    /// any well-formed request.
    pub fn prepare(&self, txn_id: TxnId, sender: &str, amount: u64) -> Result<(), PaymentError> {
        match self.pending.entry(txn_id) {
            Entry::Occupied(_) => {
                info!(txn_id = %txn_id, bank = %self.bank_id, "Prepare replayed, vote unchanged");
                Ok(())
            }
            Entry::Vacant(entry) => {
                if amount == 0 {
                    return Err(PaymentError::PrepareDeclined(
                        "amount must be positive".to_string(),
                    ));
                }
                if let Some(account) = self.store.get(sender)
                    && account.balance() < amount
                {
                    warn!(
                        txn_id = %txn_id,
                        bank = %self.bank_id,
                        sender = sender,
                        "Prepare declined: insufficient funds"
                    );
                    return Err(PaymentError::PrepareDeclined(format!(
                        "insufficient funds for {}",
                        sender
                    )));
                }
                entry.insert(PendingTxn {
                    sender: sender.to_string(),
                    amount,
                    state: VoteState::Prepared,
                });
                info!(txn_id = %txn_id, bank = %self.bank_id, "Prepared");
                Ok(())
            }
        }
    }

    /// Phase two: finalize a previously prepared transaction.
    ///
    /// Commit of an already committed id is idempotent. Commit of an unknown
    /// id is declined, the coordinator must have prepared it first.
    pub fn commit(&self, txn_id: TxnId) -> Result<(), PaymentError> {
        match self.pending.get_mut(&txn_id) {
            Some(mut entry) => match entry.state {
                VoteState::Prepared => {
                    entry.state = VoteState::Committed;
                    info!(txn_id = %txn_id, bank = %self.bank_id, "Committed");
                    Ok(())
                }
                VoteState::Committed => {
                    info!(txn_id = %txn_id, bank = %self.bank_id, "Commit replayed, already committed");
                    Ok(())
                }
            },
            None => {
                warn!(txn_id = %txn_id, bank = %self.bank_id, "Commit declined: not prepared");
                Err(PaymentError::CommitDeclined(format!(
                    "transaction {} was never prepared on {}",
                    txn_id, self.bank_id
                )))
            }
        }
    }

    /// Discard a prepared transaction.
    ///
    /// Aborting an unknown id is a no-op so the coordinator can abort
    /// unconditionally after a failed prepare round. Aborting a committed
    /// transaction is refused, at that point only completion is possible.
    pub fn abort(&self, txn_id: TxnId) -> Result<(), PaymentError> {
        match self.pending.entry(txn_id) {
            Entry::Occupied(entry) => match entry.get().state {
                VoteState::Prepared => {
                    entry.remove();
                    info!(txn_id = %txn_id, bank = %self.bank_id, "Aborted");
                    Ok(())
                }
                VoteState::Committed => {
                    warn!(txn_id = %txn_id, bank = %self.bank_id, "Abort refused: already committed");
                    Err(PaymentError::InvalidState(format!(
                        "transaction {} already committed on {}",
                        txn_id, self.bank_id
                    )))
                }
            },
            Entry::Vacant(_) => {
                info!(txn_id = %txn_id, bank = %self.bank_id, "Abort of unknown transaction, no-op");
                Ok(())
            }
        }
    }

    /// Apply the credit leg of a settled transfer to a local account.
    ///
    /// Relies on the store's applied-operation set rather than the in-memory
    /// vote table: the vote table is lost on restart but a credit must stay
    /// refusable forever once applied.
    pub fn credit_transfer(
        &self,
        txn_id: TxnId,
        receiver: &str,
        amount: u64,
    ) -> Result<ApplyOutcome, PaymentError> {
        let outcome = self.store.credit_once(txn_id, receiver, amount)?;
        match outcome {
            ApplyOutcome::Applied => {
                info!(
                    txn_id = %txn_id,
                    bank = %self.bank_id,
                    receiver = receiver,
                    amount = amount,
                    "Credit applied"
                );
            }
            ApplyOutcome::AlreadyApplied => {
                warn!(
                    txn_id = %txn_id,
                    bank = %self.bank_id,
                    receiver = receiver,
                    "Duplicate credit refused"
                );
            }
        }
        // The vote table entry has served its purpose once funds land.
        self.pending.remove(&txn_id);
        Ok(outcome)
    }

    /// Current vote for a transaction, if any.
    pub fn vote_state(&self, txn_id: TxnId) -> Option<VoteState> {
        self.pending.get(&txn_id).map(|entry| entry.state)
    }

    /// Number of transactions currently holding a vote on this bank.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Sender and amount recorded at prepare time, for audit logging.
    pub fn pending_details(&self, txn_id: TxnId) -> Option<(String, u64)> {
        self.pending
            .get(&txn_id)
            .map(|entry| (entry.sender.clone(), entry.amount))
    }
}
