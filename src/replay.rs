//! Idempotency & Replay Guard
//!
//! Three-way classification for an incoming transaction id:
//!
//! - `Fresh`: never seen, process normally.
//! - `Cached`: settled during this process lifetime; hand back the stored
//!   receipt verbatim without touching any balance.
//! - `Replay`: no cached receipt but the durable outcome log says this id
//!   already settled. After a restart the cache is cold, so an id arriving
//!   in this state is a replayed credential, not an innocent retry. Hard
//!   refusal, never silent success.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use crate::ledger::OutcomeLedger;
use crate::types::{PaymentReceipt, TxnId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayCheck {
    Fresh,
    Cached(PaymentReceipt),
    Replay,
}

pub struct ReplayGuard {
    cache: DashMap<TxnId, PaymentReceipt>,
    ledger: Arc<OutcomeLedger>,
}

impl ReplayGuard {
    pub fn new(ledger: Arc<OutcomeLedger>) -> Self {
        Self {
            cache: DashMap::new(),
            ledger,
        }
    }

    /// Classify an incoming id
    pub fn check(&self, id: TxnId) -> ReplayCheck {
        if let Some(receipt) = self.cache.get(&id) {
            return ReplayCheck::Cached(receipt.clone());
        }
        if self.ledger.has_settled(id) {
            warn!(txn_id = %id, "Settled id resubmitted without cached receipt - refusing replay");
            return ReplayCheck::Replay;
        }
        ReplayCheck::Fresh
    }

    /// Store the canonical receipt for a freshly settled payment
    pub fn record_success(&self, receipt: PaymentReceipt) {
        self.cache.insert(receipt.txn_id, receipt);
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}
