//! Shared state for gateway handlers

use std::sync::Arc;

use crate::auth::AuthService;
use crate::coordinator::PaymentCoordinator;
use crate::registry::BankRegistry;
use crate::store::AccountStore;
use crate::txid::TxnIdGenerator;

/// Application state shared across all gateway handlers
pub struct AppState {
    /// Master account book: every user of every bank
    pub store: Arc<dyn AccountStore>,
    /// Bank directory with reachability flags
    pub registry: Arc<BankRegistry>,
    /// Login and token verification
    pub auth: Arc<AuthService>,
    /// Transaction id generator for this gateway instance
    pub txid: Arc<TxnIdGenerator>,
    /// Payment pipeline
    pub coordinator: Arc<PaymentCoordinator>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn AccountStore>,
        registry: Arc<BankRegistry>,
        auth: Arc<AuthService>,
        txid: Arc<TxnIdGenerator>,
        coordinator: Arc<PaymentCoordinator>,
    ) -> Self {
        Self {
            store,
            registry,
            auth,
            txid,
            coordinator,
        }
    }
}
