//! payrail - Interbank Payment Switch
//!
//! A gateway coordinator drives two-phase commit against independent bank
//! nodes, with snowflake transaction ids, replay protection backed by a
//! durable outcome log, and idempotent settlement.
//!
//! # Modules
//!
//! - [`types`] - Core identifiers (TxnId, BankId) and journal statuses
//! - [`txid`] - Snowflake transaction id generator
//! - [`money`] - Minor-unit amount parsing/formatting
//! - [`error`] - Payment error taxonomy
//! - [`store`] - Per-process account storage with idempotent debit/credit
//! - [`ledger`] - Append-only outcome log with success index
//! - [`replay`] - Fresh/Cached/Replay id classification
//! - [`registry`] - Bank directory (address + online flag)
//! - [`auth`] - Password credentials and JWT tokens
//! - [`participant`] - Bank-side 2PC state machine, RPC client, node server
//! - [`coordinator`] - Gateway-side 2PC driver, journal, recovery worker
//! - [`gateway`] - HTTP API for clients
//! - [`client`] - Payment client with durable pending-payment retries

pub mod auth;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod participant;
pub mod registry;
pub mod replay;
pub mod store;
pub mod txid;
pub mod types;

// Convenient re-exports at crate root
pub use error::PaymentError;
pub use ledger::{OutcomeKind, OutcomeLedger, OutcomeRecord, OutcomeStatus};
pub use registry::BankRegistry;
pub use replay::{ReplayCheck, ReplayGuard};
pub use store::{Account, AccountStore, ApplyOutcome, JsonStore, MemoryStore};
pub use txid::TxnIdGenerator;
pub use types::{BankId, PaymentReceipt, TxnId, TxnStatus};
