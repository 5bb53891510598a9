//! Core Types
//!
//! Shared identifiers and the per-transaction journal status enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// Snowflake bit layout (LSB -> MSB): sequence | machine | datacenter | timestamp
pub const SEQUENCE_BITS: u32 = 12;
pub const MACHINE_BITS: u32 = 5;
pub const DATACENTER_BITS: u32 = 5;

pub const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
pub const MAX_MACHINE_ID: u8 = (1 << MACHINE_BITS) - 1;
pub const MAX_DATACENTER_ID: u8 = (1 << DATACENTER_BITS) - 1;

/// Custom epoch for transaction id timestamps: 2022-01-01T00:00:00Z in ms.
pub const TXN_ID_EPOCH_MS: u64 = 1_640_995_200_000;

/// Globally unique transaction identifier
///
/// 64-bit snowflake: 41-bit ms-since-epoch, 5-bit datacenter, 5-bit machine,
/// 12-bit per-millisecond sequence. Ordering follows generation time within
/// a single generator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(u64);

impl TxnId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw 64-bit value
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Milliseconds since the custom epoch when this id was generated
    pub fn timestamp_ms(&self) -> u64 {
        (self.0 >> (SEQUENCE_BITS + MACHINE_BITS + DATACENTER_BITS)) + TXN_ID_EPOCH_MS
    }

    /// Datacenter id embedded in the id
    pub fn datacenter_id(&self) -> u8 {
        ((self.0 >> (SEQUENCE_BITS + MACHINE_BITS)) & MAX_DATACENTER_ID as u64) as u8
    }

    /// Machine id embedded in the id
    pub fn machine_id(&self) -> u8 {
        ((self.0 >> SEQUENCE_BITS) & MAX_MACHINE_ID as u64) as u8
    }

    /// Per-millisecond sequence number embedded in the id
    pub fn sequence(&self) -> u16 {
        (self.0 & MAX_SEQUENCE) as u16
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TxnId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Bank identifier (registry key, e.g. "BankA")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BankId(String);

impl BankId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BankId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Canonical success response for a settled payment
///
/// Stored verbatim by the replay cache; a duplicate request gets this exact
/// receipt back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub txn_id: TxnId,
    pub sender: String,
    pub receiver: String,
    pub sender_bank: BankId,
    pub receiver_bank: BankId,
    pub amount: u64,
    pub message: String,
}

/// Transaction journal statuses
///
/// Forward-only within a single attempt. COMMITTED and COMPLETED are
/// successful states and never reopen; ABORTED and FAILED may be reopened
/// by an explicit fresh client attempt with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnStatus {
    /// Request validated and recorded
    Initiated,
    /// Receiving bank acknowledged prepare
    Prepared,
    /// Point of no return - funds will move (persisted before the debit)
    Committed,
    /// Terminal: debit and credit both applied
    Completed,
    /// Terminal: aborted after prepare (no funds moved)
    Aborted,
    /// Terminal: declined or failed before commit (no funds moved)
    Failed,
}

impl TxnStatus {
    /// Terminal for the current attempt (no further transitions)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxnStatus::Completed | TxnStatus::Aborted | TxnStatus::Failed
        )
    }

    /// Funds movement has been decided but may not be fully applied yet
    #[inline]
    pub fn is_settling(&self) -> bool {
        matches!(self, TxnStatus::Committed)
    }

    /// Successful states never reopen for a new attempt
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, TxnStatus::Committed | TxnStatus::Completed)
    }

    /// Get human-readable status name
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Initiated => "INITIATED",
            TxnStatus::Prepared => "PREPARED",
            TxnStatus::Committed => "COMMITTED",
            TxnStatus::Completed => "COMPLETED",
            TxnStatus::Aborted => "ABORTED",
            TxnStatus::Failed => "FAILED",
        }
    }

    /// Check whether `next` is a legal forward transition from `self`
    pub fn can_advance_to(&self, next: TxnStatus) -> bool {
        use TxnStatus::*;
        matches!(
            (self, next),
            (Initiated, Prepared)
                | (Initiated, Failed)
                | (Prepared, Committed)
                | (Prepared, Aborted)
                | (Prepared, Failed)
                | (Committed, Completed)
        )
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
