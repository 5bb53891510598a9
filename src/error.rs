//! Payment Error Types
//!
//! One taxonomy shared by the gateway, bank nodes, and client so API
//! responses carry consistent codes.

use thiserror::Error;

/// Payment processing error types
#[derive(Error, Debug, Clone)]
pub enum PaymentError {
    // === Auth Errors ===
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Token expired or invalid")]
    InvalidToken,

    // === Validation Errors ===
    #[error("Account not found: {0}")]
    UnknownAccount(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Sender and receiver cannot be the same account")]
    SameAccount,

    #[error("Bank not registered: {0}")]
    UnknownBank(String),

    #[error("Bank is offline: {0}")]
    BankOffline(String),

    #[error("Invalid transaction id: {0}")]
    InvalidTxnId(String),

    // === Protocol Errors ===
    #[error("Prepare declined by receiving bank: {0}")]
    PrepareDeclined(String),

    #[error("Prepare timed out at receiving bank")]
    PrepareTimeout,

    #[error("Commit declined by receiving bank: {0}")]
    CommitDeclined(String),

    #[error("Credit transfer failed after debit - reconciliation required: {0}")]
    CreditFailed(String),

    #[error("Invalid protocol state: {0}")]
    InvalidState(String),

    // === Replay / Id Errors ===
    #[error("Transaction id already settled - replay refused")]
    Replay,

    #[error("Clock moved backwards - id generation refused")]
    ClockRegression,

    // === System Errors ===
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("RPC failure: {0}")]
    Rpc(String),
}

impl PaymentError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Authentication(_) => "AUTHENTICATION_FAILED",
            PaymentError::InvalidToken => "INVALID_TOKEN",
            PaymentError::UnknownAccount(_) => "UNKNOWN_ACCOUNT",
            PaymentError::InvalidAmount(_) => "INVALID_AMOUNT",
            PaymentError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            PaymentError::SameAccount => "SAME_ACCOUNT",
            PaymentError::UnknownBank(_) => "UNKNOWN_BANK",
            PaymentError::BankOffline(_) => "BANK_OFFLINE",
            PaymentError::InvalidTxnId(_) => "INVALID_TXN_ID",
            PaymentError::PrepareDeclined(_) => "PREPARE_DECLINED",
            PaymentError::PrepareTimeout => "PREPARE_TIMEOUT",
            PaymentError::CommitDeclined(_) => "COMMIT_DECLINED",
            PaymentError::CreditFailed(_) => "CREDIT_FAILED",
            PaymentError::InvalidState(_) => "INVALID_STATE",
            PaymentError::Replay => "REPLAY_REFUSED",
            PaymentError::ClockRegression => "CLOCK_REGRESSION",
            PaymentError::Config(_) => "CONFIG_ERROR",
            PaymentError::Persistence(_) => "PERSISTENCE_ERROR",
            PaymentError::Store(_) => "STORE_ERROR",
            PaymentError::Rpc(_) => "RPC_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            PaymentError::Authentication(_) | PaymentError::InvalidToken => 401,
            PaymentError::Replay => 409,
            PaymentError::InvalidAmount(_)
            | PaymentError::SameAccount
            | PaymentError::InvalidTxnId(_) => 400,
            PaymentError::UnknownAccount(_)
            | PaymentError::InsufficientFunds
            | PaymentError::PrepareDeclined(_)
            | PaymentError::CommitDeclined(_) => 422,
            PaymentError::UnknownBank(_) => 404,
            PaymentError::BankOffline(_) | PaymentError::PrepareTimeout => 503,
            PaymentError::CreditFailed(_)
            | PaymentError::InvalidState(_)
            | PaymentError::ClockRegression
            | PaymentError::Config(_)
            | PaymentError::Persistence(_)
            | PaymentError::Store(_)
            | PaymentError::Rpc(_) => 500,
        }
    }

    /// Declines that reflect the request, not system health. These are
    /// final answers: the same request will fail the same way, so the
    /// client must not queue them for blind retry.
    pub fn is_decline(&self) -> bool {
        matches!(
            self,
            PaymentError::UnknownAccount(_)
                | PaymentError::InvalidAmount(_)
                | PaymentError::InsufficientFunds
                | PaymentError::SameAccount
                | PaymentError::UnknownBank(_)
                | PaymentError::InvalidTxnId(_)
                | PaymentError::Replay
        )
    }
}

impl From<std::io::Error> for PaymentError {
    fn from(e: std::io::Error) -> Self {
        PaymentError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(e: serde_json::Error) -> Self {
        PaymentError::Persistence(e.to_string())
    }
}
