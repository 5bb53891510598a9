//! Gateway Wire Types
//!
//! Request and response bodies for the public API. The bank node reuses
//! `BalanceResponse` and `HealthResponse` so both services answer the same
//! shapes. Amounts cross the wire as 2-decimal strings; balances travel in
//! minor units with a formatted `display` alongside.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::error::PaymentError;
use crate::money::format_amount;
use crate::types::{PaymentReceipt, TxnId};

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Body of `POST /api/v1/payments`
///
/// `amount` is a decimal string ("40.00"). A client that pre-allocated a
/// transaction id (offline retry) passes it here; otherwise the gateway
/// draws a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub receiver: String,
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// Body of `PUT /api/v1/banks/{bank_id}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankStatusUpdate {
    pub online: bool,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
}

/// Balance answer; `-1` is the sentinel for an invalid or expired token,
/// a real balance is never negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub balance: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl BalanceResponse {
    pub fn of(minor_units: u64) -> Self {
        Self {
            balance: minor_units as i64,
            display: Some(format_amount(minor_units)),
        }
    }

    pub fn sentinel() -> Self {
        Self {
            balance: -1,
            display: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnIdResponse {
    pub transaction_id: String,
}

/// Outcome of `POST /api/v1/payments`, also the cached replay answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub success: bool,
    pub message: String,
    pub transaction_id: String,
    pub receiver: String,
    pub sender_bank: String,
    pub receiver_bank: String,
}

impl From<&PaymentReceipt> for PaymentResponse {
    fn from(receipt: &PaymentReceipt) -> Self {
        Self {
            success: true,
            message: receipt.message.clone(),
            transaction_id: receipt.txn_id.to_string(),
            receiver: receipt.receiver.clone(),
            sender_bank: receipt.sender_bank.to_string(),
            receiver_bank: receipt.receiver_bank.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankStatusResponse {
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub name: String,
    pub version: String,
    pub git_hash: String,
}

/// Error body for every failed API call. A declined payment names the
/// refused transaction in `transaction_id`; errors raised before an id
/// exists omit the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

// ============================================================================
// Error -> response mapping
// ============================================================================

/// Wrapper so handlers can end with `?` on any `PaymentError`
///
/// Once a payment has a transaction id, failures go through
/// [`ApiError::with_txn`] so the refusal names the transaction it refused.
#[derive(Debug)]
pub struct ApiError {
    pub error: PaymentError,
    pub txn_id: Option<TxnId>,
}

impl ApiError {
    pub fn with_txn(txn_id: TxnId, error: PaymentError) -> Self {
        Self {
            error,
            txn_id: Some(txn_id),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        ApiError {
            error: e,
            txn_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            success: false,
            code: self.error.code().to_string(),
            message: self.error.to_string(),
            transaction_id: self.txn_id.map(|id| id.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
