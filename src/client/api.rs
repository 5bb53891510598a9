//! Gateway API client
//!
//! The pending-queue drain and the CLI both talk to the gateway through
//! [`GatewayApi`], so tests can swap in a scripted gateway.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PaymentError;
use crate::gateway::types::{
    BalanceResponse, ErrorResponse, LoginRequest, LoginResponse, PaymentRequest, PaymentResponse,
    TxnIdResponse,
};
use crate::types::TxnId;

/// Client-facing gateway operations
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Authenticate and remember the session token
    async fn login(&self, username: &str, password: &str) -> Result<String, PaymentError>;

    /// Balance of the logged-in user; `balance == -1` means the session
    /// is no longer valid
    async fn balance(&self) -> Result<BalanceResponse, PaymentError>;

    /// Draw a fresh transaction id without starting a payment
    async fn next_txn_id(&self) -> Result<TxnId, PaymentError>;

    /// Submit a payment as the logged-in user
    async fn pay(
        &self,
        receiver: &str,
        amount: &str,
        txn_id: Option<TxnId>,
    ) -> Result<PaymentResponse, PaymentError>;
}

/// HTTP client for the gateway
pub struct GatewayClient {
    base_url: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Rpc(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    fn bearer(&self) -> Result<String, PaymentError> {
        self.token
            .read()
            .unwrap()
            .clone()
            .ok_or(PaymentError::InvalidToken)
    }

    async fn post_json<B, R>(
        &self,
        path: &str,
        body: &B,
        token: Option<&str>,
    ) -> Result<R, PaymentError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(transport)?;
        decode(response).await
    }
}

fn transport(e: reqwest::Error) -> PaymentError {
    if e.is_timeout() {
        PaymentError::Rpc("gateway request timed out".to_string())
    } else {
        PaymentError::Rpc(e.to_string())
    }
}

/// Success bodies parse as `R`; error statuses carry an [`ErrorResponse`]
/// whose code is mapped back onto the error it left the gateway as.
async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, PaymentError> {
    if response.status().is_success() {
        return response.json::<R>().await.map_err(transport);
    }
    let err: ErrorResponse = response.json().await.map_err(transport)?;
    Err(error_from_body(err))
}

fn error_from_body(err: ErrorResponse) -> PaymentError {
    match err.code.as_str() {
        "REPLAY_REFUSED" => PaymentError::Replay,
        "INVALID_TOKEN" => PaymentError::InvalidToken,
        "AUTHENTICATION_FAILED" => PaymentError::Authentication(err.message),
        "INSUFFICIENT_FUNDS" => PaymentError::InsufficientFunds,
        "UNKNOWN_ACCOUNT" => PaymentError::UnknownAccount(err.message),
        "SAME_ACCOUNT" => PaymentError::SameAccount,
        "INVALID_AMOUNT" => PaymentError::InvalidAmount(err.message),
        "BANK_OFFLINE" => PaymentError::BankOffline(err.message),
        "UNKNOWN_BANK" => PaymentError::UnknownBank(err.message),
        _ => PaymentError::Rpc(format!("{} ({})", err.message, err.code)),
    }
}

#[async_trait]
impl GatewayApi for GatewayClient {
    async fn login(&self, username: &str, password: &str) -> Result<String, PaymentError> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let resp: LoginResponse = self.post_json("auth/login", &body, None).await?;
        *self.token.write().unwrap() = Some(resp.token.clone());
        Ok(resp.token)
    }

    async fn balance(&self) -> Result<BalanceResponse, PaymentError> {
        let token = self.bearer()?;
        let response = self
            .client
            .get(self.url("balance"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn next_txn_id(&self) -> Result<TxnId, PaymentError> {
        let resp: TxnIdResponse = self.post_json("txid", &(), None).await?;
        resp.transaction_id
            .parse()
            .map_err(|_| PaymentError::InvalidTxnId(resp.transaction_id))
    }

    async fn pay(
        &self,
        receiver: &str,
        amount: &str,
        txn_id: Option<TxnId>,
    ) -> Result<PaymentResponse, PaymentError> {
        let token = self.bearer()?;
        let body = PaymentRequest {
            receiver: receiver.to_string(),
            amount: amount.to_string(),
            transaction_id: txn_id.map(|id| id.to_string()),
        };
        self.post_json("payments", &body, Some(&token)).await
    }
}

// ============================================================================
// Scripted gateway for tests
// ============================================================================


#[cfg(test)]
pub use mock::MockGateway;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = GatewayClient::new("http://127.0.0.1:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.url("balance"), "http://127.0.0.1:8080/api/v1/balance");
    }

    #[test]
    fn test_calls_without_login_want_a_token() {
        let client = GatewayClient::new("http://127.0.0.1:8080", Duration::from_secs(5)).unwrap();
        assert!(matches!(client.bearer(), Err(PaymentError::InvalidToken)));
    }

    #[test]
    fn test_error_codes_map_back() {
        let err = error_from_body(ErrorResponse {
            success: false,
            code: "REPLAY_REFUSED".to_string(),
            message: "transaction already settled".to_string(),
            transaction_id: Some("7151395345430904832".to_string()),
        });
        assert!(matches!(err, PaymentError::Replay));

        let err = error_from_body(ErrorResponse {
            success: false,
            code: "INSUFFICIENT_FUNDS".to_string(),
            message: "insufficient funds".to_string(),
            transaction_id: Some("88".to_string()),
        });
        assert!(matches!(err, PaymentError::InsufficientFunds));

        let err = error_from_body(ErrorResponse {
            success: false,
            code: "SOMETHING_NEW".to_string(),
            message: "what".to_string(),
            transaction_id: None,
        });
        assert!(matches!(err, PaymentError::Rpc(_)));
    }
}
