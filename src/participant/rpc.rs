//! Participant RPC
//!
//! How the coordinator talks to bank participants. `ParticipantClient` is the
//! seam: production uses `HttpParticipantClient` against remote bank nodes,
//! tests and single-process setups use `LocalParticipant` over an in-process
//! `Participant`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Participant;
use crate::error::PaymentError;
use crate::types::{BankId, TxnId};

// =============================================================================
// Wire types
// =============================================================================

/// Body of `POST /api/v1/2pc/prepare`
///
/// `receiver` is informational on this leg; the vote considers only the
/// sender's funds when the sender banks here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub transaction_id: String,
    pub sender: String,
    pub receiver: String,
    pub amount: u64,
}

/// Body of `POST /api/v1/2pc/commit` and `POST /api/v1/2pc/abort`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnIdRequest {
    pub transaction_id: String,
}

/// Body of `POST /api/v1/2pc/credit`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRequest {
    pub transaction_id: String,
    pub sender: String,
    pub receiver: String,
    pub amount: u64,
}

/// Every 2PC endpoint answers with this envelope; declines travel as
/// `success: false` with a reason, not as transport errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoPcResponse {
    pub success: bool,
    pub message: String,
}

impl TwoPcResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: "ok".to_string(),
        }
    }

    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Answer to `POST /api/v1/2pc/credit`; echoes the transaction id so the
/// receiving bank's confirmation can be matched in logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditResponse {
    pub success: bool,
    pub message: String,
    pub transaction_id: String,
}

// =============================================================================
// Client trait
// =============================================================================

/// Coordinator-side handle to one bank participant
///
/// All operations MUST be idempotent per transaction id so the coordinator
/// and the recovery worker can re-drive them after a crash.
#[async_trait]
pub trait ParticipantClient: Send + Sync {
    /// Which bank this client talks to
    fn bank_id(&self) -> &BankId;

    /// Phase one vote. `Err(PrepareDeclined)` is a no vote,
    /// `Err(PrepareTimeout)` means the bank did not answer in time.
    async fn prepare(
        &self,
        txn_id: TxnId,
        sender: &str,
        receiver: &str,
        amount: u64,
    ) -> Result<(), PaymentError>;

    /// Phase two finalize.
    async fn commit(&self, txn_id: TxnId) -> Result<(), PaymentError>;

    /// Discard a prepared transaction. Unknown ids are a no-op.
    async fn abort(&self, txn_id: TxnId) -> Result<(), PaymentError>;

    /// Deliver the credit leg to the receiving bank. Safe to repeat.
    async fn credit(
        &self,
        txn_id: TxnId,
        sender: &str,
        receiver: &str,
        amount: u64,
    ) -> Result<(), PaymentError>;
}

// =============================================================================
// HTTP client
// =============================================================================

/// Talks 2PC to a remote bank node over HTTP
pub struct HttpParticipantClient {
    bank_id: BankId,
    base_url: String,
    client: reqwest::Client,
}

impl HttpParticipantClient {
    /// `base_url` is the bank node's root, e.g. `http://127.0.0.1:7101`.
    pub fn new(
        bank_id: BankId,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Rpc(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            bank_id,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post_2pc<B, R>(&self, verb: &str, body: &B) -> Result<R, reqwest::Error>
    where
        B: Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}/api/v1/2pc/{}", self.base_url, verb);
        let response = self.client.post(&url).json(body).send().await?;
        response.json::<R>().await
    }
}

#[async_trait]
impl ParticipantClient for HttpParticipantClient {
    fn bank_id(&self) -> &BankId {
        &self.bank_id
    }

    async fn prepare(
        &self,
        txn_id: TxnId,
        sender: &str,
        receiver: &str,
        amount: u64,
    ) -> Result<(), PaymentError> {
        let body = PrepareRequest {
            transaction_id: txn_id.to_string(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
        };
        let response: TwoPcResponse = self.post_2pc("prepare", &body).await.map_err(|e| {
            if e.is_timeout() {
                warn!(txn_id = %txn_id, bank = %self.bank_id, "Prepare timed out");
                PaymentError::PrepareTimeout
            } else {
                PaymentError::Rpc(format!("prepare rpc to {} failed: {}", self.bank_id, e))
            }
        })?;

        if response.success {
            Ok(())
        } else {
            Err(PaymentError::PrepareDeclined(response.message))
        }
    }

    async fn commit(&self, txn_id: TxnId) -> Result<(), PaymentError> {
        let body = TxnIdRequest {
            transaction_id: txn_id.to_string(),
        };
        let response: TwoPcResponse = self.post_2pc("commit", &body).await.map_err(|e| {
            PaymentError::Rpc(format!("commit rpc to {} failed: {}", self.bank_id, e))
        })?;

        if response.success {
            Ok(())
        } else {
            Err(PaymentError::CommitDeclined(response.message))
        }
    }

    async fn abort(&self, txn_id: TxnId) -> Result<(), PaymentError> {
        let body = TxnIdRequest {
            transaction_id: txn_id.to_string(),
        };
        let response: TwoPcResponse = self.post_2pc("abort", &body).await.map_err(|e| {
            PaymentError::Rpc(format!("abort rpc to {} failed: {}", self.bank_id, e))
        })?;

        if response.success {
            Ok(())
        } else {
            Err(PaymentError::InvalidState(response.message))
        }
    }

    async fn credit(
        &self,
        txn_id: TxnId,
        sender: &str,
        receiver: &str,
        amount: u64,
    ) -> Result<(), PaymentError> {
        let body = CreditRequest {
            transaction_id: txn_id.to_string(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
        };
        let response: CreditResponse = self.post_2pc("credit", &body).await.map_err(|e| {
            PaymentError::Rpc(format!("credit rpc to {} failed: {}", self.bank_id, e))
        })?;

        if response.success {
            Ok(())
        } else {
            Err(PaymentError::CreditFailed(response.message))
        }
    }
}

// =============================================================================
// In-process client
// =============================================================================

/// Wraps a local `Participant` behind the client trait, for tests and for
/// running a whole deployment inside one process.
pub struct LocalParticipant {
    inner: Arc<Participant>,
}

impl LocalParticipant {
    pub fn new(inner: Arc<Participant>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ParticipantClient for LocalParticipant {
    fn bank_id(&self) -> &BankId {
        self.inner.bank_id()
    }

    async fn prepare(
        &self,
        txn_id: TxnId,
        sender: &str,
        _receiver: &str,
        amount: u64,
    ) -> Result<(), PaymentError> {
        self.inner.prepare(txn_id, sender, amount)
    }

    async fn commit(&self, txn_id: TxnId) -> Result<(), PaymentError> {
        self.inner.commit(txn_id)
    }

    async fn abort(&self, txn_id: TxnId) -> Result<(), PaymentError> {
        self.inner.abort(txn_id)
    }

    async fn credit(
        &self,
        txn_id: TxnId,
        _sender: &str,
        receiver: &str,
        amount: u64,
    ) -> Result<(), PaymentError> {
        self.inner.credit_transfer(txn_id, receiver, amount)?;
        Ok(())
    }
}

// =============================================================================
// Directory
// =============================================================================

/// Resolves a bank id to a client handle
pub trait ParticipantDirectory: Send + Sync {
    fn client_for(&self, bank: &BankId) -> Result<Arc<dyn ParticipantClient>, PaymentError>;
}

/// Builds HTTP clients from registry addresses, one per bank, lazily
pub struct HttpParticipantDirectory {
    registry: Arc<crate::registry::BankRegistry>,
    timeout: Duration,
    clients: dashmap::DashMap<BankId, Arc<HttpParticipantClient>>,
}

impl HttpParticipantDirectory {
    pub fn new(registry: Arc<crate::registry::BankRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            clients: dashmap::DashMap::new(),
        }
    }
}

impl ParticipantDirectory for HttpParticipantDirectory {
    fn client_for(&self, bank: &BankId) -> Result<Arc<dyn ParticipantClient>, PaymentError> {
        if let Some(client) = self.clients.get(bank) {
            return Ok(client.value().clone());
        }

        let address = self
            .registry
            .address(bank)
            .ok_or_else(|| PaymentError::UnknownBank(bank.to_string()))?;
        let client = Arc::new(HttpParticipantClient::new(bank.clone(), address, self.timeout)?);
        self.clients.insert(bank.clone(), client.clone());
        Ok(client)
    }
}

/// Fixed handles, for tests and single-process deployments
#[derive(Default)]
pub struct StaticDirectory {
    clients: dashmap::DashMap<BankId, Arc<dyn ParticipantClient>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: Arc<dyn ParticipantClient>) {
        self.clients.insert(client.bank_id().clone(), client);
    }
}

impl ParticipantDirectory for StaticDirectory {
    fn client_for(&self, bank: &BankId) -> Result<Arc<dyn ParticipantClient>, PaymentError> {
        self.clients
            .get(bank)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PaymentError::UnknownBank(bank.to_string()))
    }
}


#[cfg(test)]
pub use mock::MockParticipant;
