//! Bank Node HTTP Server
//!
//! Serves the 2PC verbs plus balance and health for one bank. Declines come
//! back in-band as `success: false`; only transport problems surface as
//! connection-level errors to the coordinator.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use tokio::net::TcpListener;

use super::Participant;
use super::rpc::{CreditRequest, CreditResponse, PrepareRequest, TwoPcResponse, TxnIdRequest};
use crate::auth::{AuthService, bearer_token};
use crate::error::PaymentError;
use crate::gateway::types::{BalanceResponse, HealthResponse};
use crate::store::{AccountStore, ApplyOutcome};
use crate::types::TxnId;

/// Shared state for one bank node process
pub struct BankNodeState {
    pub participant: Arc<Participant>,
    pub store: Arc<dyn AccountStore>,
    pub auth: Arc<AuthService>,
}

fn status_of(e: &PaymentError) -> StatusCode {
    StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn two_pc_prepare(
    State(state): State<Arc<BankNodeState>>,
    Json(req): Json<PrepareRequest>,
) -> (StatusCode, Json<TwoPcResponse>) {
    let txn_id: TxnId = match req.transaction_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(TwoPcResponse::declined("invalid transaction id")),
            );
        }
    };

    match state.participant.prepare(txn_id, &req.sender, req.amount) {
        Ok(()) => (StatusCode::OK, Json(TwoPcResponse::ok())),
        Err(e) => (status_of(&e), Json(TwoPcResponse::declined(e.to_string()))),
    }
}

pub async fn two_pc_commit(
    State(state): State<Arc<BankNodeState>>,
    Json(req): Json<TxnIdRequest>,
) -> (StatusCode, Json<TwoPcResponse>) {
    let txn_id: TxnId = match req.transaction_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(TwoPcResponse::declined("invalid transaction id")),
            );
        }
    };

    match state.participant.commit(txn_id) {
        Ok(()) => (StatusCode::OK, Json(TwoPcResponse::ok())),
        Err(e) => (status_of(&e), Json(TwoPcResponse::declined(e.to_string()))),
    }
}

pub async fn two_pc_abort(
    State(state): State<Arc<BankNodeState>>,
    Json(req): Json<TxnIdRequest>,
) -> (StatusCode, Json<TwoPcResponse>) {
    let txn_id: TxnId = match req.transaction_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(TwoPcResponse::declined("invalid transaction id")),
            );
        }
    };

    match state.participant.abort(txn_id) {
        Ok(()) => (StatusCode::OK, Json(TwoPcResponse::ok())),
        Err(e) => (status_of(&e), Json(TwoPcResponse::declined(e.to_string()))),
    }
}

pub async fn two_pc_credit(
    State(state): State<Arc<BankNodeState>>,
    Json(req): Json<CreditRequest>,
) -> (StatusCode, Json<CreditResponse>) {
    let txn_id: TxnId = match req.transaction_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(CreditResponse {
                    success: false,
                    message: "invalid transaction id".to_string(),
                    transaction_id: req.transaction_id,
                }),
            );
        }
    };

    match state
        .participant
        .credit_transfer(txn_id, &req.receiver, req.amount)
    {
        Ok(outcome) => {
            let message = match outcome {
                ApplyOutcome::Applied => format!("credited {} from {}", req.receiver, req.sender),
                ApplyOutcome::AlreadyApplied => "already credited".to_string(),
            };
            (
                StatusCode::OK,
                Json(CreditResponse {
                    success: true,
                    message,
                    transaction_id: req.transaction_id,
                }),
            )
        }
        Err(e) => (
            status_of(&e),
            Json(CreditResponse {
                success: false,
                message: e.to_string(),
                transaction_id: req.transaction_id,
            }),
        ),
    }
}

/// Balance for the token's subject; `-1` when the token does not verify.
pub async fn get_balance(
    State(state): State<Arc<BankNodeState>>,
    headers: HeaderMap,
) -> Json<BalanceResponse> {
    let claims = match bearer_token(&headers).and_then(|t| state.auth.verify_token(t).ok()) {
        Some(claims) => claims,
        None => return Json(BalanceResponse::sentinel()),
    };

    match state.store.balance_of(&claims.sub) {
        Some(balance) => Json(BalanceResponse::of(balance)),
        None => Json(BalanceResponse::sentinel()),
    }
}

pub async fn health(State(state): State<Arc<BankNodeState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        name: format!("payrail-bank-{}", state.participant.bank_id()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
    })
}

// ============================================================================
// Router / server
// ============================================================================

pub fn bank_router(state: Arc<BankNodeState>) -> Router {
    let two_pc_routes = Router::new()
        .route("/prepare", post(two_pc_prepare))
        .route("/commit", post(two_pc_commit))
        .route("/abort", post(two_pc_abort))
        .route("/credit", post(two_pc_credit));

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/balance", get(get_balance))
        .nest("/api/v1/2pc", two_pc_routes)
        .with_state(state)
}

/// Start the bank node HTTP server
pub async fn run_server(host: &str, port: u16, state: Arc<BankNodeState>) {
    let bank_id = state.participant.bank_id().clone();
    let app = bank_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("❌ FATAL: Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    println!("🏦 Bank node {} listening on http://{}", bank_id, addr);

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("❌ FATAL: Server error: {}", e);
        std::process::exit(1);
    }
}
