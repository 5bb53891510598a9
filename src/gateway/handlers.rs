//! Gateway HTTP handlers

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::HeaderMap,
};
use std::sync::Arc;
use tracing::info;

use crate::auth::{Claims, bearer_token};
use crate::coordinator::PaymentOrder;
use crate::error::PaymentError;
use crate::money::parse_amount;
use crate::types::{BankId, TxnId};

use super::state::AppState;
use super::types::{
    AckResponse, ApiError, BalanceResponse, BankStatusResponse, BankStatusUpdate, HealthResponse,
    LoginRequest, LoginResponse, PaymentRequest, PaymentResponse, TxnIdResponse,
};

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let token = state.auth.login(
        state.store.as_ref(),
        &state.registry,
        &req.username,
        &req.password,
    )?;
    Ok(Json(LoginResponse {
        success: true,
        token,
    }))
}

/// GET /api/v1/balance
///
/// Balance for the token's subject; `-1` when the token does not verify.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
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

/// POST /api/v1/txid
///
/// Draw a transaction id without starting a payment. Clients queueing
/// offline retries stamp their entries with these so the eventual submit
/// is idempotent.
pub async fn next_txn_id(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TxnIdResponse>, ApiError> {
    let id = state.txid.next_id()?;
    Ok(Json(TxnIdResponse {
        transaction_id: id.to_string(),
    }))
}

/// POST /api/v1/payments
///
/// The sender is the authenticated principal, never a request field. The
/// transaction id is resolved before anything else so every decline past
/// this point can name the transaction it refused.
pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let txn_id = match req.transaction_id.as_deref() {
        Some(raw) => raw
            .parse::<TxnId>()
            .map_err(|_| PaymentError::InvalidTxnId(raw.to_string()))?,
        None => state.txid.next_id()?,
    };

    let amount = parse_amount(&req.amount).map_err(|e| ApiError::with_txn(txn_id, e))?;

    let receipt = state
        .coordinator
        .process_payment(PaymentOrder {
            sender: claims.sub,
            receiver: req.receiver,
            amount,
            txn_id: Some(txn_id),
        })
        .await
        .map_err(|e| ApiError::with_txn(txn_id, e))?;

    Ok(Json(PaymentResponse::from(&receipt)))
}

/// GET /api/v1/banks/{bank_id}/status
pub async fn get_bank_status(
    State(state): State<Arc<AppState>>,
    Path(bank_id): Path<String>,
) -> Result<Json<BankStatusResponse>, ApiError> {
    let bank = BankId::from(bank_id.as_str());
    match state.registry.is_online(&bank) {
        Some(online) => Ok(Json(BankStatusResponse { online })),
        None => Err(PaymentError::UnknownBank(bank_id).into()),
    }
}

/// PUT /api/v1/banks/{bank_id}/status
///
/// Ops switch used to take a bank out of rotation; payments towards an
/// offline bank are declined up front.
pub async fn set_bank_status(
    State(state): State<Arc<AppState>>,
    Path(bank_id): Path<String>,
    Json(req): Json<BankStatusUpdate>,
) -> Result<Json<AckResponse>, ApiError> {
    let bank = BankId::from(bank_id.as_str());
    if !state.registry.set_online(&bank, req.online) {
        return Err(PaymentError::UnknownBank(bank_id).into());
    }

    let word = if req.online { "online" } else { "offline" };
    info!(bank = %bank, online = req.online, "Bank status updated");
    Ok(Json(AckResponse {
        success: true,
        message: format!("{} is now {}", bank, word),
    }))
}

/// GET /api/v1/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        name: "payrail-gateway".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use crate::coordinator::journal::TxnJournal;
    use crate::coordinator::PaymentCoordinator;
    use crate::ledger::OutcomeLedger;
    use crate::participant::{LocalParticipant, Participant, StaticDirectory};
    use crate::registry::BankRegistry;
    use crate::replay::ReplayGuard;
    use crate::store::{Account, AccountStore, MemoryStore};
    use crate::txid::TxnIdGenerator;
    use crate::types::TxnStatus;

    fn test_state() -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();

        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let hash = AuthService::hash_password("alice-pw").unwrap();
        store
            .upsert(Account::new("alice", BankId::from("BankA"), 100_00, hash))
            .unwrap();
        let hash = AuthService::hash_password("bob-pw").unwrap();
        store
            .upsert(Account::new("bob", BankId::from("BankB"), 10_00, hash))
            .unwrap();

        let registry = Arc::new(BankRegistry::new());
        registry.register(BankId::from("BankA"), "local".to_string(), true);
        registry.register(BankId::from("BankB"), "local".to_string(), true);

        let participant = Arc::new(Participant::new(
            BankId::from("BankB"),
            store.clone() as Arc<dyn AccountStore>,
        ));
        let directory = Arc::new(StaticDirectory::new());
        directory.insert(Arc::new(LocalParticipant::new(participant)));

        let journal = Arc::new(TxnJournal::open(dir.path().join("txn_journal.log")).unwrap());
        let ledger = Arc::new(OutcomeLedger::open(dir.path().join("transactions.log")).unwrap());
        let replay = Arc::new(ReplayGuard::new(ledger.clone()));
        let txid = Arc::new(TxnIdGenerator::new(0, 0).unwrap());
        let auth = Arc::new(AuthService::new("test-secret", 1));

        let coordinator = Arc::new(PaymentCoordinator::new(
            store.clone(),
            journal,
            ledger,
            replay,
            registry.clone(),
            directory,
            txid.clone(),
        ));

        let state = Arc::new(AppState::new(
            store,
            registry,
            auth,
            txid,
            coordinator,
        ));
        (dir, state)
    }

    fn claims_for(user: &str) -> Claims {
        Claims {
            sub: user.to_string(),
            exp: usize::MAX,
            iat: 0,
        }
    }

    fn bearer_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_login_then_balance() {
        let (_dir, state) = test_state();

        let resp = login(
            State(state.clone()),
            Json(LoginRequest {
                username: "alice".to_string(),
                password: "alice-pw".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(resp.0.success);

        let balance = get_balance(State(state), bearer_headers(&resp.0.token)).await;
        assert_eq!(balance.0.balance, 100_00);
        assert_eq!(balance.0.display.as_deref(), Some("100.00"));
    }

    #[tokio::test]
    async fn test_login_wrong_password_rejected() {
        let (_dir, state) = test_state();

        let err = login(
            State(state),
            Json(LoginRequest {
                username: "alice".to_string(),
                password: "wrong".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.error, PaymentError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_login_refused_while_bank_offline() {
        let (_dir, state) = test_state();
        state.registry.set_online(&BankId::from("BankA"), false);

        let err = login(
            State(state),
            Json(LoginRequest {
                username: "alice".to_string(),
                password: "alice-pw".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.error, PaymentError::BankOffline(_)));
    }

    #[tokio::test]
    async fn test_balance_sentinel_on_bad_token() {
        let (_dir, state) = test_state();

        let balance = get_balance(State(state.clone()), bearer_headers("garbage.token.here")).await;
        assert_eq!(balance.0.balance, -1);
        assert!(balance.0.display.is_none());

        let balance = get_balance(State(state), HeaderMap::new()).await;
        assert_eq!(balance.0.balance, -1);
    }

    #[tokio::test]
    async fn test_txid_endpoint_issues_unique_ids() {
        let (_dir, state) = test_state();

        let a = next_txn_id(State(state.clone())).await.unwrap();
        let b = next_txn_id(State(state)).await.unwrap();
        assert_ne!(a.0.transaction_id, b.0.transaction_id);
        a.0.transaction_id.parse::<u64>().unwrap();
    }

    #[tokio::test]
    async fn test_payment_over_handler() {
        let (_dir, state) = test_state();

        let resp = create_payment(
            State(state.clone()),
            Extension(claims_for("alice")),
            Json(PaymentRequest {
                receiver: "bob".to_string(),
                amount: "40.00".to_string(),
                transaction_id: Some("77".to_string()),
            }),
        )
        .await
        .unwrap();

        assert!(resp.0.success);
        assert_eq!(resp.0.transaction_id, "77");
        assert_eq!(resp.0.receiver, "bob");
        assert_eq!(resp.0.sender_bank, "BankA");
        assert_eq!(resp.0.receiver_bank, "BankB");

        assert_eq!(state.store.balance_of("alice"), Some(60_00));
        assert_eq!(state.store.balance_of("bob"), Some(50_00));
        assert_eq!(
            state.coordinator.journal().get(TxnId::new(77)).unwrap().status,
            TxnStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_payment_rejects_malformed_amount() {
        let (_dir, state) = test_state();

        let err = create_payment(
            State(state.clone()),
            Extension(claims_for("alice")),
            Json(PaymentRequest {
                receiver: "bob".to_string(),
                amount: "4O.OO".to_string(),
                transaction_id: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.error, PaymentError::InvalidAmount(_)));
        // The refusal still names the id the gateway drew for the attempt
        assert!(err.txn_id.is_some());
        assert_eq!(state.store.balance_of("alice"), Some(100_00));
    }

    #[tokio::test]
    async fn test_declined_payment_names_its_transaction() {
        let (_dir, state) = test_state();

        let err = create_payment(
            State(state.clone()),
            Extension(claims_for("alice")),
            Json(PaymentRequest {
                receiver: "bob".to_string(),
                amount: "200.00".to_string(),
                transaction_id: Some("88".to_string()),
            }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err.error, PaymentError::InsufficientFunds));
        assert_eq!(err.txn_id, Some(TxnId::new(88)));
        assert_eq!(state.store.balance_of("alice"), Some(100_00));

        // An id the gateway cannot parse is the one refusal with no id to name
        let err = create_payment(
            State(state),
            Extension(claims_for("alice")),
            Json(PaymentRequest {
                receiver: "bob".to_string(),
                amount: "40.00".to_string(),
                transaction_id: Some("not-a-number".to_string()),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.error, PaymentError::InvalidTxnId(_)));
        assert!(err.txn_id.is_none());
    }

    #[tokio::test]
    async fn test_bank_status_roundtrip() {
        let (_dir, state) = test_state();

        let resp = get_bank_status(State(state.clone()), Path("BankB".to_string()))
            .await
            .unwrap();
        assert!(resp.0.online);

        let ack = set_bank_status(
            State(state.clone()),
            Path("BankB".to_string()),
            Json(BankStatusUpdate { online: false }),
        )
        .await
        .unwrap();
        assert!(ack.0.success);

        let resp = get_bank_status(State(state.clone()), Path("BankB".to_string()))
            .await
            .unwrap();
        assert!(!resp.0.online);

        let err = get_bank_status(State(state), Path("BankZ".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err.error, PaymentError::UnknownBank(_)));
    }

    #[tokio::test]
    async fn test_health_names_service() {
        let resp = health().await;
        assert_eq!(resp.0.name, "payrail-gateway");
        assert!(!resp.0.version.is_empty());
    }
}
