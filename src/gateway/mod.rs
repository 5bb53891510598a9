//! HTTP Gateway
//!
//! Fronts the payment coordinator: login, balance, payments, bank status
//! and transaction id handout. Payments sit behind a JWT middleware that
//! injects the verified claims; balance verifies its own token so it can
//! answer the `-1` sentinel instead of an error status.

pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{Next, from_fn_with_state},
    response::Response,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::auth::bearer_token;
use crate::error::PaymentError;
use state::AppState;
use types::ApiError;

/// Axum middleware guarding payment routes: verifies the bearer token and
/// injects [`Claims`](crate::auth::Claims) for the handler.
async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(PaymentError::InvalidToken)?;
    let claims = state.auth.verify_token(token)?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Start the gateway HTTP server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) {
    let auth_routes = Router::new().route("/login", post(handlers::login));

    // Token-guarded routes; the middleware rejects before the handler runs
    let private_routes = Router::new()
        .route("/payments", post(handlers::create_payment))
        .layer(from_fn_with_state(state.clone(), jwt_auth_middleware));

    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/balance", get(handlers::get_balance))
        .route("/txid", post(handlers::next_txn_id))
        .route(
            "/banks/{bank_id}/status",
            get(handlers::get_bank_status).put(handlers::set_bank_status),
        )
        .nest("/auth", auth_routes)
        .merge(private_routes);

    let app = Router::new().nest("/api/v1", api).with_state(state);

    let addr = format!("{}:{}", host, port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("❌ FATAL: Failed to bind to {}: {}", addr, e);
            eprintln!(
                "   Hint: Port {} may already be in use. Check with: lsof -i :{}",
                port, port
            );
            std::process::exit(1);
        }
    };

    println!("🚀 Gateway listening on http://{}", addr);
    println!("📂 Public API:  /api/v1/auth/login, /api/v1/balance, /api/v1/txid");
    println!("🔒 Private API: /api/v1/payments (Bearer token required)");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("❌ FATAL: Server error: {}", e);
        std::process::exit(1);
    }
}
