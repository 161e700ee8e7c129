//! HTTP surface of the comp ledger core.
//!
//! Routes:
//! - Auth gate (register, login, refresh)
//! - Scan submission (rate limited, idempotent crediting)
//! - Wallet (balances, comp payout choice, withdrawal, history)
//!
//! Everything under `/scan` and `/wallet`/`/users` sits behind the bearer
//! token middleware; errors map onto HTTP statuses here so handlers stay
//! thin over the core services.

pub mod auth;
pub mod middleware;
pub mod scan;
pub mod wallet;

use axum::http::{HeaderValue, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::account::AccountDirectory;
use crate::error::CoreError;
use crate::ledger::LedgerStore;
use crate::payout::PayoutService;
use crate::ratelimit::RateLimiter;
use crate::rewards::milestone::AwardBook;
use crate::rewards::processor::RewardProcessor;

pub use auth::AuthService;
pub use middleware::AuthedAccount;

/// Shared state for all routes.
#[derive(Clone)]
pub struct ApiState {
    pub accounts: Arc<AccountDirectory>,
    pub store: Arc<LedgerStore>,
    pub awards: Arc<AwardBook>,
    pub processor: Arc<RewardProcessor>,
    pub payout: Arc<PayoutService>,
    pub limiter: Arc<RateLimiter>,
    pub auth: Arc<AuthService>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    retryable: bool,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::LockTimeout | CoreError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::UnknownAccount(_) => StatusCode::NOT_FOUND,
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
        };

        let retry_after = match &self {
            CoreError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            CoreError::LockTimeout => Some(1),
            _ => None,
        };

        let body = ErrorBody {
            error: self.to_string(),
            retryable: self.is_retryable(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert("Retry-After", HeaderValue::from(secs));
        }
        response
    }
}

/// Build the full application router.
pub fn create_router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/scan/submit", post(scan::submit_scan))
        .route("/users/me/wallet", get(wallet::get_wallet))
        .route("/users/me/comps", get(wallet::get_comps))
        .route("/users/me/ledger", get(wallet::get_ledger))
        .route("/wallet/comp-payout-choice", post(wallet::comp_payout_choice))
        .route("/wallet/withdraw", post(wallet::withdraw))
        .route("/wallet/vault-release", post(wallet::vault_release))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}
