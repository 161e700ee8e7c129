//! Request middleware: bearer-token auth and request logging.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::ApiState;
use crate::error::CoreError;

/// Account resolved by the auth gate, inserted as a request extension.
#[derive(Debug, Clone, Copy)]
pub struct AuthedAccount(pub Uuid);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Bearer-token authentication for the scan and wallet routes.
pub async fn require_auth(
    State(state): State<ApiState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        warn!(path = %request.uri().path(), "Missing bearer token");
        return CoreError::Unauthorized.into_response();
    };

    match state.auth.resolve(token) {
        Some(account_id) => {
            request.extensions_mut().insert(AuthedAccount(account_id));
            next.run(request).await
        }
        None => {
            warn!(path = %request.uri().path(), "Invalid bearer token");
            CoreError::Unauthorized.into_response()
        }
    }
}

/// Request logging middleware.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        warn!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %start.elapsed().as_millis(),
            "Request failed"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %start.elapsed().as_millis(),
            "Request completed"
        );
    }

    response
}
