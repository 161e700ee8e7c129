//! Minimal auth gate in front of the core.
//!
//! Accounts and credentials live in memory, passwords stored as sha2
//! digests. This is the gate the scan and wallet routes sit behind, not an
//! identity system; its one hard requirement is that login floods are
//! throttled per email before credentials are even checked.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::account::{AccountDirectory, Tier};
use crate::api::ApiState;
use crate::error::{CoreError, CoreResult};
use crate::ratelimit::RateAction;

struct Credential {
    account_id: Uuid,
    password_hash: String,
}

pub struct AuthService {
    accounts: Arc<AccountDirectory>,
    /// email -> credential
    credentials: DashMap<String, Credential>,
    /// member-facing referral code -> referrer account
    referral_codes: DashMap<String, Uuid>,
    access_tokens: DashMap<String, Uuid>,
    refresh_tokens: DashMap<String, Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub account_id: Uuid,
}

fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn issue_token() -> String {
    hex::encode(Sha256::digest(Uuid::new_v4().as_bytes()))
}

/// Short referral code derived from the account id.
pub fn referral_code(account_id: Uuid) -> String {
    hex::encode(&Sha256::digest(account_id.as_bytes())[..4])
}

impl AuthService {
    pub fn new(accounts: Arc<AccountDirectory>) -> Self {
        Self {
            accounts,
            credentials: DashMap::new(),
            referral_codes: DashMap::new(),
            access_tokens: DashMap::new(),
            refresh_tokens: DashMap::new(),
        }
    }

    /// Create an account with credentials. A referral code, when given,
    /// links the new account to its referrer for affiliate matching.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        referred_by: Option<&str>,
    ) -> CoreResult<(Uuid, String)> {
        if email.is_empty() || !email.contains('@') {
            return Err(CoreError::Validation("a valid email is required".into()));
        }
        if password.len() < 8 {
            return Err(CoreError::Validation(
                "password must be at least 8 characters".into(),
            ));
        }
        if self.credentials.contains_key(email) {
            return Err(CoreError::Conflict(format!(
                "account already exists for {email}"
            )));
        }

        let referrer_id = match referred_by {
            Some(code) => Some(
                self.referral_codes
                    .get(code)
                    .map(|r| *r)
                    .ok_or_else(|| CoreError::Validation("unknown referral code".into()))?,
            ),
            None => None,
        };

        let account = self.accounts.create(Tier::Standard, referrer_id);
        self.credentials.insert(
            email.to_string(),
            Credential {
                account_id: account.id,
                password_hash: hash_password(password),
            },
        );
        let code = referral_code(account.id);
        self.referral_codes.insert(code.clone(), account.id);

        info!(account_id = %account.id, referred = referrer_id.is_some(), "Account registered");
        Ok((account.id, code))
    }

    /// Verify credentials and issue a fresh token pair.
    pub fn login(&self, email: &str, password: &str) -> CoreResult<TokenPair> {
        let credential = self.credentials.get(email).ok_or(CoreError::Unauthorized)?;
        if credential.password_hash != hash_password(password) {
            return Err(CoreError::Unauthorized);
        }

        let pair = TokenPair {
            access_token: issue_token(),
            refresh_token: issue_token(),
            account_id: credential.account_id,
        };
        self.access_tokens
            .insert(pair.access_token.clone(), credential.account_id);
        self.refresh_tokens
            .insert(pair.refresh_token.clone(), credential.account_id);
        Ok(pair)
    }

    /// Exchange a refresh token for a new access token.
    pub fn refresh(&self, refresh_token: &str) -> CoreResult<TokenPair> {
        let account_id = self
            .refresh_tokens
            .get(refresh_token)
            .map(|r| *r)
            .ok_or(CoreError::Unauthorized)?;

        let access_token = issue_token();
        self.access_tokens.insert(access_token.clone(), account_id);
        Ok(TokenPair {
            access_token,
            refresh_token: refresh_token.to_string(),
            account_id,
        })
    }

    /// Resolve a bearer token to its account.
    pub fn resolve(&self, access_token: &str) -> Option<Uuid> {
        self.access_tokens.get(access_token).map(|t| *t)
    }
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub referral_code: Option<String>,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub account_id: Uuid,
    pub referral_code: String,
    pub tier: Tier,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn register(
    State(state): State<ApiState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), CoreError> {
    let (account_id, code) =
        state
            .auth
            .register(&body.email, &body.password, body.referral_code.as_deref())?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            account_id,
            referral_code: code,
            tier: Tier::Standard,
        }),
    ))
}

pub async fn login(
    State(state): State<ApiState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenPair>, CoreError> {
    // Throttle before touching credentials so floods cannot probe passwords.
    state
        .limiter
        .check(&body.email, RateAction::Login)
        .into_result()?;
    let pair = state.auth.login(&body.email, &body.password)?;
    Ok(Json(pair))
}

pub async fn refresh(
    State(state): State<ApiState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, CoreError> {
    let pair = state.auth.refresh(&body.refresh_token)?;
    Ok(Json(pair))
}
