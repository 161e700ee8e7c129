//! Scan submission endpoint.
//!
//! The gateway in front of this service delivers at least once; the scan id
//! is derived deterministically from the member and the QR code, so a
//! redelivered submission replays the original credit instead of minting a
//! new one.

use axum::extract::State;
use axum::{Extension, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::account::Tier;
use crate::api::{ApiState, AuthedAccount};
use crate::error::CoreError;
use crate::ratelimit::RateAction;
use crate::rewards::milestone::CompAward;

#[derive(Deserialize)]
pub struct ScanRequest {
    pub qr_code: String,
}

#[derive(Serialize)]
pub struct ScanResponse {
    pub scan_id: String,
    pub comp_earned: Decimal,
    pub balance: Decimal,
    pub tier: Tier,
    pub replayed: bool,
    pub milestones: Vec<CompAward>,
}

/// Stable scan id for one member presenting one QR code.
fn derive_scan_id(account_id: Uuid, qr_code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    hasher.update(qr_code.as_bytes());
    format!("scan_{}", hex::encode(&hasher.finalize()[..12]))
}

pub async fn submit_scan(
    State(state): State<ApiState>,
    Extension(AuthedAccount(account_id)): Extension<AuthedAccount>,
    Json(body): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, CoreError> {
    if body.qr_code.trim().is_empty() {
        return Err(CoreError::Validation("qr_code is required".into()));
    }

    state
        .limiter
        .check(&account_id.to_string(), RateAction::ScanSubmit)
        .into_result()?;

    let scan_id = derive_scan_id(account_id, &body.qr_code);
    let credit = state.processor.on_scan_verified(account_id, &scan_id).await?;

    Ok(Json(ScanResponse {
        scan_id: credit.scan_id,
        comp_earned: credit.amount,
        balance: credit.balance_after,
        tier: credit.tier,
        replayed: credit.replayed,
        milestones: credit.milestones,
    }))
}
