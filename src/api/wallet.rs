//! Wallet endpoints: balances, comp payout choice, withdrawal, history.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::Tier;
use crate::api::{ApiState, AuthedAccount};
use crate::error::CoreError;
use crate::ledger::LedgerEntry;
use crate::payout::{ChoiceOutcome, WithdrawMethod, WithdrawalOutcome};
use crate::rewards::milestone::{ChoiceMethod, CompAward};

#[derive(Serialize)]
pub struct WalletResponse {
    pub comp_balance: Decimal,
    pub vaulted_balance: Decimal,
    pub pending_balance: Decimal,
    pub tier: Tier,
}

pub async fn get_wallet(
    State(state): State<ApiState>,
    Extension(AuthedAccount(account_id)): Extension<AuthedAccount>,
) -> Result<Json<WalletResponse>, CoreError> {
    let account = state.accounts.get(account_id)?;
    let wallet = state.store.wallet(account_id);

    Ok(Json(WalletResponse {
        comp_balance: wallet.available,
        vaulted_balance: wallet.vaulted,
        pending_balance: wallet.pending,
        tier: account.effective_tier(),
    }))
}

#[derive(Deserialize)]
pub struct ChoiceRequest {
    pub comp_id: Uuid,
    pub method: ChoiceMethod,
}

pub async fn comp_payout_choice(
    State(state): State<ApiState>,
    Extension(AuthedAccount(account_id)): Extension<AuthedAccount>,
    Json(body): Json<ChoiceRequest>,
) -> Result<Json<ChoiceOutcome>, CoreError> {
    let outcome = state
        .payout
        .resolve_payout_choice(account_id, body.comp_id, body.method)
        .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct WithdrawRequest {
    pub amount: Decimal,
    pub method: String,
    pub idempotency_key: String,
}

pub async fn withdraw(
    State(state): State<ApiState>,
    Extension(AuthedAccount(account_id)): Extension<AuthedAccount>,
    Json(body): Json<WithdrawRequest>,
) -> Result<Json<WithdrawalOutcome>, CoreError> {
    let method: WithdrawMethod = body.method.parse()?;
    let outcome = state
        .payout
        .request_withdrawal(account_id, body.amount, method, &body.idempotency_key)
        .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct VaultReleaseRequest {
    pub comp_id: Uuid,
}

#[derive(Serialize)]
pub struct VaultReleaseResponse {
    pub comp_id: Uuid,
    pub balance_after: Decimal,
    pub replayed: bool,
}

/// Release a vaulted award into the available balance, with the release
/// bonus on top.
pub async fn vault_release(
    State(state): State<ApiState>,
    Extension(AuthedAccount(account_id)): Extension<AuthedAccount>,
    Json(body): Json<VaultReleaseRequest>,
) -> Result<Json<VaultReleaseResponse>, CoreError> {
    let outcome = state
        .processor
        .release_vault(account_id, body.comp_id)
        .await?;
    Ok(Json(VaultReleaseResponse {
        comp_id: body.comp_id,
        balance_after: outcome.balance_after,
        replayed: outcome.replayed,
    }))
}

#[derive(Deserialize)]
pub struct CompsQuery {
    /// Include resolved and expired awards, not just those awaiting a choice.
    #[serde(default)]
    pub include_resolved: bool,
}

pub async fn get_comps(
    State(state): State<ApiState>,
    Extension(AuthedAccount(account_id)): Extension<AuthedAccount>,
    Query(query): Query<CompsQuery>,
) -> Json<Vec<CompAward>> {
    let awards = if query.include_resolved {
        state.awards.for_account(account_id)
    } else {
        state.awards.pending_for(account_id)
    };
    Json(awards)
}

#[derive(Deserialize)]
pub struct LedgerQuery {
    pub limit: Option<usize>,
}

pub async fn get_ledger(
    State(state): State<ApiState>,
    Extension(AuthedAccount(account_id)): Extension<AuthedAccount>,
    Query(query): Query<LedgerQuery>,
) -> Json<Vec<LedgerEntry>> {
    let mut entries = state.store.history(account_id);
    entries.truncate(query.limit.unwrap_or(50).min(500));
    Json(entries)
}
