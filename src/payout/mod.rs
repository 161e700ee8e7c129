//! Withdrawal authorization and comp payout choice.
//!
//! All debits and award resolutions happen inside the account's critical
//! section: the balance is re-read under the lock, so two requests that both
//! saw a sufficient stale balance cannot both debit. Duplicate idempotency
//! keys replay the original result verbatim; failures are surfaced to the
//! caller and never silently auto-retried.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::account::AccountDirectory;
use crate::coordinator::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::ledger::{EntryDraft, EntryKind, LedgerStore};
use crate::rewards::milestone::{AwardBook, AwardStatus, ChoiceMethod, CompAward};
use crate::rewards::RewardPolicy;

/// Recognised settlement rails. The core only authorizes; how funds
/// physically move is downstream's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawMethod {
    Ach,
    Instant,
    Polygon,
}

impl FromStr for WithdrawMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ach" => Ok(WithdrawMethod::Ach),
            "instant" => Ok(WithdrawMethod::Instant),
            "polygon" => Ok(WithdrawMethod::Polygon),
            other => Err(CoreError::Validation(format!(
                "unrecognized withdrawal method: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Rejected,
    Conflict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub method: WithdrawMethod,
    pub idempotency_key: String,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
}

/// Result of a withdrawal call, replayed verbatim on duplicate keys.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalOutcome {
    pub request: WithdrawalRequest,
    pub balance_after: Decimal,
    pub replayed: bool,
}

/// Result of a payout-choice call.
#[derive(Debug, Clone, Serialize)]
pub struct ChoiceOutcome {
    pub award: CompAward,
    pub method: ChoiceMethod,
    /// Available balance after a cash-out; absent for vault choices.
    pub balance_after: Option<Decimal>,
    pub replayed: bool,
}

pub struct PayoutService {
    accounts: Arc<AccountDirectory>,
    store: Arc<LedgerStore>,
    awards: Arc<AwardBook>,
    coordinator: Arc<Coordinator>,
    policy: RewardPolicy,
    /// (account, idempotency_key) -> first completed request, for verbatim replay.
    requests: DashMap<(Uuid, String), WithdrawalOutcome>,
}

impl PayoutService {
    pub fn new(
        accounts: Arc<AccountDirectory>,
        store: Arc<LedgerStore>,
        awards: Arc<AwardBook>,
        coordinator: Arc<Coordinator>,
        policy: RewardPolicy,
    ) -> Self {
        Self {
            accounts,
            store,
            awards,
            coordinator,
            policy,
            requests: DashMap::new(),
        }
    }

    /// Authorize and debit a withdrawal.
    ///
    /// Validation runs outside the lock; the balance check and the debit
    /// append run inside it, in one atomic unit. For any concurrent burst
    /// against one account, total applied debits never exceed the balance at
    /// burst start, and duplicate keys debit at most once.
    pub async fn request_withdrawal(
        &self,
        account_id: Uuid,
        amount: Decimal,
        method: WithdrawMethod,
        idempotency_key: &str,
    ) -> CoreResult<WithdrawalOutcome> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::Validation(
                "withdrawal amount must be positive".into(),
            ));
        }
        if idempotency_key.is_empty() {
            return Err(CoreError::Validation("idempotency_key is required".into()));
        }
        if !self.accounts.contains(account_id) {
            return Err(CoreError::UnknownAccount(account_id));
        }

        let _guard = self.coordinator.lock(account_id).await?;

        let request_key = (account_id, idempotency_key.to_string());
        if let Some(prior) = self.requests.get(&request_key) {
            let mut outcome = prior.clone();
            // The stored request is returned unchanged; only the mismatch
            // case is a caller bug.
            if outcome.request.amount != amount || outcome.request.method != method {
                return Err(CoreError::Conflict(format!(
                    "withdrawal key {idempotency_key} replayed with different payload"
                )));
            }
            outcome.replayed = true;
            return Ok(outcome);
        }

        // Balance re-read under the lock; this, not the pre-lock view, is
        // what prevents two requests from spending the same funds.
        let outcome = self.store.append(
            EntryDraft {
                account_id,
                kind: EntryKind::Withdrawal,
                amount: -amount,
                reference_id: idempotency_key.to_string(),
            },
            idempotency_key,
        );

        match outcome {
            Ok(applied) => {
                let result = WithdrawalOutcome {
                    request: WithdrawalRequest {
                        id: applied.entry_id,
                        account_id,
                        amount,
                        method,
                        idempotency_key: idempotency_key.to_string(),
                        status: WithdrawalStatus::Completed,
                        created_at: Utc::now(),
                    },
                    balance_after: applied.balance_after,
                    replayed: applied.replayed,
                };
                if !applied.replayed {
                    self.requests.insert(request_key, result.clone());
                    info!(
                        account_id = %account_id,
                        amount = %amount,
                        method = ?method,
                        balance_after = %applied.balance_after,
                        "Withdrawal authorized"
                    );
                }
                Ok(result)
            }
            Err(e @ CoreError::InsufficientBalance { .. }) => {
                info!(
                    account_id = %account_id,
                    amount = %amount,
                    "Withdrawal rejected: insufficient balance"
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve a pending comp award exactly once.
    ///
    /// `CashOut` settles the amount into the available balance;
    /// `Vault` moves it to the vault to accrue the release bonus. N
    /// concurrent identical calls credit at most once: the first transition
    /// wins, identical duplicates replay its outcome, and a conflicting
    /// method after resolution is `Conflict` (safe, HTTP 409).
    pub async fn resolve_payout_choice(
        &self,
        account_id: Uuid,
        comp_id: Uuid,
        method: ChoiceMethod,
    ) -> CoreResult<ChoiceOutcome> {
        if !self.accounts.contains(account_id) {
            return Err(CoreError::UnknownAccount(account_id));
        }

        let _guard = self.coordinator.lock(account_id).await?;

        let award = self
            .awards
            .get(comp_id)
            .ok_or_else(|| CoreError::Validation(format!("comp award {comp_id} not found")))?;
        if award.account_id != account_id {
            return Err(CoreError::Validation(
                "comp award does not belong to caller".into(),
            ));
        }

        if award.status != AwardStatus::PendingChoice {
            // Already resolved: identical duplicates replay, anything else
            // is a lost race surfaced as a safe conflict.
            if award.resolved_method == Some(method) {
                let balance_after = match method {
                    ChoiceMethod::CashOut => Some(self.store.wallet(account_id).available),
                    ChoiceMethod::Vault => None,
                };
                return Ok(ChoiceOutcome {
                    award,
                    method,
                    balance_after,
                    replayed: true,
                });
            }
            return Err(CoreError::Conflict(format!(
                "comp award {comp_id} already resolved as {:?}",
                award.status
            )));
        }

        // Money moves before the award resolves: a failed bucket move
        // returns with the award still pending, so the caller can retry.
        self.store.pending_remove(account_id, award.amount)?;
        let balance_after = match method {
            ChoiceMethod::CashOut => {
                let applied = self.store.append(
                    EntryDraft {
                        account_id,
                        kind: EntryKind::MilestoneComp,
                        amount: award.amount,
                        reference_id: comp_id.to_string(),
                    },
                    &format!("award:{comp_id}"),
                )?;
                Some(applied.balance_after)
            }
            ChoiceMethod::Vault => {
                self.store.vault_add(account_id, award.amount);
                None
            }
        };

        let target = match method {
            ChoiceMethod::CashOut => AwardStatus::Paid,
            ChoiceMethod::Vault => AwardStatus::Vaulted,
        };
        let (award, _) = self
            .awards
            .transition(comp_id, AwardStatus::PendingChoice, target, Some(method))
            .ok_or_else(|| CoreError::Validation(format!("comp award {comp_id} not found")))?;

        info!(
            account_id = %account_id,
            comp_id = %comp_id,
            method = ?method,
            amount = %award.amount,
            "Payout choice resolved"
        );
        Ok(ChoiceOutcome {
            award,
            method,
            balance_after,
            replayed: false,
        })
    }

    /// Timeout default: pending awards older than the choice timeout move to
    /// the vault. Returns how many awards were defaulted.
    pub async fn expire_stale_awards(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now
            - chrono::Duration::from_std(self.policy.choice_timeout)
                .unwrap_or_else(|_| chrono::Duration::hours(72));
        let mut defaulted = 0;

        for award_id in self.awards.stale(AwardStatus::PendingChoice, cutoff) {
            let Some(award) = self.awards.get(award_id) else { continue };
            let Ok(_guard) = self.coordinator.lock(award.account_id).await else {
                continue; // picked up on the next sweep
            };
            // Re-read under the lock; a racing choice may have resolved it.
            let Some(award) = self.awards.get(award_id) else { continue };
            if award.status != AwardStatus::PendingChoice {
                continue;
            }
            // Buckets move before the transition, so a failed move leaves
            // the award pending for the next sweep.
            if self.store.pending_remove(award.account_id, award.amount).is_err() {
                continue;
            }
            self.store.vault_add(award.account_id, award.amount);
            self.awards.transition(
                award_id,
                AwardStatus::PendingChoice,
                AwardStatus::Vaulted,
                None,
            );
            defaulted += 1;
            info!(
                account_id = %award.account_id,
                award_id = %award_id,
                "Unclaimed comp award defaulted to vault"
            );
        }
        defaulted
    }

    /// Vault expiry: vaulted awards older than the vault TTL expire
    /// worthless. Returns how many awards expired.
    pub async fn expire_vaulted(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now
            - chrono::Duration::from_std(self.policy.vault_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(90));
        let mut expired = 0;

        for award_id in self.awards.stale(AwardStatus::Vaulted, cutoff) {
            let Some(award) = self.awards.get(award_id) else { continue };
            let Ok(_guard) = self.coordinator.lock(award.account_id).await else {
                continue;
            };
            let Some(award) = self.awards.get(award_id) else { continue };
            if award.status != AwardStatus::Vaulted {
                continue;
            }
            if self.store.vault_remove(award.account_id, award.amount).is_err() {
                continue;
            }
            self.awards
                .transition(award_id, AwardStatus::Vaulted, AwardStatus::Expired, None);
            expired += 1;
            warn!(
                account_id = %award.account_id,
                award_id = %award_id,
                amount = %award.amount,
                "Vaulted award expired"
            );
        }
        expired
    }
}
