//! Comp awards and the book that holds them.
//!
//! An award is created by a reward trigger (milestone crossing, promotion)
//! and leaves `PendingChoice` exactly once: by user choice or by the timeout
//! default. Creation is keyed, so re-evaluating the same trigger produces at
//! most one award per key.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardStatus {
    PendingChoice,
    Vaulted,
    Paid,
    Expired,
}

/// How a member chose to take a comp award.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceMethod {
    /// Settle into the available balance immediately.
    CashOut,
    /// Hold in the vault to accrue the release bonus.
    Vault,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompAward {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    /// Source trigger label, e.g. `milestone:50`.
    pub trigger: String,
    pub requires_payout_choice: bool,
    pub status: AwardStatus,
    /// Set once, when the award leaves `PendingChoice` by explicit choice.
    pub resolved_method: Option<ChoiceMethod>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct AwardBook {
    awards: DashMap<Uuid, CompAward>,
    /// Creation idempotency: trigger key -> award id.
    by_key: DashMap<String, Uuid>,
}

impl AwardBook {
    pub fn new() -> Self {
        Self {
            awards: DashMap::new(),
            by_key: DashMap::new(),
        }
    }

    /// Create an award under a trigger key. Returns `(award, created)`;
    /// `created` is false when the key had already fired, in which case the
    /// existing award is returned untouched.
    pub fn create(
        &self,
        key: &str,
        account_id: Uuid,
        amount: Decimal,
        trigger: &str,
    ) -> (CompAward, bool) {
        if let Some(existing) = self.by_key.get(key) {
            if let Some(award) = self.awards.get(&existing) {
                return (award.clone(), false);
            }
        }

        let now = Utc::now();
        let award = CompAward {
            id: Uuid::new_v4(),
            account_id,
            amount,
            trigger: trigger.to_string(),
            requires_payout_choice: true,
            status: AwardStatus::PendingChoice,
            resolved_method: None,
            created_at: now,
            updated_at: now,
        };

        // First insert into by_key wins; a racing creator observes the
        // winner's award id and returns it.
        match self.by_key.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let winner = *occupied.get();
                drop(occupied);
                if let Some(existing) = self.awards.get(&winner) {
                    return (existing.clone(), false);
                }
                (award, false)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(award.id);
                self.awards.insert(award.id, award.clone());
                debug!(
                    award_id = %award.id,
                    account_id = %account_id,
                    trigger = %trigger,
                    amount = %amount,
                    "Comp award created"
                );
                (award, true)
            }
        }
    }

    pub fn get(&self, award_id: Uuid) -> Option<CompAward> {
        self.awards.get(&award_id).map(|a| a.clone())
    }

    /// Atomically transition out of `from`. Returns the updated award, or
    /// the current award unchanged when the transition already happened.
    pub fn transition(
        &self,
        award_id: Uuid,
        from: AwardStatus,
        to: AwardStatus,
        method: Option<ChoiceMethod>,
    ) -> Option<(CompAward, bool)> {
        let mut award = self.awards.get_mut(&award_id)?;
        if award.status != from {
            return Some((award.clone(), false));
        }
        award.status = to;
        if method.is_some() {
            award.resolved_method = method;
        }
        award.updated_at = Utc::now();
        Some((award.clone(), true))
    }

    pub fn pending_for(&self, account_id: Uuid) -> Vec<CompAward> {
        let mut pending: Vec<CompAward> = self
            .awards
            .iter()
            .filter(|a| a.account_id == account_id && a.status == AwardStatus::PendingChoice)
            .map(|a| a.clone())
            .collect();
        pending.sort_by_key(|a| a.created_at);
        pending
    }

    /// Every award for an account, newest first.
    pub fn for_account(&self, account_id: Uuid) -> Vec<CompAward> {
        let mut awards: Vec<CompAward> = self
            .awards
            .iter()
            .filter(|a| a.account_id == account_id)
            .map(|a| a.clone())
            .collect();
        awards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        awards
    }

    /// Award ids in `status` whose `updated_at` is older than `cutoff`.
    pub fn stale(&self, status: AwardStatus, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        self.awards
            .iter()
            .filter(|a| a.status == status && a.updated_at < cutoff)
            .map(|a| a.id)
            .collect()
    }
}

impl Default for AwardBook {
    fn default() -> Self {
        Self::new()
    }
}
