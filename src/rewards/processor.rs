//! Reward event processor.
//!
//! Turns external triggers (verified scan, milestone crossing, affiliate
//! match, vault release) into ledger credits, exactly once per trigger.
//! Every credit is keyed by a stable idempotency key derived from the
//! source event, so at-least-once delivery appears exactly-once to callers.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::account::{period_key, AccountDirectory, Tier};
use crate::coordinator::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::ledger::{AppendOutcome, EntryDraft, EntryKind, LedgerStore};
use crate::rewards::milestone::{AwardBook, AwardStatus, CompAward};
use crate::rewards::RewardPolicy;

/// Result of crediting one verified scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanCredit {
    pub scan_id: String,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub tier: Tier,
    /// True when this delivery replayed an earlier credit.
    pub replayed: bool,
    /// Milestone awards newly emitted by this scan.
    pub milestones: Vec<CompAward>,
}

pub struct RewardProcessor {
    accounts: Arc<AccountDirectory>,
    store: Arc<LedgerStore>,
    awards: Arc<AwardBook>,
    coordinator: Arc<Coordinator>,
    policy: RewardPolicy,
}

impl RewardProcessor {
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
        }
    }

    pub fn policy(&self) -> &RewardPolicy {
        &self.policy
    }

    /// Credit one verified scan. Redelivery of the same `scan_id` never
    /// double-credits and never re-increments the quarterly scan count;
    /// milestone evaluation happens only on the first application, and each
    /// milestone fires at most once per account per period regardless of how
    /// often the crossing is re-evaluated.
    pub async fn on_scan_verified(&self, account_id: Uuid, scan_id: &str) -> CoreResult<ScanCredit> {
        self.credit_scan(account_id, scan_id, &period_key(chrono::Utc::now()))
            .await
    }

    async fn credit_scan(
        &self,
        account_id: Uuid,
        scan_id: &str,
        period: &str,
    ) -> CoreResult<ScanCredit> {
        if scan_id.is_empty() {
            return Err(CoreError::Validation("scan_id must not be empty".into()));
        }
        if !self.accounts.contains(account_id) {
            warn!(account_id = %account_id, scan_id = %scan_id, "Scan reward dropped: unknown account");
            return Err(CoreError::UnknownAccount(account_id));
        }

        let (credit, referrer) = {
            let _guard = self.coordinator.lock(account_id).await?;
            let account = self.accounts.get(account_id)?;
            let tier = account.effective_tier();

            // Replay is decided by the stored outcome, not by recomputing
            // the amount: a tier change between deliveries must not turn a
            // redelivery into a payload mismatch. The amount is computed
            // only on first application.
            let outcome = match self.store.outcome(account_id, scan_id) {
                Some(mut prior) => {
                    prior.replayed = true;
                    prior
                }
                None => self.store.append(
                    EntryDraft {
                        account_id,
                        kind: EntryKind::ScanReward,
                        amount: self.policy.scan_reward(tier),
                        reference_id: scan_id.to_string(),
                    },
                    scan_id,
                )?,
            };

            let mut milestones = Vec::new();
            if !outcome.replayed {
                let (before, after) = self.accounts.record_scan(account_id)?;
                for milestone in self.policy.crossed(before, after) {
                    let key = format!(
                        "milestone:{}:{}:{}",
                        milestone.threshold, period, account_id
                    );
                    let (award, created) = self.awards.create(
                        &key,
                        account_id,
                        milestone.comp,
                        &format!("milestone:{}", milestone.threshold),
                    );
                    if created {
                        self.store.pending_add(account_id, award.amount);
                        info!(
                            account_id = %account_id,
                            threshold = milestone.threshold,
                            amount = %award.amount,
                            "Milestone comp awarded"
                        );
                        milestones.push(award);
                    }
                }
            }

            (
                ScanCredit {
                    scan_id: scan_id.to_string(),
                    amount: outcome.amount,
                    balance_after: outcome.balance_after,
                    tier,
                    replayed: outcome.replayed,
                    milestones,
                },
                account.referrer_id,
            )
        };

        // Affiliate match runs outside the referee's critical section and is
        // idempotent under the scan id, so replayed deliveries are harmless
        // and a previously failed match gets another chance.
        if let Some(referrer_id) = referrer {
            let match_amount = credit.amount * self.policy.affiliate_match_rate;
            if let Err(e) = self
                .on_affiliate_match_pair(referrer_id, account_id, match_amount, scan_id)
                .await
            {
                warn!(
                    referrer_id = %referrer_id,
                    scan_id = %scan_id,
                    error = %e,
                    "Affiliate match credit failed; safe to retry on redelivery"
                );
            }
        }

        Ok(credit)
    }

    /// Credit the referrer for an underlying scan event. At most one
    /// affiliate credit per `source_event_id`.
    pub async fn on_affiliate_match(
        &self,
        referrer_id: Uuid,
        amount: Decimal,
        source_event_id: &str,
    ) -> CoreResult<AppendOutcome> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::Validation("affiliate amount must be positive".into()));
        }
        if !self.accounts.contains(referrer_id) {
            warn!(referrer_id = %referrer_id, source_event_id = %source_event_id, "Affiliate match dropped: unknown referrer");
            return Err(CoreError::UnknownAccount(referrer_id));
        }

        let _guard = self.coordinator.lock(referrer_id).await?;
        self.store.append(
            EntryDraft {
                account_id: referrer_id,
                kind: EntryKind::AffiliateMatch,
                amount,
                reference_id: source_event_id.to_string(),
            },
            &format!("{source_event_id}_affiliate"),
        )
    }

    /// Two-sided affiliate match crediting referrer and referee. Locks are
    /// taken in canonical ascending order; each side's credit is its own
    /// independently idempotent operation, so a crash between the two legs
    /// is healed by redelivery.
    pub async fn on_affiliate_match_pair(
        &self,
        referrer_id: Uuid,
        referee_id: Uuid,
        amount: Decimal,
        source_event_id: &str,
    ) -> CoreResult<()> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::Validation("affiliate amount must be positive".into()));
        }
        if !self.accounts.contains(referrer_id) {
            warn!(referrer_id = %referrer_id, "Affiliate match dropped: unknown referrer");
            return Err(CoreError::UnknownAccount(referrer_id));
        }

        let _guards = self.coordinator.lock_pair(referrer_id, referee_id).await?;

        self.store.append(
            EntryDraft {
                account_id: referrer_id,
                kind: EntryKind::AffiliateMatch,
                amount,
                reference_id: source_event_id.to_string(),
            },
            &format!("{source_event_id}_affiliate"),
        )?;

        if referee_id != referrer_id && self.accounts.contains(referee_id) {
            self.store.append(
                EntryDraft {
                    account_id: referee_id,
                    kind: EntryKind::AffiliateMatch,
                    amount,
                    reference_id: source_event_id.to_string(),
                },
                &format!("{source_event_id}_affiliate_referee"),
            )?;
        }
        Ok(())
    }

    /// Release a vaulted award into the available balance, crediting the
    /// configured vault bonus on top. A repeated release replays the stored
    /// outcome; an award paid out any other way was never vaulted and
    /// cannot be released.
    pub async fn release_vault(&self, account_id: Uuid, award_id: Uuid) -> CoreResult<AppendOutcome> {
        let _guard = self.coordinator.lock(account_id).await?;

        let award = self
            .awards
            .get(award_id)
            .ok_or_else(|| CoreError::Validation(format!("award {award_id} not found")))?;
        if award.account_id != account_id {
            return Err(CoreError::Validation("award does not belong to account".into()));
        }

        let release_key = format!("award:{award_id}:release");
        let bonus_key = format!("award:{award_id}:vault_bonus");
        let bonus_amount = award.amount * self.policy.vault_bonus_rate;

        match award.status {
            AwardStatus::Vaulted => {}
            AwardStatus::Paid => {
                // Paid by an earlier release has a settled release entry to
                // replay. Paid by cash-out has none: nothing was vaulted.
                let Some(release) = self.store.outcome(account_id, &release_key) else {
                    return Err(CoreError::Conflict(format!(
                        "award {award_id} was cashed out, nothing vaulted"
                    )));
                };
                let mut outcome = if bonus_amount > Decimal::ZERO {
                    self.store.outcome(account_id, &bonus_key).unwrap_or(release)
                } else {
                    release
                };
                outcome.replayed = true;
                return Ok(outcome);
            }
            other => {
                return Err(CoreError::Conflict(format!(
                    "award {award_id} is {other:?}, not vaulted"
                )))
            }
        }

        // The bucket moves first: when the vault cannot cover the award,
        // nothing has been appended and no credit is left behind.
        self.store.vault_remove(account_id, award.amount)?;

        let release = self.store.append(
            EntryDraft {
                account_id,
                kind: EntryKind::VaultRelease,
                amount: award.amount,
                reference_id: award_id.to_string(),
            },
            &release_key,
        )?;

        let outcome = if bonus_amount > Decimal::ZERO {
            self.store.append(
                EntryDraft {
                    account_id,
                    kind: EntryKind::VaultBonus,
                    amount: bonus_amount,
                    reference_id: award_id.to_string(),
                },
                &bonus_key,
            )?
        } else {
            release
        };

        self.awards
            .transition(award_id, AwardStatus::Vaulted, AwardStatus::Paid, None);

        info!(
            account_id = %account_id,
            award_id = %award_id,
            amount = %award.amount,
            bonus = %bonus_amount,
            "Vaulted award released"
        );
        Ok(outcome)
    }
}
