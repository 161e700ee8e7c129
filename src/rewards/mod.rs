//! Reward crediting: policy, comp awards, and the event processor that
//! turns external triggers into ledger credits exactly once per trigger.

pub mod milestone;
pub mod processor;

pub use milestone::{AwardBook, AwardStatus, ChoiceMethod, CompAward};
pub use processor::{RewardProcessor, ScanCredit};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

use crate::account::Tier;

/// One cumulative scan-count threshold unlocking a one-time comp.
#[derive(Debug, Clone)]
pub struct Milestone {
    pub threshold: u32,
    pub comp: Decimal,
}

/// Numeric reward policy. The mechanism is fixed by this crate; the numbers
/// here are deployment defaults, overridable through [`crate::config`].
#[derive(Debug, Clone)]
pub struct RewardPolicy {
    /// Credit for one verified scan at multiplier 1.
    pub base_rate: Decimal,
    /// Fraction of the underlying scan credit matched to the referrer.
    pub affiliate_match_rate: Decimal,
    /// Bonus rate applied when a vaulted award is released.
    pub vault_bonus_rate: Decimal,
    /// Quarterly milestones, ascending by threshold.
    pub milestones: Vec<Milestone>,
    /// How long an award may sit in `PendingChoice` before it defaults to
    /// the vault.
    pub choice_timeout: Duration,
    /// How long a vaulted award survives before it expires worthless.
    pub vault_ttl: Duration,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            base_rate: dec!(0.10),
            affiliate_match_rate: dec!(1.00),
            vault_bonus_rate: dec!(0.05),
            milestones: vec![
                Milestone { threshold: 10, comp: dec!(1.00) },
                Milestone { threshold: 50, comp: dec!(5.00) },
                Milestone { threshold: 100, comp: dec!(12.50) },
                Milestone { threshold: 250, comp: dec!(40.00) },
            ],
            choice_timeout: Duration::from_secs(72 * 3600),
            vault_ttl: Duration::from_secs(90 * 24 * 3600),
        }
    }
}

impl RewardPolicy {
    pub fn tier_multiplier(&self, tier: Tier) -> Decimal {
        match tier {
            Tier::Standard => dec!(1),
            Tier::Vip => dec!(2),
            Tier::HighRoller => dec!(5),
            Tier::Whale => dec!(10),
        }
    }

    pub fn scan_reward(&self, tier: Tier) -> Decimal {
        self.base_rate * self.tier_multiplier(tier)
    }

    /// Milestones whose thresholds were crossed by moving the quarterly
    /// scan count from `before` to `after`.
    pub fn crossed(&self, before: u32, after: u32) -> impl Iterator<Item = &Milestone> {
        self.milestones
            .iter()
            .filter(move |m| before < m.threshold && m.threshold <= after)
    }
}
