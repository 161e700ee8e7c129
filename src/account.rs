//! Member accounts and tier classification.
//!
//! The directory is the in-memory registry the core consults for tier
//! multipliers and quarterly scan counts. Accounts are created at signup
//! through the auth gate via [`AccountDirectory::create`].

use chrono::{DateTime, Datelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Account classification affecting reward multipliers and rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Standard,
    Vip,
    HighRoller,
    Whale,
}

impl Tier {
    /// Privileged tiers skip the chat message cooldown.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Tier::HighRoller | Tier::Whale)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub tier: Tier,
    /// Scans verified in the current quarter, for milestone evaluation.
    pub quarterly_scan_count: u32,
    /// Permanent floor: the effective tier never drops below this.
    pub tier_floor: Tier,
    /// Referrer for affiliate match crediting, if any.
    pub referrer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Tier used for multipliers and limits: stored tier, never below the floor.
    pub fn effective_tier(&self) -> Tier {
        self.tier.max(self.tier_floor)
    }
}

/// The quarterly period key, e.g. `2026Q3`. Milestones fire at most once per
/// account per milestone per period.
pub fn period_key(now: DateTime<Utc>) -> String {
    let quarter = (now.month() - 1) / 3 + 1;
    format!("{}Q{}", now.year(), quarter)
}

/// In-memory account registry. Sharded by account id; mutation of a single
/// account's counters happens only inside that account's critical section.
#[derive(Default)]
pub struct AccountDirectory {
    accounts: DashMap<Uuid, Account>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, tier: Tier, referrer_id: Option<Uuid>) -> Account {
        let account = Account {
            id: Uuid::new_v4(),
            tier,
            quarterly_scan_count: 0,
            tier_floor: Tier::Standard,
            referrer_id,
            created_at: Utc::now(),
        };
        debug!(account_id = %account.id, tier = ?tier, "Account created");
        self.accounts.insert(account.id, account.clone());
        account
    }

    pub fn get(&self, id: Uuid) -> CoreResult<Account> {
        self.accounts
            .get(&id)
            .map(|a| a.clone())
            .ok_or(CoreError::UnknownAccount(id))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.accounts.contains_key(&id)
    }

    /// Bump the quarterly scan count and return (previous, new). Called only
    /// for non-replayed scan credits, under the account lock.
    pub fn record_scan(&self, id: Uuid) -> CoreResult<(u32, u32)> {
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or(CoreError::UnknownAccount(id))?;
        let before = account.quarterly_scan_count;
        account.quarterly_scan_count += 1;
        Ok((before, account.quarterly_scan_count))
    }

    pub fn set_tier(&self, id: Uuid, tier: Tier) -> CoreResult<()> {
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or(CoreError::UnknownAccount(id))?;
        account.tier = tier;
        Ok(())
    }

    /// Raise the permanent floor. Floors never lower.
    pub fn raise_tier_floor(&self, id: Uuid, floor: Tier) -> CoreResult<()> {
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or(CoreError::UnknownAccount(id))?;
        if floor > account.tier_floor {
            account.tier_floor = floor;
        }
        Ok(())
    }

    /// Quarterly rollover: counts reset, tiers clamp to their floor.
    pub fn reset_quarter(&self) {
        for mut entry in self.accounts.iter_mut() {
            entry.quarterly_scan_count = 0;
            entry.tier = entry.tier.max(entry.tier_floor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn effective_tier_respects_floor() {
        let dir = AccountDirectory::new();
        let account = dir.create(Tier::Standard, None);
        dir.raise_tier_floor(account.id, Tier::Vip).unwrap();

        let account = dir.get(account.id).unwrap();
        assert_eq!(account.tier, Tier::Standard);
        assert_eq!(account.effective_tier(), Tier::Vip);

        // Floors never lower.
        dir.raise_tier_floor(account.id, Tier::Standard).unwrap();
        assert_eq!(dir.get(account.id).unwrap().tier_floor, Tier::Vip);
    }

    #[test]
    fn quarter_reset_clamps_to_floor() {
        let dir = AccountDirectory::new();
        let account = dir.create(Tier::Standard, None);
        dir.set_tier(account.id, Tier::Whale).unwrap();
        dir.raise_tier_floor(account.id, Tier::HighRoller).unwrap();
        dir.record_scan(account.id).unwrap();

        dir.reset_quarter();

        let account = dir.get(account.id).unwrap();
        assert_eq!(account.quarterly_scan_count, 0);
        assert_eq!(account.tier, Tier::Whale);
        assert_eq!(account.effective_tier(), Tier::Whale);
    }

    #[test]
    fn period_key_format() {
        let jan = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        let aug = Utc.with_ymd_and_hms(2026, 8, 23, 0, 0, 0).unwrap();
        let dec = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(period_key(jan), "2026Q1");
        assert_eq!(period_key(aug), "2026Q3");
        assert_eq!(period_key(dec), "2026Q4");
    }

    #[test]
    fn unknown_account_errors() {
        let dir = AccountDirectory::new();
        let missing = Uuid::new_v4();
        assert!(matches!(
            dir.get(missing),
            Err(CoreError::UnknownAccount(id)) if id == missing
        ));
    }
}
