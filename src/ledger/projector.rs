//! Balance projection.
//!
//! The projection is maintained incrementally inside the store's atomic
//! unit: every settled entry moves `available`, while `vaulted` and
//! `pending` track comp awards that have not (yet) settled into the entry
//! stream. `rebuild`/`verify` exist for reconciliation: the projection must
//! always equal the sum over settled entries.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::entry::{EntryStatus, LedgerEntry};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletProjection {
    /// Spendable balance. Invariant: never negative, always equal to the
    /// sum of settled entry amounts.
    pub available: Decimal,
    /// Sum of awards currently held in the vault.
    pub vaulted: Decimal,
    /// Sum of awards awaiting a payout choice.
    pub pending: Decimal,
}

impl WalletProjection {
    /// Apply one settled entry. Caller has already checked the non-negative
    /// invariant for debits.
    pub fn apply(&mut self, amount: Decimal) {
        self.available += amount;
    }

    /// Recompute the available balance from an entry stream. Reversed
    /// originals and their reversal entries cancel out, so both are summed.
    pub fn rebuild(entries: &[LedgerEntry]) -> Decimal {
        entries
            .iter()
            .filter(|e| matches!(e.status, EntryStatus::Settled | EntryStatus::Reversed))
            .map(|e| e.amount)
            .sum()
    }

    /// Reconciliation check: does the incremental projection match the
    /// entry stream?
    pub fn verify(&self, entries: &[LedgerEntry]) -> bool {
        self.available == Self::rebuild(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::{derive_entry_id, EntryKind};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn entry(account: Uuid, kind: EntryKind, amount: Decimal, key: &str) -> LedgerEntry {
        LedgerEntry {
            id: derive_entry_id(account, key),
            account_id: account,
            kind,
            amount,
            status: EntryStatus::Settled,
            idempotency_key: key.to_string(),
            reference_id: key.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn incremental_projection_matches_rebuild() {
        let account = Uuid::new_v4();
        let entries = vec![
            entry(account, EntryKind::ScanReward, dec!(0.10), "s1"),
            entry(account, EntryKind::MilestoneComp, dec!(5.00), "m1"),
            entry(account, EntryKind::Withdrawal, dec!(-2.50), "w1"),
        ];

        let mut projection = WalletProjection::default();
        for e in &entries {
            projection.apply(e.amount);
        }

        assert_eq!(projection.available, dec!(2.60));
        assert!(projection.verify(&entries));
    }

    #[test]
    fn reversal_pair_cancels() {
        let account = Uuid::new_v4();
        let mut original = entry(account, EntryKind::ScanReward, dec!(1.00), "s1");
        original.status = EntryStatus::Reversed;
        let reversal = entry(account, EntryKind::Reversal, dec!(-1.00), "s1_reversal");

        assert_eq!(WalletProjection::rebuild(&[original, reversal]), dec!(0));
    }
}
