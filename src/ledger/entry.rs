//! Ledger entry types.
//!
//! Entries are the append-only source of truth for available balance. They
//! are immutable once settled; a correction is a new `Reversal` entry that
//! references the original, never a mutation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    ScanReward,
    MilestoneComp,
    AffiliateMatch,
    VaultBonus,
    Withdrawal,
    VaultRelease,
    Reversal,
}

impl EntryKind {
    /// Withdrawal is the only debit kind; everything else credits.
    pub fn is_debit(&self) -> bool {
        matches!(self, EntryKind::Withdrawal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::ScanReward => "scan_reward",
            EntryKind::MilestoneComp => "milestone_comp",
            EntryKind::AffiliateMatch => "affiliate_match",
            EntryKind::VaultBonus => "vault_bonus",
            EntryKind::Withdrawal => "withdrawal",
            EntryKind::VaultRelease => "vault_release",
            EntryKind::Reversal => "reversal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Settled,
    Reversed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: EntryKind,
    /// Signed fixed-point amount: negative for debits.
    pub amount: Decimal,
    pub status: EntryStatus,
    /// Unique per (account_id, idempotency_key).
    pub idempotency_key: String,
    /// Source event id: scan id, award id, withdrawal request id, ...
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

/// What a caller hands to [`crate::ledger::LedgerStore::append`]. The store
/// assigns id, status and timestamp on commit.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub account_id: Uuid,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub reference_id: String,
}

/// Deterministic entry id from the idempotency scope, so a replayed append
/// observes the exact id the first successful append produced.
pub fn derive_entry_id(account_id: Uuid, idempotency_key: &str) -> Uuid {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    hasher.update(b":");
    hasher.update(idempotency_key.as_bytes());
    let hash = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);
    Uuid::from_bytes(bytes)
}
