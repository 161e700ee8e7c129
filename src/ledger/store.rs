//! Wallet ledger store.
//!
//! Append-only, idempotent, and atomic per account: a new `(account_id,
//! idempotency_key)` appends the entry and updates the projected wallet in
//! one unit; a seen key returns the stored outcome unchanged. Callers
//! serialize mutations per account through the coordinator; the store's
//! sharded map makes each mutation atomic with respect to readers.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::LedgerJournal;
use crate::error::{CoreError, CoreResult};
use crate::ledger::entry::{derive_entry_id, EntryDraft, EntryKind, EntryStatus, LedgerEntry};
use crate::ledger::projector::WalletProjection;

/// Result of an append, replayed verbatim for duplicate idempotency keys.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub entry_id: Uuid,
    pub kind: EntryKind,
    pub amount: Decimal,
    /// Available balance immediately after this entry settled.
    pub balance_after: Decimal,
    /// True when this call observed a previously stored outcome.
    pub replayed: bool,
}

#[derive(Default)]
struct AccountLedger {
    entries: Vec<LedgerEntry>,
    wallet: WalletProjection,
    /// idempotency_key -> outcome of the first successful append.
    seen: HashMap<String, AppendOutcome>,
}

pub struct LedgerStore {
    ledgers: DashMap<Uuid, AccountLedger>,
    /// Optional durable journal; writes are best-effort behind the
    /// in-memory commit and never block or un-commit a balance mutation.
    journal: Option<Arc<LedgerJournal>>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            ledgers: DashMap::new(),
            journal: None,
        }
    }

    pub fn with_journal(journal: Arc<LedgerJournal>) -> Self {
        Self {
            ledgers: DashMap::new(),
            journal: Some(journal),
        }
    }

    /// Append an entry under an idempotency key.
    ///
    /// Replay of a seen key returns the stored outcome with no new entry and
    /// no balance change. A replay whose amount or kind differs from what was
    /// originally stored is a caller bug, surfaced as `Conflict`. A debit
    /// that would take the available balance negative fails with
    /// `InsufficientBalance` and leaves no trace.
    pub fn append(&self, draft: EntryDraft, idempotency_key: &str) -> CoreResult<AppendOutcome> {
        let mut ledger = self.ledgers.entry(draft.account_id).or_default();

        if let Some(prior) = ledger.seen.get(idempotency_key) {
            if prior.amount != draft.amount || prior.kind != draft.kind {
                return Err(CoreError::Conflict(format!(
                    "idempotency key {} replayed with different payload: stored {} {}, got {} {}",
                    idempotency_key,
                    prior.kind.as_str(),
                    prior.amount,
                    draft.kind.as_str(),
                    draft.amount,
                )));
            }
            debug!(
                account_id = %draft.account_id,
                idempotency_key = %idempotency_key,
                "Ledger append replayed"
            );
            let mut outcome = prior.clone();
            outcome.replayed = true;
            return Ok(outcome);
        }

        let balance_after = ledger.wallet.available + draft.amount;
        if balance_after < Decimal::ZERO {
            return Err(CoreError::InsufficientBalance {
                requested: -draft.amount,
                available: ledger.wallet.available,
            });
        }

        let entry = LedgerEntry {
            id: derive_entry_id(draft.account_id, idempotency_key),
            account_id: draft.account_id,
            kind: draft.kind,
            amount: draft.amount,
            status: EntryStatus::Settled,
            idempotency_key: idempotency_key.to_string(),
            reference_id: draft.reference_id,
            created_at: chrono::Utc::now(),
        };

        let outcome = AppendOutcome {
            entry_id: entry.id,
            kind: entry.kind,
            amount: entry.amount,
            balance_after,
            replayed: false,
        };

        ledger.wallet.apply(entry.amount);
        ledger
            .seen
            .insert(idempotency_key.to_string(), outcome.clone());
        self.persist(&entry);
        ledger.entries.push(entry);

        debug!(
            account_id = %draft.account_id,
            idempotency_key = %idempotency_key,
            amount = %outcome.amount,
            balance_after = %balance_after,
            "Ledger entry settled"
        );
        Ok(outcome)
    }

    /// Correct a settled entry by appending a reversal. The original is
    /// marked `Reversed` but never mutated in amount; the reversal entry is
    /// itself idempotent under `{entry_id}_reversal`.
    pub fn reverse(&self, account_id: Uuid, entry_id: Uuid) -> CoreResult<AppendOutcome> {
        let amount = {
            let ledger = self
                .ledgers
                .get(&account_id)
                .ok_or(CoreError::UnknownAccount(account_id))?;
            let original = ledger
                .entries
                .iter()
                .find(|e| e.id == entry_id)
                .ok_or_else(|| CoreError::Validation(format!("entry {entry_id} not found")))?;
            if original.kind == EntryKind::Reversal {
                return Err(CoreError::Validation(
                    "reversal entries cannot themselves be reversed".into(),
                ));
            }
            // An already-reversed original falls through: the keyed append
            // below replays the reversal instead of double-correcting.
            original.amount
        };

        let outcome = self.append(
            EntryDraft {
                account_id,
                kind: EntryKind::Reversal,
                amount: -amount,
                reference_id: entry_id.to_string(),
            },
            &format!("{entry_id}_reversal"),
        )?;

        if !outcome.replayed {
            if let Some(mut ledger) = self.ledgers.get_mut(&account_id) {
                if let Some(original) = ledger.entries.iter_mut().find(|e| e.id == entry_id) {
                    original.status = EntryStatus::Reversed;
                }
            }
            if let Some(journal) = &self.journal {
                let journal = journal.clone();
                tokio::spawn(async move {
                    if let Err(e) = journal.mark_reversed(entry_id).await {
                        warn!(entry_id = %entry_id, error = %e, "Journal reversal mark failed");
                    }
                });
            }
        }
        Ok(outcome)
    }

    /// Stored outcome for an idempotency key that already settled, if any.
    /// Lets callers decide replay before recomputing a payload that may
    /// legitimately differ on redelivery.
    pub fn outcome(&self, account_id: Uuid, idempotency_key: &str) -> Option<AppendOutcome> {
        self.ledgers
            .get(&account_id)
            .and_then(|l| l.seen.get(idempotency_key).cloned())
    }

    /// Snapshot of the projected wallet. Reflects only settled state, never
    /// a half-applied mutation.
    pub fn wallet(&self, account_id: Uuid) -> WalletProjection {
        self.ledgers
            .get(&account_id)
            .map(|l| l.wallet.clone())
            .unwrap_or_default()
    }

    /// Settled entries, newest first.
    pub fn history(&self, account_id: Uuid) -> Vec<LedgerEntry> {
        self.ledgers
            .get(&account_id)
            .map(|l| {
                let mut entries = l.entries.clone();
                entries.reverse();
                entries
            })
            .unwrap_or_default()
    }

    /// Reconciliation: does every account's projection match its entries?
    pub fn verify_projections(&self) -> bool {
        self.ledgers
            .iter()
            .all(|l| l.wallet.verify(&l.entries))
    }

    // Vault and pending buckets track award state that has not settled into
    // the entry stream yet. Adjusted only under the account lock.

    pub fn pending_add(&self, account_id: Uuid, amount: Decimal) {
        self.ledgers.entry(account_id).or_default().wallet.pending += amount;
    }

    pub fn pending_remove(&self, account_id: Uuid, amount: Decimal) -> CoreResult<()> {
        let mut ledger = self.ledgers.entry(account_id).or_default();
        if ledger.wallet.pending < amount {
            return Err(CoreError::Conflict(format!(
                "pending bucket underflow: have {}, removing {}",
                ledger.wallet.pending, amount
            )));
        }
        ledger.wallet.pending -= amount;
        Ok(())
    }

    pub fn vault_add(&self, account_id: Uuid, amount: Decimal) {
        self.ledgers.entry(account_id).or_default().wallet.vaulted += amount;
    }

    pub fn vault_remove(&self, account_id: Uuid, amount: Decimal) -> CoreResult<()> {
        let mut ledger = self.ledgers.entry(account_id).or_default();
        if ledger.wallet.vaulted < amount {
            return Err(CoreError::Conflict(format!(
                "vault bucket underflow: have {}, removing {}",
                ledger.wallet.vaulted, amount
            )));
        }
        ledger.wallet.vaulted -= amount;
        Ok(())
    }

    fn persist(&self, entry: &LedgerEntry) {
        if let Some(journal) = &self.journal {
            let journal = journal.clone();
            let entry = entry.clone();
            tokio::spawn(async move {
                if let Err(e) = journal.record(&entry).await {
                    warn!(
                        entry_id = %entry.id,
                        account_id = %entry.account_id,
                        error = %e,
                        "Journal write failed; entry remains settled in memory"
                    );
                }
            });
        }
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
