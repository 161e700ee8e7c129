//! Durable ledger journal - PostgreSQL operations for settled entries using sqlx.
//!
//! The in-memory store is authoritative for balances and idempotency; the
//! journal is an append-only mirror of settled entries. Writes are keyed on
//! `(account_id, idempotency_key)` with `ON CONFLICT DO NOTHING`, so a
//! redelivered append is a no-op here too.

use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::ledger::entry::{EntryStatus, LedgerEntry};

pub struct LedgerJournal {
    pool: PgPool,
}

impl LedgerJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, entry: &LedgerEntry) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger.entries
            (id, account_id, kind, amount, status, idempotency_key, reference_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (account_id, idempotency_key) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.account_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(status_str(entry.status))
        .bind(&entry.idempotency_key)
        .bind(&entry.reference_id)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(format!("Failed to journal ledger entry: {}", e)))?;

        debug!(entry_id = %entry.id, account_id = %entry.account_id, "Ledger entry journaled");
        Ok(())
    }

    pub async fn mark_reversed(&self, entry_id: Uuid) -> CoreResult<()> {
        sqlx::query("UPDATE ledger.entries SET status = 'reversed' WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to mark entry reversed: {}", e)))?;
        Ok(())
    }
}

fn status_str(status: EntryStatus) -> &'static str {
    match status {
        EntryStatus::Settled => "settled",
        EntryStatus::Reversed => "reversed",
    }
}
