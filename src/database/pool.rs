//! Database connection pool using sqlx.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tracing::info;

use crate::database::journal::LedgerJournal;

pub struct DatabasePool {
    pool: PgPool,
    ledger: Arc<LedgerJournal>,
}

impl DatabasePool {
    pub async fn new(connection_string: &str) -> Result<Self, String> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(connection_string)
            .await
            .map_err(|e| format!("Failed to connect to PostgreSQL: {}", e))?;

        info!("Connected to PostgreSQL");

        let ledger = Arc::new(LedgerJournal::new(pool.clone()));
        Ok(Self { pool, ledger })
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        info!("Initializing database schema...");

        sqlx::query("CREATE SCHEMA IF NOT EXISTS ledger")
            .execute(&self.pool)
            .await
            .map_err(|e| format!("Failed to create ledger schema: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger.entries (
                id UUID PRIMARY KEY,
                account_id UUID NOT NULL,
                kind TEXT NOT NULL,
                amount NUMERIC(20, 4) NOT NULL,
                status TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                reference_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (account_id, idempotency_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create entries table: {}", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS entries_account_created
             ON ledger.entries (account_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create entries index: {}", e))?;

        info!("Database schema initialized");
        Ok(())
    }

    pub fn ledger(&self) -> Arc<LedgerJournal> {
        self.ledger.clone()
    }
}
