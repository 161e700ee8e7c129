//! PostgreSQL persistence.
//!
//! Durable journal of settled ledger entries; balances and idempotency
//! state live in the in-memory store.

pub mod journal;
pub mod pool;

pub use journal::LedgerJournal;
pub use pool::DatabasePool;
