//! Append-only wallet ledger: entries, balance projection, and the
//! idempotent store that ties them together.

pub mod entry;
pub mod projector;
pub mod store;

pub use entry::{derive_entry_id, EntryDraft, EntryKind, EntryStatus, LedgerEntry};
pub use projector::WalletProjection;
pub use store::{AppendOutcome, LedgerStore};
