//! Comp Ledger Core
//!
//! Append-only comp ledger and concurrency-safe payout authorization for a
//! casino loyalty program: scan rewards, milestone comps, affiliate matches,
//! vault bonuses, and withdrawal authorization with exactly-once semantics
//! under concurrent, at-least-once delivery.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── config.rs      - Configuration management
//! ├── error.rs       - Error taxonomy (CoreError)
//! ├── account.rs     - Accounts, tiers, quarterly scan counts
//! ├── coordinator.rs - Per-account critical sections
//! ├── ratelimit.rs   - Per-account rate limiting
//! ├── ledger/        - Append-only wallet ledger
//! │   ├── entry.rs      - Entry kinds, drafts, derived ids
//! │   ├── store.rs      - Idempotent append, replay, reversal
//! │   └── projector.rs  - Balance projection & reconciliation
//! ├── rewards/       - Reward event processing
//! │   ├── processor.rs  - Scan credits, milestones, affiliate matches
//! │   └── milestone.rs  - Comp awards & the award book
//! ├── payout/        - Withdrawal authorization & payout choice
//! ├── api/           - HTTP endpoints
//! │   ├── auth.rs    - Auth gate (register, login, refresh)
//! │   ├── scan.rs    - Scan submission
//! │   ├── wallet.rs  - Balances, choices, withdrawals, history
//! │   └── middleware.rs - Bearer auth, request logging
//! └── database/      - PostgreSQL journal of settled entries
//! ```

pub mod account;
pub mod api;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod ledger;
pub mod payout;
pub mod ratelimit;
pub mod rewards;

// Re-export main types for convenience
pub use account::{Account, AccountDirectory, Tier};
pub use api::{ApiState, AuthService, AuthedAccount, create_router};
pub use config::CompConfig;
pub use coordinator::Coordinator;
pub use database::{DatabasePool, LedgerJournal};
pub use error::{CoreError, CoreResult};
pub use ledger::{
    AppendOutcome, EntryDraft, EntryKind, EntryStatus, LedgerEntry, LedgerStore, WalletProjection,
};
pub use payout::{PayoutService, WithdrawMethod, WithdrawalOutcome, WithdrawalRequest};
pub use ratelimit::{RateAction, RateDecision, RateLimitConfig, RateLimiter};
pub use rewards::milestone::{AwardBook, AwardStatus, ChoiceMethod, CompAward};
pub use rewards::processor::{RewardProcessor, ScanCredit};
pub use rewards::{Milestone, RewardPolicy};
