//! Error taxonomy for the comp ledger core.
//!
//! Every fallible operation in the crate returns [`CoreError`]. The variants
//! are deliberately coarse: callers need to know whether a failure is a bad
//! request, an expected throttle, a safe replay/conflict, or a transient
//! fault that may be retried with the same idempotency key.

use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Bad input. Never auto-retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Expected throttle outcome, not a failure metric. Retry after backoff.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Idempotency replay mismatch or a lost race. Safe for the caller.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Terminal for the request that hit it.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    /// Per-account lock could not be acquired in time. No partial effect
    /// occurred; the same idempotency key may be retried.
    #[error("account lock timed out")]
    LockTimeout,

    /// Reward trigger referenced an account that does not exist. Dropped and
    /// logged upstream, never retried unboundedly.
    #[error("unknown account {0}")]
    UnknownAccount(Uuid),

    /// Transient infrastructure fault. Retry with the same idempotency key.
    #[error("storage error: {0}")]
    Storage(String),

    /// Missing or invalid credentials on the auth gate.
    #[error("unauthorized")]
    Unauthorized,
}

impl CoreError {
    /// Whether a caller may retry the exact same request (same idempotency
    /// key) and expect it to eventually succeed or replay cleanly.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::RateLimited { .. } | CoreError::LockTimeout | CoreError::Storage(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CoreError::LockTimeout.is_retryable());
        assert!(CoreError::Storage("down".into()).is_retryable());
        assert!(CoreError::RateLimited { retry_after_secs: 3 }.is_retryable());
        assert!(!CoreError::Validation("bad".into()).is_retryable());
        assert!(!CoreError::Conflict("replay mismatch".into()).is_retryable());
    }
}
