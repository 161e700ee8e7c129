//! Concurrency coordinator.
//!
//! Serializes balance-mutating operations per account: operations on
//! different accounts run fully in parallel, operations on the same account
//! queue behind one `tokio` mutex. Acquisition is bounded; a timeout yields
//! `LockTimeout` before any side effect has happened, so the caller may
//! retry with the same idempotency key.
//!
//! Multi-account operations acquire locks in ascending account-id order to
//! prevent deadlock.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

#[derive(Debug)]
pub struct AccountLockGuard {
    _guard: OwnedMutexGuard<()>,
}

pub struct Coordinator {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl Coordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    fn lock_for(&self, account_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Enter the account's critical section. Held guards must stay short:
    /// read balance, validate, append, update projection.
    pub async fn lock(&self, account_id: Uuid) -> CoreResult<AccountLockGuard> {
        let mutex = self.lock_for(account_id);
        match tokio::time::timeout(self.timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(AccountLockGuard { _guard: guard }),
            Err(_) => {
                warn!(account_id = %account_id, "Account lock acquisition timed out");
                Err(CoreError::LockTimeout)
            }
        }
    }

    /// Lock two accounts in canonical ascending order. Used by affiliate
    /// matches that touch referrer and referee.
    pub async fn lock_pair(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> CoreResult<(AccountLockGuard, Option<AccountLockGuard>)> {
        if a == b {
            return Ok((self.lock(a).await?, None));
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first_guard = self.lock(first).await?;
        let second_guard = self.lock(second).await?;
        Ok((first_guard, Some(second_guard)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_account_serializes() {
        let coordinator = Arc::new(Coordinator::new(Duration::from_secs(5)));
        let account = Uuid::new_v4();
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let max_seen = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..20 {
            let coordinator = coordinator.clone();
            let counter = counter.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = coordinator.lock(account).await.unwrap();
                let inside = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                max_seen.fetch_max(inside, std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                counter.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_accounts_run_in_parallel() {
        let coordinator = Coordinator::new(Duration::from_millis(100));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let _guard_a = coordinator.lock(a).await.unwrap();
        // Holding a's lock must not block b.
        let _guard_b = coordinator.lock(b).await.unwrap();
    }

    #[tokio::test]
    async fn contended_lock_times_out_cleanly() {
        let coordinator = Coordinator::new(Duration::from_millis(20));
        let account = Uuid::new_v4();

        let _held = coordinator.lock(account).await.unwrap();
        let err = coordinator.lock(account).await.unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout));

        drop(_held);
        // After release the same account locks again.
        coordinator.lock(account).await.unwrap();
    }

    #[tokio::test]
    async fn pair_lock_order_is_canonical() {
        let coordinator = Arc::new(Coordinator::new(Duration::from_secs(1)));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        // Opposite-order acquisitions on the same pair must not deadlock.
        let c1 = coordinator.clone();
        let c2 = coordinator.clone();
        let t1 = tokio::spawn(async move {
            for _ in 0..50 {
                let _guards = c1.lock_pair(a, b).await.unwrap();
            }
        });
        let t2 = tokio::spawn(async move {
            for _ in 0..50 {
                let _guards = c2.lock_pair(b, a).await.unwrap();
            }
        });
        t1.await.unwrap();
        t2.await.unwrap();
    }

    #[tokio::test]
    async fn pair_lock_same_account_takes_single_lock() {
        let coordinator = Coordinator::new(Duration::from_millis(50));
        let a = Uuid::new_v4();
        let (_guard, second) = coordinator.lock_pair(a, a).await.unwrap();
        assert!(second.is_none());
    }
}
