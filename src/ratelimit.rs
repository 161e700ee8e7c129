//! Per-account rate limiting.
//!
//! Two mechanisms:
//! - fixed windows per `(key, action)` for scan submission and login floods,
//!   where denial is an expected outcome (HTTP 429) carrying a retry-after
//!   hint, and
//! - a per-message cooldown for chat, enforced server-side for
//!   non-privileged tiers regardless of any client throttling.
//!
//! Window state is ephemeral and reconstructable; `cleanup` evicts stale
//! entries and is driven from a background task.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::account::Tier;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateAction {
    ScanSubmit,
    Login,
}

impl RateAction {
    fn as_str(&self) -> &'static str {
        match self {
            RateAction::ScanSubmit => "scan_submit",
            RateAction::Login => "login",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub scan_limit: u32,
    pub scan_window: Duration,
    pub login_limit: u32,
    pub login_window: Duration,
    /// Minimum gap between chat messages for non-privileged tiers.
    pub chat_cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            scan_limit: 30,
            scan_window: Duration::from_secs(60),
            login_limit: 10,
            login_window: Duration::from_secs(60),
            chat_cooldown: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Denied { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn into_result(self) -> CoreResult<()> {
        match self {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Denied { retry_after_secs } => {
                Err(CoreError::RateLimited { retry_after_secs })
            }
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    /// (key, action) -> (count, window_start)
    windows: DashMap<(String, RateAction), (u32, Instant)>,
    /// account -> last accepted chat message
    last_message: DashMap<Uuid, Instant>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            last_message: DashMap::new(),
        }
    }

    fn limits(&self, action: RateAction) -> (u32, Duration) {
        match action {
            RateAction::ScanSubmit => (self.config.scan_limit, self.config.scan_window),
            RateAction::Login => (self.config.login_limit, self.config.login_window),
        }
    }

    /// Check and count one action. Keys are account ids for authenticated
    /// actions and client-supplied identifiers (email) for login.
    pub fn check(&self, key: &str, action: RateAction) -> RateDecision {
        let (limit, window) = self.limits(action);
        let now = Instant::now();

        let mut entry = self
            .windows
            .entry((key.to_string(), action))
            .or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        if now.duration_since(*window_start) >= window {
            *count = 0;
            *window_start = now;
        }

        if *count >= limit {
            let retry_after = window
                .checked_sub(now.duration_since(*window_start))
                .map(|d| d.as_secs().max(1))
                .unwrap_or(1);
            debug!(key = %key, action = %action.as_str(), "Rate limit exceeded");
            return RateDecision::Denied {
                retry_after_secs: retry_after,
            };
        }

        *count += 1;
        RateDecision::Allowed {
            remaining: limit - *count,
        }
    }

    /// Per-message cooldown. Privileged tiers bypass; everyone else gets one
    /// message per cooldown interval, counted from the last accepted message.
    pub fn check_message(&self, account_id: Uuid, tier: Tier) -> RateDecision {
        if tier.is_privileged() {
            return RateDecision::Allowed { remaining: u32::MAX };
        }

        let now = Instant::now();
        if let Some(last) = self.last_message.get(&account_id) {
            let since = now.duration_since(*last);
            if since < self.config.chat_cooldown {
                let retry_after = (self.config.chat_cooldown - since).as_secs().max(1);
                return RateDecision::Denied {
                    retry_after_secs: retry_after,
                };
            }
        }

        self.last_message.insert(account_id, now);
        RateDecision::Allowed { remaining: 1 }
    }

    /// Evict windows that expired long enough ago to be irrelevant.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.windows.retain(|(_, action), (_, window_start)| {
            let (_, window) = self.limits(*action);
            now.duration_since(*window_start) < window * 2
        });
        let cooldown = self.config.chat_cooldown;
        self.last_message
            .retain(|_, last| now.duration_since(*last) < cooldown * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_config() -> RateLimitConfig {
        RateLimitConfig {
            scan_limit: 3,
            scan_window: Duration::from_secs(60),
            login_limit: 2,
            login_window: Duration::from_secs(60),
            chat_cooldown: Duration::from_secs(5),
        }
    }

    #[test]
    fn first_n_allowed_then_denied_with_hint() {
        let limiter = RateLimiter::new(tight_config());
        let key = Uuid::new_v4().to_string();

        for expected_remaining in [2, 1, 0] {
            match limiter.check(&key, RateAction::ScanSubmit) {
                RateDecision::Allowed { remaining } => assert_eq!(remaining, expected_remaining),
                RateDecision::Denied { .. } => panic!("should be allowed"),
            }
        }

        match limiter.check(&key, RateAction::ScanSubmit) {
            RateDecision::Denied { retry_after_secs } => {
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
            }
            RateDecision::Allowed { .. } => panic!("should be denied"),
        }

        // A different account is unaffected.
        assert!(matches!(
            limiter.check(&Uuid::new_v4().to_string(), RateAction::ScanSubmit),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn actions_are_tracked_independently() {
        let limiter = RateLimiter::new(tight_config());
        let key = "member@example.com";

        limiter.check(key, RateAction::Login);
        limiter.check(key, RateAction::Login);
        assert!(matches!(
            limiter.check(key, RateAction::Login),
            RateDecision::Denied { .. }
        ));
        // Login exhaustion does not consume the scan budget.
        assert!(matches!(
            limiter.check(key, RateAction::ScanSubmit),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn chat_cooldown_applies_to_non_privileged_only() {
        let limiter = RateLimiter::new(tight_config());
        let standard = Uuid::new_v4();
        let whale = Uuid::new_v4();

        assert!(matches!(
            limiter.check_message(standard, Tier::Standard),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_message(standard, Tier::Standard),
            RateDecision::Denied { .. }
        ));

        // Privileged tiers bypass the cooldown entirely.
        for _ in 0..5 {
            assert!(matches!(
                limiter.check_message(whale, Tier::Whale),
                RateDecision::Allowed { .. }
            ));
        }
    }

    #[test]
    fn denial_maps_to_rate_limited_error() {
        let decision = RateDecision::Denied { retry_after_secs: 7 };
        assert!(matches!(
            decision.into_result(),
            Err(CoreError::RateLimited { retry_after_secs: 7 })
        ));
    }
}
