//! Configuration management.
//!
//! Everything the ledger mechanism leaves open as policy (base rate,
//! milestone table, rate limits, lock timeout, vault rules) is loaded
//! here from `COMP_*` environment variables over documented defaults
//! and validated on startup.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::ratelimit::RateLimitConfig;
use crate::rewards::{Milestone, RewardPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompConfig {
    pub server: ServerConfig,
    pub rewards: RewardConfig,
    pub limits: LimitConfig,
    pub concurrency: ConcurrencyConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Credit for one verified scan at multiplier 1, as a decimal string.
    pub base_rate: Decimal,
    pub affiliate_match_rate: Decimal,
    pub vault_bonus_rate: Decimal,
    /// `threshold:comp` pairs in ascending threshold order.
    pub milestones: Vec<(u32, Decimal)>,
    pub choice_timeout_hours: u64,
    pub vault_ttl_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    pub scan_limit: u32,
    pub scan_window_secs: u64,
    pub login_limit: u32,
    pub login_window_secs: u64,
    pub chat_cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Per-account lock acquisition bound in milliseconds.
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub postgres_url: String,
    /// If false, the core runs on the in-memory ledger alone.
    pub postgres_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    pub log_requests: bool,
}

impl Default for CompConfig {
    fn default() -> Self {
        let policy = RewardPolicy::default();
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8460,
            },
            rewards: RewardConfig {
                base_rate: policy.base_rate,
                affiliate_match_rate: policy.affiliate_match_rate,
                vault_bonus_rate: policy.vault_bonus_rate,
                milestones: policy
                    .milestones
                    .iter()
                    .map(|m| (m.threshold, m.comp))
                    .collect(),
                choice_timeout_hours: 72,
                vault_ttl_days: 90,
            },
            limits: LimitConfig {
                scan_limit: 30,
                scan_window_secs: 60,
                login_limit: 10,
                login_window_secs: 60,
                chat_cooldown_secs: 5,
            },
            concurrency: ConcurrencyConfig {
                lock_timeout_ms: 5000,
            },
            database: DatabaseConfig {
                postgres_url: "postgresql://localhost:5432/comp_ledger".to_string(),
                postgres_enabled: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_requests: false,
            },
        }
    }
}

impl CompConfig {
    /// Load configuration from environment variables over defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = env::var("COMP_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = env::var("COMP_PORT") {
            config.server.port = port.parse().context("Invalid COMP_PORT value")?;
        }

        if let Ok(rate) = env::var("COMP_BASE_RATE") {
            config.rewards.base_rate = rate.parse().context("Invalid COMP_BASE_RATE value")?;
        }
        if let Ok(rate) = env::var("COMP_AFFILIATE_MATCH_RATE") {
            config.rewards.affiliate_match_rate = rate
                .parse()
                .context("Invalid COMP_AFFILIATE_MATCH_RATE value")?;
        }
        if let Ok(rate) = env::var("COMP_VAULT_BONUS_RATE") {
            config.rewards.vault_bonus_rate = rate
                .parse()
                .context("Invalid COMP_VAULT_BONUS_RATE value")?;
        }
        if let Ok(raw) = env::var("COMP_MILESTONES") {
            config.rewards.milestones = parse_milestones(&raw)?;
        }
        if let Ok(hours) = env::var("COMP_CHOICE_TIMEOUT_HOURS") {
            config.rewards.choice_timeout_hours = hours
                .parse()
                .context("Invalid COMP_CHOICE_TIMEOUT_HOURS value")?;
        }
        if let Ok(days) = env::var("COMP_VAULT_TTL_DAYS") {
            config.rewards.vault_ttl_days =
                days.parse().context("Invalid COMP_VAULT_TTL_DAYS value")?;
        }

        if let Ok(limit) = env::var("COMP_SCAN_LIMIT") {
            config.limits.scan_limit = limit.parse().context("Invalid COMP_SCAN_LIMIT value")?;
        }
        if let Ok(secs) = env::var("COMP_SCAN_WINDOW_SECS") {
            config.limits.scan_window_secs = secs
                .parse()
                .context("Invalid COMP_SCAN_WINDOW_SECS value")?;
        }
        if let Ok(limit) = env::var("COMP_LOGIN_LIMIT") {
            config.limits.login_limit = limit.parse().context("Invalid COMP_LOGIN_LIMIT value")?;
        }
        if let Ok(secs) = env::var("COMP_LOGIN_WINDOW_SECS") {
            config.limits.login_window_secs = secs
                .parse()
                .context("Invalid COMP_LOGIN_WINDOW_SECS value")?;
        }
        if let Ok(secs) = env::var("COMP_CHAT_COOLDOWN_SECS") {
            config.limits.chat_cooldown_secs = secs
                .parse()
                .context("Invalid COMP_CHAT_COOLDOWN_SECS value")?;
        }

        if let Ok(ms) = env::var("COMP_LOCK_TIMEOUT_MS") {
            config.concurrency.lock_timeout_ms =
                ms.parse().context("Invalid COMP_LOCK_TIMEOUT_MS value")?;
        }

        if let Ok(url) = env::var("COMP_POSTGRES_URL") {
            config.database.postgres_url = url;
        }
        if let Ok(enabled) = env::var("COMP_POSTGRES_ENABLED") {
            config.database.postgres_enabled = enabled
                .parse()
                .context("Invalid COMP_POSTGRES_ENABLED value")?;
        }

        if let Ok(level) = env::var("COMP_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(log_requests) = env::var("COMP_LOG_REQUESTS") {
            config.logging.log_requests = log_requests
                .parse()
                .context("Invalid COMP_LOG_REQUESTS value")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }
        if self.rewards.base_rate <= Decimal::ZERO {
            return Err(anyhow::anyhow!("Base rate must be positive"));
        }
        if self.rewards.affiliate_match_rate < Decimal::ZERO
            || self.rewards.vault_bonus_rate < Decimal::ZERO
        {
            return Err(anyhow::anyhow!("Reward rates cannot be negative"));
        }
        let mut last_threshold = 0;
        for (threshold, comp) in &self.rewards.milestones {
            if *threshold <= last_threshold {
                return Err(anyhow::anyhow!(
                    "Milestone thresholds must be strictly ascending"
                ));
            }
            if *comp <= Decimal::ZERO {
                return Err(anyhow::anyhow!("Milestone comps must be positive"));
            }
            last_threshold = *threshold;
        }
        if self.limits.scan_limit == 0 || self.limits.login_limit == 0 {
            return Err(anyhow::anyhow!("Rate limits must be non-zero"));
        }
        if self.concurrency.lock_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Lock timeout must be non-zero"));
        }
        Ok(())
    }

    pub fn reward_policy(&self) -> RewardPolicy {
        RewardPolicy {
            base_rate: self.rewards.base_rate,
            affiliate_match_rate: self.rewards.affiliate_match_rate,
            vault_bonus_rate: self.rewards.vault_bonus_rate,
            milestones: self
                .rewards
                .milestones
                .iter()
                .map(|(threshold, comp)| Milestone {
                    threshold: *threshold,
                    comp: *comp,
                })
                .collect(),
            choice_timeout: Duration::from_secs(self.rewards.choice_timeout_hours * 3600),
            vault_ttl: Duration::from_secs(self.rewards.vault_ttl_days * 24 * 3600),
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            scan_limit: self.limits.scan_limit,
            scan_window: Duration::from_secs(self.limits.scan_window_secs),
            login_limit: self.limits.login_limit,
            login_window: Duration::from_secs(self.limits.login_window_secs),
            chat_cooldown: Duration::from_secs(self.limits.chat_cooldown_secs),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.concurrency.lock_timeout_ms)
    }
}

fn parse_milestones(raw: &str) -> Result<Vec<(u32, Decimal)>> {
    raw.split(',')
        .map(|pair| {
            let (threshold, comp) = pair
                .trim()
                .split_once(':')
                .context("Milestone entries must be threshold:comp")?;
            Ok((
                threshold.parse().context("Invalid milestone threshold")?,
                comp.parse().context("Invalid milestone comp amount")?,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_config_validates() {
        assert!(CompConfig::default().validate().is_ok());
    }

    #[test]
    fn milestone_list_parses() {
        let milestones = parse_milestones("10:1.00, 50:5.00").unwrap();
        assert_eq!(milestones, vec![(10, dec!(1.00)), (50, dec!(5.00))]);

        assert!(parse_milestones("10").is_err());
        assert!(parse_milestones("ten:1.00").is_err());
    }

    #[test]
    fn unordered_milestones_rejected() {
        let mut config = CompConfig::default();
        config.rewards.milestones = vec![(50, dec!(5.00)), (10, dec!(1.00))];
        assert!(config.validate().is_err());
    }

    #[test]
    fn policy_conversion_carries_numbers() {
        let config = CompConfig::default();
        let policy = config.reward_policy();
        assert_eq!(policy.base_rate, dec!(0.10));
        assert_eq!(policy.milestones.len(), 4);
        assert_eq!(policy.choice_timeout, Duration::from_secs(72 * 3600));
    }
}
