//! Runtime configuration read from `SCORELINE_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use scoreline_jobs::{Backoff, BackoffStrategy, RetryPolicy};

use crate::jobs::JobExecutorConfig;

pub const WORKERS: &str = "SCORELINE_WORKERS";
pub const POLL_INTERVAL_MS: &str = "SCORELINE_POLL_INTERVAL_MS";
pub const MAX_RETRIES: &str = "SCORELINE_MAX_RETRIES";
pub const RETRY_BASE_DELAY_MS: &str = "SCORELINE_RETRY_BASE_DELAY_MS";
pub const RETRY_MAX_DELAY_MS: &str = "SCORELINE_RETRY_MAX_DELAY_MS";
pub const RETRY_STRATEGY: &str = "SCORELINE_RETRY_STRATEGY";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    /// Applied to every job that does not carry its own policy.
    pub retry_policy: RetryPolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(100),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let backoff = defaults.retry_policy.backoff.clone();

        let workers: usize = parse(&lookup, WORKERS)?.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(ConfigError::Invalid {
                key: WORKERS,
                value: "0".to_string(),
            });
        }

        let poll_interval = parse(&lookup, POLL_INTERVAL_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let max_retries = parse(&lookup, MAX_RETRIES)?.unwrap_or(defaults.retry_policy.max_retries);
        let base_delay = parse(&lookup, RETRY_BASE_DELAY_MS)?
            .map(Duration::from_millis)
            .unwrap_or(backoff.base_delay);
        let max_delay = parse(&lookup, RETRY_MAX_DELAY_MS)?
            .map(Duration::from_millis)
            .unwrap_or(backoff.max_delay);
        let strategy: BackoffStrategy = parse(&lookup, RETRY_STRATEGY)?.unwrap_or(backoff.strategy);

        if max_delay < base_delay {
            return Err(ConfigError::Invalid {
                key: RETRY_MAX_DELAY_MS,
                value: max_delay.as_millis().to_string(),
            });
        }

        Ok(Self {
            workers,
            poll_interval,
            retry_policy: RetryPolicy::new(
                max_retries,
                Backoff {
                    strategy,
                    base_delay,
                    max_delay,
                    ..backoff
                },
            ),
        })
    }

    pub fn executor_config(&self) -> JobExecutorConfig {
        JobExecutorConfig::default()
            .with_name("settlement")
            .with_workers(self.workers)
            .with_poll_interval(self.poll_interval)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid { key, value: raw })
}
