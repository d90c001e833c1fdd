use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff curve applied between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `delay * 2^i`
    #[default]
    Exponential,
    /// `delay * (i + 1)`
    Linear,
    /// `delay * 2^i + random(0, delay)`
    Jitter,
}

/// Declarative retry policy attached to a data source or configured globally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Values below one
    /// are treated as one.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Base delay in milliseconds.
    #[serde(default = "default_delay_ms", alias = "delay")]
    pub delay_ms: u64,
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration, strategy: BackoffStrategy) -> Self {
        Self {
            attempts,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            strategy,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn single_attempt() -> Self {
        Self {
            attempts: 1,
            delay_ms: 0,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Number of attempts, clamped to at least one.
    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
            strategy: BackoffStrategy::default(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_object() {
        let policy: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, RetryPolicy::default());
        assert_eq!(policy.base_delay(), Duration::from_secs(1));
    }

    #[test]
    fn zero_attempts_clamps_to_one() {
        let policy: RetryPolicy = serde_json::from_value(serde_json::json!({
            "attempts": 0,
            "delay": 50,
            "strategy": "linear"
        }))
        .unwrap();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_ms, 50);
        assert_eq!(policy.strategy, BackoffStrategy::Linear);
    }
}
