use std::time::Duration;

use weft_core::RetryPolicy;

/// Configuration for the [`RequestExecutor`](crate::RequestExecutor) and
/// [`SubscriptionManager`](crate::SubscriptionManager).
///
/// # Examples
///
/// ```
/// use weft_executor::ExecutorConfig;
///
/// let config = ExecutorConfig::default();
/// assert_eq!(config.retry.attempts, 3);
/// assert_eq!(config.login_path, "/login");
/// ```
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Policy used when a request carries none of its own.
    pub retry: RetryPolicy,
    /// Per-attempt budget when a request carries none of its own.
    pub request_timeout: Duration,
    /// Navigation target after a failed token refresh.
    pub login_path: String,
    /// Write successful reads to the offline cache.
    pub cache_reads: bool,
    /// First reconnect delay for sockets; doubles per failed attempt.
    pub reconnect_base: Duration,
    /// Upper bound on the reconnect delay.
    pub reconnect_max: Duration,
    /// Give up after this many consecutive reconnects. `None` retries forever.
    pub max_reconnects: Option<u32>,
    /// How long to wait for `connection_ack`.
    pub ack_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            login_path: "/login".into(),
            cache_reads: true,
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            max_reconnects: None,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

impl ExecutorConfig {
    /// Delay before reconnect number `attempt` (zero-based):
    /// `min(base * 2^attempt, max)`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.reconnect_base
            .checked_mul(factor)
            .map_or(self.reconnect_max, |d| d.min(self.reconnect_max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_is_capped() {
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.reconnect_delay(0), Duration::from_secs(1));
        assert_eq!(cfg.reconnect_delay(3), Duration::from_secs(8));
        assert_eq!(cfg.reconnect_delay(5), Duration::from_secs(30));
        assert_eq!(cfg.reconnect_delay(40), Duration::from_secs(30));
    }
}
