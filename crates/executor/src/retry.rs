use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use weft_core::{ActionError, BackoffStrategy, RetryPolicy, RuntimeCallbacks, ToastVariant};

/// Wait before retry number `attempt + 1`, for zero-based `attempt`.
///
/// - exponential: `delay * 2^attempt`
/// - linear: `delay * (attempt + 1)`
/// - jitter: `delay * 2^attempt + random(0, delay)`
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use weft_core::{BackoffStrategy, RetryPolicy};
/// use weft_executor::delay_for;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(100), BackoffStrategy::Linear);
/// assert_eq!(delay_for(&policy, 0), Duration::from_millis(100));
/// assert_eq!(delay_for(&policy, 2), Duration::from_millis(300));
/// ```
pub fn delay_for(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.base_delay();
    let doubled = || base.saturating_mul(2u32.saturating_pow(attempt.min(31)));
    match policy.strategy {
        BackoffStrategy::Exponential => doubled(),
        BackoffStrategy::Linear => base.saturating_mul(attempt.saturating_add(1)),
        BackoffStrategy::Jitter => {
            let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
            let extra = if base_ms == 0 {
                0
            } else {
                rand::thread_rng().gen_range(0..base_ms)
            };
            doubled().saturating_add(Duration::from_millis(extra))
        }
    }
}

/// Run `operation` under `policy`.
///
/// `operation` receives the zero-based attempt number. Each attempt, and
/// each wait between attempts, races against `cancel`; a fired token ends
/// the loop with [`ActionError::Cancelled`]. Only retryable errors are
/// retried. When the last allowed attempt fails, the error is returned and
/// `notifier` (if any) receives a single "Failed after N attempts" toast.
///
/// # Errors
///
/// Returns the first non-retryable error, the last retryable error once
/// attempts are exhausted, or [`ActionError::Cancelled`].
pub async fn with_retry<T, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    notifier: Option<&dyn RuntimeCallbacks>,
) -> Result<T, ActionError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ActionError>>,
{
    let attempts = policy.max_attempts();

    for attempt in 0..attempts {
        if cancel.is_cancelled() {
            return Err(ActionError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ActionError::Cancelled),
            result = operation(attempt) => result,
        };

        let err = match result {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if err.is_cancelled() || !err.is_retryable() {
            return Err(err);
        }

        if attempt + 1 >= attempts {
            warn!(attempt, attempts, error = %err, "retries exhausted");
            if let Some(notifier) = notifier {
                notifier.toast(&format!("Failed after {attempts} attempts"), ToastVariant::Error);
            }
            return Err(err);
        }

        let delay = delay_for(policy, attempt);
        warn!(
            attempt,
            error = %err,
            delay_ms = %delay.as_millis(),
            "retryable error, will retry"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ActionError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }

    // `attempts >= 1`, so the loop always returns.
    Err(ActionError::Validation("retry policy allows no attempts".into()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Toasts(Mutex<Vec<String>>);

    impl RuntimeCallbacks for Toasts {
        fn toast(&self, message: &str, _variant: ToastVariant) {
            self.0.lock().push(message.to_owned());
        }
        fn navigate(&self, _href: &str, _replace: bool) {}
        fn open_modal(&self, _id: &str) {}
        fn close_modal(&self, _id: &str) {}
    }

    fn policy(attempts: u32, strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(100), strategy)
    }

    #[test]
    fn exponential_and_linear_delays() {
        let exp = policy(5, BackoffStrategy::Exponential);
        assert_eq!(delay_for(&exp, 0), Duration::from_millis(100));
        assert_eq!(delay_for(&exp, 1), Duration::from_millis(200));
        assert_eq!(delay_for(&exp, 3), Duration::from_millis(800));

        let lin = policy(5, BackoffStrategy::Linear);
        assert_eq!(delay_for(&lin, 0), Duration::from_millis(100));
        assert_eq!(delay_for(&lin, 3), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_one_base_delay() {
        let jit = policy(5, BackoffStrategy::Jitter);
        for attempt in 0..4 {
            let d = delay_for(&jit, attempt);
            let floor = Duration::from_millis(100 * 2u64.pow(attempt));
            assert!(d >= floor && d < floor + Duration::from_millis(100), "{d:?}");
        }
    }

    #[tokio::test]
    async fn non_retryable_status_makes_one_attempt() {
        let calls = AtomicU32::new(0);
        let toasts = Toasts::default();
        let result: Result<(), _> = with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ActionError::network(404, "not found")) }
            },
            &policy(5, BackoffStrategy::Exponential),
            &CancellationToken::new(),
            Some(&toasts),
        )
        .await;
        assert_eq!(result.unwrap_err().status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(toasts.0.lock().is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_notify_once() {
        tokio::time::pause();
        let calls = AtomicU32::new(0);
        let toasts = Toasts::default();
        let start = tokio::time::Instant::now();
        let result: Result<(), _> = with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ActionError::network(503, "unavailable")) }
            },
            &policy(3, BackoffStrategy::Exponential),
            &CancellationToken::new(),
            Some(&toasts),
        )
        .await;
        assert_eq!(result.unwrap_err().status(), Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms between the three attempts; the paused clock rounds
        // each sleep up to the next millisecond.
        let waited = start.elapsed();
        assert!(
            (Duration::from_millis(300)..=Duration::from_millis(305)).contains(&waited),
            "waited {waited:?}"
        );
        assert_eq!(toasts.0.lock().as_slice(), ["Failed after 3 attempts"]);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        tokio::time::pause();
        let result = with_retry(
            |attempt| async move {
                if attempt < 2 {
                    Err(ActionError::Transport("connection reset".into()))
                } else {
                    Ok(attempt)
                }
            },
            &policy(3, BackoffStrategy::Linear),
            &CancellationToken::new(),
            None,
        )
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn pre_cancelled_token_skips_the_call() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            &policy(3, BackoffStrategy::Exponential),
            &cancel,
            None,
        )
        .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelling_during_backoff_stops_waiting() {
        tokio::time::pause();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let start = tokio::time::Instant::now();
        let result: Result<(), _> = with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ActionError::network(500, "boom")) }
            },
            &RetryPolicy::new(3, Duration::from_secs(10), BackoffStrategy::Exponential),
            &cancel,
            None,
        )
        .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
