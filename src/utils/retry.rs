use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::error::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Linear,
    Exponential,
}

/// How a single call is retried. Built per call and never mutated afterwards.
pub struct RetryPolicy<E = PersistenceError> {
    /// Retries after the first try; total tries is `max_attempts + 1`.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
    pub is_retryable: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RetryPolicy<E> {}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl<E> RetryPolicy<E> {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff, is_retryable: fn(&E) -> bool) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff,
            is_retryable,
        }
    }

    /// Wait after attempt `attempt` (0-based) has failed, i.e. before attempt `attempt + 1`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt.saturating_add(1)),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.checked_pow(attempt).unwrap_or(u32::MAX)),
        }
    }
}

impl RetryPolicy<PersistenceError> {
    /// Policy for persistence calls, classifying with [`PersistenceError::is_retryable`].
    pub fn persistence(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self::new(max_attempts, base_delay, backoff, PersistenceError::is_retryable)
    }

    /// One try, no retries.
    pub fn single_attempt() -> Self {
        Self::persistence(0, Duration::ZERO, Backoff::Linear)
    }
}

impl Default for RetryPolicy<PersistenceError> {
    fn default() -> Self {
        Self::persistence(3, Duration::from_millis(1000), Backoff::Exponential)
    }
}

/// Per-operation-kind policies handed to the engine.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicies {
    /// Blocks first paint, so it can afford to wait.
    pub initial_load: RetryPolicy,
    /// Create/update/delete from the UI; fails fast to stay responsive.
    pub interactive: RetryPolicy,
    /// Per-entity position writes after a reorder.
    pub reorder: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            initial_load: RetryPolicy::persistence(4, Duration::from_millis(1000), Backoff::Exponential),
            interactive: RetryPolicy::persistence(2, Duration::from_millis(250), Backoff::Linear),
            reorder: RetryPolicy::single_attempt(),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// policy's retry budget is spent. The last error is returned unchanged.
pub async fn retry_with_policy<T, E, F, Fut>(policy: &RetryPolicy<E>, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!("Operation succeeded on attempt {}", attempt + 1);
                }
                return Ok(value);
            }
            Err(e) => {
                if !(policy.is_retryable)(&e) {
                    debug!("Attempt {} failed with non-retryable error, not retrying: {}", attempt + 1, e);
                    return Err(e);
                }
                if attempt >= policy.max_attempts {
                    warn!("Operation failed after {} attempts: {}", attempt + 1, e);
                    return Err(e);
                }

                let delay = policy.delay_after(attempt);
                debug!("Attempt {} failed transiently, retrying in {:?}: {}", attempt + 1, delay, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn always_retry(_: &PersistenceError) -> bool {
        true
    }

    #[tokio::test]
    async fn test_retry_success_on_second_attempt() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::persistence(2, Duration::from_millis(1), Backoff::Linear);

        let result = retry_with_policy(&policy, || {
            let count = attempt_count.clone();
            async move {
                if count.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(PersistenceError::network("connection reset"))
                } else {
                    Ok("saved")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "saved");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_non_retryable_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        let result: Result<(), _> = retry_with_policy(&policy, || {
            let count = attempt_count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(PersistenceError::from_status(401, "jwt expired"))
            }
        })
        .await;

        assert!(matches!(result, Err(PersistenceError::Unauthorized(_))));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_is_max_attempts_plus_one() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::persistence(2, Duration::from_millis(100), Backoff::Exponential);

        let result: Result<(), _> = retry_with_policy(&policy, || {
            let count = attempt_count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(PersistenceError::from_status(503, "unavailable"))
            }
        })
        .await;

        assert!(matches!(result, Err(PersistenceError::Http { status: 503, .. })));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exponential_backoff_growth() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500), Backoff::Exponential, always_retry);
        assert_eq!(policy.delay_after(0), Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_linear_backoff_growth() {
        let policy = RetryPolicy::new(5, Duration::from_millis(250), Backoff::Linear, always_retry);
        assert_eq!(policy.delay_after(0), Duration::from_millis(250));
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_follow_the_schedule() {
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));
        let policy = RetryPolicy::new(2, Duration::from_millis(500), Backoff::Exponential, always_retry);
        let start = Instant::now();

        let _: Result<(), _> = retry_with_policy(&policy, || {
            let stamps = stamps.clone();
            async move {
                stamps.lock().unwrap().push(start.elapsed());
                Err(PersistenceError::timeout("slow"))
            }
        })
        .await;

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 3);
        let first_wait = stamps[1] - stamps[0];
        let second_wait = stamps[2] - stamps[1];
        assert!(first_wait >= Duration::from_millis(500) && first_wait < Duration::from_millis(510));
        assert!(second_wait >= Duration::from_millis(1000) && second_wait < Duration::from_millis(1010));
    }

    #[test]
    fn test_interactive_policy_is_faster_than_initial_load() {
        let policies = RetryPolicies::default();
        assert!(policies.interactive.max_attempts < policies.initial_load.max_attempts);
        assert!(policies.interactive.base_delay < policies.initial_load.base_delay);
        assert_eq!(policies.reorder.max_attempts, 0);
    }
}
