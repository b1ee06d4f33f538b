use crate::core::{DbError, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_JITTER: f64 = 0.1;

/// Attempt budget and backoff for transient failures.
///
/// Each wait is `base_delay * (1 + jitter)` with jitter drawn uniformly from
/// `[0, max_jitter)`. Elapsed time is never considered, only attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// A single attempt and no waiting.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO).max_jitter(0.0)
    }

    /// Negative or NaN values disable jitter.
    pub fn max_jitter(mut self, max_jitter: f64) -> Self {
        self.max_jitter = if max_jitter.is_finite() && max_jitter > 0.0 {
            max_jitter
        } else {
            0.0
        };
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn jitter_range(&self) -> f64 {
        self.max_jitter
    }

    /// The first attempt plus every retry.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait for a given jitter factor, clamped to the configured range.
    pub fn backoff(&self, jitter: f64) -> Duration {
        let jitter = jitter.clamp(0.0, self.max_jitter);
        self.base_delay.mul_f64(1.0 + jitter)
    }

    fn next_delay(&self) -> Duration {
        let jitter = if self.max_jitter > 0.0 {
            rand::random::<f64>() * self.max_jitter
        } else {
            0.0
        };
        self.backoff(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY)
    }
}

/// Re-invokes an operation that fails transiently.
///
/// Non-transient errors are returned on first occurrence. Once the budget is
/// spent, the most recent failure is returned inside
/// [`DbError::RetryExhausted`]. Waiting suspends the task; it never blocks
/// the thread.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = Attempts::new(&self.policy, operation_name);
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let delay = attempts.record(err)?;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Like [`run`](Self::run), lending `state` (usually a connection) to
    /// every attempt.
    pub async fn run_with<S, T, F>(
        &self,
        operation_name: &str,
        state: &mut S,
        mut operation: F,
    ) -> Result<T>
    where
        S: ?Sized,
        F: for<'x> FnMut(&'x mut S) -> BoxFuture<'x, Result<T>>,
    {
        let mut attempts = Attempts::new(&self.policy, operation_name);
        loop {
            match operation(&mut *state).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let delay = attempts.record(err)?;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Bookkeeping for one retried operation.
struct Attempts<'a> {
    policy: &'a RetryPolicy,
    operation: &'a str,
    made: u32,
    waited: Duration,
}

impl<'a> Attempts<'a> {
    fn new(policy: &'a RetryPolicy, operation: &'a str) -> Self {
        Self {
            policy,
            operation,
            made: 0,
            waited: Duration::ZERO,
        }
    }

    /// Returns how long to wait before the next attempt, or the error to
    /// surface.
    fn record(&mut self, err: DbError) -> Result<Duration> {
        self.made += 1;

        if !err.is_transient() {
            debug!(
                operation = self.operation,
                attempt = self.made,
                "Not retrying non-transient failure: {}",
                err
            );
            return Err(err);
        }

        let budget = self.policy.max_attempts();
        if self.made >= budget {
            error!(
                "Failed to execute '{}' after {} attempts: {}",
                self.operation, self.made, err
            );
            return Err(DbError::RetryExhausted {
                query: self.operation.to_string(),
                attempts: self.made,
                waited: self.waited,
                last: Box::new(err),
            });
        }

        let delay = self.policy.next_delay();
        warn!(
            "Operation '{}' failed. Retrying in {:?} (Attempt {}/{}): {}",
            self.operation, delay, self.made, budget, err
        );
        self.waited += delay;
        Ok(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    fn fast(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::new(max_retries, Duration::from_millis(1)))
    }

    #[test]
    fn test_backoff_is_scaled_by_jitter() {
        let policy = RetryPolicy::new(3, Duration::from_millis(2000));
        assert_eq!(policy.backoff(0.0), Duration::from_millis(2000));
        assert_eq!(policy.backoff(0.05).as_millis(), 2100);
        // Clamped to the configured range
        assert_eq!(policy.backoff(5.0).as_millis(), 2200);
    }

    #[test]
    fn test_random_delay_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay < Duration::from_millis(2200));
        }
    }

    #[test]
    fn test_invalid_jitter_is_disabled() {
        assert_eq!(RetryPolicy::default().max_jitter(-1.0).jitter_range(), 0.0);
        assert_eq!(RetryPolicy::default().max_jitter(f64::NAN).jitter_range(), 0.0);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let mut calls = 0;
        let value = fast(3)
            .run("flaky", || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt < 3 {
                        Err(DbError::Transient("lock timeout".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_most_recent_failure() {
        let mut calls = 0;
        let err = fast(3)
            .run("always failing", || {
                calls += 1;
                let attempt = calls;
                async move { Err::<(), _>(DbError::Transient(format!("failure {}", attempt))) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 4);
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
        match err {
            DbError::RetryExhausted {
                query,
                attempts,
                waited,
                last,
            } => {
                assert_eq!(query, "always failing");
                assert_eq!(attempts, 4);
                assert!(waited >= Duration::from_millis(3));
                assert!(matches!(*last, DbError::Transient(ref msg) if msg == "failure 4"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let mut calls = 0;
        let err = fast(3)
            .run("bad query", || {
                calls += 1;
                async { Err::<(), _>(DbError::ParseError("syntax".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, DbError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_run_with_lends_state_to_each_attempt() {
        let mut seen: Vec<u32> = Vec::new();
        let err = fast(2)
            .run_with("lend", &mut seen, |seen| {
                Box::pin(async move {
                    let next = seen.len() as u32;
                    seen.push(next);
                    Err::<(), _>(DbError::LockError("busy".into()))
                })
            })
            .await
            .unwrap_err();

        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
    }
}
