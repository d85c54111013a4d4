// ABOUTME: Bounded retry with exponential backoff and jitter
// ABOUTME: Generic over the operation; backoff waits are interruptible by cancellation

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{EtlError, Result};

/// Retry policy for a single fallible operation.
///
/// Stateless and cheap to copy; each call to [`retry`] takes its own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Perturb each backoff by up to ±25%
    pub jitter: bool,
}

impl RetryPolicy {
    /// Policy used for batch inserts into the destination.
    pub const fn batch_insert() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }

    /// Backoff before attempt `attempt` (1-based count of failures so far),
    /// before jitter: `min(base_delay * 2^attempt, max_delay)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Backoff with jitter applied.
    ///
    /// `unit` is a sample in `[-1.0, 1.0]`; the delay moves by `unit * 25%`.
    /// A result that would go negative falls back to `base_delay`.
    pub fn jittered_backoff(&self, attempt: u32, unit: f64) -> Duration {
        let backoff = self.backoff(attempt);
        if !self.jitter {
            return backoff;
        }
        let range = backoff.as_secs_f64() * 0.25;
        let jittered = backoff.as_secs_f64() + unit.clamp(-1.0, 1.0) * range;
        if jittered < 0.0 {
            self.base_delay
        } else {
            Duration::from_secs_f64(jittered)
        }
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let unit = if self.jitter {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.jittered_backoff(attempt, unit)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::batch_insert()
    }
}

/// Retry an async operation until it succeeds or the policy gives up
///
/// The operation is invoked at most `policy.max_attempts` times (at least
/// once). Between attempts the executor sleeps for the policy's backoff; if
/// `cancel` fires during that wait it returns [`EtlError::Cancelled`]
/// immediately and makes no further attempts.
///
/// # Errors
///
/// - [`EtlError::RetryExhausted`] wrapping the last operation error once all
///   attempts have failed
/// - [`EtlError::Cancelled`] if cancelled while waiting
///
/// # Examples
///
/// ```no_run
/// # use pgtoch::retry::{retry, RetryPolicy};
/// # use tokio_util::sync::CancellationToken;
/// # async fn example() -> pgtoch::error::Result<()> {
/// let cancel = CancellationToken::new();
/// let value = retry(RetryPolicy::batch_insert(), &cancel, || async { Ok(42) }).await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub async fn retry<F, Fut, T>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        attempt += 1;

        // A cancelled operation is not a transient failure
        if err.is_cancelled() {
            return Err(err);
        }

        if attempt >= max_attempts {
            return Err(EtlError::RetryExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = policy.next_delay(attempt);
        tracing::warn!(
            "Operation failed (attempt {}/{}), retrying in {:?}: {}",
            attempt,
            max_attempts,
            delay,
            err
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EtlError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter: true,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::batch_insert();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(6), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy::batch_insert();
        assert_eq!(policy.jittered_backoff(1, 1.0), Duration::from_millis(625));
        assert_eq!(policy.jittered_backoff(1, -1.0), Duration::from_millis(375));
        assert_eq!(policy.jittered_backoff(1, 0.0), Duration::from_millis(500));

        let no_jitter = RetryPolicy {
            jitter: false,
            ..policy
        };
        assert_eq!(no_jitter.jittered_backoff(1, 1.0), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result = retry(fast_policy(4), &cancel, || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 4 {
                Err(EtlError::Query(format!("transient {}", n)))
            } else {
                Ok("inserted")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "inserted");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_after_max_attempts() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<()> = retry(fast_policy(3), &cancel, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EtlError::Connection("refused".to_string()))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(EtlError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, EtlError::Connection(_)));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_sleep_stops_attempts() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: false,
        };
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        // Fires 3s into a backoff of at least 10s
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            token.cancel();
        });

        let started = tokio::time::Instant::now();
        let result: Result<()> = retry(policy, &cancel, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EtlError::Query("boom".to_string()))
        })
        .await;

        assert!(matches!(result, Err(EtlError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_backoff_stops_attempts() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let token = &cancel;

        let result: Result<()> = retry(fast_policy(5), &cancel, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            token.cancel();
            Err(EtlError::Query("boom".to_string()))
        })
        .await;

        assert!(matches!(result, Err(EtlError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<()> = retry(fast_policy(0), &cancel, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EtlError::Query("boom".to_string()))
        })
        .await;

        assert!(matches!(result, Err(EtlError::RetryExhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
