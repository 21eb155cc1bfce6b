//! Classification-aware retry around one protocol run.
//!
//! Only [`FailureClass::Transient`] failures are retried. Blocked and
//! permanent failures return after the attempt that produced them, and
//! cancellation returns immediately, including from inside a backoff wait.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{FailureClass, ProbeError};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay unit; the wait after the n-th failure is `backoff_base * 2^n`.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Minimum wait after `failures` consecutive transient failures.
    ///
    /// | Failures | Wait before next attempt |
    /// |----------|--------------------------|
    /// | 1        | base × 2 |
    /// | 2        | base × 4 |
    /// | 3        | base × 8 |
    #[must_use]
    pub fn backoff_for(&self, failures: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX))
    }
}

/// Result of [`run_with_retry`]: the final outcome and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProbeError>,
    pub attempts: u32,
}

/// Runs `operation` until it succeeds, fails terminally, or exhausts
/// `policy.max_attempts`.
///
/// Waits are the [`RetryPolicy::backoff_for`] floor plus up to 25% random
/// jitter so that tasks failing together do not retry in lockstep.
pub async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProbeError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(err) => err,
        };

        let class = err.class();
        if class != FailureClass::Transient || attempt >= max_attempts {
            if class == FailureClass::Transient {
                tracing::warn!(attempt, max_attempts, error = %err, "retries exhausted");
            }
            return RetryOutcome {
                result: Err(err),
                attempts: attempt,
            };
        }

        let delay = with_jitter(policy.backoff_for(attempt));
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient probe failure; retrying after backoff"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return RetryOutcome {
                    result: Err(ProbeError::Cancelled),
                    attempts: attempt,
                };
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

fn with_jitter(floor: Duration) -> Duration {
    if floor.is_zero() {
        return floor;
    }
    let factor = rand::random::<f64>() * 0.25;
    floor + floor.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn transient() -> ProbeError {
        ProbeError::UnexpectedStatus {
            status: 503,
            url: "https://store.example/api".to_owned(),
            excerpt: String::new(),
        }
    }

    fn policy(base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(base_ms),
        }
    }

    #[test]
    fn backoff_doubles_per_failure() {
        let p = policy(10);
        assert_eq!(p.backoff_for(1), Duration::from_millis(20));
        assert_eq!(p.backoff_for(2), Duration::from_millis(40));
        assert_eq!(p.backoff_for(3), Duration::from_millis(80));
    }

    #[tokio::test]
    async fn succeeds_immediately_on_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let outcome = run_with_retry(policy(0), &CancellationToken::new(), |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, ProbeError>(42)
            }
        })
        .await;
        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn two_transient_failures_then_success_takes_three_attempts() {
        let base = Duration::from_millis(10);
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&stamps);
        let outcome = run_with_retry(policy(10), &CancellationToken::new(), |attempt| {
            let s = Arc::clone(&s);
            async move {
                s.lock().unwrap().push(Instant::now());
                if attempt < 3 {
                    Err(transient())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 3);
        assert_eq!(outcome.attempts, 3);
        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 3);
        assert!(stamps[1] - stamps[0] >= base * 2);
        assert!(stamps[2] - stamps[1] >= base * 4);
    }

    #[tokio::test]
    async fn blocked_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let outcome = run_with_retry(policy(0), &CancellationToken::new(), |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProbeError::Blocked {
                    url: "https://store.example/".to_owned(),
                    marker: "captcha".to_owned(),
                    excerpt: String::new(),
                })
            }
        })
        .await;
        assert!(matches!(outcome.result, Err(ProbeError::Blocked { .. })));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_is_not_retried() {
        let outcome = run_with_retry(policy(0), &CancellationToken::new(), |_| async {
            Err::<(), _>(ProbeError::UnexpectedStatus {
                status: 400,
                url: "https://store.example/api".to_owned(),
                excerpt: String::new(),
            })
        })
        .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let outcome = run_with_retry(policy(1), &CancellationToken::new(), |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            }
        })
        .await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            outcome.result,
            Err(ProbeError::UnexpectedStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = run_with_retry(policy(10_000), &cancel, |_| async {
            Err::<(), _>(transient())
        })
        .await;
        assert!(matches!(outcome.result, Err(ProbeError::Cancelled)));
        assert_eq!(outcome.attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
