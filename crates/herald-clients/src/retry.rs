//! Bounded exponential backoff with full jitter.
//!
//! Each attempt's delay is drawn uniformly from `[0, current)` where
//! `current` starts at the initial delay and doubles per attempt. The loop
//! ends when a permanent error occurs or the elapsed budget is spent.

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Run `operation` until it succeeds, fails permanently, or the elapsed
    /// budget runs out (the last error is returned as-is).
    pub async fn run<T, F, Fut>(&self, target: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut current_delay = self.initial_delay;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if error.is_permanent() {
                debug!(target = %target, attempt, error = %error, "Permanent error, not retrying");
                return Err(error);
            }

            let delay = full_jitter(current_delay);
            if started.elapsed() + delay >= self.max_elapsed {
                debug!(target = %target, attempt, "Retry budget exhausted");
                return Err(error);
            }

            debug!(
                target = %target,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after transient error"
            );
            tokio::time::sleep(delay).await;

            current_delay = Duration::from_secs_f64(
                current_delay.as_secs_f64() * self.multiplier,
            );
        }
    }
}

fn full_jitter(cap: Duration) -> Duration {
    let cap_ms = cap.as_millis().max(1) as u64;
    Duration::from_millis(rand::rng().random_range(0..cap_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_errors() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(5),
        };
        let attempts = AtomicU32::new(0);

        let result: Result<u32> = policy
            .run("test", || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ClientError::Transient("503".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn permanent_error_short_circuits() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = policy
            .run("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Permanent {
                    status: 404,
                    message: "not found".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_last_error() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(20),
            multiplier: 2.0,
            max_elapsed: Duration::from_millis(50),
        };

        let result: Result<()> = policy
            .run("test", || async { Err(ClientError::Transient("down".to_string())) })
            .await;

        assert!(matches!(result, Err(ClientError::Transient(_))));
    }

    #[test]
    fn jitter_stays_under_cap() {
        for _ in 0..100 {
            let d = full_jitter(Duration::from_millis(100));
            assert!(d < Duration::from_millis(100));
        }
    }
}
