//! Single retry policy shared by both loaders.
//!
//! Retries are reserved for connectivity failures; constraint violations,
//! capacity overruns, and store resource limits fail the same way on every
//! attempt, so they propagate immediately. Benchmark query timing never
//! goes through this path.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::error::LoadError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier.max(1.0),
        }
    }

    /// Delay before attempt `n` (attempts are 1-based; no delay before the
    /// first one).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.base_delay.mul_f64(factor)
    }

    /// Run `op` until it succeeds, fails unretryably, or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, LoadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LoadError>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        what,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Target;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
        }
    }

    fn connectivity() -> LoadError {
        LoadError::Connectivity {
            target: Target::Postgres,
            phase: "test".into(),
            source: anyhow::anyhow!("refused"),
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, LoadError>(42) }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_connectivity_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(connectivity())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = policy(2)
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(connectivity()) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind_label(), "connectivity");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_constraint_violation_not_retried() {
        let calls = AtomicU32::new(0);
        let err = policy(5)
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(LoadError::ConstraintViolation {
                        unit: "chunk 0".into(),
                        detail: "duplicate".into(),
                    })
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind_label(), "constraint_violation");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_geometrically() {
        let p = policy(5);
        assert_eq!(p.backoff(1), Duration::from_millis(1));
        assert_eq!(p.backoff(2), Duration::from_millis(2));
        assert_eq!(p.backoff(3), Duration::from_millis(4));
    }
}
