use crate::error::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Retry policy with exponential backoff, used for background layer recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Execute an async operation, retrying recoverable errors until
    /// `max_attempts` is reached.
    pub async fn execute_async<F, T, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_recoverable() || attempt >= self.max_attempts {
                        return Err(err);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        label, attempt, self.max_attempts, err, delay
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Backoff before the retry that follows `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let mut secs = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent);

        if self.jitter {
            let mut rng = rand::rng();
            secs *= rng.random_range(0.5..1.5);
        }

        // Overflowed backoff saturates at the cap.
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retry_success() {
        let counter = AtomicU32::new(0);
        let result = fast_policy(3)
            .execute_async("op", || {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(Error::Timeout("Simulated timeout".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let counter = AtomicU32::new(0);
        let result: Result<()> = fast_policy(2)
            .execute_async("op", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Network("down".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_recoverable_error() {
        let counter = AtomicU32::new(0);
        let result: Result<()> = fast_policy(5)
            .execute_async("op", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Corruption("bad".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            jitter: false,
            ..fast_policy(10)
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(1));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2));
        assert_eq!(policy.delay_for(10), Duration::from_millis(5));
    }

    #[test]
    fn test_delay_saturates_for_huge_attempts() {
        let policy = fast_policy(u32::MAX);
        for attempt in [2_000, 100_000, u32::MAX] {
            assert_eq!(policy.delay_for(attempt), policy.max_delay);
        }
    }
}
