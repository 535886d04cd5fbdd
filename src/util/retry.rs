//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WeftError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Apply 75%–125% jitter to each sleep.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries up to `max_attempts` times with default backoff.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Backoff to sleep before the attempt following `attempt` (0-based), without jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let secs = (self.initial_backoff.as_secs_f64() * factor).min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Execute an async operation, retrying errors that are [`WeftError::is_retryable`].
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, WeftError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WeftError>>,
    {
        self.execute_when(operation, WeftError::is_retryable).await
    }

    /// Execute an async operation, retrying any error accepted by `should_retry`.
    pub async fn execute_when<F, Fut, T, E, P>(
        &self,
        mut operation: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !should_retry(&e) || attempt + 1 >= max_attempts {
                        return Err(e);
                    }

                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "Retrying after error"
                    );

                    let backoff = self.backoff_for(attempt);
                    let sleep_duration = if self.jitter {
                        // Jitter: 75%–125% of backoff
                        let jitter_factor = 0.75 + (rand_factor() * 0.5);
                        Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor)
                    } else {
                        backoff
                    };
                    tokio::time::sleep(sleep_duration).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Simple pseudo-random factor [0, 1) without pulling in rand crate.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(7), Duration::from_millis(350));
    }

    #[test]
    fn jitter_factor_stays_in_unit_range() {
        for _ in 0..32 {
            let f = rand_factor();
            assert!((0.0..1.0).contains(&f));
        }
    }
}
