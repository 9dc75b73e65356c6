//! Bounded retry for atomic units that lose an optimistic-concurrency race

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetrySettings;
use crate::error::{AppError, AppResult};

/// Configuration for conflict retry behaviour
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with ±25% jitter so racing callers spread out
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay = (base_ms * self.backoff_multiplier.powi(retry as i32)).min(max_ms);
        let jitter = delay * 0.25 * (rand::thread_rng().gen::<f64>() - 0.5) * 2.0;

        Duration::from_millis((delay + jitter).clamp(0.0, max_ms) as u64)
    }

    /// Run `body` until it commits, fails for a non-conflict reason, or the
    /// attempt budget runs out. `body` must redo its reads on every call.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut body: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match body().await {
                Err(err) if err.is_conflict() => {
                    if attempt >= max_attempts {
                        tracing::warn!(operation, attempts = attempt, "Giving up after repeated conflicts");
                        return Err(AppError::RetryExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.delay_for(attempt - 1);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Conflict detected, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}
