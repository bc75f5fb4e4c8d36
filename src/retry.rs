//! Backoff for transient backend failures.
//!
//! Only errors whose [`AuthError::retryable`] is true are retried: a wrong
//! password or captcha is never resubmitted.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetrySettings;
use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    settings: RetrySettings,
    jitter: bool,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings: RetrySettings { attempts: settings.attempts.max(1), ..settings }, jitter: true }
    }

    /// Single attempt, no waiting.
    #[must_use]
    pub fn none() -> Self {
        Self::new(RetrySettings { attempts: 1, base_delay: Duration::ZERO, max_delay: Duration::ZERO })
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.settings.attempts
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped,
    /// plus up to 25% jitter.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.settings.base_delay.saturating_mul(2u32.saturating_pow(retry));
        let delay = exp.min(self.settings.max_delay);
        if !self.jitter {
            return delay;
        }
        let spread = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
        if spread == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..=spread))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    ///
    /// # Errors
    ///
    /// The last error returned by `op`.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, AuthError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable() && attempt < self.settings.attempts => {
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = self.settings.attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetrySettings::default())
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
