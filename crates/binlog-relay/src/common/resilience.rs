//! Retry policy for checkpoint writes
//!
//! Only errors classified as retriable by [`CdcError::is_retriable`] are
//! retried; anything else, or exhausting the retry budget, is returned to
//! the caller as fatal.

use crate::common::{CdcError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Configuration for retry behavior.
///
/// # Example
///
/// ```rust
/// use binlog_relay::common::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::builder()
///     .max_retries(10)
///     .retry_delay(Duration::from_millis(200))
///     .max_delay(Duration::from_secs(30))
///     .build();
///
/// assert_eq!(config.max_retries(), 10);
/// assert_eq!(config.delay_for_attempt(0), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum retry attempts (`0` = retries disabled)
    max_retries: u32,
    /// Base delay between retries (before exponential backoff)
    retry_delay: Duration,
    /// Maximum delay cap
    max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Create a builder for RetryConfig.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Create a disabled retry config (no retries).
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Whether another attempt is allowed after `attempt` retries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay before retry number `attempt` (0-based): doubles each time,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_delay > self.max_delay {
            return Err(CdcError::config(format!(
                "retry delay {:?} exceeds max delay {:?}",
                self.retry_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Run `op` until it succeeds, fails with a non-retriable error, or the
    /// retry budget is spent. `on_retry` is called before each retry.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        mut op: F,
        mut on_retry: impl FnMut(),
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && self.should_retry(attempt) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt + 1,
                        self.max_retries,
                        delay,
                        e
                    );
                    on_retry();
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn max_retries(mut self, value: u32) -> Self {
        self.config.max_retries = value;
        self
    }

    pub fn retry_delay(mut self, value: Duration) -> Self {
        self.config.retry_delay = value;
        self
    }

    pub fn max_delay(mut self, value: Duration) -> Self {
        self.config.max_delay = value;
        self
    }

    pub fn build(self) -> RetryConfig {
        self.config
    }
}
