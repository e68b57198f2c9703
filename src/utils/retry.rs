// src/utils/retry.rs
//! Retry with exponential backoff for transient exchange failures.
//!
//! Only errors reporting `is_retryable()` are resent; everything else is
//! returned on the first failure.

use crate::config::RetrySettings;
use crate::error::OrderError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for RetryConfig {
    fn from(s: RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            backoff_multiplier: s.backoff_multiplier,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor).min(u64::MAX as f64) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Per-call deadline plus retry policy for every exchange round-trip.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub retry: RetryConfig,
    pub timeout: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl CallPolicy {
    pub fn new(retry: RetryConfig, timeout: Duration) -> Self {
        Self { retry, timeout }
    }

    /// Runs `operation` with a deadline on each attempt; an elapsed deadline
    /// surfaces as `OrderErrorKind::Timeout` and is retried like any transient error.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, OrderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrderError>>,
    {
        let timeout = self.timeout;
        with_retry(&self.retry, operation_name, || {
            let call = operation();
            async move {
                match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(OrderError::timeout(format!(
                        "{} exceeded {}ms",
                        operation_name,
                        timeout.as_millis()
                    ))),
                }
            }
        })
        .await
    }
}

pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, OrderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OrderError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(op = operation_name, attempts = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= config.max_retries => {
                warn!(
                    op = operation_name,
                    error = %e,
                    attempts = attempt + 1,
                    "giving up after max retries"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_for(attempt);
                warn!(
                    op = operation_name,
                    error = %e,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
