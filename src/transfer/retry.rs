use std::fmt::Display;
use std::thread;
use std::time::Duration;

use rand::RngExt;

use crate::error::HfxferError;
use crate::hub::RemoteError;

/// Bounded exponential backoff settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt; an operation runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, HfxferError> {
        if base_delay.is_zero() {
            return Err(HfxferError::validation("retry base delay must be positive"));
        }
        if base_delay > max_delay {
            return Err(HfxferError::validation(format!(
                "retry base delay ({base_delay:?}) exceeds max delay ({max_delay:?})"
            )));
        }
        Ok(Self {
            max_retries,
            base_delay,
            max_delay,
            ..Self::default()
        })
    }

    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Delay before retry number `attempt` (0-indexed), without jitter:
    /// `min(base_delay * 2^attempt, max_delay)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let bound = self.max_jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..bound))
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        RemoteError::is_retryable(self)
    }
}

/// Run `operation`, retrying retryable failures with exponential backoff.
///
/// Terminal failures and the failure of the last allowed attempt are returned
/// unchanged.
pub fn with_retry<T, E, F>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => {
                tracing::debug!(attempt, error = %err, "terminal failure, not retrying");
                return Err(err);
            }
            Err(err) if attempt >= config.max_retries => {
                tracing::debug!(attempt, error = %err, "retries exhausted");
                return Err(err);
            }
            Err(err) => {
                let delay = config.backoff(attempt) + config.jitter();
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
