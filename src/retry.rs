//! Bounded retry with exponential backoff, shared by the Gmail client and the
//! semantic-service wrapper. Everything here blocks the calling thread.

use std::time::Duration;

use crate::types::RetryConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 10_000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }
}

impl RetryPolicy {
    /// Short waits for HTTP calls to the mail provider.
    pub fn http() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }

    /// No waiting at all. Tests use this so they never sleep.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait before the retry that follows failed attempt `attempt` (1-based):
    /// initial * 2^(attempt-1), capped, plus up to 150ms of jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.max_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base = self
            .initial_backoff_ms
            .saturating_mul(exponent)
            .min(self.max_backoff_ms);
        let jitter = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0))
            % 150;
        Duration::from_millis(base.saturating_add(jitter).min(self.max_backoff_ms))
    }
}

/// Run `op` until it succeeds, fails with an error `retryable` rejects, or the
/// attempts run out. Returns the last error.
pub fn with_retry<T, E, F, R>(label: &str, policy: &RetryPolicy, retryable: R, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
    R: Fn(&E) -> bool,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && retryable(&err) => {
                let delay = policy.delay(attempt);
                log::warn!(
                    "{} retry {}/{} after error: {} (sleep {:?})",
                    label,
                    attempt,
                    attempts,
                    err,
                    delay
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
