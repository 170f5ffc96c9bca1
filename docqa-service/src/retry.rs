//! Bounded retries with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::config::GeneratorConfig;

/// Retry schedule for transient failures.
///
/// Retry `n` (1-based) waits `base_delay * 2^(n-1)`, capped at `max_delay`,
/// then varied by up to ±25%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_millis(8_000))
    }
}

impl RetryPolicy {
    /// Create a policy with jitter enabled.
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_retries, base_delay, max_delay, jitter: true }
    }

    /// Create a policy from generator settings.
    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Disable jitter, making delays deterministic.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Retries allowed after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based), before jitter.
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.base_delay_for(retry);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        delay.mul_f64(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with an error for which
    /// `is_transient` is false, or the retries are used up.
    ///
    /// Returns the last error on failure.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut operation: F,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut retry = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if retry < self.max_retries && is_transient(&e) => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    warn!(
                        error = %e,
                        retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
