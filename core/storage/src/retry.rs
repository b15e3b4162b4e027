//! Bounded exponential back-off for transient storage contention.
//!
//! Only `StorageBusy` is retried. Authentication and integrity failures are
//! returned to the caller immediately.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use cryptosafe_common::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // +/- 25%
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Run `operation`, retrying while it reports transient contention.
    ///
    /// Blocks the calling thread between attempts. After the retry budget is
    /// spent the last `StorageBusy` error is returned.
    pub fn run<T, F>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;

        loop {
            match operation() {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Storage operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) if err.is_transient() => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(
                            "Storage still busy after {} attempts: {}",
                            self.max_retries + 1,
                            err
                        );
                        return Err(match err {
                            Error::StorageBusy(msg) => Error::StorageBusy(format!(
                                "gave up after {} attempts: {}",
                                self.max_retries + 1,
                                msg
                            )),
                            other => other,
                        });
                    }

                    let delay = self.delay_for_attempt(attempt - 1);
                    warn!("Storage busy (attempt {}), retrying in {:?}", attempt, delay);
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
