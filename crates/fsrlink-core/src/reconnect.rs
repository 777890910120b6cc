//! Backoff policy for reconnection attempts.
//!
//! The link retries forever. Consecutive failed attempts are spaced by a
//! capped exponential delay; the first attempt after an established
//! connection drops is immediate.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Options for automatic reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectOptions {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts.
    pub max_delay: Duration,
    /// Growth factor applied per additional failure.
    pub backoff_multiplier: f64,
    /// Randomize each delay to between half and all of its nominal value.
    pub jitter: bool,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectOptions {
    /// Set the delay after the first failed attempt.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the ceiling for the delay between attempts.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor applied per additional failure.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Nominal delay after `failures` consecutive failed attempts.
    ///
    /// `initial_delay * multiplier^(failures - 1)`, capped at `max_delay`.
    /// Zero failures means no delay.
    pub fn nominal_delay(&self, failures: u32) -> Duration {
        let Some(step) = failures.checked_sub(1) else {
            return Duration::ZERO;
        };

        let scale = self.backoff_multiplier.powi(step.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * scale;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Delay to actually wait, with jitter applied when enabled.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let nominal = self.nominal_delay(failures);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let half = nominal / 2;
        let extra_ms = rand::rng().random_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(extra_ms)
    }

    /// Check the options are usable.
    pub fn validate(&self) -> Result<()> {
        let problem = if !(self.backoff_multiplier >= 1.0) {
            "backoff_multiplier must be >= 1.0"
        } else if self.initial_delay.is_zero() {
            "initial_delay must be > 0"
        } else if self.max_delay < self.initial_delay {
            "max_delay must be >= initial_delay"
        } else {
            return Ok(());
        };
        Err(Error::InvalidConfig(problem.to_string()))
    }
}
