//! Jittered exponential backoff shared by the control-plane reconnect loop and
//! the REST client's retries.

use std::time::Duration;

use rand::Rng;

use border0_core::{Border0Error, Border0Result};

/// `delay(n) = min(base * 2^n, cap) * U[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction of the nominal delay to spread either side, in `[0, 1]`.
    /// [`delay`](Self::delay) clamps out-of-range values and treats NaN as 0.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.5,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Border0Result<()> {
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err(Border0Error::Config(format!(
                "backoff jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        if self.cap < self.base {
            return Err(Border0Error::Config(format!(
                "backoff cap {:?} is below base {:?}",
                self.cap, self.base
            )));
        }
        Ok(())
    }

    /// The un-jittered delay for the given attempt (0-based).
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// The jittered delay for the given attempt (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal(attempt);
        let jitter = if self.jitter.is_nan() {
            0.0
        } else {
            self.jitter.clamp(0.0, 1.0)
        };
        if jitter == 0.0 || nominal.is_zero() {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        Duration::try_from_secs_f64(nominal.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}
