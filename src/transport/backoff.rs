//! Exponential backoff shared by connect and reconnect

use std::time::Duration;

use crate::error::{CourierError, Result};

/// Retry schedule: `initial`, then multiplied by `multiplier` after each
/// failure, capped at `max`. Never gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration, multiplier: u32) -> Self {
        Self {
            initial,
            max,
            multiplier,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial.is_zero() {
            return Err(CourierError::Config(
                "initial backoff must be greater than zero".to_string(),
            ));
        }
        if self.max < self.initial {
            return Err(CourierError::Config(format!(
                "max backoff {:?} is below initial backoff {:?}",
                self.max, self.initial
            )));
        }
        if self.multiplier < 1 {
            return Err(CourierError::Config(
                "backoff multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Start a fresh retry sequence
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            current: None,
            attempts: 0,
        }
    }
}

/// Running retry state
///
/// Also an endless iterator over the delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Option<Duration>,
    attempts: u32,
}

impl Backoff {
    /// Delay to wait after the next failure
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.policy.initial,
            Some(previous) => previous
                .saturating_mul(self.policy.multiplier)
                .min(self.policy.max),
        };
        self.current = Some(delay);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Forget past failures after a successful connect
    pub fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }

    /// Failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}
