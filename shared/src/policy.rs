//! Reconnect policy
//!
//! Both reconnect behaviours seen in the field are configurations of the
//! same policy: an unlimited fixed-delay loop, and a capped backoff that
//! ends in the kill state.

use crate::defaults;
use std::time::Duration;

/// Delay applied before reconnect attempt `n` (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay for every attempt
    Fixed(Duration),
    /// `step * attempt`, capped at `max`
    Linear { step: Duration, max: Duration },
    /// `initial * 2^(attempt - 1)`, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the given attempt. Never decreases as `attempt` grows.
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear { step, max } => step.saturating_mul(attempt).min(max),
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt - 1);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial: Duration::from_millis(defaults::BACKOFF_INITIAL_MS),
            max: Duration::from_millis(defaults::BACKOFF_MAX_MS),
        }
    }
}

/// What a transport or connect error does to the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Any error kills the link; no further reconnects
    #[default]
    Fatal,
    /// Errors are reported, then handled like a clean close
    Retry,
}

/// Reconnect ceiling, delay function and error handling for one link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
    pub on_error: ErrorPolicy,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::capped(defaults::MAX_RECONNECT_ATTEMPTS, Backoff::default())
    }
}

impl ReconnectPolicy {
    /// Retry forever with a fixed delay, treating errors like closes
    pub fn persistent(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed(delay),
            on_error: ErrorPolicy::Retry,
        }
    }

    /// Give up after `max_attempts` consecutive failed reconnects
    pub fn capped(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
            on_error: ErrorPolicy::Fatal,
        }
    }

    pub fn with_error_policy(mut self, on_error: ErrorPolicy) -> Self {
        self.on_error = on_error;
        self
    }

    /// Whether `attempts` consecutive failures have used up the budget
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}
