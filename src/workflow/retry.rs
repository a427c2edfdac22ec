//! Bounded exponential retry policy for pipeline steps
//!
//! The engine owns the retry loop; this module only answers "given this
//! failure on this attempt, wait how long, or give up?".

use super::classifier::{classify, FailureKind, StepFailure, Verdict};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts (first try included) for retryable failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Add jitter to delays
    #[serde(default)]
    pub jitter: bool,

    /// Jitter factor (0.0 to 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Maximum attempts for failures nobody could categorize.
    /// The default of 2 means fatal after a single retry.
    #[serde(default = "default_unknown_attempts")]
    pub unknown_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: false,
            jitter_factor: default_jitter_factor(),
            unknown_attempts: default_unknown_attempts(),
        }
    }
}

/// What the engine should do after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Run the same step again after `delay`
    Retry { delay: Duration },
    /// Abort the run
    Abort(AbortReason),
}

/// Why a run is being aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The failure category is fatal on its own
    Fatal,
    /// A retryable failure ran out of attempts and is converted to fatal
    Exhausted { attempts: u32 },
}

impl RetryPolicy {
    /// No retries at all; useful for tests and one-shot debugging
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            unknown_attempts: 1,
            ..Self::default()
        }
    }

    /// Attempt budget for a failure category
    pub fn attempt_limit(&self, kind: FailureKind) -> u32 {
        let limit = match kind {
            FailureKind::Unknown => self.unknown_attempts.min(self.max_attempts),
            _ => self.max_attempts,
        };
        limit.max(1)
    }

    /// Decide what to do after `attempt` (1-based) failed with `failure`
    pub fn decide(&self, failure: &StepFailure, attempt: u32) -> RetryDecision {
        if classify(failure.kind) == Verdict::Fatal {
            return RetryDecision::Abort(AbortReason::Fatal);
        }

        if attempt >= self.attempt_limit(failure.kind) {
            return RetryDecision::Abort(AbortReason::Exhausted { attempts: attempt });
        }

        RetryDecision::Retry {
            delay: self.apply_jitter(self.calculate_delay(attempt)),
        }
    }

    /// Delay before retrying after the given failed attempt (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * multiplier;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Apply jitter to delay
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }

        let jitter_range = delay.as_secs_f64() * self.jitter_factor.clamp(0.0, 1.0);
        if jitter_range <= 0.0 {
            return delay;
        }
        let mut rng = rand::rng();
        let jitter = rng.random_range(-jitter_range / 2.0..=jitter_range / 2.0);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0)).min(self.max_delay)
    }
}

// Default functions for serde
fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.3
}

fn default_unknown_attempts() -> u32 {
    2
}
