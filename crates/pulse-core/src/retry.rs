//! Reconnect policy and backoff calculation.
//!
//! Pure, sync-only building blocks. The async reconnect loop that sleeps on
//! these delays lives in `pulse-realtime`.
//!
//! - [`ReconnectPolicy`]: attempt ceiling and backoff parameters
//! - [`calculate_reconnect_delay`]: `base * growth^(attempt - 1)`, capped

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default reconnect attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay before the first reconnect attempt, in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 2000;
/// Default growth factor between successive delays.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.5;
/// Default cap on any single delay, in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Bounded exponential backoff for re-establishing a dropped link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
    /// Delay before attempt 1, in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier applied per attempt. Values below 1.0 are treated as 1.0.
    pub growth_factor: f64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before 1-indexed `attempt`, or `None` once the ceiling is passed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        (attempt <= self.max_attempts).then(|| {
            Duration::from_millis(calculate_reconnect_delay(
                attempt,
                self.base_delay_ms,
                self.growth_factor,
                self.max_delay_ms,
            ))
        })
    }

    /// Every delay the policy will ever wait, in attempt order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).filter_map(|n| self.delay_for_attempt(n))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate the delay before a reconnect attempt.
///
/// Formula: `min(max_delay, round(base_delay * growth^(attempt - 1)))`
///
/// `attempt` is 1-indexed; `0` is treated as `1`. No jitter is applied so
/// the schedule is non-decreasing in `attempt`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn calculate_reconnect_delay(
    attempt: u32,
    base_delay_ms: u64,
    growth_factor: f64,
    max_delay_ms: u64,
) -> u64 {
    let exponent = attempt.max(1).saturating_sub(1).min(1024) as i32;
    let growth = if growth_factor.is_finite() {
        growth_factor.max(1.0)
    } else {
        1.0
    };
    let raw = (base_delay_ms as f64) * growth.powi(exponent);

    if !raw.is_finite() || raw >= max_delay_ms as f64 {
        return max_delay_ms;
    }
    (raw.round() as u64).min(max_delay_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
