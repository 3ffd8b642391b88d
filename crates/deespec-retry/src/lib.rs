//! Backoff and interval math for the supervisor loop.
//!
//! Pure functions only: no sleeping, no clock access. The supervisor
//! decides when to wait; this crate only decides how long.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lower bound the supervisor's interval is clamped to.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound the supervisor's interval is clamped to.
pub const MAX_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Upper bound exponential backoff on consecutive errors is capped at.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Supervisor loop configuration: whether to auto-register feedback
/// drafts, and the base tick interval (before backoff).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub auto_fb: bool,
    #[serde(default = "default_interval")]
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            auto_fb: false,
            interval: default_interval(),
        }
    }
}

/// Clamp a configured interval into `[MIN_INTERVAL, MAX_INTERVAL]`.
pub fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_INTERVAL, MAX_INTERVAL)
}

/// The effective interval after `consecutive_errors` exponential backoff
/// steps: `interval * 2^n`, capped at `MAX_BACKOFF`. No backoff is applied
/// when there have been no consecutive errors.
pub fn backoff_interval(interval: Duration, consecutive_errors: u32) -> Duration {
    if consecutive_errors == 0 {
        return clamp_interval(interval);
    }
    let pow = consecutive_errors.min(16);
    let scaled = clamp_interval(interval).saturating_mul(2_u32.saturating_pow(pow));
    scaled.min(MAX_BACKOFF)
}
