//! Timing configuration for gas operations.
//!
//! Every delay an operation takes goes through here so tests and the
//! simulator can shrink or virtualize them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Poll intervals, grace periods and ceilings used by gas operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Poll interval of the exposure loop.
    #[serde(with = "humantime_serde")]
    pub exposure_poll: Duration,
    /// Poll interval of the preconditioning loop.
    #[serde(with = "humantime_serde")]
    pub precondition_poll: Duration,
    /// Poll interval while waiting for sensor bias.
    #[serde(with = "humantime_serde")]
    pub bias_poll: Duration,
    /// Longest wait for sensors to bias.
    #[serde(with = "humantime_serde")]
    pub bias_timeout: Duration,
    /// Readings taken earlier than this into a pass are recorded, not scored.
    #[serde(with = "humantime_serde")]
    pub settling_grace: Duration,
    /// Fresh-air purge between passes.
    #[serde(with = "humantime_serde")]
    pub cross_pass_purge: Duration,
    /// Fresh-air purge after the last pass.
    #[serde(with = "humantime_serde")]
    pub final_purge: Duration,
    /// Longest wait for O2 to recover on fresh air.
    #[serde(with = "humantime_serde")]
    pub o2_recovery_timeout: Duration,
    /// Gas flow before zeroing starts.
    #[serde(with = "humantime_serde")]
    pub zero_settle: Duration,
}

impl TimingConfig {
    /// Timing used on the production station.
    pub fn production() -> Self {
        Self {
            exposure_poll: Duration::from_secs(2),
            precondition_poll: Duration::from_secs(1),
            bias_poll: Duration::from_secs(1),
            bias_timeout: Duration::from_secs(2 * 60 * 60),
            settling_grace: Duration::from_secs(5),
            cross_pass_purge: Duration::from_secs(30),
            final_purge: Duration::from_secs(30),
            o2_recovery_timeout: Duration::from_secs(60),
            zero_settle: Duration::from_secs(10),
        }
    }

    /// Production timing with all purges and settles shortened to one poll.
    pub fn compressed() -> Self {
        Self {
            cross_pass_purge: Duration::from_secs(2),
            final_purge: Duration::from_secs(2),
            zero_settle: Duration::from_secs(1),
            ..Self::production()
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self::production()
    }
}
