use crate::error::{TrackerError, TrackerResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for every duration setting. Keeps deadline arithmetic and the
/// chrono fix-age conversion far away from overflow.
pub const MAX_DURATION_SECS: u64 = 86_400;

/// Tracker tuning. Every field has a default, so a JSON file only needs the
/// values it wants to override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Time between the first fix of a cycle and the report
    pub report_interval_secs: u64,
    /// How long location updates stay on once a cycle starts
    pub sampling_window_secs: u64,
    /// Fixes older than this are treated as stale cache hits
    pub max_fix_age_secs: u64,
    /// Exclusive upper bound on horizontal accuracy (metres)
    pub max_accuracy_m: f64,
    pub send_timeout_secs: u64,
    /// 1 = send once and log on failure
    pub max_send_attempts: u32,
    pub retry_base_secs: u64,
    pub retry_cap_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            report_interval_secs: 60,
            sampling_window_secs: 10,
            max_fix_age_secs: 30,
            max_accuracy_m: 2000.0,
            send_timeout_secs: 10,
            max_send_attempts: 1,
            retry_base_secs: 2,
            retry_cap_secs: 30,
        }
    }
}

impl TrackerConfig {
    /// Load from a JSON file and validate
    pub fn from_json_file(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if self.report_interval_secs == 0 {
            return Err(TrackerError::InvalidConfig(
                "report_interval_secs must be positive".to_string(),
            ));
        }
        if self.sampling_window_secs == 0 {
            return Err(TrackerError::InvalidConfig(
                "sampling_window_secs must be positive".to_string(),
            ));
        }
        // The stop timer is never cancelled by a report, so it has to fire first.
        if self.sampling_window_secs >= self.report_interval_secs {
            return Err(TrackerError::InvalidConfig(format!(
                "sampling_window_secs ({}) must be shorter than report_interval_secs ({})",
                self.sampling_window_secs, self.report_interval_secs
            )));
        }
        for (name, secs) in [
            ("report_interval_secs", self.report_interval_secs),
            ("max_fix_age_secs", self.max_fix_age_secs),
            ("send_timeout_secs", self.send_timeout_secs),
            ("retry_base_secs", self.retry_base_secs),
            ("retry_cap_secs", self.retry_cap_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(TrackerError::InvalidConfig(format!(
                    "{} ({}) exceeds the {}s limit",
                    name, secs, MAX_DURATION_SECS
                )));
            }
        }
        if !(self.max_accuracy_m > 0.0) {
            return Err(TrackerError::InvalidConfig(
                "max_accuracy_m must be positive".to_string(),
            ));
        }
        if self.send_timeout_secs == 0 {
            return Err(TrackerError::InvalidConfig(
                "send_timeout_secs must be positive".to_string(),
            ));
        }
        if self.max_send_attempts == 0 {
            return Err(TrackerError::InvalidConfig(
                "max_send_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn sampling_window(&self) -> Duration {
        Duration::from_secs(self.sampling_window_secs)
    }

    /// Saturates at [`MAX_DURATION_SECS`] for configs that skipped
    /// [`validate`](Self::validate)
    pub fn max_fix_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_fix_age_secs.min(MAX_DURATION_SECS) as i64)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}
