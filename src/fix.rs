use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Location sample as delivered by the platform location service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres, lower is better. Non-positive
    /// values mean the platform could not compute one.
    pub accuracy: f64,
    pub observed_at: DateTime<Utc>,
}

impl RawFix {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            observed_at,
        }
    }

    /// Age relative to `now`; negative for fixes stamped in the future
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.observed_at)
    }

    /// (0, 0) is what the platform reports when it has no coordinate
    pub fn is_null_island(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

/// A fix that passed the collector's filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub observed_at: DateTime<Utc>,
}

impl From<&RawFix> for Fix {
    fn from(raw: &RawFix) -> Self {
        Fix {
            latitude: raw.latitude,
            longitude: raw.longitude,
            accuracy: raw.accuracy,
            observed_at: raw.observed_at,
        }
    }
}

/// Outcome of one reporting cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    /// Most accurate fix collected during the window
    BestFix { fix: Fix },
    /// Nothing collected this window; last accepted fix from an earlier one
    LastKnown { fix: Fix },
    /// No fix has ever been accepted
    NoData,
}

impl Report {
    pub fn fix(&self) -> Option<&Fix> {
        match self {
            Report::BestFix { fix } | Report::LastKnown { fix } => Some(fix),
            Report::NoData => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Report::NoData)
    }
}
