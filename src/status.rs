use crate::background::TokenId;
use crate::fix::Fix;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

/// Position of the tracker in its sampling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Waiting for the first accepted fix of a cycle
    Idle,
    /// Location updates on, report and stop timers pending
    Sampling,
    /// Updates paused until the report timer fires
    CoolingDown,
}

/// Snapshot of the tracker, written to disk by the binary
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TrackerStatus {
    pub timestamp: f64,
    pub phase: Phase,
    pub tracking: bool,
    pub buffered_fixes: usize,
    pub last_known_fix: Option<Fix>,
    pub fixes_accepted: u64,
    pub fixes_rejected: u64,
    pub reports_produced: u64,
    pub reports_delivered: u64,
    pub delivery_failures: u64,
    // Background sessions
    pub master_session: Option<TokenId>,
    pub auxiliary_sessions: Vec<TokenId>,
    pub uptime_seconds: u64,
}

impl TrackerStatus {
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
