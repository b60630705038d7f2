use serde::{Deserialize, Serialize};
use std::fmt;

/// Location permission as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    NotDetermined,
    Authorized,
    Denied,
    Restricted,
}

/// Control side of the platform location service. Fixes flow the other way,
/// through [`crate::tracker::TrackerHandle::push_fixes`].
pub trait LocationService: Send {
    fn start_updates(&mut self);
    fn stop_updates(&mut self);
    fn services_enabled(&self) -> bool;
    fn authorization(&self) -> AuthorizationStatus;
}

/// Errors delivered by the location service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationError {
    /// General network-related failure
    Network,
    /// User denied location access
    Denied,
    /// Temporarily unable to get a fix
    LocationUnknown,
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    ServicesDisabled,
    PermissionDenied,
    NetworkError,
    BackgroundRefreshDenied,
    BackgroundRefreshRestricted,
}

impl AlertKind {
    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::ServicesDisabled => "Location Services Disabled",
            AlertKind::PermissionDenied => "Enable Location Service",
            AlertKind::NetworkError => "Network Error",
            AlertKind::BackgroundRefreshDenied | AlertKind::BackgroundRefreshRestricted => {
                "Background App Refresh"
            }
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// User-facing notification channel
pub trait AlertSink: Send {
    fn notify(&self, kind: AlertKind, message: &str);
}

/// Alerts go to the log at warn level
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, kind: AlertKind, message: &str) {
        log::warn!("[ALERT] {}: {}", kind, message);
    }
}

/// Whether the OS lets the app refresh in the background
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackgroundRefreshStatus {
    Available,
    Denied,
    Restricted,
}

/// Launch-time gate: tracking needs background refresh. Raises the matching
/// alert and returns false when it is unavailable.
pub fn check_background_refresh(status: BackgroundRefreshStatus, alerts: &dyn AlertSink) -> bool {
    match status {
        BackgroundRefreshStatus::Available => true,
        BackgroundRefreshStatus::Denied => {
            alerts.notify(
                AlertKind::BackgroundRefreshDenied,
                "The app doesn't work without the Background App Refresh enabled. \
                 To turn it on, go to Settings > General > Background App Refresh",
            );
            false
        }
        BackgroundRefreshStatus::Restricted => {
            alerts.notify(
                AlertKind::BackgroundRefreshRestricted,
                "The functions of this app are limited because the Background App Refresh is disabled.",
            );
            false
        }
    }
}
