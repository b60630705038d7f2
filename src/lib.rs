// Background location tracker core
// Samples fixes, keeps the most accurate one per window and reports it

pub mod background;
pub mod collector;
pub mod config;
pub mod error;
pub mod fix;
pub mod platform;
pub mod reporter;
pub mod retry;
pub mod simulated;
pub mod sink;
pub mod status;
pub mod tracker;

pub use background::{BackgroundExecution, BackgroundSessionManager, TokenId};
pub use collector::{FixCollector, Rejection};
pub use config::TrackerConfig;
pub use error::{ReportError, TrackerError, TrackerResult};
pub use fix::{Fix, RawFix, Report};
pub use platform::{
    AlertKind, AlertSink, AuthorizationStatus, BackgroundRefreshStatus, LocationError,
    LocationService, LogAlertSink,
};
pub use reporter::{produce_report, select_best};
pub use sink::{deliver, DeliveryPolicy, HttpReportSink, LogReportSink, ReportSink, ReportTarget};
pub use status::{Phase, TrackerStatus};
pub use tracker::{Tracker, TrackerCore, TrackerHandle};
