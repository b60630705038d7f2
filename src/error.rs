use thiserror::Error;

/// Location tracker error types
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tracker task is not running")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Failure of a single report delivery
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error("Report send timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialize(String),
}
