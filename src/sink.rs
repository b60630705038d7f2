use crate::config::TrackerConfig;
use crate::error::ReportError;
use crate::fix::Report;
use crate::retry::RetryState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// Destination for finished reports
pub trait ReportSink: Send + Sync + 'static {
    fn send(&self, report: &Report) -> impl Future<Output = Result<(), ReportError>> + Send;
}

/// Writes reports to the log instead of a server
#[derive(Debug, Clone, Default)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    async fn send(&self, report: &Report) -> Result<(), ReportError> {
        match report.fix() {
            Some(fix) => log::info!(
                "send to server: lat={:.6} lon={:.6} accuracy={:.1}m",
                fix.latitude,
                fix.longitude,
                fix.accuracy
            ),
            None => log::info!("send to server: no data"),
        }
        Ok(())
    }
}

/// JSON body posted by [`HttpReportSink`]
#[derive(Debug, Serialize)]
pub struct ReportPayload<'a> {
    pub reported_at: DateTime<Utc>,
    #[serde(flatten)]
    pub report: &'a Report,
}

/// POSTs each report as JSON to a fixed endpoint
pub struct HttpReportSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReportSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("location_tracker_rs/0.1.0")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        HttpReportSink {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ReportSink for HttpReportSink {
    async fn send(&self, report: &Report) -> Result<(), ReportError> {
        let payload = ReportPayload {
            reported_at: Utc::now(),
            report,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReportError::Timeout
                } else if e.is_builder() {
                    ReportError::Serialize(e.to_string())
                } else {
                    ReportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Http(status.as_u16()));
        }
        Ok(())
    }
}

/// Sink chosen at startup
pub enum ReportTarget {
    Log(LogReportSink),
    Http(HttpReportSink),
}

impl ReportTarget {
    /// HTTP when an endpoint is configured, log otherwise
    pub fn from_endpoint(endpoint: Option<String>, timeout: Duration) -> Self {
        match endpoint {
            Some(url) => ReportTarget::Http(HttpReportSink::new(url, timeout)),
            None => ReportTarget::Log(LogReportSink),
        }
    }
}

impl ReportSink for ReportTarget {
    async fn send(&self, report: &Report) -> Result<(), ReportError> {
        match self {
            ReportTarget::Log(sink) => sink.send(report).await,
            ReportTarget::Http(sink) => sink.send(report).await,
        }
    }
}

/// Timeout and retry settings for [`deliver`]
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
}

impl DeliveryPolicy {
    pub fn from_config(config: &TrackerConfig) -> Self {
        DeliveryPolicy {
            timeout: config.send_timeout(),
            max_attempts: config.max_send_attempts.max(1),
            retry_base: Duration::from_secs(config.retry_base_secs),
            retry_cap: Duration::from_secs(config.retry_cap_secs),
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from_config(&TrackerConfig::default())
    }
}

/// Send a report, bounding each attempt by the policy timeout and backing
/// off between attempts. Returns the number of attempts used on success.
pub async fn deliver<S: ReportSink>(
    sink: &S,
    report: &Report,
    policy: &DeliveryPolicy,
) -> Result<u32, ReportError> {
    let mut retry = RetryState::new(policy.max_attempts, policy.retry_base, policy.retry_cap);

    loop {
        let error = match tokio::time::timeout(policy.timeout, sink.send(report)).await {
            Ok(Ok(())) => return Ok(retry.attempts + 1),
            Ok(Err(e)) => e,
            Err(_) => ReportError::Timeout,
        };

        match retry.record_failed_attempt() {
            Some(wait) => {
                log::warn!(
                    "report send failed ({}), {}, retrying in {:.1}s",
                    error,
                    retry.status(),
                    wait.as_secs_f64()
                );
                tokio::time::sleep(wait).await;
            }
            None => {
                log::error!(
                    "report dropped after {} attempt(s): {}",
                    retry.attempts,
                    error
                );
                return Err(error);
            }
        }
    }
}
