//! Sampling/reporting state machine and the task that owns it.
//!
//! [`TrackerCore`] is synchronous and keeps its timers as deadlines, so every
//! transition can be driven directly. [`Tracker::run`] is the single owner of
//! a core: fixes, errors and lifecycle calls arrive over a channel from
//! [`TrackerHandle`]s and are interleaved with timer expiry in one `select!`.

use crate::background::BackgroundSessionManager;
use crate::collector::FixCollector;
use crate::config::TrackerConfig;
use crate::error::{ReportError, TrackerError, TrackerResult};
use crate::fix::{RawFix, Report};
use crate::platform::{AlertKind, AlertSink, AuthorizationStatus, LocationError, LocationService};
use crate::reporter::produce_report;
use crate::sink::{deliver, DeliveryPolicy, ReportSink};
use crate::status::{current_timestamp, Phase, TrackerStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};

pub struct TrackerCore<L, A> {
    config: TrackerConfig,
    collector: FixCollector,
    location: L,
    alerts: A,
    background: BackgroundSessionManager,
    phase: Phase,
    tracking: bool,
    /// Report timer, armed by the first accepted fix of a cycle
    report_deadline: Option<Instant>,
    /// Sampling-window timer that pauses location updates
    stop_deadline: Option<Instant>,
    /// While idle, report the last known fix if no cycle starts in time
    heartbeat_deadline: Option<Instant>,
    reports_produced: u64,
    reports_delivered: u64,
    delivery_failures: u64,
    started_at: Instant,
}

impl<L: LocationService, A: AlertSink> TrackerCore<L, A> {
    pub fn new(
        config: TrackerConfig,
        location: L,
        alerts: A,
        background: BackgroundSessionManager,
    ) -> Self {
        TrackerCore {
            collector: FixCollector::from_config(&config),
            config,
            location,
            alerts,
            background,
            phase: Phase::Idle,
            tracking: false,
            report_deadline: None,
            stop_deadline: None,
            heartbeat_deadline: None,
            reports_produced: 0,
            reports_delivered: 0,
            delivery_failures: 0,
            started_at: Instant::now(),
        }
    }

    /// Begin tracking if the platform allows it. Permission problems raise
    /// an alert and leave the tracker stopped.
    pub fn start(&mut self, at: Instant) -> bool {
        if self.tracking {
            return true;
        }

        if !self.location.services_enabled() {
            log::warn!("location services disabled");
            self.alerts.notify(
                AlertKind::ServicesDisabled,
                "You currently have all location services for this device disabled",
            );
            return false;
        }

        match self.location.authorization() {
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted => {
                log::warn!("location authorization failed");
                self.alerts.notify(
                    AlertKind::PermissionDenied,
                    "You have to enable the Location Service to use this App. \
                     To enable, please go to Settings->Privacy->Location Services",
                );
                return false;
            }
            AuthorizationStatus::Authorized | AuthorizationStatus::NotDetermined => {}
        }

        log::info!("start location tracking");
        self.location.start_updates();
        self.tracking = true;
        self.enter_idle(at);
        true
    }

    /// Invalidate timers, stop updates and release background sessions.
    /// Fixes buffered for the abandoned cycle are discarded; the last known
    /// fix survives for the fallback report after a restart.
    pub fn stop(&mut self) {
        if !self.tracking {
            return;
        }
        log::info!("stop location tracking");
        self.report_deadline = None;
        self.stop_deadline = None;
        self.heartbeat_deadline = None;
        let discarded = self.collector.take_buffer().len();
        if discarded > 0 {
            log::debug!("discarded {} buffered fix(es) on stop", discarded);
        }
        self.location.stop_updates();
        self.background.end_all();
        self.tracking = false;
        self.phase = Phase::Idle;
    }

    /// App moved to the background: keep updates running and ask for
    /// background execution time. A cycle that already closed its sampling
    /// window stays paused until its report restarts updates.
    pub fn enter_background(&mut self) {
        if !self.tracking {
            log::debug!("entered background while not tracking");
            return;
        }
        if self.phase == Phase::CoolingDown {
            log::debug!("entered background while cooling down, updates stay paused");
        } else {
            self.location.start_updates();
        }
        self.background.begin();
    }

    /// Feed one platform batch (possibly empty). Returns the number of fixes
    /// accepted. The first accepted fix of a cycle arms the timers.
    pub fn on_fixes(&mut self, fixes: &[RawFix], now: DateTime<Utc>, at: Instant) -> usize {
        if !self.tracking {
            log::debug!("dropping {} fix(es) received while stopped", fixes.len());
            return 0;
        }

        let accepted = self.collector.accept_batch(fixes, now);
        if accepted > 0 && self.report_deadline.is_none() {
            self.arm(at);
        }
        accepted
    }

    fn arm(&mut self, at: Instant) {
        if !self.background.is_active() {
            self.background.begin();
        }

        self.report_deadline = Some(at + self.config.report_interval());
        // Replaces any stop timer still pending
        self.stop_deadline = Some(at + self.config.sampling_window());
        self.heartbeat_deadline = None;
        self.phase = Phase::Sampling;

        log::debug!(
            "cycle armed: report in {}s, sampling for {}s",
            self.config.report_interval_secs,
            self.config.sampling_window_secs
        );
    }

    /// Sampling window over: pause updates until the report
    pub fn on_stop_timer(&mut self) {
        self.stop_deadline = None;
        self.location.stop_updates();
        if self.phase == Phase::Sampling {
            self.phase = Phase::CoolingDown;
        }
        log::info!("location updates paused after sampling window");
    }

    /// Close the cycle: build the report, empty the buffer and restart
    /// location updates for the next window.
    pub fn on_report_timer(&mut self, at: Instant) -> Report {
        self.report_deadline = None;
        let report = self.close_cycle();
        self.enter_idle(at);
        report
    }

    /// No fix arrived for a whole interval while idle
    pub fn on_heartbeat(&mut self, at: Instant) -> Report {
        self.heartbeat_deadline = None;
        log::info!("no location update for {}s", self.config.report_interval_secs);
        let report = self.close_cycle();
        self.enter_idle(at);
        report
    }

    fn close_cycle(&mut self) -> Report {
        let report = produce_report(&mut self.collector);
        self.reports_produced += 1;
        log::info!("restart location updates");
        self.location.start_updates();
        report
    }

    fn enter_idle(&mut self, at: Instant) {
        self.phase = Phase::Idle;
        self.heartbeat_deadline = Some(at + self.config.report_interval());
    }

    pub fn on_error(&mut self, error: &LocationError) {
        match error {
            LocationError::Network => {
                log::warn!("location service network error");
                self.alerts
                    .notify(AlertKind::NetworkError, "Please check your network connection.");
            }
            LocationError::Denied => {
                log::warn!("location access denied");
                self.alerts.notify(
                    AlertKind::PermissionDenied,
                    "You have to enable the Location Service to use this App. \
                     To enable, please go to Settings->Privacy->Location Services",
                );
            }
            other => log::debug!("location service error: {:?}", other),
        }
    }

    pub fn record_delivery(&mut self, outcome: &Result<u32, ReportError>) {
        match outcome {
            Ok(attempts) => {
                self.reports_delivered += 1;
                log::debug!("report delivered after {} attempt(s)", attempts);
            }
            Err(_) => self.delivery_failures += 1,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn report_deadline(&self) -> Option<Instant> {
        self.report_deadline
    }

    pub fn stop_deadline(&self) -> Option<Instant> {
        self.stop_deadline
    }

    pub fn heartbeat_deadline(&self) -> Option<Instant> {
        self.heartbeat_deadline
    }

    pub fn collector(&self) -> &FixCollector {
        &self.collector
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            timestamp: current_timestamp(),
            phase: self.phase,
            tracking: self.tracking,
            buffered_fixes: self.collector.buffer().len(),
            last_known_fix: self.collector.last_known().cloned(),
            fixes_accepted: self.collector.accepted_count(),
            fixes_rejected: self.collector.rejected_count(),
            reports_produced: self.reports_produced,
            reports_delivered: self.reports_delivered,
            delivery_failures: self.delivery_failures,
            master_session: self.background.master(),
            auxiliary_sessions: self.background.auxiliary(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

enum Command {
    Start(oneshot::Sender<bool>),
    Fixes(Vec<RawFix>),
    Error(LocationError),
    EnterBackground,
    StopTracking,
    Status(oneshot::Sender<TrackerStatus>),
    Shutdown,
}

/// Owner task for a [`TrackerCore`]
pub struct Tracker<L, A, S> {
    core: TrackerCore<L, A>,
    sink: Arc<S>,
    policy: DeliveryPolicy,
    commands: mpsc::Receiver<Command>,
    /// In-flight report deliveries
    deliveries: JoinSet<Result<u32, ReportError>>,
}

impl<L, A, S> Tracker<L, A, S>
where
    L: LocationService + 'static,
    A: AlertSink + 'static,
    S: ReportSink,
{
    pub fn new(
        config: TrackerConfig,
        location: L,
        alerts: A,
        background: BackgroundSessionManager,
        sink: S,
    ) -> (Self, TrackerHandle) {
        let (commands_tx, commands) = mpsc::channel(100);
        let policy = DeliveryPolicy::from_config(&config);

        let tracker = Tracker {
            core: TrackerCore::new(config, location, alerts, background),
            sink: Arc::new(sink),
            policy,
            commands,
            deliveries: JoinSet::new(),
        };
        (tracker, TrackerHandle { commands: commands_tx })
    }

    /// Run until [`TrackerHandle::shutdown`] or every handle is dropped
    pub async fn run(mut self) {
        log::info!("tracker task started");

        loop {
            let report_at = self.core.report_deadline();
            let stop_at = self.core.stop_deadline();
            let heartbeat_at = self.core.heartbeat_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = sleep_until(stop_at.unwrap_or_else(Instant::now)), if stop_at.is_some() => {
                    self.core.on_stop_timer();
                }
                _ = sleep_until(report_at.unwrap_or_else(Instant::now)), if report_at.is_some() => {
                    let report = self.core.on_report_timer(Instant::now());
                    self.dispatch(report);
                }
                _ = sleep_until(heartbeat_at.unwrap_or_else(Instant::now)), if heartbeat_at.is_some() => {
                    let report = self.core.on_heartbeat(Instant::now());
                    self.dispatch(report);
                }
                Some(joined) = self.deliveries.join_next(), if !self.deliveries.is_empty() => {
                    self.on_delivery_joined(joined);
                }
            }
        }

        self.core.stop();

        if !self.deliveries.is_empty() {
            log::info!("waiting for {} in-flight report(s)", self.deliveries.len());
        }
        while let Some(joined) = self.deliveries.join_next().await {
            self.on_delivery_joined(joined);
        }

        let status = self.core.status();
        log::info!(
            "tracker task stopped: {} report(s) produced, {} delivered, {} failed",
            status.reports_produced,
            status.reports_delivered,
            status.delivery_failures
        );
    }

    fn on_delivery_joined(&mut self, joined: Result<Result<u32, ReportError>, JoinError>) {
        match joined {
            Ok(outcome) => self.core.record_delivery(&outcome),
            Err(e) => {
                log::error!("report delivery task failed: {}", e);
                self.core.record_delivery(&Err(ReportError::Network(e.to_string())));
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let started = self.core.start(Instant::now());
                let _ = reply.send(started);
            }
            Command::Fixes(fixes) => {
                self.core.on_fixes(&fixes, Utc::now(), Instant::now());
            }
            Command::Error(error) => self.core.on_error(&error),
            Command::EnterBackground => self.core.enter_background(),
            Command::StopTracking => self.core.stop(),
            Command::Status(reply) => {
                let _ = reply.send(self.core.status());
            }
            Command::Shutdown => {}
        }
    }

    /// Sends run on their own task so a slow endpoint never delays fixes or
    /// timers. Outcomes are collected from `deliveries`, and shutdown waits
    /// for whatever is still in flight.
    fn dispatch(&mut self, report: Report) {
        let sink = Arc::clone(&self.sink);
        let policy = self.policy.clone();
        self.deliveries
            .spawn(async move { deliver(sink.as_ref(), &report, &policy).await });
    }
}

/// Cloneable front end to a running [`Tracker`]
#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<Command>,
}

impl TrackerHandle {
    async fn send(&self, command: Command) -> TrackerResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TrackerError::ChannelClosed)
    }

    /// Returns false when permissions keep tracking from starting
    pub async fn start(&self) -> TrackerResult<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Start(reply)).await?;
        response.await.map_err(|_| TrackerError::ChannelClosed)
    }

    /// Deliver a platform location callback; an empty batch is fine
    pub async fn push_fixes(&self, fixes: Vec<RawFix>) -> TrackerResult<()> {
        self.send(Command::Fixes(fixes)).await
    }

    pub async fn report_error(&self, error: LocationError) -> TrackerResult<()> {
        self.send(Command::Error(error)).await
    }

    pub async fn enter_background(&self) -> TrackerResult<()> {
        self.send(Command::EnterBackground).await
    }

    pub async fn stop_tracking(&self) -> TrackerResult<()> {
        self.send(Command::StopTracking).await
    }

    pub async fn status(&self) -> TrackerResult<TrackerStatus> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Status(reply)).await?;
        response.await.map_err(|_| TrackerError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> TrackerResult<()> {
        self.send(Command::Shutdown).await
    }
}
