use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use location_tracker_rs::platform::check_background_refresh;
use location_tracker_rs::simulated::{
    gps_feed_loop, SimulatedBackgroundExecution, SimulatedLocationService,
};
use location_tracker_rs::{
    AuthorizationStatus, BackgroundRefreshStatus, BackgroundSessionManager, LogAlertSink,
    ReportTarget, Tracker, TrackerConfig,
};
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "location_tracker")]
#[command(about = "Background location tracker - best fix per window, reported on a timer", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Report endpoint; reports are only logged when omitted
    #[arg(long)]
    endpoint: Option<String>,

    /// JSON config file
    #[arg(long)]
    config: Option<String>,

    /// Seconds from the first fix of a cycle to its report
    #[arg(long)]
    report_interval: Option<u64>,

    /// Seconds location updates stay on per cycle
    #[arg(long)]
    sampling_window: Option<u64>,

    /// Send attempts per report (1 = no retry)
    #[arg(long)]
    send_attempts: Option<u32>,

    /// Simulated GPS callback period in milliseconds
    #[arg(long, default_value = "1000")]
    fix_period_ms: u64,

    /// Seconds before the simulated platform expires a background session
    #[arg(long, default_value = "180")]
    background_budget: u64,

    /// Background refresh status (available, denied, restricted)
    #[arg(long, default_value = "available")]
    background_refresh: String,

    /// Simulate denied location permission
    #[arg(long)]
    deny_location: bool,

    /// Output directory for status snapshots
    #[arg(long, default_value = "location_tracker_status")]
    output_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path))?,
        None => TrackerConfig::default(),
    };
    if let Some(secs) = args.report_interval {
        config.report_interval_secs = secs;
    }
    if let Some(secs) = args.sampling_window {
        config.sampling_window_secs = secs;
    }
    if let Some(attempts) = args.send_attempts {
        config.max_send_attempts = attempts;
    }
    config.validate()?;

    let refresh = match args.background_refresh.as_str() {
        "available" => BackgroundRefreshStatus::Available,
        "denied" => BackgroundRefreshStatus::Denied,
        "restricted" => BackgroundRefreshStatus::Restricted,
        other => bail!("unknown background refresh status: {}", other),
    };

    log::info!("Location Tracker starting");
    log::info!("  Duration: {} seconds (0=continuous)", args.duration);
    log::info!("  Report interval: {}s", config.report_interval_secs);
    log::info!("  Sampling window: {}s", config.sampling_window_secs);
    log::info!(
        "  Endpoint: {}",
        args.endpoint.as_deref().unwrap_or("(log only)")
    );
    log::info!("  Output Dir: {}", args.output_dir);

    if !check_background_refresh(refresh, &LogAlertSink) {
        return Ok(());
    }

    std::fs::create_dir_all(&args.output_dir)?;

    let authorization = if args.deny_location {
        AuthorizationStatus::Denied
    } else {
        AuthorizationStatus::Authorized
    };
    let location = SimulatedLocationService::new(true, authorization);
    let running = location.running_flag();
    let platform = Arc::new(SimulatedBackgroundExecution::new(Duration::from_secs(
        args.background_budget,
    )));
    let background = BackgroundSessionManager::new(platform.clone());
    let sink = ReportTarget::from_endpoint(args.endpoint.clone(), config.send_timeout());

    let (tracker, handle) = Tracker::new(config, location, LogAlertSink, background, sink);
    let tracker_task = tokio::spawn(tracker.run());

    if !handle.start().await? {
        log::warn!("tracking could not start, exiting");
        handle.shutdown().await?;
        tracker_task.await?;
        return Ok(());
    }
    // The tracker is meant to keep running once the app is backgrounded
    handle.enter_background().await?;

    let _gps_handle = tokio::spawn(gps_feed_loop(
        handle.clone(),
        running,
        Duration::from_millis(args.fix_period_ms.max(1)),
    ));

    let start = Instant::now();
    let status_path = format!("{}/live_status.json", args.output_dir);
    let mut status_tick = interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            _ = status_tick.tick() => {
                let status = handle.status().await?;
                if let Err(e) = status.save(&status_path) {
                    log::warn!("failed to write {}: {}", status_path, e);
                }
                if args.duration > 0 && start.elapsed().as_secs() >= args.duration {
                    log::info!("Duration reached, stopping...");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, stopping...");
                break;
            }
        }
    }

    let final_status = handle.status().await?;
    let final_path = format!("{}/live_status_final.json", args.output_dir);
    final_status.save(&final_path)?;

    handle.stop_tracking().await?;
    handle.shutdown().await?;
    tracker_task.await?;

    println!("\n=== Final Stats ({}) ===", Utc::now().format("%H:%M:%S"));
    println!("Fixes accepted: {}", final_status.fixes_accepted);
    println!("Fixes rejected: {}", final_status.fixes_rejected);
    println!("Reports produced: {}", final_status.reports_produced);
    println!("Reports delivered: {}", final_status.reports_delivered);
    println!("Delivery failures: {}", final_status.delivery_failures);
    println!("Background sessions left open: {}", platform.live_sessions());
    if let Some(fix) = &final_status.last_known_fix {
        println!(
            "Last known fix: {:.6}, {:.6} (±{:.1}m)",
            fix.latitude, fix.longitude, fix.accuracy
        );
    }

    Ok(())
}
