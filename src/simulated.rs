//! Stand-in platform services for running the tracker off-device.

use crate::background::{BackgroundExecution, ExpirationHandler, TokenId};
use crate::fix::RawFix;
use crate::platform::{AuthorizationStatus, LocationService};
use crate::tracker::TrackerHandle;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{interval, sleep, Duration};

/// Location service whose on/off state gates [`gps_feed_loop`]
pub struct SimulatedLocationService {
    running: Arc<AtomicBool>,
    enabled: bool,
    authorization: AuthorizationStatus,
}

impl SimulatedLocationService {
    pub fn new(enabled: bool, authorization: AuthorizationStatus) -> Self {
        SimulatedLocationService {
            running: Arc::new(AtomicBool::new(false)),
            enabled,
            authorization,
        }
    }

    /// Shared flag for the feed loop
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

impl LocationService for SimulatedLocationService {
    fn start_updates(&mut self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop_updates(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn services_enabled(&self) -> bool {
        self.enabled
    }

    fn authorization(&self) -> AuthorizationStatus {
        self.authorization
    }
}

/// Pushes a burst of mock fixes into the tracker every `period` while the
/// location service is on. Stops when the tracker goes away.
pub async fn gps_feed_loop(handle: TrackerHandle, running: Arc<AtomicBool>, period: Duration) {
    let mut interval = interval(period);
    let mut batch_count = 0u64;

    loop {
        interval.tick().await;

        if !running.load(Ordering::SeqCst) {
            continue;
        }

        let batch = mock_gps_batch();
        let size = batch.len();
        if handle.push_fixes(batch).await.is_err() {
            log::debug!("[gps] tracker closed after {} batches", batch_count);
            break;
        }

        batch_count += 1;
        log::debug!("[gps] batch {} ({} fixes)", batch_count, size);
    }
}

/// One to three fixes around a slowly drifting position. Every seventh
/// sequence number yields an unusable fix so the filters get exercised.
fn mock_gps_batch() -> Vec<RawFix> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let size = 1 + (seq % 3) as usize;

    (0..size)
        .map(|i| {
            let n = (seq * 3 + i as u64) as f64;
            let now = Utc::now();
            match (seq + i as u64) % 7 {
                // No accuracy available
                3 => RawFix::new(37.7749, -122.4194, -1.0, now),
                // Cached fix from long ago
                5 => RawFix::new(37.7749, -122.4194, 8.0, now - chrono::Duration::minutes(5)),
                _ => RawFix::new(
                    37.7749 + n * 0.00001,
                    -122.4194 + n * 0.00001,
                    5.0 + (n * 0.1).sin().abs() * 40.0,
                    now,
                ),
            }
        })
        .collect()
}

/// Background-execution service that force-expires every token after a
/// fixed budget unless it was ended first
pub struct SimulatedBackgroundExecution {
    next_id: AtomicU64,
    budget: Duration,
    live: Arc<Mutex<HashSet<TokenId>>>,
}

impl SimulatedBackgroundExecution {
    pub fn new(budget: Duration) -> Self {
        SimulatedBackgroundExecution {
            next_id: AtomicU64::new(1),
            budget,
            live: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn live_sessions(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}

impl BackgroundExecution for SimulatedBackgroundExecution {
    fn begin_session(&self, on_expire: ExpirationHandler) -> TokenId {
        let token = TokenId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut live) = self.live.lock() {
            live.insert(token);
        }

        let live = Arc::clone(&self.live);
        let budget = self.budget;
        tokio::spawn(async move {
            sleep(budget).await;
            let still_live = live.lock().map(|live| live.contains(&token)).unwrap_or(false);
            if still_live {
                on_expire(token);
            }
        });

        token
    }

    fn end_session(&self, token: TokenId) {
        if let Ok(mut live) = self.live.lock() {
            live.remove(&token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundSessionManager;
    use crate::collector::FixCollector;

    #[test]
    fn test_location_flag_follows_updates() {
        let mut service = SimulatedLocationService::new(true, AuthorizationStatus::Authorized);
        let flag = service.running_flag();

        assert!(!flag.load(Ordering::SeqCst));
        service.start_updates();
        assert!(flag.load(Ordering::SeqCst));
        service.stop_updates();
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_mock_batches_mix_valid_and_invalid() {
        let mut collector = FixCollector::default();
        let now = Utc::now();
        let mut total = 0;
        let mut accepted = 0;

        for _ in 0..20 {
            let batch = mock_gps_batch();
            assert!((1..=3).contains(&batch.len()));
            total += batch.len();
            accepted += collector.accept_batch(&batch, now);
        }

        assert!(accepted > 0);
        assert!(accepted < total);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_expire_after_budget() {
        let platform = Arc::new(SimulatedBackgroundExecution::new(Duration::from_secs(180)));
        let manager = BackgroundSessionManager::new(platform.clone());

        let master = manager.begin();
        assert_eq!(platform.live_sessions(), 1);

        sleep(Duration::from_secs(181)).await;

        assert_eq!(manager.master(), None);
        assert!(!manager.is_active());
        assert_eq!(platform.live_sessions(), 0);

        // A replacement gets a new id
        assert_ne!(manager.begin(), master);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_tokens_do_not_expire() {
        let platform = Arc::new(SimulatedBackgroundExecution::new(Duration::from_secs(30)));
        let manager = BackgroundSessionManager::new(platform.clone());

        manager.begin();
        sleep(Duration::from_secs(10)).await;
        manager.end_all();
        let replacement = manager.begin();

        // First token's budget runs out at 30s, the replacement's at 40s
        sleep(Duration::from_secs(25)).await;
        assert_eq!(manager.master(), Some(replacement));
        assert_eq!(platform.live_sessions(), 1);
    }
}
