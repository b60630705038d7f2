use crate::config::TrackerConfig;
use crate::fix::{Fix, RawFix};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Why a raw fix was ignored
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("stale fix ({age_secs:.1}s old)")]
    Stale { age_secs: f64 },

    #[error("accuracy {0} outside (0, max)")]
    InvalidAccuracy(f64),

    #[error("coordinates are (0, 0)")]
    NullIsland,
}

/// Filters incoming fixes and buffers the acceptable ones for the reporter.
///
/// The buffer keeps append order, which is what gives the reporter its
/// "later fix wins on a tie" behaviour. The last known fix is independent of
/// the buffer and survives [`FixCollector::take_buffer`].
#[derive(Debug, Clone)]
pub struct FixCollector {
    buffer: Vec<Fix>,
    last_known: Option<Fix>,
    max_age: Duration,
    max_accuracy: f64,
    accepted: u64,
    rejected: u64,
}

impl FixCollector {
    pub fn new(max_age: Duration, max_accuracy: f64) -> Self {
        FixCollector {
            buffer: Vec::with_capacity(100),
            last_known: None,
            max_age,
            max_accuracy,
            accepted: 0,
            rejected: 0,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.max_fix_age(), config.max_accuracy_m)
    }

    /// Check a raw fix against the age, accuracy and coordinate filters
    pub fn check(&self, raw: &RawFix, now: DateTime<Utc>) -> Result<(), Rejection> {
        let age = raw.age(now);
        if age > self.max_age {
            return Err(Rejection::Stale {
                age_secs: age.num_milliseconds() as f64 / 1000.0,
            });
        }
        // Written so NaN fails too
        if !(raw.accuracy > 0.0 && raw.accuracy < self.max_accuracy) {
            return Err(Rejection::InvalidAccuracy(raw.accuracy));
        }
        if raw.is_null_island() {
            return Err(Rejection::NullIsland);
        }
        Ok(())
    }

    /// Filter one raw fix; on success it becomes the last known fix and is
    /// appended to the buffer.
    pub fn accept(&mut self, raw: &RawFix, now: DateTime<Utc>) -> Result<&Fix, Rejection> {
        if let Err(rejection) = self.check(raw, now) {
            self.rejected += 1;
            log::debug!("ignoring fix: {}", rejection);
            return Err(rejection);
        }

        let fix = Fix::from(raw);
        self.last_known = Some(fix.clone());
        self.buffer.push(fix);
        self.accepted += 1;

        Ok(&self.buffer[self.buffer.len() - 1])
    }

    /// Accept a platform batch, returning how many fixes made it in
    pub fn accept_batch(&mut self, raws: &[RawFix], now: DateTime<Utc>) -> usize {
        raws.iter()
            .filter(|raw| self.accept(raw, now).is_ok())
            .count()
    }

    /// Hand the buffered fixes to the caller, leaving the buffer empty
    pub fn take_buffer(&mut self) -> Vec<Fix> {
        std::mem::take(&mut self.buffer)
    }

    pub fn buffer(&self) -> &[Fix] {
        &self.buffer
    }

    pub fn last_known(&self) -> Option<&Fix> {
        self.last_known.as_ref()
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }
}

impl Default for FixCollector {
    fn default() -> Self {
        Self::from_config(&TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn raw(lat: f64, lon: f64, accuracy: f64, age_secs: i64) -> RawFix {
        RawFix::new(lat, lon, accuracy, now() - Duration::seconds(age_secs))
    }

    #[test]
    fn test_accepts_valid_fix() {
        let mut collector = FixCollector::default();

        let fix = collector.accept(&raw(37.7749, -122.4194, 8.0, 2), now()).unwrap();
        assert_eq!(fix.accuracy, 8.0);

        assert_eq!(collector.buffer().len(), 1);
        assert_eq!(collector.last_known().unwrap().latitude, 37.7749);
        assert_eq!(collector.accepted_count(), 1);
    }

    #[test]
    fn test_invalid_fixes_leave_state_unchanged() {
        let mut collector = FixCollector::default();
        collector.accept(&raw(1.0, 2.0, 5.0, 0), now()).unwrap();
        let last_before = collector.last_known().cloned();

        let invalid = vec![
            raw(1.5, 2.5, 0.0, 0),
            raw(1.5, 2.5, -1.0, 0),
            raw(1.5, 2.5, 2000.0, 0),
            raw(1.5, 2.5, 2500.0, 0),
            raw(1.5, 2.5, f64::NAN, 0),
            raw(1.5, 2.5, 5.0, 31),
            raw(0.0, 0.0, 5.0, 0),
        ];

        for fix in &invalid {
            assert!(collector.accept(fix, now()).is_err(), "{:?} accepted", fix);
        }

        assert_eq!(collector.buffer().len(), 1);
        assert_eq!(collector.last_known().cloned(), last_before);
        assert_eq!(collector.rejected_count(), invalid.len() as u64);
    }

    #[test]
    fn test_rejection_reasons() {
        let collector = FixCollector::default();

        assert!(matches!(
            collector.check(&raw(1.0, 2.0, 5.0, 45), now()),
            Err(Rejection::Stale { .. })
        ));
        assert_eq!(
            collector.check(&raw(1.0, 2.0, 1999.9, 0), now()),
            Ok(())
        );
        assert_eq!(
            collector.check(&raw(1.0, 2.0, 2000.0, 0), now()),
            Err(Rejection::InvalidAccuracy(2000.0))
        );
        assert_eq!(
            collector.check(&raw(0.0, 0.0, 5.0, 0), now()),
            Err(Rejection::NullIsland)
        );
    }

    #[test]
    fn test_age_boundary() {
        let collector = FixCollector::default();

        // Exactly 30s is still fresh
        assert!(collector.check(&raw(1.0, 2.0, 5.0, 30), now()).is_ok());
        // Future-dated fixes are not stale
        assert!(collector.check(&raw(1.0, 2.0, 5.0, -5), now()).is_ok());
    }

    #[test]
    fn test_single_zero_coordinate_is_valid() {
        let mut collector = FixCollector::default();
        assert!(collector.accept(&raw(0.0, 32.5, 5.0, 0), now()).is_ok());
        assert!(collector.accept(&raw(51.4, 0.0, 5.0, 0), now()).is_ok());
    }

    #[test]
    fn test_batch_and_take() {
        let mut collector = FixCollector::default();
        let batch = vec![
            raw(1.0, 1.0, 20.0, 0),
            raw(0.0, 0.0, 5.0, 0),
            raw(2.0, 2.0, 10.0, 0),
        ];

        assert_eq!(collector.accept_batch(&batch, now()), 2);
        assert_eq!(collector.accept_batch(&[], now()), 0);

        let taken = collector.take_buffer();
        assert_eq!(taken.len(), 2);
        assert!(collector.buffer().is_empty());
        // Last known survives the drain
        assert_eq!(collector.last_known().unwrap().latitude, 2.0);
    }

    #[test]
    fn test_custom_limits() {
        let mut collector = FixCollector::new(Duration::seconds(5), 50.0);
        assert!(collector.accept(&raw(1.0, 1.0, 60.0, 0), now()).is_err());
        assert!(collector.accept(&raw(1.0, 1.0, 10.0, 6), now()).is_err());
        assert!(collector.accept(&raw(1.0, 1.0, 10.0, 4), now()).is_ok());
    }
}
