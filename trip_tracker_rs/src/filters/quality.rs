/// Position fix quality gate.
///
/// Rejects noisy, stale, duplicate and physically implausible fixes before
/// they reach the trip accumulator. Rejections are routine filtering and are
/// never reported as errors.
use crate::config::FilterConfig;
use crate::geo_math;
use crate::types::PositionFix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Why a fix was discarded
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    AccuracyMissing,
    AccuracyTooLow,
    InvalidSpeed,
    CoordinatesOutOfRange,
    TimestampInFuture,
    TimestampStale,
    InsufficientMovement,
    TooFrequent,
    AccuracyDegraded,
    ImplausibleSpeed,
    SpeedMismatch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    Reject(RejectReason),
}

impl FilterDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterDecision::Accept)
    }
}

/// Filter state for one tracking session: last accepted fix plus a bounded
/// history, oldest evicted first
#[derive(Clone, Debug)]
pub struct FilterState {
    last_accepted: Option<PositionFix>,
    history: VecDeque<PositionFix>,
    capacity: usize,
}

impl FilterState {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            last_accepted: None,
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn last_accepted(&self) -> Option<&PositionFix> {
        self.last_accepted.as_ref()
    }

    pub fn history(&self) -> impl Iterator<Item = &PositionFix> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Record an accepted fix
    pub fn commit(&mut self, fix: PositionFix) {
        self.last_accepted = Some(fix);
        self.history.push_back(fix);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.history.clear();
    }
}

/// Acceptance counters for diagnostics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub processed: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub rejections: BTreeMap<RejectReason, u64>,
}

impl FilterStats {
    pub fn record(&mut self, decision: FilterDecision) {
        self.processed += 1;
        match decision {
            FilterDecision::Accept => self.accepted += 1,
            FilterDecision::Reject(reason) => {
                self.rejected += 1;
                *self.rejections.entry(reason).or_insert(0) += 1;
            }
        }
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.accepted as f64 / self.processed as f64
    }

    pub fn filter_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.rejected as f64 / self.processed as f64
    }
}

#[derive(Clone, Debug)]
pub struct QualityFilter {
    config: FilterConfig,
}

impl QualityFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Decide whether `fix` is accepted given the session's filter state.
    ///
    /// Checks run in order and the first failure wins. Accepting does not
    /// mutate `state`; the caller commits accepted fixes.
    pub fn evaluate(&self, fix: &PositionFix, state: &FilterState, now_ms: i64) -> FilterDecision {
        if let Err(reason) = self.check_validity(fix, now_ms) {
            return FilterDecision::Reject(reason);
        }

        let Some(last) = state.last_accepted() else {
            return FilterDecision::Accept;
        };

        let distance_m = fix.distance_to(last);
        let elapsed_ms = fix.timestamp_ms - last.timestamp_ms;

        let checks = [
            self.check_distance(distance_m),
            self.check_time(elapsed_ms),
            self.check_accuracy_trend(fix, last),
            self.check_speed_consistency(fix, distance_m, elapsed_ms),
        ];
        for check in checks {
            if let Err(reason) = check {
                return FilterDecision::Reject(reason);
            }
        }

        FilterDecision::Accept
    }

    fn check_validity(&self, fix: &PositionFix, now_ms: i64) -> Result<(), RejectReason> {
        let accuracy = fix.accuracy_m.ok_or(RejectReason::AccuracyMissing)?;
        if !accuracy.is_finite() || accuracy < 0.0 || accuracy > self.config.max_accuracy_m {
            return Err(RejectReason::AccuracyTooLow);
        }

        if !fix.has_valid_speed() {
            return Err(RejectReason::InvalidSpeed);
        }

        if !(-90.0..=90.0).contains(&fix.latitude) || !(-180.0..=180.0).contains(&fix.longitude) {
            return Err(RejectReason::CoordinatesOutOfRange);
        }

        if fix.timestamp_ms > now_ms + self.config.max_future_ms {
            return Err(RejectReason::TimestampInFuture);
        }
        if fix.timestamp_ms < now_ms - self.config.max_age_ms {
            return Err(RejectReason::TimestampStale);
        }

        Ok(())
    }

    fn check_distance(&self, distance_m: f64) -> Result<(), RejectReason> {
        if distance_m < self.config.min_distance_m {
            return Err(RejectReason::InsufficientMovement);
        }
        Ok(())
    }

    fn check_time(&self, elapsed_ms: i64) -> Result<(), RejectReason> {
        let min_interval_ms = self.config.update_interval_ms / 2;
        if elapsed_ms <= 0 || elapsed_ms < min_interval_ms {
            return Err(RejectReason::TooFrequent);
        }
        Ok(())
    }

    fn check_accuracy_trend(&self, fix: &PositionFix, last: &PositionFix) -> Result<(), RejectReason> {
        // Both accuracies are present once validity passed and `last` was accepted
        let (Some(new_acc), Some(prev_acc)) = (fix.accuracy_m, last.accuracy_m) else {
            return Err(RejectReason::AccuracyMissing);
        };

        if prev_acc - new_acc >= self.config.accuracy_improvement_m {
            return Ok(());
        }
        if new_acc <= prev_acc * self.config.max_accuracy_degradation {
            return Ok(());
        }
        Err(RejectReason::AccuracyDegraded)
    }

    fn check_speed_consistency(
        &self,
        fix: &PositionFix,
        distance_m: f64,
        elapsed_ms: i64,
    ) -> Result<(), RejectReason> {
        let elapsed_hours = elapsed_ms as f64 / 3_600_000.0;
        let implied_kmh = (distance_m / 1000.0) / elapsed_hours;

        if !implied_kmh.is_finite() || implied_kmh > self.config.max_implied_speed_kmh {
            return Err(RejectReason::ImplausibleSpeed);
        }

        let reported_kmh = geo_math::ms_to_kmh(fix.speed_ms);
        if (implied_kmh - reported_kmh).abs() > self.config.speed_tolerance_kmh {
            return Err(RejectReason::SpeedMismatch);
        }
        Ok(())
    }
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn fix(lat: f64, lon: f64, t_ms: i64, speed: f64, accuracy: f64) -> PositionFix {
        PositionFix::new(lat, lon, NOW + t_ms, speed, Some(accuracy))
    }

    fn state_with(first: PositionFix) -> FilterState {
        let mut state = FilterState::new(10);
        state.commit(first);
        state
    }

    #[test]
    fn test_first_valid_fix_accepted() {
        let filter = QualityFilter::default();
        let state = FilterState::new(10);
        let decision = filter.evaluate(&fix(40.0, -73.0, 0, 0.0, 5.0), &state, NOW);
        assert_eq!(decision, FilterDecision::Accept);
    }

    #[test]
    fn test_poor_accuracy_always_rejected() {
        let filter = QualityFilter::default();
        let empty = FilterState::new(10);
        for accuracy in [50.01, 75.0, 500.0] {
            let decision = filter.evaluate(&fix(40.0, -73.0, 0, 5.0, accuracy), &empty, NOW);
            assert_eq!(decision, FilterDecision::Reject(RejectReason::AccuracyTooLow));
        }

        let missing = PositionFix::new(40.0, -73.0, NOW, 5.0, None);
        assert_eq!(
            filter.evaluate(&missing, &empty, NOW),
            FilterDecision::Reject(RejectReason::AccuracyMissing)
        );

        // Even as a big improvement over a prior fix
        let state = state_with(fix(40.0, -73.0, 0, 0.0, 49.0));
        let decision = filter.evaluate(&fix(40.001, -73.0, 60_000, 1.5, 51.0), &state, NOW);
        assert_eq!(decision, FilterDecision::Reject(RejectReason::AccuracyTooLow));
    }

    #[test]
    fn test_negative_speed_always_rejected() {
        let filter = QualityFilter::default();
        let state = FilterState::new(10);
        let decision = filter.evaluate(&fix(40.0, -73.0, 0, -0.1, 5.0), &state, NOW);
        assert_eq!(decision, FilterDecision::Reject(RejectReason::InvalidSpeed));

        let nan = fix(40.0, -73.0, 0, f64::NAN, 5.0);
        assert_eq!(
            filter.evaluate(&nan, &state, NOW),
            FilterDecision::Reject(RejectReason::InvalidSpeed)
        );
    }

    #[test]
    fn test_coordinates_out_of_range() {
        let filter = QualityFilter::default();
        let state = FilterState::new(10);
        for (lat, lon) in [(90.5, 0.0), (-91.0, 0.0), (0.0, 180.1), (0.0, -200.0)] {
            assert_eq!(
                filter.evaluate(&fix(lat, lon, 0, 1.0, 5.0), &state, NOW),
                FilterDecision::Reject(RejectReason::CoordinatesOutOfRange)
            );
        }
    }

    #[test]
    fn test_timestamp_window() {
        let filter = QualityFilter::default();
        let state = FilterState::new(10);
        assert_eq!(
            filter.evaluate(&fix(40.0, -73.0, 60_001, 1.0, 5.0), &state, NOW),
            FilterDecision::Reject(RejectReason::TimestampInFuture)
        );
        assert_eq!(
            filter.evaluate(&fix(40.0, -73.0, -3_600_001, 1.0, 5.0), &state, NOW),
            FilterDecision::Reject(RejectReason::TimestampStale)
        );
        assert!(filter
            .evaluate(&fix(40.0, -73.0, 59_000, 1.0, 5.0), &state, NOW)
            .is_accept());
    }

    #[test]
    fn test_jitter_at_rest_rejected() {
        let filter = QualityFilter::default();
        let state = state_with(fix(40.0, -73.0, 0, 0.0, 5.0));
        // ~5.5 m away
        let decision = filter.evaluate(&fix(40.00005, -73.0, 10_000, 0.0, 5.0), &state, NOW);
        assert_eq!(decision, FilterDecision::Reject(RejectReason::InsufficientMovement));
    }

    #[test]
    fn test_time_floor() {
        let filter = QualityFilter::default();
        let state = state_with(fix(40.0, -73.0, 0, 10.0, 5.0));
        // Anything under half the 5 s interval is rejected, however far it moved
        for elapsed in [0, 1, 1_000, 2_499] {
            let decision = filter.evaluate(&fix(40.0002, -73.0, elapsed, 10.0, 5.0), &state, NOW);
            assert_eq!(decision, FilterDecision::Reject(RejectReason::TooFrequent));
        }
        // ~22 m in 2.5 s is ~32 km/h
        let decision = filter.evaluate(&fix(40.0002, -73.0, 2_500, 9.0, 5.0), &state, NOW);
        assert!(decision.is_accept());
    }

    #[test]
    fn test_out_of_order_fix_rejected() {
        let filter = QualityFilter::default();
        let state = state_with(fix(40.0, -73.0, 0, 0.0, 5.0));
        let decision = filter.evaluate(&fix(40.001, -73.0, -10_000, 0.0, 5.0), &state, NOW);
        assert_eq!(decision, FilterDecision::Reject(RejectReason::TooFrequent));
    }

    #[test]
    fn test_accuracy_trend() {
        let filter = QualityFilter::default();

        // 10 m -> 16 m exceeds 1.5x
        let state = state_with(fix(40.0, -73.0, 0, 1.5, 10.0));
        let decision = filter.evaluate(&fix(40.0009, -73.0, 60_000, 1.5, 16.0), &state, NOW);
        assert_eq!(decision, FilterDecision::Reject(RejectReason::AccuracyDegraded));

        // 10 m -> 15 m is exactly 1.5x
        let decision = filter.evaluate(&fix(40.0009, -73.0, 60_000, 1.5, 15.0), &state, NOW);
        assert!(decision.is_accept());

        // 45 m -> 25 m is a 20 m improvement
        let state = state_with(fix(40.0, -73.0, 0, 1.5, 45.0));
        let decision = filter.evaluate(&fix(40.0009, -73.0, 60_000, 1.5, 25.0), &state, NOW);
        assert!(decision.is_accept());
    }

    #[test]
    fn test_gps_jump_rejected() {
        let filter = QualityFilter::default();
        let state = state_with(fix(40.0, -73.0, 0, 20.0, 5.0));
        // ~11 km in 60 s is ~667 km/h
        let decision = filter.evaluate(&fix(40.1, -73.0, 60_000, 20.0, 5.0), &state, NOW);
        assert_eq!(decision, FilterDecision::Reject(RejectReason::ImplausibleSpeed));
    }

    #[test]
    fn test_reported_speed_mismatch_rejected() {
        let filter = QualityFilter::default();
        let state = state_with(fix(40.0, -73.0, 0, 0.0, 5.0));
        // Implied ~6 km/h, reported 72 km/h
        let decision = filter.evaluate(&fix(40.0009, -73.0, 60_000, 20.0, 5.0), &state, NOW);
        assert_eq!(decision, FilterDecision::Reject(RejectReason::SpeedMismatch));
    }

    #[test]
    fn test_reference_pair_accepted() {
        let filter = QualityFilter::default();
        let a = fix(40.0, -73.0, 0, 0.0, 5.0);
        let b = fix(40.0009, -73.0, 60_000, 15.0, 5.0);
        let state = state_with(a);
        assert!(filter.evaluate(&b, &state, NOW + 60_000).is_accept());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = FilterState::new(3);
        for i in 0..5 {
            state.commit(fix(40.0 + i as f64 * 0.001, -73.0, i * 10_000, 1.0, 5.0));
        }
        assert_eq!(state.len(), 3);
        let first = state.history().next().unwrap();
        assert_eq!(first.timestamp_ms, NOW + 20_000);
        assert_eq!(state.last_accepted().unwrap().timestamp_ms, NOW + 40_000);

        state.reset();
        assert!(state.is_empty());
        assert!(state.last_accepted().is_none());
    }

    #[test]
    fn test_stats() {
        let mut stats = FilterStats::default();
        stats.record(FilterDecision::Accept);
        stats.record(FilterDecision::Reject(RejectReason::TooFrequent));
        stats.record(FilterDecision::Reject(RejectReason::TooFrequent));
        stats.record(FilterDecision::Accept);

        assert_eq!(stats.processed, 4);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejections[&RejectReason::TooFrequent], 2);
        assert!((stats.acceptance_rate() - 0.5).abs() < 1e-12);
        assert!((stats.filter_rate() - 0.5).abs() < 1e-12);
    }
}
