/// Running trip statistics built from accepted fixes
use crate::classifier::{RoleVerdict, UserRole};
use crate::error::{Result, TrackerError};
use crate::geo_math;
use crate::types::PositionFix;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Active,
    Completed,
    Failed,
}

/// Live view of an in-progress trip
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TripSnapshot {
    pub trip_id: String,
    pub duration_ms: i64,
    pub distance_m: f64,
    /// Mean of the positive speed samples (m/s)
    pub avg_speed_ms: f64,
    pub max_speed_ms: f64,
    pub fix_count: usize,
    pub last_fix: Option<PositionFix>,
}

/// Immutable record of a finished trip
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub distance_m: f64,
    pub avg_speed_ms: f64,
    pub max_speed_ms: f64,
    pub fix_count: usize,
    pub status: TripStatus,
    /// Last role verdict of the trip, `None` when none was produced
    #[serde(default)]
    pub role: Option<RoleVerdict>,
    pub fixes: Vec<PositionFix>,
}

impl TripRecord {
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    pub fn start_fix(&self) -> Option<&PositionFix> {
        self.fixes.first()
    }

    pub fn end_fix(&self) -> Option<&PositionFix> {
        self.fixes.last()
    }

    pub fn has_fixes(&self) -> bool {
        !self.fixes.is_empty()
    }

    pub fn is_completed(&self) -> bool {
        self.status == TripStatus::Completed
    }

    pub fn distance_km(&self) -> f64 {
        geo_math::meters_to_km(self.distance_m)
    }

    pub fn distance_miles(&self) -> f64 {
        geo_math::meters_to_miles(self.distance_m)
    }

    pub fn avg_speed_kmh(&self) -> f64 {
        geo_math::ms_to_kmh(self.avg_speed_ms)
    }

    pub fn max_speed_kmh(&self) -> f64 {
        geo_math::ms_to_kmh(self.max_speed_ms)
    }

    pub fn avg_speed_mph(&self) -> f64 {
        geo_math::ms_to_mph(self.avg_speed_ms)
    }

    /// Classified role, `Unknown` when no verdict was recorded
    pub fn user_role(&self) -> UserRole {
        self.role.as_ref().map(|v| v.role).unwrap_or(UserRole::Unknown)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.start_ms).single()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.end_ms).single()
    }
}

/// Incremental trip accumulator.
///
/// Distance grows by one haversine step per fix, so every update is O(1).
/// Once finalized the record is frozen and further fixes are refused.
#[derive(Clone, Debug)]
pub struct TripAccumulator {
    id: String,
    start_ms: i64,
    distance_m: f64,
    speed_sum: f64,
    speed_count: u64,
    max_speed_ms: f64,
    fixes: Vec<PositionFix>,
    verdict: Option<RoleVerdict>,
    finalized: Option<TripRecord>,
}

impl TripAccumulator {
    pub fn new(start_ms: i64) -> Self {
        Self {
            id: format!("trip_{}", start_ms),
            start_ms,
            distance_m: 0.0,
            speed_sum: 0.0,
            speed_count: 0,
            max_speed_ms: 0.0,
            fixes: Vec::new(),
            verdict: None,
            finalized: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    pub fn fixes(&self) -> &[PositionFix] {
        &self.fixes
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    pub fn on_fix(&mut self, fix: &PositionFix) -> Result<()> {
        if self.finalized.is_some() {
            return Err(TrackerError::TripFinalized);
        }

        if let Some(previous) = self.fixes.last() {
            self.distance_m += previous.distance_to(fix);
        }

        if fix.has_valid_speed() && fix.speed_ms > 0.0 {
            self.speed_sum += fix.speed_ms;
            self.speed_count += 1;
            if fix.speed_ms > self.max_speed_ms {
                self.max_speed_ms = fix.speed_ms;
            }
        }

        self.fixes.push(*fix);
        Ok(())
    }

    /// Keep the latest role verdict; it is stamped into the record at
    /// finalize. Ignored once finalized.
    pub fn record_verdict(&mut self, verdict: RoleVerdict) {
        if self.finalized.is_none() {
            self.verdict = Some(verdict);
        }
    }

    fn avg_speed_ms(&self) -> f64 {
        if self.speed_count == 0 {
            0.0
        } else {
            self.speed_sum / self.speed_count as f64
        }
    }

    pub fn snapshot(&self, now_ms: i64) -> TripSnapshot {
        if let Some(record) = &self.finalized {
            return TripSnapshot {
                trip_id: record.id.clone(),
                duration_ms: record.duration_ms(),
                distance_m: record.distance_m,
                avg_speed_ms: record.avg_speed_ms,
                max_speed_ms: record.max_speed_ms,
                fix_count: record.fix_count,
                last_fix: record.end_fix().copied(),
            };
        }

        TripSnapshot {
            trip_id: self.id.clone(),
            duration_ms: (now_ms - self.start_ms).max(0),
            distance_m: self.distance_m,
            avg_speed_ms: self.avg_speed_ms(),
            max_speed_ms: self.max_speed_ms,
            fix_count: self.fixes.len(),
            last_fix: self.fixes.last().copied(),
        }
    }

    /// Freeze the trip. Later calls return the first record unchanged.
    pub fn finalize(&mut self, end_ms: i64, status: TripStatus) -> TripRecord {
        if let Some(record) = &self.finalized {
            return record.clone();
        }

        let record = TripRecord {
            id: self.id.clone(),
            start_ms: self.start_ms,
            end_ms: end_ms.max(self.start_ms),
            distance_m: self.distance_m,
            avg_speed_ms: self.avg_speed_ms(),
            max_speed_ms: self.max_speed_ms,
            fix_count: self.fixes.len(),
            status,
            role: self.verdict.clone(),
            fixes: std::mem::take(&mut self.fixes),
        };
        log::info!(
            "Trip {} finalized ({:?}): {:.1} m over {} fixes",
            record.id,
            record.status,
            record.distance_m,
            record.fix_count
        );
        self.finalized = Some(record.clone());
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn drive() -> Vec<PositionFix> {
        (0..20)
            .map(|i| {
                let t = i as f64;
                PositionFix::new(
                    40.0 + t * 0.0003,
                    -73.0 + (t * 0.7).sin() * 0.0002,
                    1_000 + i * 5_000,
                    10.0 + (t * 0.3).sin() * 3.0,
                    Some(5.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_incremental_distance_matches_batch() {
        let fixes = drive();
        let mut trip = TripAccumulator::new(1_000);
        for fix in &fixes {
            trip.on_fix(fix).unwrap();
        }

        let batch: f64 = fixes.windows(2).map(|w| w[0].distance_to(&w[1])).sum();
        assert_abs_diff_eq!(trip.distance_m(), batch, epsilon = 1e-6);
    }

    #[test]
    fn test_two_fix_trip_is_about_100m() {
        let mut trip = TripAccumulator::new(0);
        trip.on_fix(&PositionFix::new(40.7128, -74.0060, 0, 15.0, Some(5.0)))
            .unwrap();
        trip.on_fix(&PositionFix::new(40.7137, -74.0060, 60_000, 15.0, Some(5.0)))
            .unwrap();
        let snap = trip.snapshot(60_000);
        assert_abs_diff_eq!(snap.distance_m, 100.0, epsilon = 1.0);
        assert_eq!(snap.fix_count, 2);
        assert_eq!(snap.duration_ms, 60_000);
    }

    #[test]
    fn test_speed_statistics_ignore_non_positive() {
        let mut trip = TripAccumulator::new(0);
        for (i, speed) in [0.0, 10.0, -1.0, 20.0, f64::NAN].iter().enumerate() {
            let fix = PositionFix::new(40.0, -73.0 + i as f64 * 0.001, i as i64, *speed, Some(5.0));
            trip.on_fix(&fix).unwrap();
        }
        let snap = trip.snapshot(10);
        assert_eq!(snap.fix_count, 5);
        assert_abs_diff_eq!(snap.avg_speed_ms, 15.0);
        assert_abs_diff_eq!(snap.max_speed_ms, 20.0);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut trip = TripAccumulator::new(1_000);
        for fix in drive() {
            trip.on_fix(&fix).unwrap();
        }
        let first = trip.finalize(200_000, TripStatus::Completed);
        let second = trip.finalize(999_999, TripStatus::Failed);
        assert_eq!(first, second);
        assert_eq!(first.fix_count, 20);
        assert_eq!(first.duration_ms(), 199_000);
        assert!(first.is_completed());
        assert_eq!(first.id, "trip_1000");
    }

    #[test]
    fn test_finalize_stamps_latest_verdict() {
        let mut trip = TripAccumulator::new(0);
        trip.record_verdict(RoleVerdict::unknown("warming up", 5_000));
        trip.record_verdict(RoleVerdict {
            role: UserRole::Driver,
            confidence: 0.8,
            reasoning: "stable phone".to_string(),
            scores: None,
            timestamp_ms: 10_000,
        });
        let record = trip.finalize(20_000, TripStatus::Completed);
        assert_eq!(record.user_role(), UserRole::Driver);
        assert_eq!(record.role.as_ref().map(|v| v.timestamp_ms), Some(10_000));

        // Frozen after finalize
        trip.record_verdict(RoleVerdict::unknown("late", 30_000));
        assert_eq!(trip.finalize(40_000, TripStatus::Completed), record);
    }

    #[test]
    fn test_record_without_role_field_still_loads() {
        let json = r#"{"id":"trip_1","start_ms":0,"end_ms":10,"distance_m":0.0,
            "avg_speed_ms":0.0,"max_speed_ms":0.0,"fix_count":0,"status":"COMPLETED","fixes":[]}"#;
        let record: TripRecord = serde_json::from_str(json).unwrap();
        assert!(record.role.is_none());
        assert_eq!(record.user_role(), UserRole::Unknown);
    }

    #[test]
    fn test_fix_after_finalize_rejected() {
        let mut trip = TripAccumulator::new(0);
        trip.finalize(10, TripStatus::Completed);
        let fix = PositionFix::new(40.0, -73.0, 5, 1.0, Some(5.0));
        assert!(matches!(trip.on_fix(&fix), Err(TrackerError::TripFinalized)));
        assert_eq!(trip.snapshot(100).fix_count, 0);
    }

    #[test]
    fn test_empty_trip_record() {
        let mut trip = TripAccumulator::new(5_000);
        let record = trip.finalize(1_000, TripStatus::Failed);
        assert_eq!(record.duration_ms(), 0);
        assert!(!record.has_fixes());
        assert!(record.start_fix().is_none());
        assert_eq!(record.avg_speed_ms, 0.0);
    }

    #[test]
    fn test_unit_conversions() {
        let mut trip = TripAccumulator::new(0);
        trip.on_fix(&PositionFix::new(40.0, -73.0, 0, 10.0, Some(5.0))).unwrap();
        trip.on_fix(&PositionFix::new(40.01, -73.0, 60_000, 10.0, Some(5.0))).unwrap();
        let record = trip.finalize(60_000, TripStatus::Completed);
        assert_abs_diff_eq!(record.avg_speed_kmh(), 36.0, epsilon = 1e-9);
        assert_abs_diff_eq!(record.distance_km(), record.distance_m / 1000.0, epsilon = 1e-12);
        assert!(record.distance_miles() < record.distance_km());
        assert_eq!(record.start_time().map(|t| t.timestamp_millis()), Some(0));
    }
}
