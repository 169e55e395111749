//! Insurance-style risk metrics for a finished trip, weighted by the
//! classified role.
use crate::trip::TripRecord;
use chrono::{Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

const MIN_RISK: f64 = 0.5;
const MAX_RISK: f64 = 3.0;
/// Distance factor saturates at 2x
const MAX_DISTANCE_FACTOR: f64 = 2.0;
const DISTANCE_FACTOR_KM: f64 = 1000.0;
const FAST_AVG_SPEED_KMH: f64 = 80.0;
const FAST_FACTOR: f64 = 1.2;
const LONG_NIGHT_HOURS: f64 = 2.0;
const NIGHT_FACTOR: f64 = 1.3;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub base_risk_score: f64,
    /// `UserRole::confidence_multiplier` of the trip's role
    pub role_adjustment: f64,
    pub adjusted_risk_score: f64,
    /// 1.0 = no change, below 1 discount, above 1 increase
    pub recommended_premium: f64,
    /// Confidence of the role verdict, 0 when none was recorded
    pub confidence_level: f64,
}

impl RiskMetrics {
    /// Metrics using the local hour of the trip start for the night check
    pub fn for_trip(record: &TripRecord) -> Self {
        let start_hour = Local
            .timestamp_millis_opt(record.start_ms)
            .single()
            .map(|t| t.hour());
        Self::with_start_hour(record, start_hour)
    }

    pub fn with_start_hour(record: &TripRecord, start_hour: Option<u32>) -> Self {
        let base = base_risk_score(record, start_hour);
        let role_adjustment = record.user_role().confidence_multiplier();
        let adjusted = base * role_adjustment;
        Self {
            base_risk_score: base,
            role_adjustment,
            adjusted_risk_score: adjusted,
            recommended_premium: recommended_premium(adjusted),
            confidence_level: record.role.as_ref().map(|v| v.confidence).unwrap_or(0.0),
        }
    }
}

fn is_night(hour: u32) -> bool {
    hour < 6 || hour > 22
}

fn base_risk_score(record: &TripRecord, start_hour: Option<u32>) -> f64 {
    let mut risk = (1.0 + record.distance_km() / DISTANCE_FACTOR_KM).min(MAX_DISTANCE_FACTOR);

    if record.avg_speed_kmh() > FAST_AVG_SPEED_KMH {
        risk *= FAST_FACTOR;
    }

    let hours = record.duration_ms() as f64 / 3_600_000.0;
    if start_hour.map(is_night).unwrap_or(false) && hours > LONG_NIGHT_HOURS {
        risk *= NIGHT_FACTOR;
    }

    risk.clamp(MIN_RISK, MAX_RISK)
}

fn recommended_premium(risk: f64) -> f64 {
    if risk < 1.0 {
        0.9
    } else if risk < 1.5 {
        1.0
    } else if risk < 2.0 {
        1.2
    } else {
        1.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{RoleVerdict, UserRole};
    use crate::trip::TripStatus;
    use approx::assert_relative_eq;

    fn record(distance_km: f64, avg_kmh: f64, hours: f64, role: Option<UserRole>) -> TripRecord {
        TripRecord {
            id: "trip_0".to_string(),
            start_ms: 0,
            end_ms: (hours * 3_600_000.0) as i64,
            distance_m: distance_km * 1000.0,
            avg_speed_ms: avg_kmh / 3.6,
            max_speed_ms: avg_kmh / 3.6,
            fix_count: 0,
            status: TripStatus::Completed,
            role: role.map(|role| RoleVerdict {
                role,
                confidence: 0.8,
                reasoning: String::new(),
                scores: None,
                timestamp_ms: 0,
            }),
            fixes: Vec::new(),
        }
    }

    #[test]
    fn test_short_daytime_driver_trip() {
        let metrics = RiskMetrics::with_start_hour(&record(10.0, 40.0, 0.5, Some(UserRole::Driver)), Some(12));
        assert_relative_eq!(metrics.base_risk_score, 1.01);
        assert_relative_eq!(metrics.role_adjustment, 1.0);
        assert_relative_eq!(metrics.recommended_premium, 1.0);
        assert_relative_eq!(metrics.confidence_level, 0.8);
    }

    #[test]
    fn test_role_scales_risk() {
        let trip = record(500.0, 90.0, 1.0, Some(UserRole::Passenger));
        let metrics = RiskMetrics::with_start_hour(&trip, Some(12));
        // 1.5 distance factor * 1.2 fast
        assert_relative_eq!(metrics.base_risk_score, 1.8, epsilon = 1e-9);
        assert_relative_eq!(metrics.adjusted_risk_score, 1.26, epsilon = 1e-9);
        assert_relative_eq!(metrics.recommended_premium, 1.0);

        let unclassified = RiskMetrics::with_start_hour(&record(500.0, 90.0, 1.0, None), Some(12));
        assert_relative_eq!(unclassified.role_adjustment, 0.5);
        assert_relative_eq!(unclassified.confidence_level, 0.0);
        assert_relative_eq!(unclassified.recommended_premium, 0.9);
    }

    #[test]
    fn test_long_night_trip_and_clamp() {
        let trip = record(3000.0, 100.0, 3.0, Some(UserRole::Driver));
        let day = RiskMetrics::with_start_hour(&trip, Some(14));
        assert_relative_eq!(day.base_risk_score, 2.4, epsilon = 1e-9);
        let night = RiskMetrics::with_start_hour(&trip, Some(23));
        assert_relative_eq!(night.base_risk_score, MAX_RISK);
        assert_relative_eq!(night.recommended_premium, 1.5);

        // Night but short: no night factor
        let short = record(10.0, 40.0, 1.0, Some(UserRole::Driver));
        assert_relative_eq!(
            RiskMetrics::with_start_hour(&short, Some(2)).base_risk_score,
            1.01
        );
    }
}
