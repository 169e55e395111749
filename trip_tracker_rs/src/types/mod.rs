pub mod motion;

pub use motion::*;

use crate::geo_math;
use serde::{Deserialize, Serialize};

/// Wall-clock epoch milliseconds
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A single position report from the platform location provider
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Epoch milliseconds
    pub timestamp_ms: i64,
    /// m/s, negative or NaN means the provider reported no valid speed
    pub speed_ms: f64,
    /// Horizontal accuracy radius (m), `None` when not reported
    pub accuracy_m: Option<f64>,
}

impl PositionFix {
    pub fn new(
        latitude: f64,
        longitude: f64,
        timestamp_ms: i64,
        speed_ms: f64,
        accuracy_m: Option<f64>,
    ) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms,
            speed_ms,
            accuracy_m,
        }
    }

    pub fn speed_kmh(&self) -> f64 {
        geo_math::ms_to_kmh(self.speed_ms)
    }

    pub fn has_valid_speed(&self) -> bool {
        self.speed_ms.is_finite() && self.speed_ms >= 0.0
    }

    /// Moving faster than ~1 mph, below that is treated as GPS drift
    pub fn is_moving(&self) -> bool {
        self.speed_ms > 0.5
    }

    pub fn distance_to(&self, other: &PositionFix) -> f64 {
        geo_math::haversine_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Confidence score split into accuracy and speed plausibility halves
    pub fn quality(&self) -> FixQuality {
        let accuracy_points = match self.accuracy_m {
            Some(a) if a <= 10.0 => 50,
            Some(a) if a <= 25.0 => 40,
            Some(a) if a <= 50.0 => 30,
            Some(a) if a <= 100.0 => 20,
            _ => 0,
        };

        let speed_points = if !self.speed_ms.is_finite() || self.speed_ms < 0.0 {
            0
        } else if self.speed_ms <= 200.0 {
            50
        } else {
            25
        };

        FixQuality {
            accuracy_points,
            speed_points,
        }
    }
}

/// Fix confidence (0-100): 0-50 from accuracy, 0-50 from speed plausibility
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixQuality {
    pub accuracy_points: u8,
    pub speed_points: u8,
}

impl FixQuality {
    pub fn score(&self) -> u8 {
        self.accuracy_points + self.speed_points
    }
}

/// A fix that passed the quality filter, as emitted downstream
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcceptedFix {
    pub fix: PositionFix,
    pub quality: FixQuality,
    /// Acquisition mode the fix was delivered under
    pub mode: crate::accuracy::AcquisitionMode,
}
