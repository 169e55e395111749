//! Runtime configuration for the tracking pipeline.
//!
//! Every section defaults to the values the Android app shipped with, so an
//! empty JSON object (`{}`) is a valid config file.

use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Quality filter thresholds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Fixes with a larger accuracy radius are rejected (m)
    pub max_accuracy_m: f64,
    /// Minimum movement from the last accepted fix (m)
    pub min_distance_m: f64,
    /// Base acquisition interval; the time floor is half of it (ms)
    pub update_interval_ms: i64,
    /// How far in the future a fix timestamp may be (ms)
    pub max_future_ms: i64,
    /// How old a fix timestamp may be (ms)
    pub max_age_ms: i64,
    /// An accuracy improvement of at least this much is always accepted (m)
    pub accuracy_improvement_m: f64,
    /// Allowed accuracy degradation factor relative to the previous fix
    pub max_accuracy_degradation: f64,
    /// Implied speeds above this are GPS jumps (km/h)
    pub max_implied_speed_kmh: f64,
    /// Max difference between implied and reported speed (km/h)
    pub speed_tolerance_kmh: f64,
    /// Accepted fixes kept in the filter history
    pub history_capacity: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 50.0,
            min_distance_m: 10.0,
            update_interval_ms: 5_000,
            max_future_ms: 60_000,
            max_age_ms: 3_600_000,
            accuracy_improvement_m: 20.0,
            max_accuracy_degradation: 1.5,
            max_implied_speed_kmh: 300.0,
            speed_tolerance_kmh: 50.0,
            history_capacity: 10,
        }
    }
}

/// Accuracy selector base request parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Request interval for HIGH_ACCURACY; other modes scale it (ms)
    pub base_interval_ms: u64,
    /// Minimum distance between updates for HIGH_ACCURACY (m)
    pub base_min_distance_m: f64,
    /// How long a downgrade after provider trouble caps the mode (ms)
    pub recovery_hold_ms: i64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 5_000,
            base_min_distance_m: 10.0,
            recovery_hold_ms: 60_000,
        }
    }
}

/// Heuristic role classifier parameters.
///
/// The thresholds and divisors are empirical and were never validated
/// against labelled trips, so they are kept tunable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub driver_threshold: f64,
    pub passenger_threshold: f64,
    pub min_score_gap: f64,
    /// Per-channel stability above this counts as fully stable
    pub high_stability_threshold: f64,
    pub screen_minutes_divisor: f64,
    pub touch_divisor: f64,
    pub app_launch_divisor: f64,
    pub accel_variance_divisor: f64,
    pub gyro_variance_divisor: f64,
    pub screen_weight: f64,
    pub touch_weight: f64,
    pub app_launch_weight: f64,
    pub high_usage_divisor: f64,
    /// Samples required per channel before a verdict is attempted
    pub min_samples: usize,
    /// Motion samples kept per channel
    pub window_size: usize,
    /// Stability above which the phone is described as stable
    pub stable_phone_threshold: f64,
    /// Screen-on minutes counted as heavy usage
    pub high_screen_minutes: f64,
    pub high_touch_count: u32,
    pub low_activity_count: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            driver_threshold: 0.7,
            passenger_threshold: 0.6,
            min_score_gap: 0.2,
            high_stability_threshold: 0.8,
            screen_minutes_divisor: 10.0,
            touch_divisor: 100.0,
            app_launch_divisor: 20.0,
            accel_variance_divisor: 10.0,
            gyro_variance_divisor: 50.0,
            screen_weight: 0.5,
            touch_weight: 0.3,
            app_launch_weight: 0.2,
            high_usage_divisor: 50.0,
            min_samples: 10,
            window_size: 50,
            stable_phone_threshold: 0.7,
            high_screen_minutes: 5.0,
            high_touch_count: 50,
            low_activity_count: 5,
        }
    }
}

/// Session driver timing and channel sizing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Role re-evaluation cadence (ms)
    pub classification_interval_ms: u64,
    /// Trip snapshot publication cadence (ms)
    pub snapshot_interval_ms: u64,
    /// Motion sensor sampling rate requested from the platform (Hz)
    pub motion_sample_rate_hz: f64,
    /// Capacity of the outbound session event channel
    pub event_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            classification_interval_ms: 5_000,
            snapshot_interval_ms: 2_000,
            motion_sample_rate_hz: 20.0,
            event_channel_capacity: 256,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub filter: FilterConfig,
    pub selector: SelectorConfig,
    pub classifier: ClassifierConfig,
    pub session: SessionConfig,
}

impl TrackerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: TrackerConfig =
            serde_json::from_str(json).map_err(|e| TrackerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.filter;
        if f.max_accuracy_m <= 0.0 {
            return Err(TrackerError::Config("filter.max_accuracy_m must be > 0".into()));
        }
        if f.min_distance_m < 0.0 {
            return Err(TrackerError::Config("filter.min_distance_m must be >= 0".into()));
        }
        if f.update_interval_ms <= 0 {
            return Err(TrackerError::Config("filter.update_interval_ms must be > 0".into()));
        }
        if f.history_capacity == 0 {
            return Err(TrackerError::Config("filter.history_capacity must be > 0".into()));
        }
        if f.max_accuracy_degradation < 1.0 {
            return Err(TrackerError::Config(
                "filter.max_accuracy_degradation must be >= 1.0".into(),
            ));
        }

        if self.selector.base_interval_ms == 0 {
            return Err(TrackerError::Config("selector.base_interval_ms must be > 0".into()));
        }
        // The time floor and the requested interval describe one base interval
        if f.update_interval_ms as u64 != self.selector.base_interval_ms {
            return Err(TrackerError::Config(format!(
                "filter.update_interval_ms ({}) must equal selector.base_interval_ms ({})",
                f.update_interval_ms, self.selector.base_interval_ms
            )));
        }
        if self.selector.recovery_hold_ms < 0 {
            return Err(TrackerError::Config("selector.recovery_hold_ms must be >= 0".into()));
        }

        let c = &self.classifier;
        if c.window_size < 2 || c.min_samples > c.window_size {
            return Err(TrackerError::Config(
                "classifier.window_size must be >= 2 and >= min_samples".into(),
            ));
        }
        for (name, value) in [
            ("screen_minutes_divisor", c.screen_minutes_divisor),
            ("touch_divisor", c.touch_divisor),
            ("app_launch_divisor", c.app_launch_divisor),
            ("accel_variance_divisor", c.accel_variance_divisor),
            ("gyro_variance_divisor", c.gyro_variance_divisor),
            ("high_usage_divisor", c.high_usage_divisor),
        ] {
            if value <= 0.0 {
                return Err(TrackerError::Config(format!("classifier.{} must be > 0", name)));
            }
        }

        if self.session.classification_interval_ms == 0 || self.session.snapshot_interval_ms == 0
        {
            return Err(TrackerError::Config("session intervals must be > 0".into()));
        }
        if self.session.event_channel_capacity == 0 {
            return Err(TrackerError::Config(
                "session.event_channel_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}
