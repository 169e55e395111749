/// Adaptive accuracy/power trade-off for the position source.
///
/// Battery level, current speed and trip phase each propose a mode; the
/// least precise proposal wins.
use crate::config::SelectorConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Acquisition mode requested from the platform location provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquisitionMode {
    /// GPS only, best accuracy, high battery
    HighAccuracy,
    /// GPS + network, good accuracy, moderate battery
    Balanced,
    /// Network primarily, acceptable accuracy, low battery
    LowPower,
    /// Piggyback on other apps' fixes, minimal battery
    Passive,
}

impl AcquisitionMode {
    pub const ALL: [AcquisitionMode; 4] = [
        AcquisitionMode::HighAccuracy,
        AcquisitionMode::Balanced,
        AcquisitionMode::LowPower,
        AcquisitionMode::Passive,
    ];

    /// Higher = more precise and more expensive
    pub fn priority(&self) -> u8 {
        match self {
            AcquisitionMode::HighAccuracy => 100,
            AcquisitionMode::Balanced => 75,
            AcquisitionMode::LowPower => 50,
            AcquisitionMode::Passive => 25,
        }
    }

    /// Relative battery cost
    pub fn battery_impact(&self) -> f32 {
        match self {
            AcquisitionMode::HighAccuracy => 5.0,
            AcquisitionMode::Balanced => 3.0,
            AcquisitionMode::LowPower => 1.5,
            AcquisitionMode::Passive => 0.5,
        }
    }

    /// Interval and min-distance multiplier relative to the base request
    pub fn scale(&self) -> u32 {
        match self {
            AcquisitionMode::HighAccuracy => 1,
            AcquisitionMode::Balanced => 2,
            AcquisitionMode::LowPower => 4,
            AcquisitionMode::Passive => 8,
        }
    }

    /// Next cheaper mode, `Passive` stays `Passive`
    pub fn downgraded(&self) -> AcquisitionMode {
        match self {
            AcquisitionMode::HighAccuracy => AcquisitionMode::Balanced,
            AcquisitionMode::Balanced => AcquisitionMode::LowPower,
            AcquisitionMode::LowPower | AcquisitionMode::Passive => AcquisitionMode::Passive,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AcquisitionMode::HighAccuracy => "HIGH_ACCURACY",
            AcquisitionMode::Balanced => "BALANCED",
            AcquisitionMode::LowPower => "LOW_POWER",
            AcquisitionMode::Passive => "PASSIVE",
        }
    }

    /// Most conservative (lowest priority) of the candidates
    pub fn most_conservative<I>(candidates: I) -> Option<AcquisitionMode>
    where
        I: IntoIterator<Item = AcquisitionMode>,
    {
        candidates.into_iter().min_by_key(|mode| mode.priority())
    }

    pub fn from_battery(battery_percent: u8) -> AcquisitionMode {
        match battery_percent {
            0..=14 => AcquisitionMode::Passive,
            15..=29 => AcquisitionMode::LowPower,
            30..=59 => AcquisitionMode::Balanced,
            _ => AcquisitionMode::HighAccuracy,
        }
    }

    pub fn from_speed(speed_kmh: f64) -> AcquisitionMode {
        if speed_kmh < 5.0 {
            // Stopped or in traffic
            AcquisitionMode::HighAccuracy
        } else if speed_kmh < 30.0 {
            AcquisitionMode::Balanced
        } else {
            AcquisitionMode::LowPower
        }
    }

    pub fn from_trip_duration(trip_duration_ms: i64) -> AcquisitionMode {
        if trip_duration_ms < 120_000 {
            AcquisitionMode::HighAccuracy
        } else if trip_duration_ms > 3_600_000 {
            AcquisitionMode::LowPower
        } else {
            AcquisitionMode::Balanced
        }
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl PartialOrd for AcquisitionMode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AcquisitionMode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority().cmp(&other.priority())
    }
}

/// Parameters of one platform subscription
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationRequest {
    pub mode: AcquisitionMode,
    pub interval_ms: u64,
    pub min_distance_m: f64,
}

/// Everything the selector looks at
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionInputs {
    pub battery_percent: u8,
    pub power_save: bool,
    pub speed_kmh: f64,
    pub trip_duration_ms: i64,
    /// Upper bound installed after provider trouble
    pub ceiling: Option<AcquisitionMode>,
}

#[derive(Clone, Debug, Default)]
pub struct ModeSelector {
    config: SelectorConfig,
}

impl ModeSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn select_mode(
        &self,
        battery_percent: u8,
        speed_kmh: f64,
        trip_duration_ms: i64,
    ) -> AcquisitionMode {
        self.select_with(&SelectionInputs {
            battery_percent,
            power_save: false,
            speed_kmh,
            trip_duration_ms,
            ceiling: None,
        })
    }

    /// Power-save and the recovery ceiling only add candidates, so the
    /// result is never more precise than `select_mode` would return.
    pub fn select_with(&self, inputs: &SelectionInputs) -> AcquisitionMode {
        let mut candidates = vec![
            AcquisitionMode::from_battery(inputs.battery_percent),
            AcquisitionMode::from_speed(inputs.speed_kmh),
            AcquisitionMode::from_trip_duration(inputs.trip_duration_ms),
        ];
        if inputs.power_save {
            candidates.push(AcquisitionMode::LowPower);
        }
        if let Some(ceiling) = inputs.ceiling {
            candidates.push(ceiling);
        }

        AcquisitionMode::most_conservative(candidates).unwrap_or(AcquisitionMode::Balanced)
    }

    pub fn request_for(&self, mode: AcquisitionMode) -> LocationRequest {
        let scale = mode.scale();
        LocationRequest {
            mode,
            interval_ms: self.config.base_interval_ms * scale as u64,
            min_distance_m: self.config.base_min_distance_m * scale as f64,
        }
    }
}
