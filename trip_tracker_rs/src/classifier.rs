/// Heuristic driver/passenger detection.
///
/// A phone mounted on the dashboard barely moves and is rarely touched; a
/// passenger's phone is handheld and busy. Both signals are scored in [0, 1]
/// and compared against fixed thresholds. The classifier itself is pure: the
/// session feeds it a summary of the motion window plus a usage snapshot.
use crate::config::ClassifierConfig;
use crate::error::{Result, TrackerError};
use crate::types::{MotionChannel, MotionSample};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Confidence reported when no verdict could be computed
const FAILURE_CONFIDENCE: f64 = 0.3;
/// Touch count worth mentioning in passenger reasoning
const NOTABLE_TOUCH_COUNT: u32 = 20;
/// Slack for threshold and gap comparisons on summed scores
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Driver,
    Passenger,
    Unknown,
}

impl UserRole {
    pub fn is_driving(&self) -> bool {
        matches!(self, UserRole::Driver)
    }

    /// Weight applied to downstream trip analytics
    pub fn confidence_multiplier(&self) -> f64 {
        match self {
            UserRole::Driver => 1.0,
            UserRole::Passenger => 0.7,
            UserRole::Unknown => 0.5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UserRole::Driver => "DRIVER",
            UserRole::Passenger => "PASSENGER",
            UserRole::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Interaction counters for the current trip
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub screen_on: Duration,
    pub touch_events: u32,
    pub app_launches: u32,
}

impl UsageSnapshot {
    pub fn new(screen_on: Duration, touch_events: u32, app_launches: u32) -> Self {
        Self {
            screen_on,
            touch_events,
            app_launches,
        }
    }

    /// Whole minutes of screen-on time
    pub fn screen_minutes(&self) -> f64 {
        (self.screen_on.as_secs() / 60) as f64
    }
}

/// Variance and stability of one motion channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Mean of the per-axis population variances
    pub variance: f64,
    /// 1 / (1 + variance), in (0, 1]
    pub stability: f64,
    pub samples: usize,
}

impl ChannelStats {
    fn from_samples(samples: &VecDeque<Vector3<f64>>) -> Self {
        let variance = axis_variance(samples);
        Self {
            variance,
            stability: (1.0 / (1.0 + variance)).clamp(0.0, 1.0),
            samples: samples.len(),
        }
    }

    pub fn from_variance(variance: f64, samples: usize) -> Self {
        Self {
            variance,
            stability: (1.0 / (1.0 + variance)).clamp(0.0, 1.0),
            samples,
        }
    }
}

fn axis_variance(samples: &VecDeque<Vector3<f64>>) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().fold(Vector3::<f64>::zeros(), |acc, v| acc + v) / n;
    let sum_sq = samples.iter().fold(Vector3::<f64>::zeros(), |acc, v| {
        let d = v - mean;
        acc + d.component_mul(&d)
    });
    (sum_sq / n).sum() / 3.0
}

/// Snapshot of the motion window handed to the classifier
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub accel: ChannelStats,
    pub gyro: ChannelStats,
}

impl SignalSummary {
    pub fn is_phone_stable(&self, threshold: f64) -> bool {
        self.accel.stability > threshold && self.gyro.stability > threshold
    }
}

/// Last N motion samples per channel
#[derive(Clone, Debug)]
pub struct SignalWindow {
    capacity: usize,
    accel: VecDeque<Vector3<f64>>,
    gyro: VecDeque<Vector3<f64>>,
}

impl SignalWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            accel: VecDeque::with_capacity(capacity),
            gyro: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: &MotionSample) {
        let ring = match sample.channel {
            MotionChannel::LinearAcceleration => &mut self.accel,
            MotionChannel::RotationRate => &mut self.gyro,
        };
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(sample.vector());
    }

    pub fn len(&self, channel: MotionChannel) -> usize {
        match channel {
            MotionChannel::LinearAcceleration => self.accel.len(),
            MotionChannel::RotationRate => self.gyro.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accel.is_empty() && self.gyro.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.accel.clear();
        self.gyro.clear();
    }

    pub fn summary(&self) -> SignalSummary {
        SignalSummary {
            accel: ChannelStats::from_samples(&self.accel),
            gyro: ChannelStats::from_samples(&self.gyro),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeuristicScores {
    pub driver: f64,
    pub passenger: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoleVerdict {
    pub role: UserRole,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub reasoning: String,
    /// `None` when classification failed
    pub scores: Option<HeuristicScores>,
    pub timestamp_ms: i64,
}

impl RoleVerdict {
    pub fn unknown(reasoning: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            role: UserRole::Unknown,
            confidence: FAILURE_CONFIDENCE,
            reasoning: reasoning.into(),
            scores: None,
            timestamp_ms,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RoleClassifier {
    config: ClassifierConfig,
}

impl RoleClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Always produces a verdict; failures degrade to a low-confidence UNKNOWN
    pub fn classify(
        &self,
        summary: &SignalSummary,
        usage: &UsageSnapshot,
        now_ms: i64,
    ) -> RoleVerdict {
        match self.try_classify(summary, usage, now_ms) {
            Ok(verdict) => verdict,
            Err(e) => {
                log::debug!("Role classification skipped: {}", e);
                RoleVerdict::unknown(format!("Unable to determine role: {}", e), now_ms)
            }
        }
    }

    pub fn try_classify(
        &self,
        summary: &SignalSummary,
        usage: &UsageSnapshot,
        now_ms: i64,
    ) -> Result<RoleVerdict> {
        let min = self.config.min_samples;
        if summary.accel.samples < min || summary.gyro.samples < min {
            return Err(TrackerError::ClassificationFailure(format!(
                "insufficient motion data ({} accel, {} gyro samples, need {})",
                summary.accel.samples, summary.gyro.samples, min
            )));
        }

        let scores = self.scores(summary, usage);
        if !scores.driver.is_finite() || !scores.passenger.is_finite() {
            return Err(TrackerError::ClassificationFailure(
                "non-finite motion statistics".to_string(),
            ));
        }

        let (role, confidence) = self.decide(&scores);
        Ok(RoleVerdict {
            role,
            confidence,
            reasoning: self.reasoning(role, summary, usage),
            scores: Some(scores),
            timestamp_ms: now_ms,
        })
    }

    pub fn scores(&self, summary: &SignalSummary, usage: &UsageSnapshot) -> HeuristicScores {
        let driver = (self.stability_score(summary) + self.low_usage_score(usage)) / 2.0;
        let passenger = (self.movement_score(summary) + self.high_usage_score(usage)) / 2.0;
        HeuristicScores { driver, passenger }
    }

    /// Role and confidence for a pair of scores
    pub fn decide(&self, scores: &HeuristicScores) -> (UserRole, f64) {
        let c = &self.config;
        let gap = scores.driver - scores.passenger;
        // 0.7 - 0.5 is 0.19999999999999996 in f64
        let min_gap = c.min_score_gap - SCORE_EPSILON;

        if scores.driver >= c.driver_threshold - SCORE_EPSILON && gap >= min_gap {
            (UserRole::Driver, scores.driver.clamp(0.5, 0.9))
        } else if scores.passenger >= c.passenger_threshold - SCORE_EPSILON && -gap >= min_gap {
            (UserRole::Passenger, scores.passenger.clamp(0.5, 0.9))
        } else {
            (UserRole::Unknown, scores.driver.max(scores.passenger).clamp(0.3, 0.6))
        }
    }

    fn stability_score(&self, summary: &SignalSummary) -> f64 {
        let saturate = |stability: f64| {
            if stability > self.config.high_stability_threshold {
                1.0
            } else {
                stability
            }
        };
        (saturate(summary.accel.stability) + saturate(summary.gyro.stability)) / 2.0
    }

    fn low_usage_score(&self, usage: &UsageSnapshot) -> f64 {
        let c = &self.config;
        let screen = usage.screen_minutes() / c.screen_minutes_divisor;
        let touch = usage.touch_events as f64 / c.touch_divisor;
        let apps = usage.app_launches as f64 / c.app_launch_divisor;
        (1.0 - (screen + touch + apps) / 3.0).clamp(0.0, 1.0)
    }

    fn movement_score(&self, summary: &SignalSummary) -> f64 {
        let accel = summary.accel.variance / self.config.accel_variance_divisor;
        let gyro = summary.gyro.variance / self.config.gyro_variance_divisor;
        ((accel + gyro) / 2.0).clamp(0.0, 1.0)
    }

    fn high_usage_score(&self, usage: &UsageSnapshot) -> f64 {
        let c = &self.config;
        let weighted = usage.screen_minutes() * c.screen_weight
            + usage.touch_events as f64 * c.touch_weight
            + usage.app_launches as f64 * c.app_launch_weight;
        (weighted / c.high_usage_divisor).clamp(0.0, 1.0)
    }

    fn reasoning(&self, role: UserRole, summary: &SignalSummary, usage: &UsageSnapshot) -> String {
        let c = &self.config;
        let stable = summary.is_phone_stable(c.stable_phone_threshold);

        match role {
            UserRole::Driver => {
                let mut reasons = Vec::new();
                if stable {
                    reasons.push("phone position appears stable (typical for mounted phones)".to_string());
                }
                if usage.touch_events < c.low_activity_count
                    && usage.app_launches < c.low_activity_count
                {
                    reasons.push("low screen and app usage".to_string());
                }
                if summary.gyro.stability > c.stable_phone_threshold {
                    reasons.push("minimal phone rotation detected".to_string());
                }
                if reasons.is_empty() {
                    reasons.push("driver indicators outweigh passenger indicators".to_string());
                }
                format!("Detected as driver: {}", reasons.join(", "))
            }
            UserRole::Passenger => {
                let mut reasons = Vec::new();
                if !stable {
                    reasons.push("phone position appears unstable (typical for handheld use)".to_string());
                }
                if usage.screen_minutes() > c.high_screen_minutes
                    || usage.touch_events > c.high_touch_count
                {
                    reasons.push("high screen and app usage detected".to_string());
                }
                if usage.touch_events > NOTABLE_TOUCH_COUNT {
                    reasons.push(format!("{} touch interactions recorded", usage.touch_events));
                }
                if reasons.is_empty() {
                    reasons.push("passenger indicators outweigh driver indicators".to_string());
                }
                format!("Detected as passenger: {}", reasons.join(", "))
            }
            UserRole::Unknown => format!(
                "Unable to determine role: mixed signals detected. Phone stability: {:.1}, screen usage: {}m, touch events: {}",
                summary.accel.stability,
                usage.screen_minutes(),
                usage.touch_events
            ),
        }
    }
}
