//! Conversion of raw Android callback values into core types

use crate::error::{BridgeError, JResult};
use trip_tracker_rs::types::{MotionChannel, MotionSample, PositionFix};

/// `Sensor.TYPE_GYROSCOPE`
pub const SENSOR_TYPE_GYROSCOPE: i32 = 4;
/// `Sensor.TYPE_LINEAR_ACCELERATION`
pub const SENSOR_TYPE_LINEAR_ACCELERATION: i32 = 10;

pub fn sensor_type_to_channel(sensor_type: i32) -> Option<MotionChannel> {
    match sensor_type {
        SENSOR_TYPE_LINEAR_ACCELERATION => Some(MotionChannel::LinearAcceleration),
        SENSOR_TYPE_GYROSCOPE => Some(MotionChannel::RotationRate),
        _ => None,
    }
}

/// Motion sample from a `SensorEvent` (timestamp already converted to epoch ms)
pub fn motion_sample(
    sensor_type: i32,
    x: f64,
    y: f64,
    z: f64,
    timestamp_ms: i64,
) -> JResult<MotionSample> {
    let channel = sensor_type_to_channel(sensor_type).ok_or_else(|| {
        BridgeError::InvalidParameters(format!("unsupported sensor type {}", sensor_type))
    })?;
    Ok(MotionSample::new(channel, x, y, z, timestamp_ms))
}

/// Fix from `android.location.Location`.
///
/// `Location.hasSpeed()` / `hasAccuracy()` are passed explicitly; a missing
/// speed becomes -1 so the quality filter rejects it, a missing accuracy
/// becomes `None`.
pub fn location_to_fix(
    latitude: f64,
    longitude: f64,
    time_ms: i64,
    speed_ms: f64,
    has_speed: bool,
    accuracy_m: f64,
    has_accuracy: bool,
) -> PositionFix {
    PositionFix::new(
        latitude,
        longitude,
        time_ms,
        if has_speed { speed_ms } else { -1.0 },
        has_accuracy.then_some(accuracy_m),
    )
}
