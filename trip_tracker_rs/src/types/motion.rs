use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Motion sensor channel feeding the role classifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionChannel {
    /// Linear acceleration (m/s²)
    LinearAcceleration,
    /// Rotation rate (rad/s)
    RotationRate,
}

/// Raw (x, y, z) triple from a motion sensor event
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub channel: MotionChannel,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Epoch milliseconds
    pub timestamp_ms: i64,
}

impl MotionSample {
    pub fn new(channel: MotionChannel, x: f64, y: f64, z: f64, timestamp_ms: i64) -> Self {
        Self {
            channel,
            x,
            y,
            z,
            timestamp_ms,
        }
    }

    pub fn accel(x: f64, y: f64, z: f64, timestamp_ms: i64) -> Self {
        Self::new(MotionChannel::LinearAcceleration, x, y, z, timestamp_ms)
    }

    pub fn gyro(x: f64, y: f64, z: f64, timestamp_ms: i64) -> Self {
        Self::new(MotionChannel::RotationRate, x, y, z, timestamp_ms)
    }

    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn magnitude(&self) -> f64 {
        self.vector().norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accel_magnitude() {
        let accel = MotionSample::accel(3.0, 4.0, 0.0, 0);
        assert_eq!(accel.magnitude(), 5.0);
        assert_eq!(accel.channel, MotionChannel::LinearAcceleration);
    }

    #[test]
    fn test_gyro_magnitude() {
        let gyro = MotionSample::gyro(0.6, 0.8, 0.0, 0);
        assert!((gyro.magnitude() - 1.0).abs() < 1e-12);
        assert_eq!(gyro.channel, MotionChannel::RotationRate);
    }
}
