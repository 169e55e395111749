/// Synthetic sources for running a session without a device.
///
/// The position source drives a smooth loop north-east of its origin at
/// 12 ± 5 m/s; the motion source emits mounted or handheld phone noise.
use super::{MotionSource, PositionSource, SourceEvent, SubscriptionId};
use crate::accuracy::LocationRequest;
use crate::error::{Result, TrackerError};
use crate::types::{current_timestamp_ms, MotionSample, PositionFix};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Meters per degree of latitude
const METERS_PER_DEG: f64 = 111_320.0;

#[derive(Debug, Clone, Copy)]
struct DriveState {
    latitude: f64,
    longitude: f64,
    heading_rad: f64,
    elapsed_s: f64,
}

impl DriveState {
    fn speed_ms(&self) -> f64 {
        12.0 + 5.0 * (self.elapsed_s / 30.0).sin()
    }

    fn accuracy_m(&self) -> f64 {
        5.0 + 2.0 * (self.elapsed_s / 7.0).sin().abs()
    }

    /// Move along the current heading for `dt_s` seconds
    fn advance(&mut self, dt_s: f64) {
        let distance = self.speed_ms() * dt_s;
        let north = distance * self.heading_rad.cos();
        let east = distance * self.heading_rad.sin();
        self.latitude += north / METERS_PER_DEG;
        self.longitude += east / (METERS_PER_DEG * self.latitude.to_radians().cos());
        self.heading_rad += 0.02 * dt_s;
        self.elapsed_s += dt_s;
    }

    fn fix(&self, timestamp_ms: i64) -> PositionFix {
        PositionFix::new(
            self.latitude,
            self.longitude,
            timestamp_ms,
            self.speed_ms(),
            Some(self.accuracy_m()),
        )
    }
}

struct SimulatedInner {
    drive: DriveState,
    next_id: SubscriptionId,
    active: Option<(SubscriptionId, JoinHandle<()>)>,
    last_known: Option<PositionFix>,
}

/// Emits fixes in real time at the requested interval.
///
/// Must be subscribed from inside a tokio runtime.
pub struct SimulatedPositionSource {
    inner: Arc<Mutex<SimulatedInner>>,
    /// Divides the request interval, for fast demos
    time_scale: f64,
}

impl SimulatedPositionSource {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimulatedInner {
                drive: DriveState {
                    latitude,
                    longitude,
                    heading_rad: 0.8,
                    elapsed_s: 0.0,
                },
                next_id: 1,
                active: None,
                last_known: None,
            })),
            time_scale: 1.0,
        }
    }

    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        if time_scale.is_finite() && time_scale > 0.0 {
            self.time_scale = time_scale;
        }
        self
    }
}

impl PositionSource for SimulatedPositionSource {
    fn has_permission(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        true
    }

    fn subscribe(
        &self,
        request: LocationRequest,
    ) -> Result<(SubscriptionId, mpsc::Receiver<SourceEvent>)> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TrackerError::ProviderUnavailable(format!("no async runtime: {}", e)))?;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire simulator lock".into()))?;
        if inner.active.is_some() {
            return Err(TrackerError::InvalidState(
                "a location subscription is already registered".to_string(),
            ));
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = mpsc::channel(100);
        let shared = self.inner.clone();
        let sim_dt_s = request.interval_ms as f64 / 1000.0;
        let period = Duration::from_secs_f64(sim_dt_s / self.time_scale);

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let fix = {
                    let Ok(mut state) = shared.lock() else {
                        break;
                    };
                    state.drive.advance(sim_dt_s);
                    let fix = state.drive.fix(current_timestamp_ms());
                    state.last_known = Some(fix);
                    fix
                };
                if tx.send(SourceEvent::Fix(fix)).await.is_err() {
                    break;
                }
            }
        });
        inner.active = Some((id, task));
        Ok((id, rx))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.active.as_ref().map(|(active, _)| *active) == Some(id) {
                if let Some((_, task)) = inner.active.take() {
                    task.abort();
                }
            }
        }
    }

    fn last_known(&self) -> Option<PositionFix> {
        self.inner.lock().ok().and_then(|inner| inner.last_known)
    }
}

/// How the simulated phone is held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionProfile {
    /// Dashboard mount: tiny vibration
    Mounted,
    /// In hand: large movement and rotation
    Handheld,
}

impl MotionProfile {
    fn amplitudes(&self) -> (f64, f64) {
        match self {
            MotionProfile::Mounted => (0.05, 0.02),
            MotionProfile::Handheld => (4.0, 9.0),
        }
    }
}

pub struct SimulatedMotionSource {
    profile: MotionProfile,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedMotionSource {
    pub fn new(profile: MotionProfile) -> Self {
        Self {
            profile,
            task: Mutex::new(None),
        }
    }
}

impl MotionSource for SimulatedMotionSource {
    fn subscribe(&self, sample_rate_hz: f64) -> Result<mpsc::Receiver<MotionSample>> {
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(TrackerError::Config(format!(
                "invalid motion sample rate {}",
                sample_rate_hz
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TrackerError::Internal(format!("no async runtime: {}", e)))?;
        let mut guard = self
            .task
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire motion task lock".into()))?;
        if let Some(old) = guard.take() {
            old.abort();
        }

        let (tx, rx) = mpsc::channel(500);
        let (accel_amp, gyro_amp) = self.profile.amplitudes();
        let period = Duration::from_secs_f64(1.0 / sample_rate_hz);

        *guard = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut n: u64 = 0;
            loop {
                ticker.tick().await;
                let t = n as f64;
                let now = current_timestamp_ms();
                // Deterministic pseudo-noise on each axis
                let accel = MotionSample::accel(
                    accel_amp * (t * 1.7).sin(),
                    accel_amp * (t * 2.3).cos(),
                    accel_amp * (t * 0.9).sin(),
                    now,
                );
                let gyro = MotionSample::gyro(
                    gyro_amp * (t * 1.1).cos(),
                    gyro_amp * (t * 2.9).sin(),
                    gyro_amp * (t * 0.7).cos(),
                    now,
                );
                if tx.send(accel).await.is_err() || tx.send(gyro).await.is_err() {
                    break;
                }
                n += 1;
            }
        }));
        Ok(rx)
    }

    fn unsubscribe(&self) {
        if let Ok(mut guard) = self.task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}
