use crate::error::{BridgeError, JResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use trip_tracker_rs::classifier::UsageSnapshot;
use trip_tracker_rs::session::{AcquisitionStatus, SessionHandle, SessionSources, TrackingSession};
use trip_tracker_rs::sources::{PushMotionSource, PushPositionSource, SharedPower, SharedUsage};
use trip_tracker_rs::store::{JsonTripStore, TripStore};
use trip_tracker_rs::types::{MotionSample, PositionFix};
use trip_tracker_rs::{AcquisitionState, RiskMetrics, TrackerConfig, TripRecord};

/// Bridge lifecycle as seen from Kotlin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeState {
    /// No session
    Idle,
    /// Session running
    Tracking,
    /// Acquisition ended on its own (permission revoked, provider lost);
    /// `stop_session` still has to be called to collect the trip
    Ended,
}

/// Status JSON returned by `getSessionState`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub state: BridgeState,
    pub trip_id: Option<String>,
    pub started_at: Option<String>,
    pub acquisition: Option<AcquisitionStatus>,
}

struct ActiveSession {
    handle: SessionHandle,
    started_at: String,
}

/// Owns the tokio runtime, the push sources fed by the Android service and
/// the running session.
pub struct Bridge {
    runtime: Runtime,
    config: TrackerConfig,
    position: Arc<PushPositionSource>,
    motion: Arc<PushMotionSource>,
    power: Arc<SharedPower>,
    usage: Arc<SharedUsage>,
    store: Arc<JsonTripStore>,
    session: Option<ActiveSession>,
}

impl Bridge {
    pub fn new(storage_dir: impl AsRef<Path>, config: TrackerConfig) -> JResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("trip-tracker")
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Internal(format!("Failed to build runtime: {}", e)))?;
        let store = Arc::new(JsonTripStore::open(storage_dir)?);

        Ok(Self {
            runtime,
            config,
            position: Arc::new(PushPositionSource::new()),
            motion: Arc::new(PushMotionSource::new()),
            power: Arc::new(SharedPower::default()),
            usage: Arc::new(SharedUsage::new()),
            store,
            session: None,
        })
    }

    /// Config from the JSON passed by Kotlin; empty means defaults
    pub fn parse_config(json: &str) -> JResult<TrackerConfig> {
        if json.trim().is_empty() {
            return Ok(TrackerConfig::default());
        }
        Ok(TrackerConfig::from_json_str(json)?)
    }

    pub fn state(&self) -> BridgeState {
        match &self.session {
            None => BridgeState::Idle,
            Some(active) if active.handle.is_finished() => BridgeState::Ended,
            Some(_) => BridgeState::Tracking,
        }
    }

    /// Start a trip; returns its id
    pub fn start_session(&mut self) -> JResult<String> {
        if self.session.is_some() {
            return Err(trip_tracker_rs::TrackerError::AlreadyRunning.into());
        }
        self.usage.reset();

        let sources = SessionSources {
            position: self.position.clone(),
            motion: self.motion.clone(),
            power: self.power.clone(),
            usage: self.usage.clone(),
        };
        let handle = {
            let _guard = self.runtime.enter();
            TrackingSession::start(self.config.clone(), sources, self.store.clone())?
        };
        let trip_id = handle.trip_id().to_string();
        log::info!("Bridge session {} started", trip_id);

        self.session = Some(ActiveSession {
            handle,
            started_at: Utc::now().to_rfc3339(),
        });
        Ok(trip_id)
    }

    /// Stop the running trip and return the saved record
    pub fn stop_session(&mut self) -> JResult<TripRecord> {
        let active = self.session.take().ok_or(BridgeError::NoSession)?;
        let record = self.runtime.block_on(active.handle.stop())?;
        log::info!(
            "Bridge session {} stopped: {:.2} km, {} fixes",
            record.id,
            record.distance_km(),
            record.fix_count
        );
        Ok(record)
    }

    /// Returns false when nothing is subscribed (fix dropped)
    pub fn push_location(&self, fix: PositionFix) -> bool {
        self.position.push_fix(fix)
    }

    pub fn push_motion(&self, sample: MotionSample) -> bool {
        self.motion.push(sample)
    }

    pub fn set_battery(&self, percent: i32, power_save: bool) -> JResult<()> {
        if !(0..=100).contains(&percent) {
            return Err(BridgeError::InvalidParameters(format!(
                "battery percent {} out of range",
                percent
            )));
        }
        self.power.set_battery_percent(percent as u8);
        self.power.set_power_save(power_save);
        Ok(())
    }

    /// Usage totals accumulated by the Android service since session start
    pub fn update_usage(&self, screen_on_ms: i64, touch_events: i32, app_launches: i32) -> JResult<()> {
        if screen_on_ms < 0 || touch_events < 0 || app_launches < 0 {
            return Err(BridgeError::InvalidParameters(
                "usage counters must be non-negative".to_string(),
            ));
        }
        self.usage.set(UsageSnapshot::new(
            Duration::from_millis(screen_on_ms as u64),
            touch_events as u32,
            app_launches as u32,
        ));
        Ok(())
    }

    /// Permission state from the activity. Revoking while subscribed ends
    /// the running session.
    pub fn set_location_permission(&self, granted: bool) {
        if granted {
            self.position.set_permission(true);
        } else if self.position.revoke_permission("location permission revoked") {
            log::warn!("Location permission revoked during session");
        }
    }

    /// Provider enabled/disabled broadcast. A running session downgrades its
    /// mode; starts fail until the provider is enabled again.
    pub fn set_provider_available(&self, available: bool) {
        self.position.set_available(available);
        if !available && self.position.report_unavailable("location provider disabled") {
            log::warn!("Location provider disabled during session");
        }
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            state: self.state(),
            trip_id: self.session.as_ref().map(|s| s.handle.trip_id().to_string()),
            started_at: self.session.as_ref().map(|s| s.started_at.clone()),
            acquisition: self.session.as_ref().map(|s| s.handle.status()),
        }
    }

    pub fn acquisition_state(&self) -> AcquisitionState {
        self.session
            .as_ref()
            .map(|s| s.handle.status().state)
            .unwrap_or(AcquisitionState::Idle)
    }

    pub fn status_json(&self) -> JResult<String> {
        to_json(&self.status())
    }

    pub fn trip_snapshot_json(&self) -> JResult<String> {
        let active = self.session.as_ref().ok_or(BridgeError::NoSession)?;
        to_json(&active.handle.snapshot())
    }

    /// Latest verdict, `null` before the first classification
    pub fn role_verdict_json(&self) -> JResult<String> {
        let active = self.session.as_ref().ok_or(BridgeError::NoSession)?;
        to_json(&active.handle.verdict())
    }

    pub fn list_trips_json(&self) -> JResult<String> {
        to_json(&self.store.list()?)
    }

    /// Role-weighted risk metrics of a saved trip
    pub fn trip_risk_json(&self, id: &str) -> JResult<String> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| BridgeError::InvalidParameters(format!("unknown trip {}", id)))?;
        to_json(&RiskMetrics::for_trip(&record))
    }

    pub fn delete_trip(&self, id: &str) -> JResult<bool> {
        Ok(self.store.delete(id)?)
    }
}

pub fn to_json<T: Serialize>(value: &T) -> JResult<String> {
    serde_json::to_string(value)
        .map_err(|e| BridgeError::Internal(format!("Failed to serialize: {}", e)))
}
