/// Async session driver.
///
/// Three tokio tasks per session:
/// - acquisition: owns the `AcquisitionLoop` and the `TripAccumulator`
/// - sensor ingest: the only writer of the shared `SignalWindow`
/// - classification: summarizes the window on a fixed cadence
///
/// Readers get snapshots through `watch` channels and lifecycle events
/// through a bounded `mpsc` channel.
use crate::accuracy::AcquisitionMode;
use crate::acquisition::{AcquisitionLoop, AcquisitionState, ModeChange};
use crate::classifier::{RoleClassifier, RoleVerdict, SignalWindow};
use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::filters::FilterStats;
use crate::sources::{MotionSource, PositionSource, PowerSource, UsageSource};
use crate::store::TripStore;
use crate::trip::{TripAccumulator, TripRecord, TripSnapshot, TripStatus};
use crate::types::{current_timestamp_ms, AcceptedFix, MotionSample};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

/// Platform collaborators for one session
#[derive(Clone)]
pub struct SessionSources {
    pub position: Arc<dyn PositionSource>,
    pub motion: Arc<dyn MotionSource>,
    pub power: Arc<dyn PowerSource>,
    pub usage: Arc<dyn UsageSource>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started {
        trip_id: String,
        mode: AcquisitionMode,
    },
    ModeChanged(ModeChange),
    Fix(AcceptedFix),
    Stopped {
        trip_id: String,
        status: TripStatus,
    },
    Error(TrackerError),
}

/// Acquisition status published for UI polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionStatus {
    pub state: AcquisitionState,
    pub mode: Option<AcquisitionMode>,
    pub filter: FilterStats,
}

fn emit(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => log::debug!("Event channel full, dropping {:?}", event),
        // Nobody is listening
        Err(TrySendError::Closed(_)) => {}
    }
}

pub struct TrackingSession;

impl TrackingSession {
    /// Start acquisition and the sensor/classification tasks.
    ///
    /// Permission and provider failures are returned here, before any task
    /// is spawned. Must be called from inside a tokio runtime.
    pub fn start(
        config: TrackerConfig,
        sources: SessionSources,
        store: Arc<dyn TripStore>,
    ) -> Result<SessionHandle> {
        config.validate()?;
        let start_ms = current_timestamp_ms();

        let mut acquisition =
            AcquisitionLoop::new(&config, sources.position.clone(), sources.power.clone());
        let mode = acquisition.start(start_ms)?;

        let motion_rx = match sources.motion.subscribe(config.session.motion_sample_rate_hz) {
            Ok(rx) => rx,
            Err(e) => {
                acquisition.stop();
                return Err(e);
            }
        };

        let trip = TripAccumulator::new(start_ms);
        let trip_id = trip.id().to_string();
        log::info!("Session {} started in {} mode", trip_id, mode);

        let (event_tx, event_rx) = mpsc::channel(config.session.event_channel_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let (snapshot_tx, snapshot_rx) = watch::channel(trip.snapshot(start_ms));
        let (verdict_tx, verdict_rx) = watch::channel::<Option<RoleVerdict>>(None);
        let (status_tx, status_rx) = watch::channel(AcquisitionStatus {
            state: acquisition.state(),
            mode: acquisition.mode(),
            filter: acquisition.stats().clone(),
        });
        emit(
            &event_tx,
            SessionEvent::Started {
                trip_id: trip_id.clone(),
                mode,
            },
        );

        let window = Arc::new(Mutex::new(SignalWindow::new(config.classifier.window_size)));

        let acquisition_task = tokio::spawn(acquisition_loop(AcquisitionTask {
            acquisition,
            trip,
            store,
            events: event_tx,
            snapshots: snapshot_tx,
            status: status_tx,
            verdicts: verdict_rx.clone(),
            shutdown: shutdown_rx.clone(),
            shutdown_all: shutdown_tx.clone(),
            snapshot_period: Duration::from_millis(config.session.snapshot_interval_ms),
        }));

        let sensor_task = tokio::spawn(sensor_loop(
            motion_rx,
            sources.motion.clone(),
            window.clone(),
            shutdown_rx.clone(),
        ));

        let classification_task = tokio::spawn(classification_loop(
            RoleClassifier::new(config.classifier.clone()),
            window,
            sources.usage.clone(),
            verdict_tx,
            shutdown_rx,
            Duration::from_millis(config.session.classification_interval_ms),
        ));

        Ok(SessionHandle {
            trip_id,
            shutdown: shutdown_tx,
            acquisition: Some(acquisition_task),
            sensors: Some(sensor_task),
            classification: Some(classification_task),
            events: Some(event_rx),
            snapshots: snapshot_rx,
            verdicts: verdict_rx,
            status: status_rx,
        })
    }
}

struct AcquisitionTask {
    acquisition: AcquisitionLoop,
    trip: TripAccumulator,
    store: Arc<dyn TripStore>,
    events: mpsc::Sender<SessionEvent>,
    snapshots: watch::Sender<TripSnapshot>,
    status: watch::Sender<AcquisitionStatus>,
    verdicts: watch::Receiver<Option<RoleVerdict>>,
    shutdown: watch::Receiver<bool>,
    shutdown_all: Arc<watch::Sender<bool>>,
    snapshot_period: Duration,
}

impl AcquisitionTask {
    fn publish_status(&self) {
        self.status.send_replace(AcquisitionStatus {
            state: self.acquisition.state(),
            mode: self.acquisition.mode(),
            filter: self.acquisition.stats().clone(),
        });
    }

    fn record_fix(&mut self, accepted: AcceptedFix) {
        if let Err(e) = self.trip.on_fix(&accepted.fix) {
            log::warn!("Dropping fix for trip {}: {}", self.trip.id(), e);
            return;
        }
        emit(&self.events, SessionEvent::Fix(accepted));
    }
}

async fn acquisition_loop(mut task: AcquisitionTask) -> Result<TripRecord> {
    let mut ticker = interval(task.snapshot_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status = TripStatus::Completed;

    loop {
        tokio::select! {
            changed = task.shutdown.changed() => {
                if changed.is_err() || *task.shutdown.borrow() {
                    break;
                }
            }
            event = task.acquisition.next_event() => {
                let Some(event) = event else {
                    let err = TrackerError::ProviderUnavailable("position stream closed".into());
                    log::error!("Session {} lost its position stream", task.trip.id());
                    emit(&task.events, SessionEvent::Error(err));
                    status = TripStatus::Failed;
                    break;
                };
                let now_ms = current_timestamp_ms();
                match task.acquisition.handle_event(event, now_ms) {
                    Ok(output) => {
                        if let Some(change) = output.mode_change {
                            emit(&task.events, SessionEvent::ModeChanged(change));
                        }
                        if let Some(accepted) = output.accepted {
                            task.record_fix(accepted);
                            task.snapshots.send_replace(task.trip.snapshot(now_ms));
                        }
                        task.publish_status();
                    }
                    Err(e) => {
                        emit(&task.events, SessionEvent::Error(e));
                        status = TripStatus::Failed;
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                task.snapshots.send_replace(task.trip.snapshot(current_timestamp_ms()));
            }
        }
    }

    // Unsubscribe first; fixes already delivered still count
    for accepted in task.acquisition.stop() {
        task.record_fix(accepted);
    }
    task.publish_status();

    // Stop the other tasks when acquisition ended on its own
    task.shutdown_all.send_replace(true);

    let latest_verdict = task.verdicts.borrow().clone();
    if let Some(verdict) = latest_verdict {
        task.trip.record_verdict(verdict);
    }
    let end_ms = current_timestamp_ms();
    let record = task.trip.finalize(end_ms, status);
    task.snapshots.send_replace(task.trip.snapshot(end_ms));

    let saved = task.store.save(&record);
    emit(
        &task.events,
        SessionEvent::Stopped {
            trip_id: record.id.clone(),
            status: record.status,
        },
    );
    if let Err(e) = saved {
        log::error!("Failed to persist trip {}: {}", record.id, e);
        return Err(e);
    }
    Ok(record)
}

async fn sensor_loop(
    mut samples: mpsc::Receiver<MotionSample>,
    motion: Arc<dyn MotionSource>,
    window: Arc<Mutex<SignalWindow>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ingested = 0u64;
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            sample = samples.recv() => {
                let Some(sample) = sample else {
                    log::warn!("Motion stream closed");
                    break;
                };
                match window.lock() {
                    Ok(mut w) => w.push(&sample),
                    Err(_) => {
                        log::error!("Signal window lock poisoned");
                        break;
                    }
                }
                ingested += 1;
            }
        }
    }

    motion.unsubscribe();
    if let Ok(mut w) = window.lock() {
        w.clear();
    }
    log::debug!("Sensor ingest stopped after {} samples", ingested);
}

async fn classification_loop(
    classifier: RoleClassifier,
    window: Arc<Mutex<SignalWindow>>,
    usage: Arc<dyn UsageSource>,
    verdicts: watch::Sender<Option<RoleVerdict>>,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                // Hold the lock only long enough to summarize
                let summary = match window.lock() {
                    Ok(w) => w.summary(),
                    Err(_) => break,
                };
                // The window is cleared on shutdown; keep the last real verdict
                if *shutdown.borrow() {
                    break;
                }
                let verdict = classifier.classify(&summary, &usage.snapshot(), current_timestamp_ms());
                log::debug!("Role verdict: {} ({:.2})", verdict.role, verdict.confidence);
                verdicts.send_replace(Some(verdict));
            }
        }
    }
}

/// Handle to a running session.
///
/// `stop` is the normal teardown; dropping the handle only signals the
/// tasks to wind down and the trip is still finalized and saved.
pub struct SessionHandle {
    trip_id: String,
    shutdown: Arc<watch::Sender<bool>>,
    acquisition: Option<JoinHandle<Result<TripRecord>>>,
    sensors: Option<JoinHandle<()>>,
    classification: Option<JoinHandle<()>>,
    events: Option<mpsc::Receiver<SessionEvent>>,
    snapshots: watch::Receiver<TripSnapshot>,
    verdicts: watch::Receiver<Option<RoleVerdict>>,
    status: watch::Receiver<AcquisitionStatus>,
}

impl SessionHandle {
    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }

    /// Event receiver; can be taken once
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    pub fn snapshot(&self) -> TripSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn verdict(&self) -> Option<RoleVerdict> {
        self.verdicts.borrow().clone()
    }

    pub fn status(&self) -> AcquisitionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<TripSnapshot> {
        self.snapshots.clone()
    }

    pub fn watch_verdicts(&self) -> watch::Receiver<Option<RoleVerdict>> {
        self.verdicts.clone()
    }

    /// True once acquisition ended, either stopped or failed
    pub fn is_finished(&self) -> bool {
        self.acquisition
            .as_ref()
            .map(|task| task.is_finished())
            .unwrap_or(true)
    }

    /// Stop all tasks and return the finalized, persisted trip
    pub async fn stop(mut self) -> Result<TripRecord> {
        log::info!("Stopping session {}", self.trip_id);
        self.shutdown.send_replace(true);

        let acquisition = self.acquisition.take().ok_or(TrackerError::NotRunning)?;
        let record = acquisition
            .await
            .map_err(|e| TrackerError::Internal(format!("acquisition task failed: {}", e)))?;

        for task in [self.sensors.take(), self.classification.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = task.await {
                log::warn!("Session task ended abnormally: {}", e);
            }
        }
        record
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::ModeChangeReason;
    use crate::classifier::{UsageSnapshot, UserRole};
    use crate::sources::{PushMotionSource, PushPositionSource, SharedPower, SharedUsage};
    use crate::store::MemoryTripStore;
    use crate::types::PositionFix;
    use tokio::time::timeout;

    struct Harness {
        position: Arc<PushPositionSource>,
        motion: Arc<PushMotionSource>,
        power: Arc<SharedPower>,
        usage: Arc<SharedUsage>,
        store: Arc<MemoryTripStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                position: Arc::new(PushPositionSource::new()),
                motion: Arc::new(PushMotionSource::new()),
                power: Arc::new(SharedPower::new(100, false)),
                usage: Arc::new(SharedUsage::new()),
                store: Arc::new(MemoryTripStore::new()),
            }
        }

        fn start(&self, config: TrackerConfig) -> Result<SessionHandle> {
            TrackingSession::start(
                config,
                SessionSources {
                    position: self.position.clone(),
                    motion: self.motion.clone(),
                    power: self.power.clone(),
                    usage: self.usage.clone(),
                },
                self.store.clone(),
            )
        }
    }

    /// ~111 m steps north, 10 s apart, starting at the current wall clock
    fn fix_at(base_ms: i64, step: i64, speed_ms: f64) -> PositionFix {
        PositionFix::new(
            40.0 + step as f64 * 0.001,
            -73.0,
            base_ms + step * 10_000,
            speed_ms,
            Some(5.0),
        )
    }

    async fn next_fix_event(events: &mut mpsc::Receiver<SessionEvent>) -> AcceptedFix {
        loop {
            let event = timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("timed out waiting for a fix")
                .expect("event channel closed");
            if let SessionEvent::Fix(accepted) = event {
                return accepted;
            }
        }
    }

    #[tokio::test]
    async fn test_session_records_and_persists_trip() {
        let h = Harness::new();
        let mut session = h.start(TrackerConfig::default()).unwrap();
        let mut events = session.take_events().unwrap();
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Started { mode: AcquisitionMode::HighAccuracy, .. })
        ));

        let base = current_timestamp_ms();
        for step in 0..3 {
            assert!(h.position.push_fix(fix_at(base, step, 1.0)));
            next_fix_event(&mut events).await;
        }
        assert_eq!(session.snapshot().fix_count, 3);
        assert_eq!(session.status().state, AcquisitionState::Active);

        let record = session.stop().await.unwrap();
        assert_eq!(record.fix_count, 3);
        assert_eq!(record.status, TripStatus::Completed);
        assert!(record.distance_m > 200.0 && record.distance_m < 250.0);
        assert_eq!(h.position.active_subscriptions(), 0);
        assert!(!h.motion.is_subscribed());
        assert_eq!(h.store.count().unwrap(), 1);
        assert_eq!(h.store.get(&record.id).unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_start_without_permission_fails_fast() {
        let h = Harness::new();
        h.position.set_permission(false);
        assert!(matches!(
            h.start(TrackerConfig::default()),
            Err(TrackerError::PermissionDenied)
        ));
        assert!(!h.motion.is_subscribed());
        assert_eq!(h.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fast_fix_switches_mode() {
        let h = Harness::new();
        let mut session = h.start(TrackerConfig::default()).unwrap();
        let mut events = session.take_events().unwrap();

        h.position.push_fix(fix_at(current_timestamp_ms(), 0, 25.0));
        let change = loop {
            match timeout(Duration::from_secs(2), events.recv()).await.unwrap() {
                Some(SessionEvent::ModeChanged(change)) => break change,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        };
        assert_eq!(change.to, AcquisitionMode::LowPower);
        assert_eq!(change.reason, ModeChangeReason::Selection);
        assert_eq!(h.position.active_subscriptions(), 1);

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_revoked_permission_fails_trip() {
        let h = Harness::new();
        let mut session = h.start(TrackerConfig::default()).unwrap();
        let mut events = session.take_events().unwrap();

        let base = current_timestamp_ms();
        h.position.push_fix(fix_at(base, 0, 1.0));
        next_fix_event(&mut events).await;
        h.position.revoke_permission("user revoked location access");

        let mut saw_error = false;
        while let Ok(Some(event)) = timeout(Duration::from_secs(2), events.recv()).await {
            match event {
                SessionEvent::Error(e) => {
                    assert!(e.is_fatal());
                    saw_error = true;
                }
                SessionEvent::Stopped { status, .. } => {
                    assert_eq!(status, TripStatus::Failed);
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_error);
        assert!(session.is_finished() || session.status().state == AcquisitionState::Idle);

        let record = session.stop().await.unwrap();
        assert_eq!(record.status, TripStatus::Failed);
        assert_eq!(record.fix_count, 1);
        assert_eq!(h.position.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_classification_runs_on_cadence() {
        let h = Harness::new();
        let mut config = TrackerConfig::default();
        config.session.classification_interval_ms = 20;
        let session = h.start(config).unwrap();
        h.usage.set(UsageSnapshot::default());

        for i in 0..30 {
            let jitter = if i % 2 == 0 { 0.01 } else { -0.01 };
            assert!(h.motion.push(MotionSample::accel(jitter, 0.0, 0.0, i)));
            assert!(h.motion.push(MotionSample::gyro(0.0, jitter, 0.0, i)));
        }

        let mut verdicts = session.watch_verdicts();
        let verdict = timeout(Duration::from_secs(2), async {
            loop {
                if verdicts.changed().await.is_err() {
                    return None;
                }
                let current = verdicts.borrow().clone();
                if let Some(v) = current {
                    if v.role != UserRole::Unknown {
                        return Some(v);
                    }
                }
            }
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(verdict.role, UserRole::Driver);
        assert!(verdict.confidence >= 0.5 && verdict.confidence <= 0.9);
        assert_eq!(session.verdict().map(|v| v.role), Some(UserRole::Driver));

        // The persisted trip carries the role
        let record = session.stop().await.unwrap();
        assert_eq!(record.user_role(), UserRole::Driver);
        assert_eq!(
            h.store.get(&record.id).unwrap().and_then(|r| r.role).map(|v| v.role),
            Some(UserRole::Driver)
        );
        let metrics = crate::risk::RiskMetrics::for_trip(&record);
        assert_eq!(metrics.role_adjustment, 1.0);
    }

    #[tokio::test]
    async fn test_trip_without_verdict_has_no_role() {
        let h = Harness::new();
        let session = h.start(TrackerConfig::default()).unwrap();
        let record = session.stop().await.unwrap();
        assert!(record.role.is_none());
        assert_eq!(record.user_role(), UserRole::Unknown);
    }
}
