/// Host-driven collaborators: the platform layer pushes fixes, motion
/// samples, battery level and usage counters in as they arrive.
use super::{MotionSource, PositionSource, PowerSource, SourceEvent, SubscriptionId, UsageSource};
use crate::accuracy::LocationRequest;
use crate::classifier::UsageSnapshot;
use crate::error::{Result, TrackerError};
use crate::types::{MotionSample, PositionFix};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const POSITION_CHANNEL_CAPACITY: usize = 100;
const MOTION_CHANNEL_CAPACITY: usize = 500;

struct ActiveSubscription {
    id: SubscriptionId,
    request: LocationRequest,
    tx: mpsc::Sender<SourceEvent>,
}

struct PushState {
    permission: bool,
    available: bool,
    last_known: Option<PositionFix>,
    active: Option<ActiveSubscription>,
    next_id: SubscriptionId,
    subscribe_count: u32,
    unsubscribe_count: u32,
    failing_subscribes: u32,
}

/// Position source fed by the platform location callback
pub struct PushPositionSource {
    state: Mutex<PushState>,
}

impl PushPositionSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PushState {
                permission: true,
                available: true,
                last_known: None,
                active: None,
                next_id: 1,
                subscribe_count: 0,
                unsubscribe_count: 0,
                failing_subscribes: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PushState> {
        // Nothing in this module panics while holding the lock
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_permission(&self, granted: bool) {
        self.lock().permission = granted;
    }

    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Make the next `count` subscribe calls fail with `ProviderUnavailable`
    pub fn fail_next_subscribes(&self, count: u32) {
        self.lock().failing_subscribes = count;
    }

    /// Deliver a raw fix; returns false when nobody is subscribed or the
    /// subscriber is not keeping up
    pub fn push_fix(&self, fix: PositionFix) -> bool {
        let mut state = self.lock();
        state.last_known = Some(fix);
        Self::deliver(&state, SourceEvent::Fix(fix))
    }

    pub fn report_unavailable(&self, reason: &str) -> bool {
        let state = self.lock();
        Self::deliver(&state, SourceEvent::ProviderUnavailable(reason.to_string()))
    }

    /// Permission revoked mid-session
    pub fn revoke_permission(&self, reason: &str) -> bool {
        let mut state = self.lock();
        state.permission = false;
        Self::deliver(&state, SourceEvent::SecurityRevoked(reason.to_string()))
    }

    fn deliver(state: &PushState, event: SourceEvent) -> bool {
        let Some(active) = state.active.as_ref() else {
            return false;
        };
        match active.tx.try_send(event) {
            Ok(_) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("Position channel full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn active_request(&self) -> Option<LocationRequest> {
        self.lock().active.as_ref().map(|a| a.request)
    }

    pub fn active_subscriptions(&self) -> usize {
        usize::from(self.lock().active.is_some())
    }

    pub fn subscribe_count(&self) -> u32 {
        self.lock().subscribe_count
    }

    pub fn unsubscribe_count(&self) -> u32 {
        self.lock().unsubscribe_count
    }
}

impl Default for PushPositionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionSource for PushPositionSource {
    fn has_permission(&self) -> bool {
        self.lock().permission
    }

    fn is_available(&self) -> bool {
        self.lock().available
    }

    fn subscribe(
        &self,
        request: LocationRequest,
    ) -> Result<(SubscriptionId, mpsc::Receiver<SourceEvent>)> {
        let mut state = self.lock();
        state.subscribe_count += 1;

        if !state.permission {
            return Err(TrackerError::PermissionDenied);
        }
        // Registration succeeds with the provider off, as on the platform;
        // callers gate on `is_available` and outages arrive as events
        if state.failing_subscribes > 0 {
            state.failing_subscribes -= 1;
            return Err(TrackerError::ProviderUnavailable(format!(
                "provider rejected {} request",
                request.mode
            )));
        }
        if state.active.is_some() {
            return Err(TrackerError::InvalidState(
                "a location subscription is already registered".to_string(),
            ));
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::channel(POSITION_CHANNEL_CAPACITY);
        state.active = Some(ActiveSubscription { id, request, tx });
        Ok((id, rx))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.lock();
        if state.active.as_ref().map(|a| a.id) == Some(id) {
            state.active = None;
            state.unsubscribe_count += 1;
        }
    }

    fn last_known(&self) -> Option<PositionFix> {
        self.lock().last_known
    }
}

/// Motion source fed by the platform sensor listener
pub struct PushMotionSource {
    tx: Mutex<Option<mpsc::Sender<MotionSample>>>,
}

impl PushMotionSource {
    pub fn new() -> Self {
        Self { tx: Mutex::new(None) }
    }

    pub fn push(&self, sample: MotionSample) -> bool {
        let guard = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.try_send(sample).is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.tx
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

impl Default for PushMotionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionSource for PushMotionSource {
    fn subscribe(&self, _sample_rate_hz: f64) -> Result<mpsc::Receiver<MotionSample>> {
        let (tx, rx) = mpsc::channel(MOTION_CHANNEL_CAPACITY);
        let mut guard = self
            .tx
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire motion source lock".into()))?;
        *guard = Some(tx);
        Ok(rx)
    }

    fn unsubscribe(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            *guard = None;
        }
    }
}

/// Battery state written by the platform battery receiver
pub struct SharedPower {
    battery_percent: AtomicU8,
    power_save: AtomicBool,
}

impl SharedPower {
    pub fn new(battery_percent: u8, power_save: bool) -> Self {
        Self {
            battery_percent: AtomicU8::new(battery_percent.min(100)),
            power_save: AtomicBool::new(power_save),
        }
    }

    pub fn set_battery_percent(&self, percent: u8) {
        self.battery_percent.store(percent.min(100), Ordering::Relaxed);
    }

    pub fn set_power_save(&self, enabled: bool) {
        self.power_save.store(enabled, Ordering::Relaxed);
    }
}

impl Default for SharedPower {
    fn default() -> Self {
        Self::new(100, false)
    }
}

impl PowerSource for SharedPower {
    fn battery_percent(&self) -> u8 {
        self.battery_percent.load(Ordering::Relaxed)
    }

    fn is_power_save(&self) -> bool {
        self.power_save.load(Ordering::Relaxed)
    }
}

/// Usage counters maintained by the platform (screen, touch, app events)
#[derive(Default)]
pub struct SharedUsage {
    counters: Mutex<UsageSnapshot>,
}

impl SharedUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, snapshot: UsageSnapshot) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters = snapshot;
        }
    }

    pub fn add_screen_on(&self, duration: Duration) {
        if let Ok(mut counters) = self.counters.lock() {
            counters.screen_on += duration;
        }
    }

    pub fn record_touch(&self) {
        if let Ok(mut counters) = self.counters.lock() {
            counters.touch_events += 1;
        }
    }

    pub fn record_app_launch(&self) {
        if let Ok(mut counters) = self.counters.lock() {
            counters.app_launches += 1;
        }
    }

    pub fn reset(&self) {
        self.set(UsageSnapshot::default());
    }
}

impl UsageSource for SharedUsage {
    fn snapshot(&self) -> UsageSnapshot {
        self.counters
            .lock()
            .map(|counters| *counters)
            .unwrap_or_default()
    }
}
