//! Platform collaborators consumed by the tracking core.
//!
//! The Android service (or a simulator) implements these traits; the core
//! never talks to platform APIs directly.

pub mod push;
pub mod simulated;

pub use push::{PushMotionSource, PushPositionSource, SharedPower, SharedUsage};
pub use simulated::{MotionProfile, SimulatedMotionSource, SimulatedPositionSource};

use crate::accuracy::LocationRequest;
use crate::classifier::UsageSnapshot;
use crate::error::Result;
use crate::types::{MotionSample, PositionFix};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

pub type SubscriptionId = u64;

/// Events delivered on a position subscription
#[derive(Clone, Debug, PartialEq)]
pub enum SourceEvent {
    Fix(PositionFix),
    /// Provider temporarily unavailable (GPS off, no signal)
    ProviderUnavailable(String),
    /// Location permission revoked while subscribed
    SecurityRevoked(String),
}

pub trait PositionSource: Send + Sync {
    fn has_permission(&self) -> bool;

    fn is_available(&self) -> bool;

    /// Register for updates. Permission and availability failures are
    /// reported as typed errors.
    fn subscribe(
        &self,
        request: LocationRequest,
    ) -> Result<(SubscriptionId, mpsc::Receiver<SourceEvent>)>;

    /// Unregister synchronously; no events are produced for `id` afterwards
    fn unsubscribe(&self, id: SubscriptionId);

    fn last_known(&self) -> Option<PositionFix>;
}

pub trait MotionSource: Send + Sync {
    /// Start delivering linear acceleration and rotation rate samples
    fn subscribe(&self, sample_rate_hz: f64) -> Result<mpsc::Receiver<MotionSample>>;

    fn unsubscribe(&self);
}

pub trait PowerSource: Send + Sync {
    fn battery_percent(&self) -> u8;

    fn is_power_save(&self) -> bool;
}

/// Externally maintained usage counters (screen-on time, touches, launches)
pub trait UsageSource: Send + Sync {
    fn snapshot(&self) -> UsageSnapshot;
}

/// Live registration with a [`PositionSource`].
///
/// Teardown is explicit: [`Subscription::cancel`] unregisters upstream
/// before returning. Dropping an uncancelled handle cancels it as a last
/// resort and logs a warning.
pub struct Subscription {
    id: SubscriptionId,
    request: LocationRequest,
    events: mpsc::Receiver<SourceEvent>,
    source: Arc<dyn PositionSource>,
    cancelled: bool,
}

impl Subscription {
    pub fn open(source: Arc<dyn PositionSource>, request: LocationRequest) -> Result<Self> {
        let (id, events) = source.subscribe(request)?;
        log::debug!(
            "Subscribed #{} ({}, every {} ms, min {:.0} m)",
            id,
            request.mode,
            request.interval_ms,
            request.min_distance_m
        );
        Ok(Self {
            id,
            request,
            events,
            source,
            cancelled: false,
        })
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn request(&self) -> &LocationRequest {
        &self.request
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled
    }

    /// Wait for the next event; `None` once the source closed the stream
    pub async fn next_event(&mut self) -> Option<SourceEvent> {
        self.events.recv().await
    }

    /// Unregister upstream and return the events that were already queued
    pub fn cancel(&mut self) -> Vec<SourceEvent> {
        if !self.cancelled {
            self.source.unsubscribe(self.id);
            self.cancelled = true;
            log::debug!("Unsubscribed #{}", self.id);
        }
        self.events.close();

        let mut pending = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => pending.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        pending
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.cancelled {
            log::warn!("Subscription #{} dropped without cancel, unregistering", self.id);
            self.source.unsubscribe(self.id);
            self.cancelled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuracy::{AcquisitionMode, ModeSelector};

    fn request() -> LocationRequest {
        ModeSelector::default().request_for(AcquisitionMode::Balanced)
    }

    #[tokio::test]
    async fn test_cancel_unregisters_and_drains() {
        let source = Arc::new(PushPositionSource::new());
        let mut sub = Subscription::open(source.clone(), request()).unwrap();
        assert_eq!(source.active_subscriptions(), 1);

        let fix = PositionFix::new(40.0, -73.0, 0, 1.0, Some(5.0));
        assert!(source.push_fix(fix));
        assert!(source.push_fix(fix));

        let pending = sub.cancel();
        assert_eq!(pending.len(), 2);
        assert_eq!(source.active_subscriptions(), 0);
        assert!(!sub.is_active());

        // Nothing reaches a cancelled subscription
        assert!(!source.push_fix(fix));
        assert!(sub.cancel().is_empty());
        assert_eq!(source.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_without_cancel_unregisters() {
        let source = Arc::new(PushPositionSource::new());
        {
            let _sub = Subscription::open(source.clone(), request()).unwrap();
            assert_eq!(source.active_subscriptions(), 1);
        }
        assert_eq!(source.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_next_event_receives_pushed_fix() {
        let source = Arc::new(PushPositionSource::new());
        let mut sub = Subscription::open(source.clone(), request()).unwrap();
        let fix = PositionFix::new(40.0, -73.0, 0, 1.0, Some(5.0));
        source.push_fix(fix);
        assert_eq!(sub.next_event().await, Some(SourceEvent::Fix(fix)));
        sub.cancel();
    }
}
