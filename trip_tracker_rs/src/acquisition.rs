/// Acquisition loop: owns the position subscription and the filter state.
///
/// Every accepted fix re-runs the mode selector; a different mode replaces
/// the subscription (old one cancelled first, so at most one is ever live).
/// Provider outages downgrade one step and cap the mode for a while so the
/// selector cannot climb straight back into the failing configuration.
use crate::accuracy::{AcquisitionMode, ModeSelector, SelectionInputs};
use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::filters::{FilterDecision, FilterState, FilterStats, QualityFilter};
use crate::sources::{PositionSource, PowerSource, SourceEvent, Subscription};
use crate::types::{AcceptedFix, PositionFix};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionState {
    Idle,
    Starting,
    Active,
    Stopping,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeChangeReason {
    /// Selector picked a different mode after an accepted fix
    Selection,
    /// Provider reported an outage
    ProviderUnavailable,
    /// Subscribe failed and the next lower mode was used instead
    SubscribeFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChange {
    pub from: AcquisitionMode,
    pub to: AcquisitionMode,
    pub reason: ModeChangeReason,
}

/// Result of handling one source event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopOutput {
    pub accepted: Option<AcceptedFix>,
    pub mode_change: Option<ModeChange>,
}

#[derive(Debug, Clone, Copy)]
struct RecoveryCeiling {
    mode: AcquisitionMode,
    until_ms: i64,
}

pub struct AcquisitionLoop {
    source: Arc<dyn PositionSource>,
    power: Arc<dyn PowerSource>,
    selector: ModeSelector,
    filter: QualityFilter,
    filter_state: FilterState,
    stats: FilterStats,
    subscription: Option<Subscription>,
    /// Events drained from a replaced subscription, served before new ones
    backlog: VecDeque<SourceEvent>,
    state: AcquisitionState,
    mode: Option<AcquisitionMode>,
    trip_start_ms: i64,
    ceiling: Option<RecoveryCeiling>,
}

impl AcquisitionLoop {
    pub fn new(
        config: &TrackerConfig,
        source: Arc<dyn PositionSource>,
        power: Arc<dyn PowerSource>,
    ) -> Self {
        Self {
            source,
            power,
            selector: ModeSelector::new(config.selector.clone()),
            filter: QualityFilter::new(config.filter.clone()),
            filter_state: FilterState::new(config.filter.history_capacity),
            stats: FilterStats::default(),
            subscription: None,
            backlog: VecDeque::new(),
            state: AcquisitionState::Idle,
            mode: None,
            trip_start_ms: 0,
            ceiling: None,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn mode(&self) -> Option<AcquisitionMode> {
        self.mode
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    pub fn filter_state(&self) -> &FilterState {
        &self.filter_state
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Check permission and availability, pick the initial mode, subscribe
    pub fn start(&mut self, now_ms: i64) -> Result<AcquisitionMode> {
        match self.state {
            AcquisitionState::Idle | AcquisitionState::Error => {}
            AcquisitionState::Active => return Err(TrackerError::AlreadyRunning),
            other => {
                return Err(TrackerError::InvalidState(format!(
                    "cannot start acquisition while {:?}",
                    other
                )))
            }
        }

        self.state = AcquisitionState::Starting;
        self.filter_state.reset();
        self.stats = FilterStats::default();
        self.backlog.clear();
        self.ceiling = None;
        self.trip_start_ms = now_ms;

        if !self.source.has_permission() {
            return self.fail(TrackerError::PermissionDenied);
        }
        if !self.source.is_available() {
            return self.fail(TrackerError::ProviderUnavailable(
                "location provider disabled".to_string(),
            ));
        }

        let speed_kmh = self
            .source
            .last_known()
            .filter(PositionFix::has_valid_speed)
            .map(|fix| fix.speed_kmh())
            .unwrap_or(0.0);
        let wanted = self.selector.select_with(&SelectionInputs {
            battery_percent: self.power.battery_percent(),
            power_save: self.power.is_power_save(),
            speed_kmh,
            trip_duration_ms: 0,
            ceiling: None,
        });

        let mode = match self.subscribe_with_fallback(wanted) {
            Ok(mode) => mode,
            Err(e) => return self.fail(e),
        };
        self.mode = Some(mode);
        self.state = AcquisitionState::Active;
        log::info!("Acquisition started in {} mode", mode);
        Ok(mode)
    }

    /// Wait for the next event of the live subscription.
    ///
    /// Returns `None` when there is no subscription or the source closed it.
    pub async fn next_event(&mut self) -> Option<SourceEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        match self.subscription.as_mut() {
            Some(sub) => sub.next_event().await,
            None => None,
        }
    }

    pub fn handle_event(&mut self, event: SourceEvent, now_ms: i64) -> Result<LoopOutput> {
        if self.state != AcquisitionState::Active {
            return Err(TrackerError::NotRunning);
        }
        match event {
            SourceEvent::Fix(fix) => self.on_fix(fix, now_ms),
            SourceEvent::ProviderUnavailable(reason) => self.on_provider_unavailable(&reason, now_ms),
            SourceEvent::SecurityRevoked(reason) => {
                self.fail(TrackerError::SecurityRevoked(reason))
            }
        }
    }

    fn on_fix(&mut self, fix: PositionFix, now_ms: i64) -> Result<LoopOutput> {
        let decision = self.filter.evaluate(&fix, &self.filter_state, now_ms);
        self.stats.record(decision);
        if let FilterDecision::Reject(reason) = decision {
            log::debug!(
                "Rejected fix at ({:.6}, {:.6}): {:?}",
                fix.latitude,
                fix.longitude,
                reason
            );
            return Ok(LoopOutput::default());
        }

        let current = self.current_mode()?;
        let speed_kmh = if fix.has_valid_speed() { fix.speed_kmh() } else { 0.0 };
        let ceiling = self.active_ceiling(now_ms);
        let wanted = self.selector.select_with(&SelectionInputs {
            battery_percent: self.power.battery_percent(),
            power_save: self.power.is_power_save(),
            speed_kmh,
            trip_duration_ms: now_ms - self.trip_start_ms,
            ceiling,
        });

        // Resubscribe before committing so a failed switch discards the fix
        let mode_change = if wanted != current {
            let landed = match self.resubscribe(wanted) {
                Ok(mode) => mode,
                Err(e) => return self.fail(e),
            };
            let reason = if landed == wanted {
                ModeChangeReason::Selection
            } else {
                ModeChangeReason::SubscribeFallback
            };
            log::info!("Acquisition mode {} -> {}", current, landed);
            Some(ModeChange {
                from: current,
                to: landed,
                reason,
            })
        } else {
            None
        };

        self.filter_state.commit(fix);
        Ok(LoopOutput {
            accepted: Some(AcceptedFix {
                fix,
                quality: fix.quality(),
                mode: current,
            }),
            mode_change,
        })
    }

    fn on_provider_unavailable(&mut self, reason: &str, now_ms: i64) -> Result<LoopOutput> {
        let current = self.current_mode()?;
        let target = current.downgraded();
        log::warn!("Location provider unavailable ({}), capping at {}", reason, target);

        self.ceiling = Some(RecoveryCeiling {
            mode: target,
            until_ms: now_ms + self.selector.config().recovery_hold_ms,
        });
        if target == current {
            return Ok(LoopOutput::default());
        }

        let landed = match self.resubscribe(target) {
            Ok(mode) => mode,
            Err(e) => return self.fail(e),
        };
        Ok(LoopOutput {
            accepted: None,
            mode_change: Some(ModeChange {
                from: current,
                to: landed,
                reason: ModeChangeReason::ProviderUnavailable,
            }),
        })
    }

    /// Cancel the subscription first, then run anything it had already
    /// delivered through the filter, then clear all state
    pub fn stop(&mut self) -> Vec<AcceptedFix> {
        if self.state == AcquisitionState::Idle {
            return Vec::new();
        }
        self.state = AcquisitionState::Stopping;

        let mut pending: Vec<SourceEvent> = self.backlog.drain(..).collect();
        if let Some(mut sub) = self.subscription.take() {
            pending.extend(sub.cancel());
        }

        let mode = self.mode.unwrap_or(AcquisitionMode::Balanced);
        let mut accepted = Vec::new();
        for event in pending {
            if let SourceEvent::Fix(fix) = event {
                // Queued fixes are judged against their own timestamps
                let decision = self.filter.evaluate(&fix, &self.filter_state, fix.timestamp_ms);
                self.stats.record(decision);
                if decision.is_accept() {
                    self.filter_state.commit(fix);
                    accepted.push(AcceptedFix {
                        fix,
                        quality: fix.quality(),
                        mode,
                    });
                }
            }
        }

        self.filter_state.reset();
        self.ceiling = None;
        self.mode = None;
        self.state = AcquisitionState::Idle;
        log::info!(
            "Acquisition stopped ({} queued fixes accepted, {:.0}% overall acceptance)",
            accepted.len(),
            self.stats.acceptance_rate() * 100.0
        );
        accepted
    }

    fn current_mode(&self) -> Result<AcquisitionMode> {
        self.mode
            .ok_or_else(|| TrackerError::Internal("active acquisition without a mode".into()))
    }

    fn active_ceiling(&mut self, now_ms: i64) -> Option<AcquisitionMode> {
        match self.ceiling {
            Some(c) if now_ms < c.until_ms => Some(c.mode),
            Some(_) => {
                log::debug!("Recovery ceiling expired");
                self.ceiling = None;
                None
            }
            None => None,
        }
    }

    fn resubscribe(&mut self, mode: AcquisitionMode) -> Result<AcquisitionMode> {
        if let Some(mut old) = self.subscription.take() {
            // Outage reports belong to the request being replaced
            self.backlog.extend(
                old.cancel()
                    .into_iter()
                    .filter(|e| !matches!(e, SourceEvent::ProviderUnavailable(_))),
            );
        }
        let landed = self.subscribe_with_fallback(mode)?;
        self.mode = Some(landed);
        Ok(landed)
    }

    /// Subscribe at `mode`; a transient failure gets exactly one retry one
    /// step lower
    fn subscribe_with_fallback(&mut self, mode: AcquisitionMode) -> Result<AcquisitionMode> {
        let request = self.selector.request_for(mode);
        match Subscription::open(self.source.clone(), request) {
            Ok(sub) => {
                self.subscription = Some(sub);
                Ok(mode)
            }
            Err(e) if e.is_transient() && mode.downgraded() != mode => {
                let lower = mode.downgraded();
                log::warn!("Subscribe at {} failed ({}), retrying at {}", mode, e, lower);
                let sub = Subscription::open(self.source.clone(), self.selector.request_for(lower))?;
                self.subscription = Some(sub);
                Ok(lower)
            }
            Err(e) => Err(e),
        }
    }

    /// Tear down after a fatal error and surface it
    fn fail<T>(&mut self, err: TrackerError) -> Result<T> {
        log::error!("Acquisition failed: {}", err);
        if let Some(mut sub) = self.subscription.take() {
            sub.cancel();
        }
        self.backlog.clear();
        self.filter_state.reset();
        self.ceiling = None;
        self.mode = None;
        self.state = AcquisitionState::Error;
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{PushPositionSource, SharedPower};

    const T0: i64 = 1_700_000_000_000;

    fn setup(battery: u8) -> (AcquisitionLoop, Arc<PushPositionSource>, Arc<SharedPower>) {
        let source = Arc::new(PushPositionSource::new());
        let power = Arc::new(SharedPower::new(battery, false));
        let acq = AcquisitionLoop::new(&TrackerConfig::default(), source.clone(), power.clone());
        (acq, source, power)
    }

    /// Fix `step` * ~111 m north of the origin, `step` * 10 s after T0
    fn fix_at(step: i64, speed_ms: f64) -> PositionFix {
        PositionFix::new(
            40.0 + step as f64 * 0.001,
            -73.0,
            T0 + step * 10_000,
            speed_ms,
            Some(5.0),
        )
    }

    #[test]
    fn test_start_requires_permission() {
        let (mut acq, source, _) = setup(100);
        source.set_permission(false);
        assert_eq!(acq.start(T0), Err(TrackerError::PermissionDenied));
        assert_eq!(acq.state(), AcquisitionState::Error);
        assert_eq!(source.active_subscriptions(), 0);

        // Restart is allowed from Error
        source.set_permission(true);
        assert_eq!(acq.start(T0), Ok(AcquisitionMode::HighAccuracy));
        assert_eq!(acq.state(), AcquisitionState::Active);
        assert_eq!(acq.start(T0), Err(TrackerError::AlreadyRunning));
    }

    #[test]
    fn test_start_requires_provider() {
        let (mut acq, source, _) = setup(100);
        source.set_available(false);
        assert!(matches!(
            acq.start(T0),
            Err(TrackerError::ProviderUnavailable(_))
        ));
        assert_eq!(acq.state(), AcquisitionState::Error);
    }

    #[test]
    fn test_start_mode_follows_battery() {
        let (mut acq, source, _) = setup(10);
        assert_eq!(acq.start(T0), Ok(AcquisitionMode::Passive));
        let request = source.active_request().unwrap();
        assert_eq!(request.mode, AcquisitionMode::Passive);
        assert_eq!(request.interval_ms, 40_000);
    }

    #[test]
    fn test_accepts_and_rejects() {
        let (mut acq, _source, _) = setup(100);
        acq.start(T0).unwrap();

        let first = acq.handle_event(SourceEvent::Fix(fix_at(0, 1.0)), T0).unwrap();
        let accepted = first.accepted.unwrap();
        assert_eq!(accepted.quality.score(), 100);
        assert_eq!(accepted.mode, AcquisitionMode::HighAccuracy);

        let mut noisy = fix_at(1, 1.0);
        noisy.accuracy_m = Some(80.0);
        let out = acq.handle_event(SourceEvent::Fix(noisy), T0 + 10_000).unwrap();
        assert!(out.accepted.is_none());

        assert_eq!(acq.stats().processed, 2);
        assert_eq!(acq.stats().accepted, 1);
        assert_eq!(acq.filter_state().len(), 1);
    }

    #[test]
    fn test_speed_triggers_single_resubscription() {
        let (mut acq, source, _) = setup(100);
        acq.start(T0).unwrap();

        // ~50 km/h pulls the selector down to LOW_POWER
        let out = acq
            .handle_event(SourceEvent::Fix(fix_at(0, 13.9)), T0)
            .unwrap();
        assert_eq!(
            out.mode_change,
            Some(ModeChange {
                from: AcquisitionMode::HighAccuracy,
                to: AcquisitionMode::LowPower,
                reason: ModeChangeReason::Selection,
            })
        );
        assert!(out.accepted.is_some());
        assert_eq!(acq.mode(), Some(AcquisitionMode::LowPower));
        assert_eq!(source.active_subscriptions(), 1);
        assert_eq!(source.subscribe_count(), 2);
        assert_eq!(source.unsubscribe_count(), 1);
        assert_eq!(source.active_request().unwrap().mode, AcquisitionMode::LowPower);
    }

    #[test]
    fn test_provider_outage_downgrades_and_holds() {
        let (mut acq, source, _) = setup(100);
        acq.start(T0).unwrap();

        let out = acq
            .handle_event(SourceEvent::ProviderUnavailable("no signal".into()), T0)
            .unwrap();
        assert_eq!(out.mode_change.unwrap().to, AcquisitionMode::Balanced);
        assert_eq!(source.active_request().unwrap().mode, AcquisitionMode::Balanced);

        // Slow fix within the hold window stays capped
        let out = acq
            .handle_event(SourceEvent::Fix(fix_at(0, 0.0)), T0)
            .unwrap();
        assert!(out.mode_change.is_none());
        assert_eq!(acq.mode(), Some(AcquisitionMode::Balanced));

        // After the hold the selector may climb back (trip still < 2 min)
        let later = fix_at(7, 0.0);
        let out = acq
            .handle_event(SourceEvent::Fix(later), later.timestamp_ms)
            .unwrap();
        assert_eq!(out.mode_change.unwrap().to, AcquisitionMode::HighAccuracy);
        assert_eq!(source.active_subscriptions(), 1);
    }

    #[test]
    fn test_subscribe_failure_retries_once_lower() {
        let (mut acq, source, _) = setup(100);
        source.fail_next_subscribes(1);
        assert_eq!(acq.start(T0), Ok(AcquisitionMode::Balanced));
        assert_eq!(source.subscribe_count(), 2);
    }

    #[test]
    fn test_second_subscribe_failure_is_fatal() {
        let (mut acq, source, _) = setup(100);
        acq.start(T0).unwrap();

        source.fail_next_subscribes(2);
        let result = acq.handle_event(SourceEvent::Fix(fix_at(0, 13.9)), T0);
        assert!(matches!(result, Err(TrackerError::ProviderUnavailable(_))));
        assert_eq!(acq.state(), AcquisitionState::Error);
        assert_eq!(source.active_subscriptions(), 0);
        assert!(acq.filter_state().is_empty());
    }

    #[test]
    fn test_security_revoked_is_fatal() {
        let (mut acq, source, _) = setup(100);
        acq.start(T0).unwrap();
        acq.handle_event(SourceEvent::Fix(fix_at(0, 1.0)), T0).unwrap();

        let result = acq.handle_event(SourceEvent::SecurityRevoked("revoked".into()), T0);
        assert!(matches!(result, Err(TrackerError::SecurityRevoked(_))));
        assert_eq!(acq.state(), AcquisitionState::Error);
        assert_eq!(source.active_subscriptions(), 0);
        assert!(acq.filter_state().is_empty());

        assert_eq!(
            acq.handle_event(SourceEvent::Fix(fix_at(1, 1.0)), T0),
            Err(TrackerError::NotRunning)
        );
    }

    #[tokio::test]
    async fn test_stop_unsubscribes_then_drains() {
        let (mut acq, source, _) = setup(100);
        acq.start(T0).unwrap();

        assert!(source.push_fix(fix_at(0, 1.0)));
        let event = acq.next_event().await.unwrap();
        acq.handle_event(event, T0).unwrap();

        // Delivered but not yet handled when stop is called
        assert!(source.push_fix(fix_at(1, 1.0)));
        assert!(source.push_fix(fix_at(2, 1.0)));

        let drained = acq.stop();
        assert_eq!(drained.len(), 2);
        assert_eq!(source.active_subscriptions(), 0);
        assert_eq!(acq.state(), AcquisitionState::Idle);
        assert!(acq.filter_state().is_empty());
        assert!(!source.push_fix(fix_at(3, 1.0)));

        assert!(acq.stop().is_empty());
        assert_eq!(source.unsubscribe_count(), 1);
    }
}
