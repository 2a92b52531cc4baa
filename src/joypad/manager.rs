//! Joypad Manager - engine-facing entry points
//!
//! Owns the [`ConnectionObserver`] and drives it through its lifecycle. Each
//! engine frame calls [`JoypadManager::process_joypads`], which:
//!
//! 1. drains queued attach/detach notifications
//! 2. snapshots every connected controller and forwards input deltas
//! 3. applies pending engine vibration requests
//! 4. releases effects that ran out
//!
//! Nothing here blocks; every failure degrades to "no input" or "no rumble".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::error::JoypadError;
use super::handle::{ControllerHandle, EffectStart, EffectStop};
use super::observer::{ConnectionObserver, Idle, Observing, Processing};
use super::translate::{self, InputChange, TranslateSettings};
use crate::input::{DeviceId, InputRegistry};
use crate::native::{ControllerFramework, HapticPattern, NativeId};

/// Tuning for input translation and vibration
///
/// # Examples
///
/// ```rust
/// use joypad_bridge::joypad::JoypadSettings;
///
/// let relaxed = JoypadSettings {
///     axis_deadzone: 0.1,
///     vibration_enabled: false,
///     ..JoypadSettings::default()
/// };
/// assert!(relaxed.invert_y_axis);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoypadSettings {
    /// Stick/trigger deadzone as a fraction (0.0-1.0)
    pub axis_deadzone: f32,

    /// Report stick up as negative Y
    pub invert_y_axis: bool,

    /// Global rumble switch; when off every vibration call is a no-op
    pub vibration_enabled: bool,

    /// Number of engine device slots
    pub max_devices: u32,
}

impl Default for JoypadSettings {
    fn default() -> Self {
        Self {
            axis_deadzone: 0.05,
            invert_y_axis: true,
            vibration_enabled: true,
            max_devices: 16,
        }
    }
}

/// Work done by one [`JoypadManager::process_joypads`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub notifications: usize,
    pub events: usize,
    pub lost: usize,
}

enum ObserverStage {
    Idle(ConnectionObserver<Idle>),
    Observing(ConnectionObserver<Observing>),
    Processing(ConnectionObserver<Processing>),
    Finished,
}

impl fmt::Debug for ObserverStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserverStage::Idle(_) => write!(f, "Idle"),
            ObserverStage::Observing(observer) => {
                write!(f, "Observing({} joypads)", observer.connected_count())
            }
            ObserverStage::Processing(observer) => {
                write!(f, "Processing({} joypads)", observer.connected_count())
            }
            ObserverStage::Finished => write!(f, "Finished"),
        }
    }
}

#[derive(Debug)]
pub struct JoypadManager {
    framework: Arc<dyn ControllerFramework>,
    registry: Arc<dyn InputRegistry>,
    settings: JoypadSettings,
    stage: ObserverStage,
}

impl JoypadManager {
    pub fn new(
        framework: Arc<dyn ControllerFramework>,
        registry: Arc<dyn InputRegistry>,
        settings: JoypadSettings,
    ) -> Self {
        info!("Creating joypad manager with settings: {:?}", settings);
        let observer = ConnectionObserver::create(framework.clone(), registry.clone());
        Self {
            framework,
            registry,
            settings,
            stage: ObserverStage::Idle(observer),
        }
    }

    pub fn is_observing(&self) -> bool {
        matches!(
            self.stage,
            ObserverStage::Observing(_) | ObserverStage::Processing(_)
        )
    }

    pub fn is_processing(&self) -> bool {
        matches!(self.stage, ObserverStage::Processing(_))
    }

    /// Begins listening for attach/detach; a no-op when already listening
    ///
    /// After [`Self::finish_observing`] this starts a fresh observer.
    pub fn start_observing(&mut self) -> Result<(), JoypadError> {
        let mut observer = match mem::replace(&mut self.stage, ObserverStage::Finished) {
            ObserverStage::Idle(observer) => observer,
            ObserverStage::Finished => {
                ConnectionObserver::create(self.framework.clone(), self.registry.clone())
            }
            started => {
                debug!("Already observing controllers");
                self.stage = started;
                return Ok(());
            }
        };

        if let Err(e) = observer.subscribe() {
            self.stage = ObserverStage::Idle(observer);
            return Err(e);
        }
        self.stage = ObserverStage::Observing(observer.observe()?);
        info!("Joypad manager observing controllers");
        Ok(())
    }

    /// Enumerates connected controllers and enables per-frame processing
    pub fn start_processing(&mut self) -> Result<(), JoypadError> {
        match mem::replace(&mut self.stage, ObserverStage::Finished) {
            ObserverStage::Observing(observer) => {
                self.stage = ObserverStage::Processing(observer.start_processing());
                info!("Joypad manager processing controllers");
                Ok(())
            }
            ObserverStage::Processing(observer) => {
                debug!("Already processing controllers");
                self.stage = ObserverStage::Processing(observer);
                Ok(())
            }
            other => {
                self.stage = other;
                Err(JoypadError::InvalidStateTransition(
                    "start_observing must precede start_processing".to_string(),
                ))
            }
        }
    }

    /// Unsubscribes and releases every handle; safe to call repeatedly
    pub fn finish_observing(&mut self) {
        match mem::replace(&mut self.stage, ObserverStage::Finished) {
            ObserverStage::Idle(observer) => observer.finish_observing(),
            ObserverStage::Observing(observer) => observer.finish_observing(),
            ObserverStage::Processing(observer) => observer.finish_observing(),
            ObserverStage::Finished => debug!("Observer already finished"),
        }
    }

    pub fn handle(&self, device: DeviceId) -> Option<Arc<ControllerHandle>> {
        match &self.stage {
            ObserverStage::Idle(observer) => observer.handle(device),
            ObserverStage::Observing(observer) => observer.handle(device),
            ObserverStage::Processing(observer) => observer.handle(device),
            ObserverStage::Finished => None,
        }
    }

    /// Handles of all connected controllers, ordered by device id
    pub fn handles(&self) -> Vec<Arc<ControllerHandle>> {
        match &self.stage {
            ObserverStage::Processing(observer) => observer.handles().cloned().collect(),
            ObserverStage::Observing(observer) => observer.handles().cloned().collect(),
            ObserverStage::Idle(_) | ObserverStage::Finished => Vec::new(),
        }
    }

    /// Per-frame update; does nothing until processing has started
    pub fn process_joypads(&mut self) -> FrameStats {
        let mut stats = FrameStats::default();
        let handles: Vec<Arc<ControllerHandle>> = match &mut self.stage {
            ObserverStage::Processing(observer) => {
                stats.notifications = observer.drain_notifications();
                observer.handles().cloned().collect()
            }
            _ => {
                debug!("process_joypads called before start_processing");
                return stats;
            }
        };

        let translate_settings = TranslateSettings {
            axis_deadzone: self.settings.axis_deadzone,
            invert_y_axis: self.settings.invert_y_axis,
        };
        let now = Instant::now();
        let mut lost = Vec::new();

        for handle in &handles {
            let Some(native) = handle.native() else {
                continue;
            };
            let Some(raw) = self.framework.snapshot(native) else {
                warn!(
                    "Controller {} for {} vanished without detach",
                    native,
                    handle.device()
                );
                lost.push(native);
                continue;
            };

            let current = translate::normalize(&raw, &translate_settings);
            let previous = handle.swap_reported(current.clone());
            for change in translate::diff(&previous, &current) {
                match change {
                    InputChange::Button { button, pressed } => {
                        self.registry
                            .report_button_event(handle.device(), button, pressed);
                    }
                    InputChange::Axis { axis, value } => {
                        self.registry.report_axis_event(handle.device(), axis, value);
                    }
                }
                stats.events += 1;
            }

            if handle.force_feedback() {
                self.apply_vibration_request(handle);
            }
            handle.expire_effect(now);
        }

        stats.lost = lost.len();
        for native in lost {
            self.drop_lost(native);
        }
        stats
    }

    fn apply_vibration_request(&mut self, handle: &ControllerHandle) {
        if !self.settings.vibration_enabled {
            return;
        }
        let Some(request) = self.registry.vibration_request(handle.device()) else {
            return;
        };
        if request.timestamp <= handle.ff_effect_timestamp() {
            return;
        }
        if request.is_stop() {
            self.joypad_vibration_stop(handle, request.timestamp);
        } else {
            self.joypad_vibration_start(
                handle,
                request.weak_magnitude,
                request.strong_magnitude,
                request.duration,
                request.timestamp,
            );
        }
    }

    /// Starts a weak/strong rumble on `handle`, replacing any running one
    ///
    /// Best effort: a handle without force feedback, disabled vibration, or a
    /// failing haptics engine all end in a log line. A `duration` of zero
    /// rumbles until stopped.
    pub fn joypad_vibration_start(
        &mut self,
        handle: &ControllerHandle,
        weak_magnitude: f32,
        strong_magnitude: f32,
        duration: Duration,
        timestamp: u64,
    ) {
        let Some(native) = handle.native() else {
            debug!("Ignoring vibration on unbound handle {}", handle.device());
            return;
        };
        if !handle.force_feedback() {
            debug!("{} has no force feedback, ignoring vibration", handle.device());
            return;
        }
        if !self.settings.vibration_enabled {
            debug!("Vibration disabled, ignoring request for {}", handle.device());
            return;
        }

        let pattern = HapticPattern::rumble(weak_magnitude, strong_magnitude, duration);
        if pattern.is_silent() {
            self.joypad_vibration_stop(handle, timestamp);
            return;
        }

        match handle.start_effect(self.framework.as_ref(), &pattern, timestamp) {
            Ok(EffectStart::Started) => info!(
                "Vibration started on {}: weak {:.2}, strong {:.2}, {:?}",
                handle.device(),
                weak_magnitude,
                strong_magnitude,
                pattern.duration
            ),
            Ok(EffectStart::Reused) => {
                debug!("Effect {} already playing on {}", timestamp, handle.device())
            }
            Err(e) => {
                warn!("Vibration unavailable on {}: {}", handle.device(), e);
                if self.framework.snapshot(native).is_none() {
                    self.drop_lost(native);
                }
            }
        }
    }

    /// Stops the running rumble unless `timestamp` predates it
    pub fn joypad_vibration_stop(&mut self, handle: &ControllerHandle, timestamp: u64) {
        if !handle.is_live() {
            return;
        }
        match handle.stop_effect(timestamp) {
            EffectStop::Stopped => info!("Vibration stopped on {}", handle.device()),
            EffectStop::Stale => debug!(
                "Ignoring stale stop {} on {} (effect at {})",
                timestamp,
                handle.device(),
                handle.ff_effect_timestamp()
            ),
            EffectStop::Idle => debug!("No vibration to stop on {}", handle.device()),
        }
    }

    /// Requests a rumble by device id, for callers that don't hold the handle
    pub fn vibrate(
        &mut self,
        device: DeviceId,
        weak_magnitude: f32,
        strong_magnitude: f32,
        duration: Duration,
        timestamp: u64,
    ) -> Result<(), JoypadError> {
        let handle = self
            .handle(device)
            .ok_or(JoypadError::UnknownDevice(device))?;
        self.joypad_vibration_start(
            &handle,
            weak_magnitude,
            strong_magnitude,
            duration,
            timestamp,
        );
        Ok(())
    }

    // A native reference went stale: same outcome as a detach
    fn drop_lost(&mut self, native: NativeId) {
        let detached = match &mut self.stage {
            ObserverStage::Processing(observer) => observer.detach(native),
            ObserverStage::Observing(observer) => observer.detach(native),
            ObserverStage::Idle(_) | ObserverStage::Finished => None,
        };
        if detached.is_some() {
            warn!("Treated lost controller {} as disconnected", native);
        }
    }
}

impl Drop for JoypadManager {
    fn drop(&mut self) {
        self.finish_observing();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{ChannelInputRegistry, EngineEvent, JoyButton};
    use crate::native::virtual_pad::VirtualFramework;
    use tokio::sync::mpsc;

    struct Rig {
        framework: Arc<VirtualFramework>,
        registry: Arc<ChannelInputRegistry>,
        manager: JoypadManager,
        events: mpsc::Receiver<EngineEvent>,
    }

    fn rig(settings: JoypadSettings) -> Rig {
        let framework = Arc::new(VirtualFramework::new());
        let (tx, events) = mpsc::channel(256);
        let registry = Arc::new(ChannelInputRegistry::new(tx, settings.max_devices));
        let manager = JoypadManager::new(framework.clone(), registry.clone(), settings);
        Rig {
            framework,
            registry,
            manager,
            events,
        }
    }

    fn running_rig() -> Rig {
        let mut rig = rig(JoypadSettings::default());
        rig.manager.start_observing().unwrap();
        rig.manager.start_processing().unwrap();
        rig
    }

    fn drain(events: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn processing_requires_observing() {
        let mut rig = rig(JoypadSettings::default());
        assert!(matches!(
            rig.manager.start_processing(),
            Err(JoypadError::InvalidStateTransition(_))
        ));
        assert!(!rig.manager.is_observing());
        assert!(!rig.manager.is_processing());
        assert_eq!(rig.manager.process_joypads(), FrameStats::default());
    }

    #[test]
    fn start_observing_twice_subscribes_once() {
        let mut rig = rig(JoypadSettings::default());
        rig.manager.start_observing().unwrap();
        rig.manager.start_observing().unwrap();
        assert_eq!(rig.framework.subscriber_count(), 1);
        assert!(rig.manager.is_observing());
    }

    #[test]
    fn idle_attach_emits_only_connect() {
        let mut rig = running_rig();
        rig.framework.plug("Pad", false);
        let stats = rig.manager.process_joypads();
        assert_eq!(stats.notifications, 1);
        assert_eq!(stats.events, 0);

        let events = drain(&mut rig.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EngineEvent::JoypadConnected { .. }));
    }

    #[test]
    fn press_emits_exactly_one_event() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", false);
        rig.manager.process_joypads();
        drain(&mut rig.events);

        rig.framework.set_button(id, JoyButton::B, true);
        rig.manager.process_joypads();
        rig.manager.process_joypads();

        let events = drain(&mut rig.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            EngineEvent::Button {
                button: JoyButton::B,
                pressed: true,
                ..
            }
        ));
    }

    #[test]
    fn vibration_without_force_feedback_creates_no_player() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", false);
        rig.manager.process_joypads();
        let handle = rig.manager.handle(DeviceId(0)).unwrap();

        rig.manager
            .joypad_vibration_start(&handle, 1.0, 1.0, Duration::ZERO, 10);
        assert!(!handle.is_vibrating());
        assert_eq!(rig.framework.players_created(id), 0);
    }

    #[test]
    fn disabled_vibration_is_a_no_op() {
        let mut rig = rig(JoypadSettings {
            vibration_enabled: false,
            ..JoypadSettings::default()
        });
        rig.manager.start_observing().unwrap();
        rig.manager.start_processing().unwrap();
        let id = rig.framework.plug("Pad", true);
        rig.manager.process_joypads();

        rig.manager
            .vibrate(DeviceId(0), 0.5, 0.5, Duration::ZERO, 1)
            .unwrap();
        assert_eq!(rig.framework.players_created(id), 0);
    }

    #[test]
    fn stale_stop_leaves_player_running() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", true);
        rig.manager.process_joypads();
        let handle = rig.manager.handle(DeviceId(0)).unwrap();

        rig.manager
            .joypad_vibration_start(&handle, 0.2, 0.8, Duration::ZERO, 100);
        rig.manager.joypad_vibration_stop(&handle, 99);
        assert!(handle.is_vibrating());
        assert_eq!(rig.framework.active_players(id), 1);

        rig.manager.joypad_vibration_stop(&handle, 101);
        assert!(!handle.is_vibrating());
    }

    #[test]
    fn silent_start_acts_as_stop() {
        let mut rig = running_rig();
        rig.framework.plug("Pad", true);
        rig.manager.process_joypads();
        let handle = rig.manager.handle(DeviceId(0)).unwrap();

        rig.manager
            .joypad_vibration_start(&handle, 0.5, 0.5, Duration::ZERO, 1);
        rig.manager
            .joypad_vibration_start(&handle, 0.0, 0.0, Duration::ZERO, 2);
        assert!(!handle.is_vibrating());
    }

    #[test]
    fn detach_with_active_player_releases_it() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", true);
        rig.manager.process_joypads();
        let handle = rig.manager.handle(DeviceId(0)).unwrap();
        rig.manager
            .joypad_vibration_start(&handle, 1.0, 0.0, Duration::ZERO, 5);
        assert_eq!(rig.framework.active_players(id), 1);

        rig.framework.unplug(id);
        rig.manager.process_joypads();
        assert!(!handle.is_vibrating());
        assert!(!handle.has_haptics_engine());
        assert!(rig.manager.handle(DeviceId(0)).is_none());
    }

    #[test]
    fn lost_controller_is_treated_as_disconnect() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", false);
        rig.manager.process_joypads();
        drain(&mut rig.events);

        rig.framework.invalidate(id);
        let stats = rig.manager.process_joypads();
        assert_eq!(stats.lost, 1);
        assert!(rig.manager.handles().is_empty());
        let events = drain(&mut rig.events);
        assert!(matches!(
            events.as_slice(),
            [EngineEvent::JoypadDisconnected { .. }]
        ));
    }

    #[test]
    fn vibration_on_lost_controller_drops_it() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", true);
        rig.manager.process_joypads();
        let handle = rig.manager.handle(DeviceId(0)).unwrap();

        rig.framework.invalidate(id);
        rig.manager
            .joypad_vibration_start(&handle, 1.0, 1.0, Duration::ZERO, 3);
        assert!(rig.manager.handle(DeviceId(0)).is_none());
    }

    #[test]
    fn haptics_failure_keeps_controller_without_rumble() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", true);
        rig.manager.process_joypads();
        let handle = rig.manager.handle(DeviceId(0)).unwrap();

        rig.framework.fail_haptics(id, true);
        rig.manager
            .joypad_vibration_start(&handle, 1.0, 1.0, Duration::ZERO, 5);
        assert!(!handle.is_vibrating());
        assert_eq!(rig.framework.active_players(id), 0);
        assert!(rig.manager.handle(DeviceId(0)).is_some());

        rig.framework.fail_haptics(id, false);
        rig.manager
            .joypad_vibration_start(&handle, 1.0, 1.0, Duration::ZERO, 6);
        assert!(handle.is_vibrating());
        assert_eq!(rig.framework.active_players(id), 1);
    }

    #[test]
    fn engine_requests_drive_vibration() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", true);
        rig.manager.process_joypads();

        rig.registry
            .request_vibration(DeviceId(0), 0.4, 0.6, Duration::ZERO);
        rig.manager.process_joypads();
        rig.manager.process_joypads();
        assert_eq!(rig.framework.players_created(id), 1);
        assert_eq!(rig.framework.active_players(id), 1);

        rig.registry.stop_vibration(DeviceId(0));
        rig.manager.process_joypads();
        assert_eq!(rig.framework.active_players(id), 0);
    }

    #[test]
    fn natively_finished_effect_is_released() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", true);
        rig.manager.process_joypads();
        let handle = rig.manager.handle(DeviceId(0)).unwrap();
        rig.manager
            .joypad_vibration_start(&handle, 1.0, 1.0, Duration::ZERO, 1);

        rig.framework.complete_effects(id);
        rig.manager.process_joypads();
        assert!(!handle.is_vibrating());
    }

    #[test]
    fn finish_is_idempotent_and_restartable() {
        let mut rig = running_rig();
        rig.framework.plug("Pad", false);
        rig.manager.process_joypads();

        rig.manager.finish_observing();
        rig.manager.finish_observing();
        assert!(!rig.manager.is_processing());
        assert!(rig.manager.handles().is_empty());
        assert_eq!(rig.framework.subscriber_count(), 0);

        rig.manager.start_observing().unwrap();
        rig.manager.start_processing().unwrap();
        assert!(rig.manager.is_processing());
        assert_eq!(rig.manager.handles().len(), 1);
    }

    #[test]
    fn vibration_after_finish_creates_no_player() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", true);
        rig.manager.process_joypads();
        let handle = rig.manager.handle(DeviceId(0)).unwrap();

        rig.manager.finish_observing();
        assert!(!handle.is_live());
        rig.manager
            .joypad_vibration_start(&handle, 1.0, 1.0, Duration::from_millis(5), 1);
        assert!(!handle.is_vibrating());
        assert_eq!(rig.framework.players_created(id), 0);
        assert_eq!(rig.framework.active_players(id), 0);
    }

    #[test]
    fn vibration_after_detach_creates_no_player() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", true);
        rig.manager.process_joypads();
        let handle = rig.manager.handle(DeviceId(0)).unwrap();

        rig.framework.unplug(id);
        rig.manager.process_joypads();
        assert!(!handle.is_live());
        rig.manager
            .joypad_vibration_start(&handle, 1.0, 1.0, Duration::ZERO, 1);
        rig.manager.joypad_vibration_stop(&handle, 2);
        assert!(!handle.is_vibrating());
        assert!(!handle.has_haptics_engine());
    }

    #[test]
    fn old_handle_after_restart_is_inert() {
        let mut rig = running_rig();
        let id = rig.framework.plug("Pad", true);
        rig.manager.process_joypads();
        let stale = rig.manager.handle(DeviceId(0)).unwrap();

        rig.manager.finish_observing();
        rig.manager.start_observing().unwrap();
        rig.manager.start_processing().unwrap();
        let fresh = rig.manager.handle(DeviceId(0)).unwrap();
        assert_eq!(fresh.native(), Some(id));
        assert_eq!(stale.native(), None);

        rig.manager
            .joypad_vibration_start(&fresh, 0.5, 0.5, Duration::ZERO, 10);
        rig.manager
            .joypad_vibration_start(&stale, 1.0, 1.0, Duration::ZERO, 11);
        assert!(fresh.is_vibrating());
        assert!(!stale.is_vibrating());
        assert_eq!(rig.framework.active_players(id), 1);
        assert_eq!(rig.framework.players_created(id), 1);
    }
}
