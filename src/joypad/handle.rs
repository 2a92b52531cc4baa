//! Per-controller record
//!
//! A [`ControllerHandle`] is bound to its native controller from the attach
//! notification until the matching detach (or manager teardown). Once unbound
//! it stays inert even if callers still hold it. It holds the controller's
//! haptics engine and at most one active pattern player. The binding and the
//! haptics live behind one mutex so that completion can be signalled from a
//! background context while the frame thread starts or stops effects.

use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::error::JoypadError;
use crate::input::{Capabilities, DeviceId};
use crate::native::{
    ControllerFramework, HapticPattern, HapticsEngine, InputSnapshot, NativeController, NativeId,
    PatternPlayer,
};

// A pattern player between a successful start and its stop/completion
#[derive(Debug)]
struct ActivePlayer {
    player: Box<dyn PatternPlayer>,
    timestamp: u64,
    started_at: Instant,
    duration: Option<Duration>,
}

impl ActivePlayer {
    fn has_run_out(&self, now: Instant) -> bool {
        self.duration
            .is_some_and(|duration| now.duration_since(self.started_at) >= duration)
            || self.player.is_finished()
    }

    fn halt(mut self, device: DeviceId) {
        if let Err(e) = self.player.stop() {
            warn!("Failed to stop pattern player on {}: {}", device, e);
        }
    }
}

#[derive(Debug, Default)]
struct HapticsSlot {
    // Cleared on detach; no engine or player is created while unbound
    native: Option<NativeId>,
    engine: Option<Box<dyn HapticsEngine>>,
    player: Option<ActivePlayer>,
    ff_effect_timestamp: u64,
}

impl HapticsSlot {
    fn bound_to(native: NativeId) -> Self {
        Self {
            native: Some(native),
            ..Self::default()
        }
    }

    fn release(&mut self, device: DeviceId) {
        if let Some(active) = self.player.take() {
            active.halt(device);
        }
        if let Some(mut engine) = self.engine.take() {
            engine.stop();
            debug!("Haptics engine released for {}", device);
        }
    }
}

/// Outcome of a vibration start that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectStart {
    /// A new player is running
    Started,
    /// The active player already renders this effect
    Reused,
}

/// Outcome of a vibration stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectStop {
    Stopped,
    /// The stop predates the running effect
    Stale,
    Idle,
}

/// One physical game controller
#[derive(Debug)]
pub struct ControllerHandle {
    device: DeviceId,
    name: String,
    force_feedback: bool,
    haptics: Mutex<HapticsSlot>,
    last_reported: Mutex<InputSnapshot>,
}

impl ControllerHandle {
    /// Binds a handle to a controller that just attached
    pub fn new(device: DeviceId, controller: &NativeController) -> Self {
        debug!(
            "Creating handle {} for {} '{}'",
            device, controller.id, controller.name
        );
        Self {
            device,
            name: controller.name.clone(),
            force_feedback: controller.force_feedback,
            haptics: Mutex::new(HapticsSlot::bound_to(controller.id)),
            last_reported: Mutex::new(InputSnapshot::default()),
        }
    }

    /// Handle that was never bound to a live device
    ///
    /// Every operation on it is a no-op.
    pub fn placeholder() -> Self {
        Self {
            device: DeviceId::UNASSIGNED,
            name: String::new(),
            force_feedback: false,
            haptics: Mutex::new(HapticsSlot::default()),
            last_reported: Mutex::new(InputSnapshot::default()),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Native controller this handle drives; `None` once unbound
    pub fn native(&self) -> Option<NativeId> {
        self.haptics().native
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn force_feedback(&self) -> bool {
        self.force_feedback
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            force_feedback: self.force_feedback,
        }
    }

    pub fn is_live(&self) -> bool {
        self.haptics().native.is_some()
    }

    /// Timestamp of the last vibration start or stop that took effect
    pub fn ff_effect_timestamp(&self) -> u64 {
        self.haptics().ff_effect_timestamp
    }

    pub fn is_vibrating(&self) -> bool {
        self.haptics().player.is_some()
    }

    pub fn has_haptics_engine(&self) -> bool {
        self.haptics().engine.is_some()
    }

    fn haptics(&self) -> MutexGuard<'_, HapticsSlot> {
        self.haptics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the active effect with `pattern`
    ///
    /// The effect timestamp is recorded even when the start fails, so a request
    /// that cannot be honoured is not retried every frame.
    pub(crate) fn start_effect(
        &self,
        framework: &dyn ControllerFramework,
        pattern: &HapticPattern,
        timestamp: u64,
    ) -> Result<EffectStart, JoypadError> {
        let mut slot = self.haptics();
        let native = slot
            .native
            .ok_or(JoypadError::UnknownDevice(self.device))?;

        if slot
            .player
            .as_ref()
            .is_some_and(|active| active.timestamp == timestamp)
        {
            return Ok(EffectStart::Reused);
        }

        slot.ff_effect_timestamp = timestamp;
        if let Some(previous) = slot.player.take() {
            debug!("Replacing active effect on {}", self.device);
            previous.halt(self.device);
        }

        let mut engine = match slot.engine.take() {
            Some(engine) => engine,
            None => framework.create_haptics_engine(native)?,
        };
        if !engine.is_running() {
            // On failure the engine is dropped and a fresh one is built next time
            engine.start()?;
            info!("Haptics engine started for {}", self.device);
        }

        let player = engine.create_player(pattern);
        slot.engine = Some(engine);
        let mut player = player?;
        player.start()?;
        slot.player = Some(ActivePlayer {
            player,
            timestamp,
            started_at: Instant::now(),
            duration: pattern.duration,
        });
        Ok(EffectStart::Started)
    }

    pub(crate) fn stop_effect(&self, timestamp: u64) -> EffectStop {
        let mut slot = self.haptics();
        if slot.native.is_none() {
            return EffectStop::Idle;
        }
        if timestamp < slot.ff_effect_timestamp {
            return EffectStop::Stale;
        }
        slot.ff_effect_timestamp = timestamp;
        match slot.player.take() {
            Some(active) => {
                active.halt(self.device);
                EffectStop::Stopped
            }
            None => EffectStop::Idle,
        }
    }

    /// Clears the active player if it is still the effect started at `timestamp`
    ///
    /// Safe to call from any thread, e.g. a native completion callback.
    pub fn complete_effect(&self, timestamp: u64) -> bool {
        let mut slot = self.haptics();
        match slot.player.take() {
            Some(active) if active.timestamp == timestamp => {
                debug!("Effect {} on {} completed", timestamp, self.device);
                active.halt(self.device);
                true
            }
            other => {
                slot.player = other;
                false
            }
        }
    }

    /// Releases a player whose duration elapsed or that finished natively
    pub(crate) fn expire_effect(&self, now: Instant) -> bool {
        let mut slot = self.haptics();
        if !slot.player.as_ref().is_some_and(|active| active.has_run_out(now)) {
            return false;
        }
        if let Some(active) = slot.player.take() {
            debug!("Effect {} on {} ran out", active.timestamp, self.device);
            active.halt(self.device);
        }
        true
    }

    /// Detaches the handle from its native controller
    ///
    /// Stops and drops the player and the haptics engine. Later vibration calls
    /// on this handle do nothing.
    pub(crate) fn unbind(&self) {
        let mut slot = self.haptics();
        if let Some(native) = slot.native.take() {
            debug!("Handle {} unbound from {}", self.device, native);
        }
        slot.release(self.device);
    }

    /// Stores `snapshot` as the last reported state and returns the previous one
    pub(crate) fn swap_reported(&self, snapshot: InputSnapshot) -> InputSnapshot {
        let mut last = self
            .last_reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        mem::replace(&mut *last, snapshot)
    }
}

impl Default for ControllerHandle {
    fn default() -> Self {
        Self::placeholder()
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        let device = self.device;
        self.haptics().release(device);
    }
}
