//! Software controllers
//!
//! `VirtualFramework` behaves like a native controller framework whose devices
//! are plugged, pressed and unplugged from code. Notifications are delivered
//! synchronously on whichever thread calls `plug`/`unplug`, which stands in
//! for the OS notification context.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ControllerFramework, FrameworkError, HapticPattern, HapticsEngine, HapticsError,
    InputSnapshot, NativeController, NativeId, Notification, NotificationSender, PatternPlayer,
    Subscription,
};
use crate::input::{JoyAxis, JoyButton};

// Haptics bookkeeping shared between a pad and the players made for it
#[derive(Debug, Default)]
struct PadHaptics {
    fail_next: bool,
    engines_started: usize,
    players_created: usize,
    playing: usize,
    completed: bool,
}

#[derive(Debug)]
struct VirtualPad {
    name: String,
    force_feedback: bool,
    snapshot: InputSnapshot,
    haptics: Arc<Mutex<PadHaptics>>,
}

#[derive(Debug, Default)]
struct VirtualState {
    next_id: usize,
    pads: BTreeMap<NativeId, VirtualPad>,
    subscribers: Vec<(NotificationSender, CancellationToken)>,
}

impl VirtualState {
    fn notify(&mut self, notification: Notification) {
        self.subscribers
            .retain(|(_, token)| !token.is_cancelled());
        for (sender, _) in &self.subscribers {
            if let Err(e) = sender.send(notification.clone()) {
                warn!("Dropping notification for closed mailbox: {}", e);
            }
        }
    }

    fn describe(id: NativeId, pad: &VirtualPad) -> NativeController {
        NativeController {
            id,
            name: pad.name.clone(),
            force_feedback: pad.force_feedback,
        }
    }
}

#[derive(Debug, Default)]
pub struct VirtualFramework {
    state: Mutex<VirtualState>,
}

impl VirtualFramework {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn haptics(&self, id: NativeId) -> Option<Arc<Mutex<PadHaptics>>> {
        self.state().pads.get(&id).map(|pad| pad.haptics.clone())
    }

    /// Connects a new controller and notifies subscribers
    pub fn plug(&self, name: &str, force_feedback: bool) -> NativeId {
        let mut state = self.state();
        let id = NativeId(state.next_id);
        state.next_id += 1;
        let pad = VirtualPad {
            name: name.to_string(),
            force_feedback,
            snapshot: neutral_snapshot(),
            haptics: Arc::new(Mutex::new(PadHaptics::default())),
        };
        let controller = VirtualState::describe(id, &pad);
        state.pads.insert(id, pad);
        info!("Virtual controller plugged: {} '{}'", id, name);
        state.notify(Notification::Attached(controller));
        id
    }

    pub fn unplug(&self, id: NativeId) {
        let mut state = self.state();
        if state.pads.remove(&id).is_some() {
            info!("Virtual controller unplugged: {}", id);
            state.notify(Notification::Detached(id));
        } else {
            debug!("Unplug of unknown virtual controller {}", id);
        }
    }

    /// Drops the controller without telling anyone, leaving stale references behind
    pub fn invalidate(&self, id: NativeId) {
        if self.state().pads.remove(&id).is_some() {
            warn!("Virtual controller {} vanished without notification", id);
        }
    }

    pub fn set_button(&self, id: NativeId, button: JoyButton, pressed: bool) {
        if let Some(pad) = self.state().pads.get_mut(&id) {
            pad.snapshot.buttons.insert(button, pressed);
        }
    }

    pub fn set_axis(&self, id: NativeId, axis: JoyAxis, value: f32) {
        if let Some(pad) = self.state().pads.get_mut(&id) {
            pad.snapshot.axes.insert(axis, value);
        }
    }

    /// While set, haptics engine start and player creation on `id` fail
    pub fn fail_haptics(&self, id: NativeId, fail: bool) {
        if let Some(haptics) = self.haptics(id) {
            haptics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .fail_next = fail;
        }
    }

    /// Marks every running player on `id` as finished natively
    pub fn complete_effects(&self, id: NativeId) {
        if let Some(haptics) = self.haptics(id) {
            haptics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .completed = true;
        }
    }

    /// Players currently started and not yet stopped or dropped
    pub fn active_players(&self, id: NativeId) -> usize {
        self.haptics(id)
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).playing)
            .unwrap_or(0)
    }

    pub fn players_created(&self, id: NativeId) -> usize {
        self.haptics(id)
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).players_created)
            .unwrap_or(0)
    }

    pub fn engines_started(&self, id: NativeId) -> usize {
        self.haptics(id)
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).engines_started)
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|(_, token)| !token.is_cancelled());
        state.subscribers.len()
    }
}

impl ControllerFramework for VirtualFramework {
    fn subscribe(&self, sender: NotificationSender) -> Result<Subscription, FrameworkError> {
        let (subscription, token) = Subscription::new();
        self.state().subscribers.push((sender, token));
        debug!("Virtual framework subscriber added");
        Ok(subscription)
    }

    fn connected(&self) -> Vec<NativeController> {
        self.state()
            .pads
            .iter()
            .map(|(id, pad)| VirtualState::describe(*id, pad))
            .collect()
    }

    fn snapshot(&self, id: NativeId) -> Option<InputSnapshot> {
        self.state().pads.get(&id).map(|pad| pad.snapshot.clone())
    }

    fn create_haptics_engine(&self, id: NativeId) -> Result<Box<dyn HapticsEngine>, HapticsError> {
        let state = self.state();
        let pad = state.pads.get(&id).ok_or(HapticsError::Disconnected(id))?;
        if !pad.force_feedback {
            return Err(HapticsError::Unsupported(id));
        }
        Ok(Box::new(VirtualHapticsEngine {
            id,
            running: false,
            haptics: pad.haptics.clone(),
        }))
    }
}

#[derive(Debug)]
struct VirtualHapticsEngine {
    id: NativeId,
    running: bool,
    haptics: Arc<Mutex<PadHaptics>>,
}

impl VirtualHapticsEngine {
    fn haptics(&self) -> MutexGuard<'_, PadHaptics> {
        self.haptics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HapticsEngine for VirtualHapticsEngine {
    fn start(&mut self) -> Result<(), HapticsError> {
        let mut haptics = self.haptics();
        if haptics.fail_next {
            return Err(HapticsError::EngineStart(format!(
                "virtual engine for {} refused to start",
                self.id
            )));
        }
        haptics.engines_started += 1;
        drop(haptics);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn create_player(
        &mut self,
        pattern: &HapticPattern,
    ) -> Result<Box<dyn PatternPlayer>, HapticsError> {
        if !self.running {
            return Err(HapticsError::EngineStopped(self.id));
        }
        let mut haptics = self.haptics();
        if haptics.fail_next {
            return Err(HapticsError::PlayerCreation(format!(
                "virtual player for {} could not be created",
                self.id
            )));
        }
        haptics.players_created += 1;
        haptics.completed = false;
        debug!("Virtual player created on {} for {:?}", self.id, pattern);
        Ok(Box::new(VirtualPatternPlayer {
            playing: false,
            haptics: self.haptics.clone(),
        }))
    }
}

#[derive(Debug)]
struct VirtualPatternPlayer {
    playing: bool,
    haptics: Arc<Mutex<PadHaptics>>,
}

impl VirtualPatternPlayer {
    fn halt(&mut self) {
        if self.playing {
            self.playing = false;
            let mut haptics = self.haptics.lock().unwrap_or_else(PoisonError::into_inner);
            haptics.playing = haptics.playing.saturating_sub(1);
        }
    }
}

impl PatternPlayer for VirtualPatternPlayer {
    fn start(&mut self) -> Result<(), HapticsError> {
        if !self.playing {
            self.playing = true;
            self.haptics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .playing += 1;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HapticsError> {
        self.halt();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.playing
            && self
                .haptics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .completed
    }
}

impl Drop for VirtualPatternPlayer {
    fn drop(&mut self) {
        self.halt();
    }
}

fn neutral_snapshot() -> InputSnapshot {
    let mut snapshot = InputSnapshot::default();
    for button in JoyButton::ALL {
        snapshot.buttons.insert(button, false);
    }
    for axis in JoyAxis::ALL {
        snapshot.axes.insert(axis, 0.0);
    }
    snapshot
}
