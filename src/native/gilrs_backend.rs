//! gilrs binding of the native controller framework
//!
//! gilrs only updates controller state while its event queue is drained, so a
//! dedicated pump thread owns the draining. It turns `Connected`/`Disconnected`
//! events into [`Notification`]s for every live subscriber; all other events
//! only serve to refresh the cached state that [`ControllerFramework::snapshot`]
//! reads back on the frame thread.

use chrono::Local;
use gilrs::ff::{BaseEffect, BaseEffectType, Effect, EffectBuilder, Repeat, Replay, Ticks};
use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    ControllerFramework, FrameworkError, HapticChannel, HapticPattern, HapticsEngine,
    HapticsError, InputSnapshot, NativeController, NativeId, Notification, NotificationSender,
    PatternPlayer, Subscription,
};
use crate::input::{JoyAxis, JoyButton};

const BUTTON_MAP: [(Button, JoyButton); 16] = [
    (Button::South, JoyButton::A),
    (Button::East, JoyButton::B),
    (Button::West, JoyButton::X),
    (Button::North, JoyButton::Y),
    (Button::Select, JoyButton::Back),
    (Button::Mode, JoyButton::Guide),
    (Button::Start, JoyButton::Start),
    (Button::LeftThumb, JoyButton::LeftStick),
    (Button::RightThumb, JoyButton::RightStick),
    (Button::LeftTrigger, JoyButton::LeftShoulder),
    (Button::RightTrigger, JoyButton::RightShoulder),
    (Button::DPadUp, JoyButton::DPadUp),
    (Button::DPadDown, JoyButton::DPadDown),
    (Button::DPadLeft, JoyButton::DPadLeft),
    (Button::DPadRight, JoyButton::DPadRight),
    (Button::C, JoyButton::Misc1),
];

const STICK_MAP: [(Axis, JoyAxis); 4] = [
    (Axis::LeftStickX, JoyAxis::LeftX),
    (Axis::LeftStickY, JoyAxis::LeftY),
    (Axis::RightStickX, JoyAxis::RightX),
    (Axis::RightStickY, JoyAxis::RightY),
];

// Analog triggers are reported by gilrs as button values
const TRIGGER_MAP: [(Button, JoyAxis); 2] = [
    (Button::LeftTrigger2, JoyAxis::TriggerLeft),
    (Button::RightTrigger2, JoyAxis::TriggerRight),
];

// Length of one repetition of an open-ended rumble
const RUMBLE_SEGMENT_MS: u32 = 100;

type Subscribers = Arc<Mutex<Vec<(NotificationSender, CancellationToken)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn native_id(id: GamepadId) -> NativeId {
    NativeId(usize::from(id))
}

fn find_gamepad(gilrs: &Gilrs, id: NativeId) -> Option<GamepadId> {
    gilrs
        .gamepads()
        .map(|(gamepad_id, _)| gamepad_id)
        .find(|gamepad_id| native_id(*gamepad_id) == id)
}

fn describe(id: GamepadId, gamepad: &Gamepad<'_>) -> NativeController {
    NativeController {
        id: native_id(id),
        name: gamepad.name().to_string(),
        force_feedback: gamepad.is_ff_supported(),
    }
}

#[derive(Debug)]
pub struct GilrsFramework {
    gilrs: Arc<Mutex<Gilrs>>,
    subscribers: Subscribers,
    shutdown: CancellationToken,
    pump: Mutex<Option<thread::JoinHandle<()>>>,
    pump_interval: Duration,
}

impl GilrsFramework {
    pub fn new(pump_interval: Duration) -> Result<Self, FrameworkError> {
        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(FrameworkError::InitializationError(e.to_string()));
            }
        };

        for (id, gamepad) in gilrs.gamepads() {
            info!(
                "  ID: {}, Name: {}, UUID: {:?}, force feedback: {}",
                id,
                gamepad.name(),
                gamepad.uuid(),
                gamepad.is_ff_supported()
            );
        }

        Ok(Self {
            gilrs: Arc::new(Mutex::new(gilrs)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            shutdown: CancellationToken::new(),
            pump: Mutex::new(None),
            pump_interval,
        })
    }

    fn ensure_pump(&self) -> Result<(), FrameworkError> {
        let mut pump = lock(&self.pump);
        if pump.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let gilrs = self.gilrs.clone();
        let subscribers = self.subscribers.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.pump_interval;

        let handle = thread::Builder::new()
            .name("gilrs-notify".to_string())
            .spawn(move || run_pump_loop(gilrs, subscribers, shutdown, interval))
            .map_err(|e| FrameworkError::SubscriptionError(e.to_string()))?;
        debug!("Spawned gilrs notification pump: {:?}", handle.thread().id());
        *pump = Some(handle);
        Ok(())
    }
}

impl Drop for GilrsFramework {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl ControllerFramework for GilrsFramework {
    fn subscribe(&self, sender: NotificationSender) -> Result<Subscription, FrameworkError> {
        self.ensure_pump()?;
        let (subscription, token) = Subscription::new();
        lock(&self.subscribers).push((sender, token));
        info!("Subscribed to gilrs controller notifications");
        Ok(subscription)
    }

    fn connected(&self) -> Vec<NativeController> {
        let gilrs = lock(&self.gilrs);
        let controllers = gilrs
            .gamepads()
            .map(|(id, gamepad)| describe(id, &gamepad))
            .collect();
        controllers
    }

    fn snapshot(&self, id: NativeId) -> Option<InputSnapshot> {
        let gilrs = lock(&self.gilrs);
        let gamepad = gilrs.connected_gamepad(find_gamepad(&gilrs, id)?)?;

        let mut snapshot = InputSnapshot::default();
        for (button, joy_button) in BUTTON_MAP {
            snapshot
                .buttons
                .insert(joy_button, gamepad.is_pressed(button));
        }
        for (axis, joy_axis) in STICK_MAP {
            snapshot.axes.insert(joy_axis, gamepad.value(axis));
        }
        for (button, joy_axis) in TRIGGER_MAP {
            let value = gamepad
                .button_data(button)
                .map(|data| data.value())
                .unwrap_or(0.0);
            snapshot.axes.insert(joy_axis, value);
        }
        Some(snapshot)
    }

    fn create_haptics_engine(&self, id: NativeId) -> Result<Box<dyn HapticsEngine>, HapticsError> {
        let gilrs = lock(&self.gilrs);
        let gamepad = find_gamepad(&gilrs, id).ok_or(HapticsError::Disconnected(id))?;
        Ok(Box::new(GilrsHapticsEngine {
            id,
            gamepad,
            gilrs: self.gilrs.clone(),
            running: false,
        }))
    }
}

fn run_pump_loop(
    gilrs: Arc<Mutex<Gilrs>>,
    subscribers: Subscribers,
    shutdown: CancellationToken,
    interval: Duration,
) {
    info!("Starting gilrs notification pump");

    let mut event_count = 0u64;
    let mut last_log_time = Local::now();
    let log_interval = chrono::Duration::seconds(30);

    while !shutdown.is_cancelled() {
        let notifications = {
            let mut gilrs = lock(&gilrs);
            let mut notifications = Vec::new();
            while let Some(Event { id, event, .. }) = gilrs.next_event() {
                event_count += 1;
                match event {
                    EventType::Connected => match gilrs.connected_gamepad(id) {
                        Some(gamepad) => {
                            info!("Controller connected: {} ({})", gamepad.name(), id);
                            notifications.push(Notification::Attached(describe(id, &gamepad)));
                        }
                        None => warn!("Connected event for {} without a live gamepad", id),
                    },
                    EventType::Disconnected => {
                        warn!("Controller disconnected: {}", id);
                        notifications.push(Notification::Detached(native_id(id)));
                    }
                    _ => debug!("State event from {}: {:?}", id, event),
                }
            }
            notifications
        };

        if !notifications.is_empty() {
            let mut subscribers = lock(&subscribers);
            subscribers.retain(|(sender, token)| !token.is_cancelled() && !sender.is_closed());
            for notification in notifications {
                for (sender, _) in subscribers.iter() {
                    if let Err(e) = sender.send(notification.clone()) {
                        warn!("Failed to deliver controller notification: {}", e);
                    }
                }
            }
        }

        let now = Local::now();
        if now - last_log_time > log_interval {
            debug!(
                "gilrs pump stats: {} events in last {} seconds",
                event_count,
                log_interval.num_seconds()
            );
            event_count = 0;
            last_log_time = now;
        }

        thread::sleep(interval);
    }

    info!("gilrs notification pump stopped");
}

#[derive(Debug)]
struct GilrsHapticsEngine {
    id: NativeId,
    gamepad: GamepadId,
    gilrs: Arc<Mutex<Gilrs>>,
    running: bool,
}

impl HapticsEngine for GilrsHapticsEngine {
    fn start(&mut self) -> Result<(), HapticsError> {
        let gilrs = lock(&self.gilrs);
        let gamepad = gilrs
            .connected_gamepad(self.gamepad)
            .ok_or(HapticsError::Disconnected(self.id))?;
        if !gamepad.is_ff_supported() {
            return Err(HapticsError::Unsupported(self.id));
        }
        drop(gilrs);
        self.running = true;
        debug!("Haptics engine running for {}", self.id);
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

        let segment_ms = pattern
            .duration
            .map(|d| d.as_millis().clamp(1, u32::MAX as u128) as u32)
            .unwrap_or(RUMBLE_SEGMENT_MS);

        let mut builder = EffectBuilder::new();
        for event in &pattern.events {
            let magnitude = (event.intensity.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16;
            let kind = match event.channel {
                HapticChannel::Weak => BaseEffectType::Weak { magnitude },
                HapticChannel::Strong => BaseEffectType::Strong { magnitude },
            };
            builder.add_effect(BaseEffect {
                kind,
                scheduling: Replay {
                    play_for: Ticks::from_ms(segment_ms),
                    ..Default::default()
                },
                envelope: Default::default(),
            });
        }
        match pattern.duration {
            Some(_) => builder.repeat(Repeat::For(Ticks::from_ms(segment_ms))),
            None => builder.repeat(Repeat::Infinitely),
        };
        builder.gamepads(&[self.gamepad]);

        let mut gilrs = lock(&self.gilrs);
        let effect = builder
            .finish(&mut gilrs)
            .map_err(|e| HapticsError::PlayerCreation(e.to_string()))?;
        Ok(Box::new(GilrsPatternPlayer {
            id: self.id,
            effect,
        }))
    }
}

struct GilrsPatternPlayer {
    id: NativeId,
    effect: Effect,
}

impl fmt::Debug for GilrsPatternPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GilrsPatternPlayer")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl PatternPlayer for GilrsPatternPlayer {
    fn start(&mut self) -> Result<(), HapticsError> {
        self.effect
            .play()
            .map_err(|e| HapticsError::Playback(e.to_string()))
    }

    fn stop(&mut self) -> Result<(), HapticsError> {
        self.effect
            .stop()
            .map_err(|e| HapticsError::Playback(e.to_string()))
    }
}
