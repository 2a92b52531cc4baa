//! Native controller and haptics framework seam
//!
//! The bridge talks to the operating system through three traits:
//!
//! 1. [`ControllerFramework`] - connect/disconnect notifications, enumeration
//!    and per-device input snapshots
//! 2. [`HapticsEngine`] - one per controller, renders haptic patterns
//! 3. [`PatternPlayer`] - a single running pattern on an engine
//!
//! ```text
//! OS ──► ControllerFramework ──[Notification]──► mailbox ──► ConnectionObserver
//!            │ snapshot()                                        │
//!            └──────────────────────── process_joypads() ◄───────┘
//! ```
//!
//! [`gilrs_backend`] binds real hardware through gilrs, [`virtual_pad`] provides
//! software controllers.

pub mod gilrs_backend;
pub mod virtual_pad;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::input::{JoyAxis, JoyButton};

/// Non-owning reference to a controller object owned by the native framework
///
/// Only valid between the `Attached` and `Detached` notifications for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NativeId(pub usize);

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native#{}", self.0)
    }
}

// What the framework tells us about a controller when it shows up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeController {
    pub id: NativeId,
    pub name: String,
    pub force_feedback: bool,
}

// Delivered on the framework's own thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Attached(NativeController),
    Detached(NativeId),
}

pub type NotificationSender = mpsc::UnboundedSender<Notification>;

/// Raw button and axis state of one controller at one instant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSnapshot {
    pub buttons: HashMap<JoyButton, bool>,
    pub axes: HashMap<JoyAxis, f32>,
}

impl InputSnapshot {
    pub fn is_pressed(&self, button: JoyButton) -> bool {
        self.buttons.get(&button).copied().unwrap_or(false)
    }

    pub fn axis(&self, axis: JoyAxis) -> f32 {
        self.axes.get(&axis).copied().unwrap_or(0.0)
    }
}

/// Live subscription to controller notifications
///
/// Dropping it cancels delivery; frameworks stop sending once the token fires.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    pub fn new() -> (Self, CancellationToken) {
        let token = CancellationToken::new();
        (
            Self {
                token: token.clone(),
            },
            token,
        )
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error("Failed to initialize controller framework: {0}")]
    InitializationError(String),

    #[error("Failed to subscribe to controller notifications: {0}")]
    SubscriptionError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum HapticsError {
    #[error("Controller {0} has no force feedback support")]
    Unsupported(NativeId),

    #[error("Controller {0} is no longer connected")]
    Disconnected(NativeId),

    #[error("Haptics engine for {0} is not running")]
    EngineStopped(NativeId),

    #[error("Haptics engine failed to start: {0}")]
    EngineStart(String),

    #[error("Failed to create pattern player: {0}")]
    PlayerCreation(String),

    #[error("Pattern player command failed: {0}")]
    Playback(String),
}

// Motor a haptic channel drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HapticChannel {
    Weak,
    Strong,
}

// One continuous event of a pattern
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HapticEvent {
    pub channel: HapticChannel,
    pub intensity: f32,
}

/// Continuous two-motor rumble
///
/// `duration` of `None` plays until the player is stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct HapticPattern {
    pub events: Vec<HapticEvent>,
    pub duration: Option<Duration>,
}

impl HapticPattern {
    /// Builds the pattern for a weak/strong rumble, dropping silent channels
    pub fn rumble(weak_magnitude: f32, strong_magnitude: f32, duration: Duration) -> Self {
        let events = [
            (HapticChannel::Weak, weak_magnitude),
            (HapticChannel::Strong, strong_magnitude),
        ]
        .into_iter()
        .map(|(channel, magnitude)| HapticEvent {
            channel,
            intensity: if magnitude.is_finite() {
                magnitude.clamp(0.0, 1.0)
            } else {
                0.0
            },
        })
        .filter(|event| event.intensity > 0.0)
        .collect();

        Self {
            events,
            duration: if duration.is_zero() {
                None
            } else {
                Some(duration)
            },
        }
    }

    pub fn is_silent(&self) -> bool {
        self.events.is_empty()
    }

    pub fn intensity(&self, channel: HapticChannel) -> f32 {
        self.events
            .iter()
            .filter(|event| event.channel == channel)
            .map(|event| event.intensity)
            .fold(0.0, f32::max)
    }
}

/// Native controller framework
///
/// Every method must return promptly; the frame loop calls `snapshot` for each
/// controller every frame.
pub trait ControllerFramework: Send + Sync + fmt::Debug {
    /// Starts delivering attach/detach notifications into `sender`
    fn subscribe(&self, sender: NotificationSender) -> Result<Subscription, FrameworkError>;

    /// Controllers connected right now
    fn connected(&self) -> Vec<NativeController>;

    /// Current input state, `None` once `id` no longer refers to a live controller
    fn snapshot(&self, id: NativeId) -> Option<InputSnapshot>;

    fn create_haptics_engine(&self, id: NativeId) -> Result<Box<dyn HapticsEngine>, HapticsError>;
}

pub trait HapticsEngine: Send + fmt::Debug {
    fn start(&mut self) -> Result<(), HapticsError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    fn create_player(
        &mut self,
        pattern: &HapticPattern,
    ) -> Result<Box<dyn PatternPlayer>, HapticsError>;
}

pub trait PatternPlayer: Send + fmt::Debug {
    fn start(&mut self) -> Result<(), HapticsError>;

    fn stop(&mut self) -> Result<(), HapticsError>;

    /// Native completion, for players that end on their own
    fn is_finished(&self) -> bool {
        false
    }
}
