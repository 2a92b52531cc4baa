//! Engine-side input boundary
//!
//! Everything the joypad bridge reports flows through [`InputRegistry`]. The
//! registry is owned by the engine; this crate only calls into it. The
//! [`registry::ChannelInputRegistry`] implementation forwards reports as
//! [`EngineEvent`]s over a tokio channel and keeps the vibration request table
//! the frame loop reads back.

pub mod registry;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use registry::{ChannelInputRegistry, VibrationClock};

/// Engine-assigned joypad identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Id carried by placeholder handles that were never bound to a device
    pub const UNASSIGNED: DeviceId = DeviceId(u32::MAX);
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::UNASSIGNED {
            write!(f, "joypad#unassigned")
        } else {
            write!(f, "joypad#{}", self.0)
        }
    }
}

// Standard layout buttons, named by position on the pad
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JoyButton {
    A,
    B,
    X,
    Y,
    Back,
    Guide,
    Start,
    LeftStick,
    RightStick,
    LeftShoulder,
    RightShoulder,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    Misc1,
}

impl JoyButton {
    pub const ALL: [JoyButton; 16] = [
        JoyButton::A,
        JoyButton::B,
        JoyButton::X,
        JoyButton::Y,
        JoyButton::Back,
        JoyButton::Guide,
        JoyButton::Start,
        JoyButton::LeftStick,
        JoyButton::RightStick,
        JoyButton::LeftShoulder,
        JoyButton::RightShoulder,
        JoyButton::DPadUp,
        JoyButton::DPadDown,
        JoyButton::DPadLeft,
        JoyButton::DPadRight,
        JoyButton::Misc1,
    ];
}

// Analog axes; sticks are -1..1, triggers 0..1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JoyAxis {
    LeftX,
    LeftY,
    RightX,
    RightY,
    TriggerLeft,
    TriggerRight,
}

impl JoyAxis {
    pub const ALL: [JoyAxis; 6] = [
        JoyAxis::LeftX,
        JoyAxis::LeftY,
        JoyAxis::RightX,
        JoyAxis::RightY,
        JoyAxis::TriggerLeft,
        JoyAxis::TriggerRight,
    ];

    pub fn is_trigger(self) -> bool {
        matches!(self, JoyAxis::TriggerLeft | JoyAxis::TriggerRight)
    }

    pub fn is_vertical_stick(self) -> bool {
        matches!(self, JoyAxis::LeftY | JoyAxis::RightY)
    }
}

/// Capabilities reported alongside a connect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub force_feedback: bool,
}

/// A vibration the engine wants played on one joypad
///
/// `duration` of zero means "until stopped". Both magnitudes at zero is a stop
/// request. `timestamp` comes from a [`VibrationClock`] and only ever grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VibrationRequest {
    pub weak_magnitude: f32,
    pub strong_magnitude: f32,
    pub duration: Duration,
    pub timestamp: u64,
}

impl VibrationRequest {
    pub fn is_stop(&self) -> bool {
        self.weak_magnitude <= 0.0 && self.strong_magnitude <= 0.0
    }
}

// Events forwarded to the engine by ChannelInputRegistry
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    JoypadConnected {
        device: DeviceId,
        name: String,
        capabilities: Capabilities,
        timestamp: DateTime<Local>,
    },
    JoypadDisconnected {
        device: DeviceId,
        timestamp: DateTime<Local>,
    },
    Button {
        device: DeviceId,
        button: JoyButton,
        pressed: bool,
        timestamp: DateTime<Local>,
    },
    Axis {
        device: DeviceId,
        axis: JoyAxis,
        value: f32,
        timestamp: DateTime<Local>,
    },
}

impl EngineEvent {
    pub fn device(&self) -> DeviceId {
        match self {
            EngineEvent::JoypadConnected { device, .. }
            | EngineEvent::JoypadDisconnected { device, .. }
            | EngineEvent::Button { device, .. }
            | EngineEvent::Axis { device, .. } => *device,
        }
    }
}

/// The engine's generic input layer, as seen from the platform bridge
///
/// Implementations must be callable from the frame thread without blocking.
pub trait InputRegistry: Send + Sync + fmt::Debug {
    /// Lowest device id not currently connected, if any is left
    fn unused_device_id(&self) -> Option<DeviceId>;

    fn report_joypad_connected(&self, device: DeviceId, name: &str, capabilities: Capabilities);

    fn report_joypad_disconnected(&self, device: DeviceId);

    fn report_button_event(&self, device: DeviceId, button: JoyButton, pressed: bool);

    fn report_axis_event(&self, device: DeviceId, axis: JoyAxis, value: f32);

    /// Latest vibration requested for `device`
    fn vibration_request(&self, device: DeviceId) -> Option<VibrationRequest>;
}
