//! Error definitions for the joypad bridge

use thiserror::Error;

use crate::input::DeviceId;
use crate::native::{FrameworkError, HapticsError};

/// Errors surfaced by the observer and manager
///
/// Most failures in this subsystem are logged and absorbed; only lifecycle
/// operations that the caller can react to return these.
#[derive(Debug, Error)]
pub enum JoypadError {
    /// The native framework refused an operation
    #[error("Framework error: {0}")]
    Framework(#[from] FrameworkError),

    /// Haptics failure, only ever logged by the manager
    #[error("Haptics error: {0}")]
    Haptics(#[from] HapticsError),

    /// Every engine device slot is taken
    #[error("No free device id for '{0}'")]
    NoFreeDeviceId(String),

    /// Operation on a handle the observer no longer tracks
    #[error("Unknown joypad: {0}")]
    UnknownDevice(DeviceId),

    /// Lifecycle call made in the wrong observer state
    #[error("Invalid observer transition: {0}")]
    InvalidStateTransition(String),
}
