//! Platform joypad bridge
//!
//! Connects a native controller framework to the engine's input registry:
//!
//! 1. [`observer`] - attach/detach notifications and handle lifecycle
//! 2. [`handle`] - per-controller haptics and last reported state
//! 3. [`translate`] - native snapshots to engine button/axis events
//! 4. [`manager`] - engine entry points (frame polling, vibration)
//!
//! # Architecture
//!
//! ```text
//! Native ──[Notification]──► mailbox ──► ConnectionObserver ──► InputRegistry
//!                                              │                     ▲
//!                      JoypadManager::process_joypads() ─[deltas]────┘
//! ```
//!
//! Notifications arrive on the framework's thread and are applied on the frame
//! thread, once per `process_joypads()` call.

pub mod error;
pub mod handle;
pub mod manager;
pub mod observer;
pub mod translate;

pub use error::JoypadError;
pub use handle::{ControllerHandle, EffectStart, EffectStop};
pub use manager::{FrameStats, JoypadManager, JoypadSettings};
pub use observer::ConnectionObserver;
