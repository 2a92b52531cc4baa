//! Bridges native game controllers and force feedback into an engine's
//! generic input layer.

pub mod config;
pub mod input;
pub mod joypad;
pub mod native;
