//! Native state to engine events
//!
//! Raw snapshots are first normalized (deadzone, Y inversion) and then diffed
//! against the last state that was reported for the same handle. Only the
//! differences reach the engine.

use tracing::debug;

use crate::input::{JoyAxis, JoyButton};
use crate::native::InputSnapshot;

// Smallest processed axis movement worth an event
const AXIS_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, PartialEq)]
pub enum InputChange {
    Button { button: JoyButton, pressed: bool },
    Axis { axis: JoyAxis, value: f32 },
}

#[derive(Debug, Clone, Copy)]
pub struct TranslateSettings {
    pub axis_deadzone: f32,
    pub invert_y_axis: bool,
}

/// Applies deadzone and orientation to every axis of `raw`
pub fn normalize(raw: &InputSnapshot, settings: &TranslateSettings) -> InputSnapshot {
    let mut normalized = InputSnapshot::default();
    for button in JoyButton::ALL {
        normalized.buttons.insert(button, raw.is_pressed(button));
    }
    for axis in JoyAxis::ALL {
        let value = raw.axis(axis);
        let value = if value.is_finite() { value } else { 0.0 };
        let value = if axis.is_trigger() {
            apply_deadzone(value.clamp(0.0, 1.0), settings.axis_deadzone)
        } else {
            let value = apply_deadzone(value.clamp(-1.0, 1.0), settings.axis_deadzone);
            // Native up is positive, engine up is negative
            if settings.invert_y_axis && axis.is_vertical_stick() {
                -value
            } else {
                value
            }
        };
        normalized.axes.insert(axis, value);
    }
    normalized
}

/// Changes needed to bring the engine from `previous` to `current`
pub fn diff(previous: &InputSnapshot, current: &InputSnapshot) -> Vec<InputChange> {
    let mut changes = Vec::new();

    for button in JoyButton::ALL {
        let pressed = current.is_pressed(button);
        if pressed != previous.is_pressed(button) {
            changes.push(InputChange::Button { button, pressed });
        }
    }

    for axis in JoyAxis::ALL {
        let value = current.axis(axis);
        let delta = value - previous.axis(axis);
        if delta.abs() > AXIS_EPSILON {
            debug!(
                "Axis {:?}: {:.4} -> {:.4} (delta: {:.4})",
                axis,
                previous.axis(axis),
                value,
                delta
            );
            changes.push(InputChange::Axis { axis, value });
        }
    }

    changes
}

// Rescales so the usable range starts at the deadzone edge
fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if deadzone <= 0.0 {
        value
    } else if value.abs() < deadzone {
        0.0
    } else {
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        sign * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}
