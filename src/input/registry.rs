use chrono::Local;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    Capabilities, DeviceId, EngineEvent, InputRegistry, JoyAxis, JoyButton, VibrationRequest,
};

/// Strictly increasing microsecond ticks for vibration timestamps
#[derive(Debug)]
pub struct VibrationClock {
    origin: Instant,
    last: Mutex<u64>,
}

impl VibrationClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: Mutex::new(0),
        }
    }

    pub fn ticks_usec(&self) -> u64 {
        let elapsed = self.origin.elapsed().as_micros().min(u64::MAX as u128) as u64;
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        // Two requests inside the same microsecond still need distinct timestamps
        let next = elapsed.max(*last + 1);
        *last = next;
        next
    }
}

impl Default for VibrationClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Input registry that forwards every report over a bounded channel
///
/// Sends use `try_send`; a full or closed channel drops the event with a log
/// line instead of stalling the frame loop.
#[derive(Debug)]
pub struct ChannelInputRegistry {
    sender: mpsc::Sender<EngineEvent>,
    max_devices: u32,
    connected: Mutex<BTreeSet<DeviceId>>,
    vibrations: Mutex<HashMap<DeviceId, VibrationRequest>>,
    clock: VibrationClock,
}

impl ChannelInputRegistry {
    pub fn new(sender: mpsc::Sender<EngineEvent>, max_devices: u32) -> Self {
        info!(
            "Creating channel input registry for up to {} joypads",
            max_devices
        );
        Self {
            sender,
            max_devices,
            connected: Mutex::new(BTreeSet::new()),
            vibrations: Mutex::new(HashMap::new()),
            clock: VibrationClock::new(),
        }
    }

    /// Asks for a vibration on `device`; returns the timestamp it was filed under
    ///
    /// A zero `duration` keeps the motors running until [`Self::stop_vibration`].
    pub fn request_vibration(
        &self,
        device: DeviceId,
        weak_magnitude: f32,
        strong_magnitude: f32,
        duration: Duration,
    ) -> u64 {
        let timestamp = self.clock.ticks_usec();
        let request = VibrationRequest {
            weak_magnitude: weak_magnitude.clamp(0.0, 1.0),
            strong_magnitude: strong_magnitude.clamp(0.0, 1.0),
            duration,
            timestamp,
        };
        debug!("Vibration requested on {}: {:?}", device, request);
        self.vibrations().insert(device, request);
        timestamp
    }

    pub fn stop_vibration(&self, device: DeviceId) -> u64 {
        self.request_vibration(device, 0.0, 0.0, Duration::ZERO)
    }

    pub fn is_connected(&self, device: DeviceId) -> bool {
        self.connected().contains(&device)
    }

    pub fn connected_devices(&self) -> Vec<DeviceId> {
        self.connected().iter().copied().collect()
    }

    fn connected(&self) -> MutexGuard<'_, BTreeSet<DeviceId>> {
        self.connected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn vibrations(&self) -> MutexGuard<'_, HashMap<DeviceId, VibrationRequest>> {
        self.vibrations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forward(&self, event: EngineEvent) {
        match self.sender.try_send(event) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Engine event queue full, dropping {:?}", event);
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                error!("Engine event queue closed, dropping {:?}", event);
            }
        }
    }
}

impl InputRegistry for ChannelInputRegistry {
    fn unused_device_id(&self) -> Option<DeviceId> {
        let connected = self.connected();
        let free = (0..self.max_devices)
            .map(DeviceId)
            .find(|id| !connected.contains(id));
        free
    }

    fn report_joypad_connected(&self, device: DeviceId, name: &str, capabilities: Capabilities) {
        info!(
            "Joypad connected: {} '{}' (force feedback: {})",
            device, name, capabilities.force_feedback
        );
        self.connected().insert(device);
        self.forward(EngineEvent::JoypadConnected {
            device,
            name: name.to_string(),
            capabilities,
            timestamp: Local::now(),
        });
    }

    fn report_joypad_disconnected(&self, device: DeviceId) {
        info!("Joypad disconnected: {}", device);
        self.connected().remove(&device);
        self.vibrations().remove(&device);
        self.forward(EngineEvent::JoypadDisconnected {
            device,
            timestamp: Local::now(),
        });
    }

    fn report_button_event(&self, device: DeviceId, button: JoyButton, pressed: bool) {
        debug!("{} button {:?} pressed={}", device, button, pressed);
        self.forward(EngineEvent::Button {
            device,
            button,
            pressed,
            timestamp: Local::now(),
        });
    }

    fn report_axis_event(&self, device: DeviceId, axis: JoyAxis, value: f32) {
        debug!("{} axis {:?} = {:.4}", device, axis, value);
        self.forward(EngineEvent::Axis {
            device,
            axis,
            value,
            timestamp: Local::now(),
        });
    }

    fn vibration_request(&self, device: DeviceId) -> Option<VibrationRequest> {
        self.vibrations().get(&device).copied()
    }
}
