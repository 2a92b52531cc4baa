//! Connection Observer - controller attach/detach tracking
//!
//! The native framework pushes attach/detach notifications into a mailbox from
//! its own thread. The observer drains that mailbox on the frame thread, in
//! arrival order, and keeps the device id to [`ControllerHandle`] map.

use statum::{machine, state};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::error::JoypadError;
use super::handle::ControllerHandle;
use crate::input::{DeviceId, InputRegistry};
use crate::native::{ControllerFramework, NativeController, NativeId, Notification, Subscription};

const UNNAMED_JOYPAD: &str = "Unknown Joypad";

// Observer lifecycle: Idle --start_observing--> Observing --start_processing--> Processing
#[state]
#[derive(Debug, Clone)]
pub enum ObserverState {
    Idle,
    Observing,
    Processing,
}

#[machine]
#[derive(Debug)]
pub struct ConnectionObserver<S: ObserverState> {
    framework: Arc<dyn ControllerFramework>,
    registry: Arc<dyn InputRegistry>,

    // Native notification context pushes here, the frame thread drains
    mailbox_sender: mpsc::UnboundedSender<Notification>,
    mailbox: mpsc::UnboundedReceiver<Notification>,

    subscription: Option<Subscription>,

    handles: BTreeMap<DeviceId, Arc<ControllerHandle>>,
}

// Implementation of methods available in all states
impl<S: ObserverState> ConnectionObserver<S> {
    pub fn handle(&self, device: DeviceId) -> Option<Arc<ControllerHandle>> {
        self.handles.get(&device).cloned()
    }

    pub fn handles(&self) -> impl Iterator<Item = &Arc<ControllerHandle>> {
        self.handles.values()
    }

    pub fn connected_count(&self) -> usize {
        self.handles.len()
    }

    fn device_for(&self, native: NativeId) -> Option<DeviceId> {
        self.handles
            .values()
            .find(|handle| handle.native() == Some(native))
            .map(|handle| handle.device())
    }

    fn attach(&mut self, mut controller: NativeController) -> Result<DeviceId, JoypadError> {
        if let Some(device) = self.device_for(controller.id) {
            debug!(
                "Controller {} already tracked as {}, ignoring attach",
                controller.id, device
            );
            return Ok(device);
        }

        if controller.name.trim().is_empty() {
            controller.name = UNNAMED_JOYPAD.to_string();
        }

        let device = self
            .registry
            .unused_device_id()
            .ok_or_else(|| JoypadError::NoFreeDeviceId(controller.name.clone()))?;

        let handle = Arc::new(ControllerHandle::new(device, &controller));
        self.registry
            .report_joypad_connected(device, handle.name(), handle.capabilities());
        self.handles.insert(device, handle);
        info!(
            "Joypad {} attached as {} (force feedback: {})",
            controller.name, device, controller.force_feedback
        );
        Ok(device)
    }

    /// Forgets the handle bound to `native` and unbinds it
    pub(crate) fn detach(&mut self, native: NativeId) -> Option<Arc<ControllerHandle>> {
        let Some(device) = self.device_for(native) else {
            debug!("Detach for untracked controller {}", native);
            return None;
        };
        let handle = self.handles.remove(&device)?;
        handle.unbind();
        self.registry.report_joypad_disconnected(device);
        info!("Joypad {} detached ({})", device, native);
        Some(handle)
    }

    /// Unsubscribes and unbinds every tracked handle
    pub fn finish_observing(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
            debug!("Controller notification subscription cancelled");
        }
        self.mailbox.close();
        let mut discarded = 0;
        while self.mailbox.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Discarded {} undelivered notifications", discarded);
        }

        let handles = std::mem::take(&mut self.handles);
        for (device, handle) in handles {
            handle.unbind();
            self.registry.report_joypad_disconnected(device);
        }
        info!("Connection observer finished");
    }
}

// Implementation for Idle state
impl ConnectionObserver<Idle> {
    pub fn create(
        framework: Arc<dyn ControllerFramework>,
        registry: Arc<dyn InputRegistry>,
    ) -> Self {
        debug!("Creating connection observer");
        let (mailbox_sender, mailbox) = mpsc::unbounded_channel();
        Self::new(
            framework,
            registry,
            mailbox_sender,
            mailbox,
            None,
            BTreeMap::new(),
        )
    }

    /// Registers the mailbox with the native framework
    pub fn subscribe(&mut self) -> Result<(), JoypadError> {
        if self.subscription.is_some() {
            return Ok(());
        }
        match self.framework.subscribe(self.mailbox_sender.clone()) {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                Ok(())
            }
            Err(e) => {
                error!("Failed to subscribe to controller notifications: {}", e);
                Err(e.into())
            }
        }
    }

    /// Enters the observing state once subscribed
    pub fn observe(self) -> Result<ConnectionObserver<Observing>, JoypadError> {
        if self.subscription.is_none() {
            return Err(JoypadError::InvalidStateTransition(
                "observer must be subscribed before observing".to_string(),
            ));
        }
        info!("Connection observer listening for controllers");
        Ok(self.transition())
    }
}

// Implementation for Observing state
impl ConnectionObserver<Observing> {
    /// Registers already-connected controllers, then enters steady-state processing
    ///
    /// Attach notifications queued for controllers found here are ignored when
    /// the mailbox is drained.
    pub fn start_processing(mut self) -> ConnectionObserver<Processing> {
        let controllers = self.framework.connected();
        info!("Found {} connected controllers", controllers.len());
        for controller in controllers {
            if let Err(e) = self.attach(controller) {
                warn!("Skipping controller: {}", e);
            }
        }
        debug!("Transitioning to Processing state");
        self.transition()
    }
}

// Implementation for Processing state
impl ConnectionObserver<Processing> {
    /// Applies queued attach/detach notifications in arrival order
    pub fn drain_notifications(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.mailbox.try_recv() {
                Ok(Notification::Attached(controller)) => {
                    if let Err(e) = self.attach(controller) {
                        warn!("Ignoring attached controller: {}", e);
                    }
                    applied += 1;
                }
                Ok(Notification::Detached(native)) => {
                    self.detach(native);
                    applied += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    error!("Controller notification mailbox disconnected!");
                    break;
                }
            }
        }
        if applied > 0 {
            debug!("Applied {} controller notifications", applied);
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{ChannelInputRegistry, EngineEvent};
    use crate::native::virtual_pad::VirtualFramework;

    fn observer(
        framework: &Arc<VirtualFramework>,
        max_devices: u32,
    ) -> (ConnectionObserver<Idle>, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let registry = Arc::new(ChannelInputRegistry::new(tx, max_devices));
        (ConnectionObserver::create(framework.clone(), registry), rx)
    }

    #[test]
    fn observe_requires_subscription() {
        let framework = Arc::new(VirtualFramework::new());
        let (idle, _rx) = observer(&framework, 4);
        assert!(matches!(
            idle.observe(),
            Err(JoypadError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn nothing_is_reported_before_processing() {
        let framework = Arc::new(VirtualFramework::new());
        let (mut idle, mut rx) = observer(&framework, 4);
        idle.subscribe().unwrap();
        let observing = idle.observe().unwrap();

        framework.plug("Early", false);
        assert!(rx.try_recv().is_err());
        assert_eq!(observing.connected_count(), 0);

        let mut processing = observing.start_processing();
        assert_eq!(processing.connected_count(), 1);
        // Queued attach for the enumerated pad is a duplicate
        processing.drain_notifications();
        assert_eq!(processing.connected_count(), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(EngineEvent::JoypadConnected { .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn attach_then_detach_in_order() {
        let framework = Arc::new(VirtualFramework::new());
        let (mut idle, mut rx) = observer(&framework, 4);
        idle.subscribe().unwrap();
        let mut processing = idle.observe().unwrap().start_processing();

        let id = framework.plug("Pad", true);
        framework.unplug(id);
        assert_eq!(processing.drain_notifications(), 2);
        assert_eq!(processing.connected_count(), 0);

        assert!(matches!(
            rx.try_recv(),
            Ok(EngineEvent::JoypadConnected { device: DeviceId(0), .. })
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(EngineEvent::JoypadDisconnected { device: DeviceId(0), .. })
        ));
    }

    #[test]
    fn attach_beyond_capacity_is_ignored() {
        let framework = Arc::new(VirtualFramework::new());
        let (mut idle, _rx) = observer(&framework, 1);
        idle.subscribe().unwrap();
        let mut processing = idle.observe().unwrap().start_processing();

        framework.plug("One", false);
        framework.plug("Two", false);
        processing.drain_notifications();
        assert_eq!(processing.connected_count(), 1);
    }

    #[test]
    fn unnamed_controllers_get_a_name() {
        let framework = Arc::new(VirtualFramework::new());
        let (mut idle, _rx) = observer(&framework, 4);
        idle.subscribe().unwrap();
        let mut processing = idle.observe().unwrap().start_processing();

        framework.plug("  ", false);
        processing.drain_notifications();
        let handle = processing.handle(DeviceId(0)).unwrap();
        assert_eq!(handle.name(), UNNAMED_JOYPAD);
    }

    #[test]
    fn finish_releases_everything_and_unsubscribes() {
        let framework = Arc::new(VirtualFramework::new());
        let (mut idle, mut rx) = observer(&framework, 4);
        idle.subscribe().unwrap();
        let mut processing = idle.observe().unwrap().start_processing();
        framework.plug("Pad", true);
        processing.drain_notifications();
        let handle = processing.handle(DeviceId(0)).unwrap();

        processing.finish_observing();
        assert_eq!(framework.subscriber_count(), 0);
        assert!(!handle.has_haptics_engine());

        assert!(matches!(
            rx.try_recv(),
            Ok(EngineEvent::JoypadConnected { .. })
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(EngineEvent::JoypadDisconnected { .. })
        ));
    }
}
