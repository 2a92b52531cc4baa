use joypad_bridge::input::{ChannelInputRegistry, DeviceId, EngineEvent, JoyAxis, JoyButton};
use joypad_bridge::joypad::{ControllerHandle, JoypadManager, JoypadSettings};
use joypad_bridge::native::virtual_pad::VirtualFramework;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

fn bridge() -> (
    Arc<VirtualFramework>,
    Arc<ChannelInputRegistry>,
    JoypadManager,
    mpsc::Receiver<EngineEvent>,
) {
    let framework = Arc::new(VirtualFramework::new());
    let (tx, rx) = mpsc::channel(256);
    let registry = Arc::new(ChannelInputRegistry::new(tx, 4));
    let manager = JoypadManager::new(
        framework.clone(),
        registry.clone(),
        JoypadSettings::default(),
    );
    (framework, registry, manager, rx)
}

fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn controllers_plugged_before_start_are_enumerated() {
    let (framework, registry, mut manager, mut rx) = bridge();
    framework.plug("Left", false);
    framework.plug("Right", true);

    manager.start_observing().unwrap();
    assert!(drain(&mut rx).is_empty());

    manager.start_processing().unwrap();
    manager.process_joypads();

    let connected: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::JoypadConnected { device, name, .. } => Some((device, name)),
            _ => None,
        })
        .collect();
    assert_eq!(
        connected,
        vec![
            (DeviceId(0), "Left".to_string()),
            (DeviceId(1), "Right".to_string())
        ]
    );
    assert_eq!(registry.connected_devices(), vec![DeviceId(0), DeviceId(1)]);
}

#[test]
fn stick_motion_is_forwarded_with_engine_orientation() {
    let (framework, _registry, mut manager, mut rx) = bridge();
    manager.start_observing().unwrap();
    manager.start_processing().unwrap();

    let id = framework.plug("Pad", false);
    manager.process_joypads();
    drain(&mut rx);

    framework.set_axis(id, JoyAxis::LeftY, 1.0);
    manager.process_joypads();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        EngineEvent::Axis { axis, value, .. } => {
            assert_eq!(*axis, JoyAxis::LeftY);
            assert!((*value + 1.0).abs() < 1e-6);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn reconnect_reuses_freed_device_id() {
    let (framework, _registry, mut manager, mut rx) = bridge();
    manager.start_observing().unwrap();
    manager.start_processing().unwrap();

    let first = framework.plug("Pad", false);
    manager.process_joypads();
    framework.unplug(first);
    framework.plug("Pad again", false);
    manager.process_joypads();

    let devices: Vec<DeviceId> = drain(&mut rx).iter().map(EngineEvent::device).collect();
    assert_eq!(devices, vec![DeviceId(0), DeviceId(0), DeviceId(0)]);
    assert_eq!(manager.handles().len(), 1);
}

#[test]
fn at_most_one_player_through_a_vibration_burst() {
    let (framework, registry, mut manager, _rx) = bridge();
    manager.start_observing().unwrap();
    manager.start_processing().unwrap();
    let id = framework.plug("Rumbler", true);
    manager.process_joypads();

    for step in 0..20u32 {
        let magnitude = (step % 5) as f32 / 4.0;
        registry.request_vibration(DeviceId(0), magnitude, 1.0 - magnitude, Duration::ZERO);
        manager.process_joypads();
        assert!(framework.active_players(id) <= 1);
    }
    assert_eq!(framework.active_players(id), 1);
}

#[test]
fn timed_rumble_ends_by_itself() {
    let (framework, registry, mut manager, _rx) = bridge();
    manager.start_observing().unwrap();
    manager.start_processing().unwrap();
    let id = framework.plug("Rumbler", true);
    manager.process_joypads();

    registry.request_vibration(DeviceId(0), 1.0, 1.0, Duration::from_millis(10));
    manager.process_joypads();
    assert_eq!(framework.active_players(id), 1);

    std::thread::sleep(Duration::from_millis(20));
    manager.process_joypads();
    assert_eq!(framework.active_players(id), 0);

    // The finished request is not replayed
    manager.process_joypads();
    assert_eq!(framework.players_created(id), 1);
}

#[test]
fn placeholder_handle_is_ignored() {
    let (_framework, _registry, mut manager, _rx) = bridge();
    manager.start_observing().unwrap();
    manager.start_processing().unwrap();

    let placeholder = ControllerHandle::placeholder();
    manager.joypad_vibration_start(&placeholder, 1.0, 1.0, Duration::ZERO, 1);
    manager.joypad_vibration_stop(&placeholder, 2);
    assert!(!placeholder.is_vibrating());
}

#[test]
fn dropping_the_manager_disconnects_everything() {
    let (framework, registry, mut manager, mut rx) = bridge();
    manager.start_observing().unwrap();
    manager.start_processing().unwrap();
    framework.plug("Pad", true);
    manager.process_joypads();
    drain(&mut rx);

    drop(manager);
    assert!(registry.connected_devices().is_empty());
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [EngineEvent::JoypadDisconnected { .. }]
    ));
    assert_eq!(framework.subscriber_count(), 0);
}

#[test]
fn press_release_sequence_keeps_order() {
    let (framework, _registry, mut manager, mut rx) = bridge();
    manager.start_observing().unwrap();
    manager.start_processing().unwrap();
    let id = framework.plug("Pad", false);
    manager.process_joypads();
    drain(&mut rx);

    framework.set_button(id, JoyButton::A, true);
    manager.process_joypads();
    framework.set_button(id, JoyButton::A, false);
    manager.process_joypads();

    let presses: Vec<bool> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::Button { pressed, .. } => Some(pressed),
            _ => None,
        })
        .collect();
    assert_eq!(presses, vec![true, false]);
}

#[test]
fn notifications_from_another_thread_keep_order() {
    let (framework, registry, mut manager, mut rx) = bridge();
    manager.start_observing().unwrap();
    manager.start_processing().unwrap();

    let remote = framework.clone();
    let hotplug = thread::spawn(move || {
        let first = remote.plug("First", false);
        thread::sleep(Duration::from_millis(2));
        remote.plug("Second", true);
        thread::sleep(Duration::from_millis(2));
        remote.unplug(first);
        thread::sleep(Duration::from_millis(2));
        remote.plug("Third", false);
    });

    while !hotplug.is_finished() {
        manager.process_joypads();
        thread::sleep(Duration::from_millis(1));
    }
    hotplug.join().unwrap();
    manager.process_joypads();

    let lifecycle: Vec<(bool, DeviceId)> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::JoypadConnected { device, .. } => Some((true, device)),
            EngineEvent::JoypadDisconnected { device, .. } => Some((false, device)),
            _ => None,
        })
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            (true, DeviceId(0)),
            (true, DeviceId(1)),
            (false, DeviceId(0)),
            (true, DeviceId(0)),
        ]
    );
    assert_eq!(registry.connected_devices(), vec![DeviceId(0), DeviceId(1)]);
    let names: Vec<String> = manager
        .handles()
        .iter()
        .map(|handle| handle.name().to_string())
        .collect();
    assert_eq!(names, vec!["Third".to_string(), "Second".to_string()]);
}
