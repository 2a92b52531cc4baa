use chrono::Local;
use color_eyre::{eyre::eyre, Result};
use joypad_bridge::config::{Backend, BridgeConfig};
use joypad_bridge::input::{ChannelInputRegistry, EngineEvent, JoyButton};
use joypad_bridge::joypad::JoypadManager;
use joypad_bridge::native::gilrs_backend::GilrsFramework;
use joypad_bridge::native::virtual_pad::VirtualFramework;
use joypad_bridge::native::ControllerFramework;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

// Rumble played when A is pressed
const FEEDBACK_RUMBLE: Duration = Duration::from_millis(150);

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let config_path = BridgeConfig::default_path();
    let config = BridgeConfig::load_or_create(&config_path).await?;
    setup_logging(config.log_level()?);
    info!("Using config at {}", config_path.display());

    let framework = create_framework(&config)?;

    let (event_tx, event_rx) = mpsc::channel(1000);
    let registry = Arc::new(ChannelInputRegistry::new(
        event_tx,
        config.joypad.max_devices,
    ));

    let mut manager = JoypadManager::new(framework, registry.clone(), config.joypad.clone());
    manager
        .start_observing()
        .map_err(|e| eyre!("Failed to observe controllers: {}", e))?;
    manager
        .start_processing()
        .map_err(|e| eyre!("Failed to start processing: {}", e))?;

    let consumer = tokio::spawn(consume_engine_events(event_rx, registry));

    run_frame_loop(&mut manager, config.frame_interval_ms).await;

    manager.finish_observing();
    drop(manager);
    consumer.abort();
    info!("joypad-bridge stopped");
    Ok(())
}

fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn create_framework(config: &BridgeConfig) -> Result<Arc<dyn ControllerFramework>> {
    match config.backend {
        Backend::Gilrs => {
            let framework = GilrsFramework::new(Duration::from_millis(1))
                .map_err(|e| eyre!("Failed to start gilrs backend: {}", e))?;
            Ok(Arc::new(framework))
        }
        Backend::Virtual => {
            let framework = VirtualFramework::new();
            for pad in &config.virtual_pads {
                framework.plug(&pad.name, pad.force_feedback);
            }
            Ok(Arc::new(framework))
        }
    }
}

async fn run_frame_loop(manager: &mut JoypadManager, frame_interval_ms: u64) {
    info!("Starting frame loop with {}ms interval", frame_interval_ms);
    let mut interval_timer = tokio::time::interval(Duration::from_millis(frame_interval_ms));
    interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut frames = 0u64;
    let mut events = 0usize;
    let mut last_stats_time = Local::now();
    let stats_interval = chrono::Duration::seconds(30);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                let stats = manager.process_joypads();
                frames += 1;
                events += stats.events;
                if stats.lost > 0 {
                    info!("{} controllers lost this frame", stats.lost);
                }

                let now = Local::now();
                if now - last_stats_time > stats_interval {
                    info!(
                        "Frame stats: {} frames, {} input events in {} seconds, {} joypads connected",
                        frames,
                        events,
                        (now - last_stats_time).num_seconds(),
                        manager.handles().len()
                    );
                    frames = 0;
                    events = 0;
                    last_stats_time = now;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }
}

async fn consume_engine_events(
    mut events: mpsc::Receiver<EngineEvent>,
    registry: Arc<ChannelInputRegistry>,
) {
    while let Some(event) = events.recv().await {
        match &event {
            EngineEvent::JoypadConnected {
                device,
                name,
                capabilities,
                timestamp,
            } => info!(
                "[{}] {} connected: {} (force feedback: {})",
                timestamp.format("%H:%M:%S.%3f"),
                device,
                name,
                capabilities.force_feedback
            ),
            EngineEvent::JoypadDisconnected { device, timestamp } => info!(
                "[{}] {} disconnected",
                timestamp.format("%H:%M:%S.%3f"),
                device
            ),
            EngineEvent::Button {
                device,
                button,
                pressed,
                timestamp,
            } => {
                info!(
                    "[{}] {} {:?} {}",
                    timestamp.format("%H:%M:%S.%3f"),
                    device,
                    button,
                    if *pressed { "pressed" } else { "released" }
                );
                if *button == JoyButton::A && *pressed {
                    registry.request_vibration(*device, 0.3, 0.6, FEEDBACK_RUMBLE);
                }
            }
            EngineEvent::Axis {
                device,
                axis,
                value,
                ..
            } => debug!("{} {:?} = {:.3}", device, axis, value),
        }
    }
    debug!("Engine event channel closed");
}
