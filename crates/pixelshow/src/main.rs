//! PixelShow - synchronized phone light shows
//!
//! Runs a complete show inside one process: an in-memory broadcast bus, the
//! controller session, a set of simulated devices and a sensor bridge fed
//! from stdin.

#![warn(missing_docs)]

mod cli;
mod config;
mod logging_setup;

use anyhow::{Context, Result};
use cli::{Args, USAGE};
use config::ShowConfig;
use pixelshow_control::{
    run_sensor_bridge, Capabilities, DeviceClient, InMemoryBus, Role, SessionCoordinator,
};
use pixelshow_core::{
    Clock, Color, DeviceIdentity, EffectCommand, FileIdentityStore, Fill, MemoryIdentityStore,
    ModeFlag, PhaseAssigner, RenderFrame, SignalConditioner, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Period of the effect started by the simulation
const SHOW_PERIOD_MS: u32 = 800;

/// Intensity of the effect started by the simulation
const SHOW_INTENSITY: f32 = 0.6;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;
    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = ShowConfig::load().with_env_overrides(|key| std::env::var(key).ok());
    if let Some(devices) = args.devices {
        config.devices = devices;
    }
    let _log_guard = logging_setup::init(&config.logging)?;
    info!(
        "PixelShow starting: event {}, {} devices, {}",
        config.event_id, config.devices, args.effect
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = Arc::new(InMemoryBus::new());
    let mut coordinator = SessionCoordinator::new(bus.clone(), clock.clone());
    let session = coordinator
        .create_or_join_session(&config.event_id)
        .await
        .context("Controller could not join the event")?;
    if let Err(e) = session.track_presence(Role::Bridge).await {
        warn!("Bridge presence not announced: {}", e);
    }

    let mut devices = Vec::with_capacity(config.devices);
    for index in 0..config.devices {
        let device = DeviceClient::join(
            bus.clone(),
            &config.event_id,
            device_identity(index),
            clock.clone(),
            Capabilities::default(),
            config.device_config(),
        )
        .await
        .with_context(|| format!("Device {} could not join", index))?;
        devices.push(device);
    }
    info!(
        "{} devices connected ({} total in roster)",
        session.roster().count_role(Role::Client),
        session.get_connected_count()
    );

    if args.music {
        if let Err(e) = session.set_mode(ModeFlag::audio_reactive()).await {
            warn!("Audio-reactive mode not sent: {}", e);
        }
    }

    let effect = EffectCommand::new(
        args.effect,
        Color::rgb(255, 0, 128),
        Color::rgb(0, 200, 255),
        SHOW_PERIOD_MS,
        SHOW_INTENSITY,
    );
    if let Err(e) = session
        .send_effect_in(&effect, Duration::from_millis(config.start_lead_ms))
        .await
    {
        warn!("Effect not sent: {}", e);
    }

    let mut conditioner = SignalConditioner::new(config.signal_config());
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = run_sensor_bridge(stdin, &mut conditioner, session) => {
            let stats = result.context("Reading sensor input failed")?;
            info!(
                "Sensor input done: {} lines, {} dropped, {} frames published, {} failed",
                stats.lines, stats.dropped, stats.published, stats.failures
            );
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    println!("{:<40} {:>5}  {:<10} frame", "device", "phase", "state");
    for device in &devices {
        let identity = device.identity();
        println!(
            "{:<40} {:>5}  {:<10} {}",
            identity.device_key,
            identity.phase,
            format!("{:?}", device.state()),
            describe(&device.current_frame())
        );
    }

    if let Err(e) = session.send_stop().await {
        warn!("Stop not sent: {}", e);
    }
    for device in devices {
        device.leave().await;
    }
    coordinator.leave().await;
    info!("PixelShow finished");
    Ok(())
}

/// The first device keeps its identity across runs; the others are fresh
fn device_identity(index: usize) -> DeviceIdentity {
    if index == 0 {
        match FileIdentityStore::default_location() {
            Ok(store) => return PhaseAssigner::new(store).identity(),
            Err(e) => warn!("No persistent identity store: {}", e),
        }
    }
    PhaseAssigner::new(MemoryIdentityStore::new()).identity()
}

fn describe(frame: &RenderFrame) -> String {
    let fill = match frame.fill {
        Fill::Color(color) => color.to_string(),
        Fill::Gradient {
            angle_deg,
            from,
            to,
        } => format!("{} -> {} @ {:.0}deg", from, to, angle_deg),
    };
    if frame.indicator {
        format!("{} (torch on)", fill)
    } else {
        fill
    }
}
