#![allow(dead_code)]

use parking_lot::Mutex;
use pixelshow_control::{
    Capabilities, CapabilityError, ClipPlayer, DeviceClient, DeviceConfig, Indicator,
    InMemoryBus, NoopClipPlayer, NoopIndicator,
};
use pixelshow_core::{DeviceIdentity, ManualClock, RenderFrame};
use std::sync::Arc;
use std::time::Duration;

pub const EVENT: &str = "FIESTA-2025";

/// Upper bound for anything a test waits on
pub const PATIENCE: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct RecordingIndicator {
    pub calls: Mutex<Vec<bool>>,
}

impl Indicator for RecordingIndicator {
    fn set_indicator(&self, on: bool) -> Result<(), CapabilityError> {
        self.calls.lock().push(on);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingClips {
    pub played: Mutex<Vec<u32>>,
}

impl ClipPlayer for RecordingClips {
    fn play_clip(&self, id: u32) -> Result<(), CapabilityError> {
        self.played.lock().push(id);
        Ok(())
    }
}

pub fn identity(key: &str, phase: u32) -> DeviceIdentity {
    DeviceIdentity {
        device_key: key.to_string(),
        phase,
    }
}

pub fn fast_config() -> DeviceConfig {
    DeviceConfig {
        frame_interval_ms: 2,
        ..DeviceConfig::default()
    }
}

pub async fn join_device(
    bus: &Arc<InMemoryBus>,
    key: &str,
    phase: u32,
    clock: &ManualClock,
    capabilities: Capabilities,
) -> DeviceClient {
    DeviceClient::join(
        bus.clone(),
        EVENT,
        identity(key, phase),
        Arc::new(clock.clone()),
        capabilities,
        fast_config(),
    )
    .await
    .expect("device joins")
}

pub fn plain_capabilities() -> Capabilities {
    Capabilities::new(Arc::new(NoopIndicator), Arc::new(NoopClipPlayer))
}

/// Wait until a rendered frame satisfies `pred`
pub async fn wait_for_frame(device: &DeviceClient, pred: impl FnMut(&RenderFrame) -> bool) {
    let mut frames = device.frames();
    tokio::time::timeout(PATIENCE, frames.wait_for(pred))
        .await
        .expect("frame in time")
        .expect("render loop alive");
}

/// Poll `cond` until it holds
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + PATIENCE;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
