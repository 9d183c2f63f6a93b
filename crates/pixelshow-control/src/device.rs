//! Device runtime.
//!
//! A [`DeviceClient`] joins an event channel, announces itself in the
//! presence set and runs two tasks: a listener that feeds decoded messages
//! into the [`EffectEngine`] in arrival order, and the [`RenderLoop`].

use crate::bus::{BroadcastBus, PresenceMeta, Role, Subscription};
use crate::capability::{Capabilities, IndicatorDriver};
use crate::error::Result;
use crate::render_loop::RenderLoop;
use parking_lot::Mutex;
use pixelshow_core::protocol;
use pixelshow_core::{
    Clock, DeviceAction, DeviceIdentity, EffectEngine, EffectState, RenderFrame,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Device runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Time between two rendered frames
    pub frame_interval_ms: u64,
    /// Bound on a single publish
    pub publish_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            publish_timeout_ms: 2_000,
        }
    }
}

impl DeviceConfig {
    /// Settings rendering at `fps` frames per second
    pub fn with_frame_rate(fps: u32) -> Self {
        Self {
            frame_interval_ms: (1000 / fps.max(1)).max(1) as u64,
            ..Self::default()
        }
    }

    /// Frame interval as a duration
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// Publish timeout as a duration
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// A device taking part in a show
pub struct DeviceClient {
    identity: DeviceIdentity,
    event_id: String,
    engine: Arc<Mutex<EffectEngine>>,
    render: RenderLoop,
    listener: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl DeviceClient {
    /// Join `event_id` and start rendering.
    ///
    /// Fails only when the subscription cannot be established. A presence
    /// failure is logged and the device keeps running unlisted.
    pub async fn join(
        bus: Arc<dyn BroadcastBus>,
        event_id: &str,
        identity: DeviceIdentity,
        clock: Arc<dyn Clock>,
        capabilities: Capabilities,
        config: DeviceConfig,
    ) -> Result<Self> {
        let subscription = Subscription::open(
            bus,
            event_id,
            &identity.device_key,
            config.publish_timeout(),
        )
        .await?;

        let meta = PresenceMeta {
            role: Role::Client,
            phase: Some(identity.phase),
            t: clock.now_ms(),
        };
        if let Err(e) = subscription.track(meta).await {
            warn!("{} could not announce presence: {}", identity.device_key, e);
        }

        let engine = Arc::new(Mutex::new(EffectEngine::new(identity.phase)));
        let render = RenderLoop::spawn(
            engine.clone(),
            clock.clone(),
            IndicatorDriver::new(capabilities.indicator.clone()),
            config.frame_interval(),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let listener = tokio::spawn(listen(
            subscription,
            engine.clone(),
            clock,
            capabilities,
            shutdown_rx,
        ));

        info!(
            "Device {} joined {} (phase {})",
            identity.device_key, event_id, identity.phase
        );

        Ok(Self {
            identity,
            event_id: event_id.to_string(),
            engine,
            render,
            listener: Some(listener),
            shutdown: Some(shutdown_tx),
        })
    }

    /// Identity of this device
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Event this device joined
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Rendered frames
    pub fn frames(&self) -> watch::Receiver<RenderFrame> {
        self.render.frames()
    }

    /// Most recently rendered frame
    pub fn current_frame(&self) -> RenderFrame {
        self.render.current()
    }

    /// Engine state
    pub fn state(&self) -> EffectState {
        self.engine.lock().state()
    }

    /// Deadline of a scheduled effect start
    pub fn pending_start(&self) -> Option<u64> {
        self.engine.lock().pending_start()
    }

    /// Leave the session: stop listening, drop presence, stop rendering
    pub async fn leave(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                warn!("Listener of {} ended abnormally: {}", self.identity.device_key, e);
            }
        }
        self.render.stop();
        info!("Device {} left {}", self.identity.device_key, self.event_id);
    }
}

impl Drop for DeviceClient {
    /// A client dropped without [`DeviceClient::leave`] still withdraws its
    /// presence: the listener is told to stop and unsubscribes on its own.
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            debug!("Device {} dropped, leaving {}", self.identity.device_key, self.event_id);
            let _ = tx.send(());
        }
    }
}

async fn listen(
    mut subscription: Subscription,
    engine: Arc<Mutex<EffectEngine>>,
    clock: Arc<dyn Clock>,
    capabilities: Capabilities,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            message = subscription.recv() => {
                let Some(envelope) = message else {
                    info!("Channel of {} closed", subscription.key());
                    break;
                };
                let inbound = protocol::decode(&envelope);
                let action = engine.lock().handle(inbound, clock.now_ms());
                if let Some(DeviceAction::PlayClip(id)) = action {
                    capabilities.play_clip(id);
                }
            }
        }
    }

    debug!("Listener of {} stopping", subscription.key());
    if let Err(e) = subscription.unsubscribe().await {
        warn!("Unsubscribe failed: {}", e);
    }
}
