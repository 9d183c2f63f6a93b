//! The device render loop.
//!
//! One task per device ticks the shared [`EffectEngine`] at a fixed frame
//! interval, forwards indicator changes and publishes the frame on a watch
//! channel. Effect changes never restart the loop; the engine swaps state
//! under the lock and the next tick renders it.

use crate::capability::IndicatorDriver;
use parking_lot::Mutex;
use pixelshow_core::{Clock, Color, EffectEngine, Fill, RenderFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Render one frame at the clock's current time.
///
/// When the indicator is degraded, a manually requested "on" is shown as a
/// white screen instead.
pub fn render_frame(
    engine: &Mutex<EffectEngine>,
    clock: &dyn Clock,
    indicator: &mut IndicatorDriver,
) -> RenderFrame {
    let mut frame = engine.lock().tick(clock.now_ms());
    indicator.apply(frame.indicator);
    if indicator.is_degraded() && frame.indicator_manual && frame.indicator {
        frame.fill = Fill::Color(Color::white());
    }
    frame
}

/// A running render loop
pub struct RenderLoop {
    frames: watch::Receiver<RenderFrame>,
    handle: JoinHandle<()>,
}

impl RenderLoop {
    /// Start rendering every `frame_interval`
    pub fn spawn(
        engine: Arc<Mutex<EffectEngine>>,
        clock: Arc<dyn Clock>,
        mut indicator: IndicatorDriver,
        frame_interval: Duration,
    ) -> Self {
        let (tx, frames) = watch::channel(RenderFrame::idle());
        let period = frame_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let frame = render_frame(&engine, clock.as_ref(), &mut indicator);
                tx.send_replace(frame);
            }
        });
        debug!("Render loop started ({:?} per frame)", period);

        Self { frames, handle }
    }

    /// Subscribe to rendered frames
    pub fn frames(&self) -> watch::Receiver<RenderFrame> {
        self.frames.clone()
    }

    /// Most recent frame
    pub fn current(&self) -> RenderFrame {
        *self.frames.borrow()
    }

    /// Stop rendering
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
