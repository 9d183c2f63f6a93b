//! Sensor bridge: newline-delimited samples in, sensor frames out.

use crate::error::Result;
use crate::session::ControllerSession;
use pixelshow_core::SignalConditioner;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, trace, warn};

/// Counters of a bridge run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Lines read
    pub lines: u64,
    /// Lines that were not a finite number
    pub dropped: u64,
    /// Frames published
    pub published: u64,
    /// Publishes that failed or timed out
    pub failures: u64,
}

/// Pump samples from `reader` through `conditioner` onto the session until
/// EOF. Publish failures are logged and counted, never fatal; only a read
/// error ends the bridge early.
pub async fn run_sensor_bridge<R>(
    reader: R,
    conditioner: &mut SignalConditioner,
    session: &ControllerSession,
) -> Result<BridgeStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = BridgeStats::default();
    let mut lines = reader.lines();
    info!("Sensor bridge running on {}", session.event_id());

    while let Some(line) = lines.next_line().await? {
        stats.lines += 1;
        let value = match line.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                trace!("Dropping sample {:?}", line);
                stats.dropped += 1;
                continue;
            }
        };

        let Some(frame) = conditioner.ingest_value(value) else {
            continue;
        };
        match session.publish_sensor_frame(frame).await {
            Ok(()) => stats.published += 1,
            Err(e) => {
                warn!("Sensor frame not published: {}", e);
                stats.failures += 1;
            }
        }
    }

    debug!("Sensor bridge reached EOF: {:?}", stats);
    Ok(stats)
}
