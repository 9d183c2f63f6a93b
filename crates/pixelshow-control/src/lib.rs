//! PixelShow Control - Session and Device Runtime
//!
//! Async plumbing around `pixelshow-core`:
//! - **Bus**: broadcast/presence transport abstraction and an in-memory bus
//! - **Session**: the controller's single active session and its roster
//! - **Device**: listener task + render loop per device
//! - **Capabilities**: best-effort torch and clip playback
//! - **Sensor bridge**: raw sample lines to published sensor frames
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pixelshow_control::{InMemoryBus, SessionCoordinator};
//! use pixelshow_core::{Color, EffectCommand, SystemClock};
//! use std::sync::Arc;
//!
//! # async fn run() -> pixelshow_control::Result<()> {
//! let bus = Arc::new(InMemoryBus::new());
//! let mut coordinator = SessionCoordinator::new(bus, Arc::new(SystemClock));
//! let session = coordinator.create_or_join_session("FIESTA-2025").await?;
//! session.send_effect(&EffectCommand::solid(Color::rgb(255, 0, 0))).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Transport and sessions
pub mod bus;
pub mod error;
pub mod session;

// Device runtime
pub mod capability;
pub mod device;
pub mod render_loop;

pub mod sensor;

// Re-exports
pub use bus::{BroadcastBus, InMemoryBus, PresenceMeta, PresenceState, Role, Subscription};
pub use capability::{
    Capabilities, CapabilityError, ClipPlayer, Indicator, IndicatorDriver, NoopClipPlayer,
    NoopIndicator, UnavailableIndicator,
};
pub use device::{DeviceClient, DeviceConfig};
pub use error::{ControlError, Result};
pub use render_loop::RenderLoop;
pub use sensor::{run_sensor_bridge, BridgeStats};
pub use session::{ControllerSession, PresenceRoster, SessionCoordinator};
