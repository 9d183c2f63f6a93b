//! PixelShow Core - Signal Conditioning and Effect Synchronization
//!
//! This crate contains the transport-free heart of PixelShow:
//! - Sensor signal conditioning (raw amplitude to energy + debounced beat)
//! - The per-device effect engine (solid, blink, wave, gradient)
//! - Phase assignment and persisted device identity
//! - The broadcast wire protocol
//!
//! Everything here is deterministic given a [`Clock`], which keeps effect
//! timing testable without real waits.

#![warn(missing_docs)]

pub mod clock;
pub mod color;
pub mod effect;
pub mod engine;
pub mod error;
pub mod logging;
pub mod phase;
pub mod protocol;
pub mod signal;

// --- Re-exports grouped by category ---

// Time & color
pub use clock::{Clock, ManualClock, SystemClock};
pub use color::Color;

// Effects
pub use effect::{EffectCommand, EffectKind, ModeFlag};
pub use engine::{
    DeviceAction, EffectEngine, EffectState, Fill, RenderFrame, FLASH_DURATION_MS,
    MAX_SCHEDULE_LOOKAHEAD_MS,
};

// Identity
pub use phase::{
    DeviceIdentity, FileIdentityStore, IdentityStore, MemoryIdentityStore, PhaseAssigner,
    PHASE_RANGE,
};

// Signal & protocol
pub use protocol::{Envelope, Inbound, Topic};
pub use signal::{SensorFrame, SignalConditioner, SignalConfig};

// Errors & config
pub use error::{CoreError, Result};
pub use logging::LogConfig;
