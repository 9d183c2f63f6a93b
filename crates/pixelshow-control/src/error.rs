//! Error types for the control crate
use pixelshow_core::CoreError;
use std::time::Duration;
use thiserror::Error;

/// Bus, session and device errors
#[derive(Error, Debug)]
pub enum ControlError {
    /// The transport rejected an operation
    #[error("Transport error: {0}")]
    Transport(String),

    /// The broadcast subscription could not be established
    #[error("Cannot join session {event_id}: {reason}")]
    CannotJoin {
        /// Event the caller tried to join
        event_id: String,
        /// Transport-provided reason
        reason: String,
    },

    /// A publish did not complete within the configured timeout
    #[error("Publish timed out after {0:?}")]
    PublishTimeout(Duration),

    /// Operation needs an active session
    #[error("Not joined to a session")]
    NotJoined,

    /// Domain error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
