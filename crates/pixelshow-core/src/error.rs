//! Error types for the core crate
use thiserror::Error;

/// Core errors
#[derive(Error, Debug)]
pub enum CoreError {
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A color string could not be parsed
    #[error("Invalid color: {0}")]
    InvalidColor(String),

    /// The device identity store could not be used
    #[error("Identity store error: {0}")]
    IdentityStore(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
