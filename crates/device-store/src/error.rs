//! Error types for device storage

use thiserror::Error;

/// Errors that can occur when reading or updating devices
#[derive(Error, Debug)]
pub enum StoreError {
    /// No device with the given id
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// IO error (persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
