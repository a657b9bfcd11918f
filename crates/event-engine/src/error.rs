//! Error types for the event engine

use device_store::StoreError;
use thiserror::Error;

/// Invalid scheduling request, rejected before anything is enqueued
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    /// Hour outside the 24h clock
    #[error("Hour is a 24h clock, acceptable values are 0-23: {0}")]
    InvalidHour(u32),

    /// Event name missing
    #[error("Event name must be set")]
    EmptyName,

    /// Delay or jitter too large to represent as a fire time
    #[error("Delay out of range: {0}ms")]
    DelayOutOfRange(u64),
}

/// Error returned by an event handler
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Device read or update failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A scheduling request from the handler was rejected
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    /// Any other handler failure
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Create a free-form handler failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A handler that failed during dispatch.
///
/// Reported and broadcast; never stops the remaining handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Handler '{handler}' failed for event {event}: {error}")]
pub struct HandlerFailure {
    /// Event name or category
    pub event: String,
    /// Handler label
    pub handler: String,
    /// Error message (or panic payload)
    pub error: String,
}
