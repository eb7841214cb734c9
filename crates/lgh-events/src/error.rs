//! Error types for the event pipeline.

use thiserror::Error;

/// Errors that can occur in event pipeline operations.
#[derive(Debug, Error)]
pub enum EventError {
    /// I/O error while touching the event log.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A bus handler reported a failure.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The logger worker thread could not be started.
    #[error("failed to spawn logger worker: {0}")]
    WorkerSpawn(String),

    /// The logger worker thread panicked before draining its queue.
    #[error("logger worker panicked")]
    WorkerPanicked,
}

/// Result type for event pipeline operations.
pub type Result<T> = std::result::Result<T, EventError>;
