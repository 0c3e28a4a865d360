//! Error types for detection and tracking.

use thiserror::Error;

/// Main error type for peaktrack operations.
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("operation cancelled by user")]
    Cancelled,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid trajectory table: {0}")]
    InvalidTable(String),

    #[error("invalid cost function context: {0}")]
    InvalidContext(String),

    #[error("{block} block has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        block: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("assignment failed: {0}")]
    Assignment(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for peaktrack operations.
pub type Result<T> = std::result::Result<T, TrackingError>;
