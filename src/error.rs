//! Error types for session operations
//!
//! Engine sentinels are translated into these kinds at the session boundary;
//! they never reach callers as raw values.

use thiserror::Error;

use crate::engine::EngineError;

/// Failure to acquire a document handle
#[derive(Debug, Error)]
pub enum OpenError {
    /// The data is not a document the engine understands
    #[error("Invalid document format: {0}")]
    InvalidFormat(String),

    /// Missing or wrong password
    #[error("Incorrect password")]
    Password,

    /// IO failure on the file-backed source
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other engine-reported failure
    #[error("Engine error: {0}")]
    Engine(String),
}

impl From<EngineError> for OpenError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidFormat(msg) => OpenError::InvalidFormat(msg),
            EngineError::Password => OpenError::Password,
            EngineError::Io(e) => OpenError::Io(e),
            other => OpenError::Engine(other.to_string()),
        }
    }
}

/// Session error type
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Failed to open document: {0}")]
    Open(#[from] OpenError),

    /// Operation on a session whose document is closed
    #[error("Document is not open")]
    NotOpen,

    #[error("Page {index} out of range (document has {count} pages)")]
    Index { index: usize, count: usize },

    /// In-range page the engine failed to load
    #[error("Failed to load page {0}")]
    PageLoad(usize),

    #[error("No text layer available for page {0}")]
    NoText(usize),

    #[error("Character range {start}+{length} out of bounds (page has {count} characters)")]
    Range {
        start: usize,
        length: usize,
        count: usize,
    },

    #[error("Malformed outline: {0}")]
    MalformedOutline(String),

    /// Operation on a stopped, superseded or never-started handle
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Invalid rotation {0} (expected 0..=3)")]
    InvalidRotation(i32),

    /// Blocking task panicked or was cancelled
    #[error("Task join error: {0}")]
    Task(String),
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, CoreError>;
