//! Error types for tahecho-agent

use thiserror::Error;

/// Result type alias using tahecho-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the workflow engine.
///
/// None of these escape `Orchestrator::run`; they are logged and absorbed
/// at the node or persistence boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the language-model layer
    #[error(transparent)]
    Ai(#[from] tahecho_ai::Error),

    /// A checkpoint could not be loaded or stored
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
