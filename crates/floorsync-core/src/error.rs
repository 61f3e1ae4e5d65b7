//! Error types for floorsync-core

use thiserror::Error;

use crate::models::ChangeId;

/// Result type alias using floorsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in floorsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Change record not found
    #[error("Change not found: {0}")]
    NotFound(ChangeId),

    /// Invalid input (rejected before it reaches the change log)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No open conflict exists for the given change
    #[error("No open conflict for change {0}")]
    NoOpenConflict(ChangeId),

    /// The server did not report its current version for a conflicted change
    #[error("Server did not report a current version for change {0}; cannot resubmit")]
    MissingServerVersion(ChangeId),

    /// Transport-level error outside a sync cycle (e.g. building the HTTP client)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// How a batch request failed before producing a categorized response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Server unreachable or request timed out
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    /// Server answered, but refused the whole request
    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Server answered with a body we could not interpret
    #[error("Invalid server response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Whether this failure means the server could not be reached at all.
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}
