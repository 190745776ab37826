//! Error types for NoteCore.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

use crate::models::Note;

/// Result type alias for NoteCore operations
pub type NoteResult<T> = Result<T, NoteError>;

/// Main error type for NoteCore operations
#[derive(Error, Debug)]
pub enum NoteError {
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database operation failed: {0}")]
    DatabaseOperation(String),

    /// The caller's version is stale. Carries the current record so the
    /// caller can retry with fresh data.
    #[error("Conflict: note {} is at version {}", .current.id, .current.version)]
    Conflict { current: Box<Note> },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl NoteError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        NoteError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        NoteError::Transport(message.into())
    }

    /// Create a new database operation error
    pub fn database_op(message: impl Into<String>) -> Self {
        NoteError::DatabaseOperation(message.into())
    }

    /// True for failures of the underlying store
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            NoteError::Database(_) | NoteError::DatabaseOperation(_)
        )
    }
}

impl From<reqwest::Error> for NoteError {
    fn from(err: reqwest::Error) -> Self {
        NoteError::Transport(err.to_string())
    }
}
