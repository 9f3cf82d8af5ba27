//! Fluxo - record tracking for administrative processes.
//!
//! This library provides the core functionality for the `fluxo` CLI tool:
//! the movement history store, current-state resolution, dashboard
//! aggregation, query building, bulk import/export, and the audit log.

pub mod accounts;
pub mod action_log;
pub mod cli;
pub mod commands;
pub mod config;
pub mod export;
pub mod import;
pub mod models;
pub mod query;
pub mod sequencer;
pub mod storage;


/// Coarse classification of an [`Error`], used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required field is missing or malformed
    Validation,
    /// A unique field already exists
    Conflict,
    /// Credentials or permissions were rejected
    Auth,
    /// The store or a file could not be reached or queried
    Transport,
    /// The requested entity does not exist
    NotFound,
    /// Anything else the caller can fix by changing the input
    Input,
}

/// Library-level error type for Fluxo operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Not initialized: run `fluxo system init` first")]
    NotInitialized,

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Import aborted at batch {batch} ({committed} rows already committed): {source}")]
    ImportAborted {
        batch: usize,
        committed: usize,
        source: Box<Error>,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Io(_) | Error::Database(_) | Error::Csv(_) | Error::ImportAborted { .. } => {
                ErrorKind::Transport
            }
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Json(_) | Error::NotInitialized | Error::InvalidInput(_) | Error::Other(_) => {
                ErrorKind::Input
            }
        }
    }
}

/// Result type alias for Fluxo operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::Validation("entry date".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(Error::Conflict("email".into()).kind(), ErrorKind::Conflict);
        assert_eq!(Error::Auth("password".into()).kind(), ErrorKind::Auth);
        assert_eq!(
            Error::Io(std::io::Error::other("disk")).kind(),
            ErrorKind::Transport
        );
        assert_eq!(Error::NotInitialized.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_import_aborted_message_names_batch() {
        let err = Error::ImportAborted {
            batch: 3,
            committed: 200,
            source: Box::new(Error::Other("boom".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("batch 3"));
        assert!(msg.contains("200 rows"));
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
