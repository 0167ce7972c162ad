//! Error types for agentstore-core

use sqlx::error::ErrorKind;
use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A unique constraint rejected the write (duplicate `email` or `session_id`).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A foreign key rejected the write or delete. Never retryable.
    #[error("Foreign key violation: {0}")]
    ForeignKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Schema drift: {0}")]
    SchemaDrift(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for constraint failures the caller caused; retrying the same
    /// write cannot succeed.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::ForeignKey(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db_err) => Some((db_err.kind(), db_err.message().to_string())),
            _ => None,
        };
        match kind {
            Some((ErrorKind::UniqueViolation, message)) => Error::Conflict(message),
            Some((ErrorKind::ForeignKeyViolation, message)) => Error::ForeignKey(message),
            _ => Error::Database(err),
        }
    }
}

/// Result type alias using Error.
pub type Result<T> = std::result::Result<T, Error>;
