//! Persistence layer for parkgated
//!
//! Provides:
//! - Vehicle sessions with a single-active-per-identifier guarantee
//! - Atomic match-and-close for exits
//! - Audit log (append-only)

mod audit;
mod sqlite;
mod traits;

pub use audit::*;
pub use sqlite::*;
pub use traits::*;

use chrono::{DateTime, Local};
use parkgate_util::IdentifierToken;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No active session for {0}")]
    NotFound(IdentifierToken),

    #[error("Deadline passed before commit, rolled back")]
    DeadlineExceeded,

    #[error("Exit time {exit_time} is not after entry time {entry_time}")]
    InvalidExitTime {
        entry_time: DateTime<Local>,
        exit_time: DateTime<Local>,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => StoreError::Constraint(e.to_string()),
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
