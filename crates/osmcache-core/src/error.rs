//! Error handling
//!
//! Typed errors for store, import and remote operations. SQLite errors are
//! classified on conversion so callers can tell a duplicate-key race or a
//! locked database apart from a genuine bug.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{ffi, ErrorCode};
use thiserror::Error;

use crate::models::ElementKey;

/// Errors raised while talking to the remote geographic service
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Network failure or service down
    #[error("Remote service unavailable: {0}")]
    Unavailable(String),

    /// The request did not complete within the configured timeout
    #[error("Remote request timed out after {after:?}")]
    Timeout { after: Duration },

    /// Non-success HTTP status
    #[error("Remote service answered with HTTP status {code}")]
    Status { code: u16 },

    /// The response could not be understood
    #[error("Malformed remote response: {0}")]
    Malformed(String),
}

/// Errors that can occur while mirroring elements
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Input document is unusable; the whole batch is rolled back
    #[error("Malformed feed: {reason}")]
    MalformedFeed { reason: String },

    /// Database is locked, busy or cannot be opened
    #[error("Store unavailable: {source}")]
    StoreUnavailable {
        #[source]
        source: rusqlite::Error,
    },

    /// Unique key collision, typically from a concurrent insert
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Any other SQLite error
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// Table prefix contains characters that are not safe in SQL identifiers
    #[error("Invalid table prefix '{0}': only ASCII letters, digits and '_' are allowed")]
    InvalidPrefix(String),

    /// Remote fetch failed
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Failed to read an input file
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Element expected in the store was not there
    #[error("Element {0} not found")]
    NotFound(ElementKey),
}

impl MirrorError {
    /// Shorthand for a malformed-feed error
    pub fn malformed(reason: impl Into<String>) -> Self {
        MirrorError::MalformedFeed {
            reason: reason.into(),
        }
    }

    /// Check if this error came from the remote service
    pub fn is_remote(&self) -> bool {
        matches!(self, MirrorError::Remote(_))
    }

    /// Check if this error was caused by bad input data
    pub fn is_malformed(&self) -> bool {
        matches!(self, MirrorError::MalformedFeed { .. })
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            MirrorError::StoreUnavailable { .. } => {
                Some("Another process may be holding the database. Retry in a moment.")
            }
            MirrorError::MalformedFeed { .. } => {
                Some("Nothing was imported. Check that ways only reference nodes declared earlier in the document.")
            }
            MirrorError::InvalidPrefix(_) => {
                Some("Choose a table_prefix made of letters, digits and underscores.")
            }
            MirrorError::Remote(_) => Some("Run with --offline to use only local data."),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for MirrorError {
    fn from(error: rusqlite::Error) -> Self {
        let (code, extended_code) = match &error {
            rusqlite::Error::SqliteFailure(failure, _) => {
                (Some(failure.code), failure.extended_code)
            }
            _ => (None, 0),
        };
        match code {
            // Only key collisions; NOT NULL, CHECK and foreign-key failures are bugs
            Some(ErrorCode::ConstraintViolation)
                if extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                MirrorError::ConstraintViolation(error.to_string())
            }
            Some(ErrorCode::DatabaseBusy)
            | Some(ErrorCode::DatabaseLocked)
            | Some(ErrorCode::CannotOpen) => MirrorError::StoreUnavailable { source: error },
            _ => MirrorError::Database(error),
        }
    }
}

/// Result type for mirror operations
pub type MirrorResult<T> = Result<T, MirrorError>;
