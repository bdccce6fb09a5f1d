// src/error.rs

//! # Error kinds
//!
//! One tagged enumeration for everything that can go wrong while turning
//! snapshot text into stored flow rows. The variant decides how far an error
//! travels:
//!
//! - `ParseFailure`, `FieldInvalid` stay inside their record.
//! - `StoreConflict` is a signal, not a failure: the key already exists.
//! - `StoreFatal`, `SourceFatal` abort the current pass only.

use thiserror::Error;

/// Discriminator for [`FlowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ParseFailure,
    FieldInvalid,
    StoreConflict,
    StoreFatal,
    SourceFatal,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("unparseable record: {0}")]
    ParseFailure(String),

    #[error("invalid {field}: {line}")]
    FieldInvalid { field: &'static str, line: String },

    #[error("flow already present: {0}")]
    StoreConflict(String),

    #[error("store unavailable: {0}")]
    StoreFatal(String),

    #[error("source unavailable: {0}")]
    SourceFatal(String),
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::ParseFailure(_) => ErrorKind::ParseFailure,
            FlowError::FieldInvalid { .. } => ErrorKind::FieldInvalid,
            FlowError::StoreConflict(_) => ErrorKind::StoreConflict,
            FlowError::StoreFatal(_) => ErrorKind::StoreFatal,
            FlowError::SourceFatal(_) => ErrorKind::SourceFatal,
        }
    }

    /// Errors that end the whole pass rather than a single record.
    pub fn is_pass_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::StoreFatal | ErrorKind::SourceFatal)
    }
}

/// Key violations become `StoreConflict`; everything else from SQLite is
/// fatal for the pass.
impl From<rusqlite::Error> for FlowError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ffi::{SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE};
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.extended_code == SQLITE_CONSTRAINT_PRIMARYKEY
                    || err.extended_code == SQLITE_CONSTRAINT_UNIQUE =>
            {
                FlowError::StoreConflict(e.to_string())
            }
            _ => FlowError::StoreFatal(e.to_string()),
        }
    }
}
