//! Typed error kinds shared across the core components.
//!
//! Mirrors the teacher's `MiniDSPError`/`http::Error` split: one thiserror
//! enum per layer boundary, converted with `From` at the edges rather than
//! propagated as `anyhow::Error` once inside the core.

use thiserror::Error;

use crate::model::Uri;

/// The error kinds described in spec.md §7, encoded as a single enum.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("no route or object found for uri {0}")]
    NotFound(Uri),

    #[error("operation not allowed on {uri}: {reason}")]
    NotAllowed { uri: Uri, reason: String },

    #[error("driver rejected the operation: {0}")]
    DriverError(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("i/o error: {0}")]
    IoError(String),

    #[error("feature is disabled: {0}")]
    ServiceDisabled(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("value not allowed: {0}")]
    ValueNotAllowed(String),

    #[error("no matching device descriptor was found")]
    NoDescriptor,
}

impl CoreError {
    pub fn not_found(uri: impl Into<Uri>) -> Self {
        CoreError::NotFound(uri.into())
    }

    pub fn not_allowed(uri: impl Into<Uri>, reason: impl Into<String>) -> Self {
        CoreError::NotAllowed {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::IoError(e.to_string())
    }
}

pub type Result<T, E = CoreError> = core::result::Result<T, E>;
