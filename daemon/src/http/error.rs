//! HTTP-facing error type and its wire format.
//!
//! Grounded on the teacher's `http::Error`/`FormattedError` split (referenced
//! by `http/mod.rs`'s `use error::{Error, FormattedError}` even though that
//! file isn't part of the retrieval pack): a thin wrapper converting the
//! core's typed errors and local request-parsing failures into one enum that
//! `error_handler` renders as JSON.

use gateway_core::error::CoreError;
use serde::Serialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("application is still initializing")]
    ApplicationStillInitializing,

    #[error("missing or malformed path parameter: {0}")]
    BadParam(String),

    #[error("missing or malformed request body: {0}")]
    BadBody(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// JSON rendering of [`Error`], returned as the response body on failure.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct FormattedError {
    pub kind: String,
    pub message: String,
}

impl From<Error> for FormattedError {
    fn from(e: Error) -> Self {
        let kind = match &e {
            Error::ApplicationStillInitializing => "SERVICE_DISABLED",
            Error::BadParam(_) | Error::BadBody(_) => "INVALID_ARG",
            Error::Core(CoreError::InvalidArg(_)) => "INVALID_ARG",
            Error::Core(CoreError::NotFound(_)) => "NOT_FOUND",
            Error::Core(CoreError::NotAllowed { .. }) => "NOT_ALLOWED",
            Error::Core(CoreError::DriverError(_)) => "DRIVER_ERROR",
            Error::Core(CoreError::Timeout(_)) => "TIMEOUT",
            Error::Core(CoreError::IoError(_)) => "IO_ERROR",
            Error::Core(CoreError::ServiceDisabled(_)) => "SERVICE_DISABLED",
            Error::Core(CoreError::Duplicate(_)) => "DUPLICATE",
            Error::Core(CoreError::ValueNotAllowed(_)) => "INVALID_ARG",
            Error::Core(CoreError::NoDescriptor) => "NOT_FOUND",
        }
        .to_string();
        let message = e.to_string();
        FormattedError { kind, message }
    }
}

pub fn status_for(err: &Error) -> hyper::StatusCode {
    use hyper::StatusCode;
    match err {
        Error::ApplicationStillInitializing => StatusCode::SERVICE_UNAVAILABLE,
        Error::BadParam(_) | Error::BadBody(_) => StatusCode::BAD_REQUEST,
        Error::Core(CoreError::InvalidArg(_)) => StatusCode::BAD_REQUEST,
        Error::Core(CoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        Error::Core(CoreError::NotAllowed { .. }) => StatusCode::FORBIDDEN,
        Error::Core(CoreError::DriverError(_)) => StatusCode::BAD_GATEWAY,
        Error::Core(CoreError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        Error::Core(CoreError::IoError(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Core(CoreError::ServiceDisabled(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Core(CoreError::Duplicate(_)) => StatusCode::CONFLICT,
        Error::Core(CoreError::ValueNotAllowed(_)) => StatusCode::BAD_REQUEST,
        Error::Core(CoreError::NoDescriptor) => StatusCode::NOT_FOUND,
    }
}
