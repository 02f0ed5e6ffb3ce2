//! Error types raised while handling a request.
//!
//! Every failure produced by a selector, a middleware or a handler is an [`Error`].
//! An error may carry a status code; errors without one are treated as internal
//! failures (500) by the error boundary.

use http::StatusCode;
use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// A boxed, thread safe error, the error type of response bodies and transports.
pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("context not loaded")]
    ContextNotLoaded,

    #[error("request entity too large (limit: {limit})")]
    PayloadTooLarge { limit: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("unsupported charset \"{encoding}\"")]
    UnsupportedEncoding { encoding: String },

    #[error("content type must be {expected} (current: {actual})")]
    UnsupportedMediaType { expected: String, actual: String },

    #[error("invalid json: {source}")]
    InvalidJson {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid form: {reason}")]
    InvalidForm { reason: String },

    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("invalid multipart body: {reason}")]
    Multipart { reason: String, status: StatusCode },

    #[error("Not Found")]
    NotFound,

    #[error("request timed out after {millis}ms")]
    Timeout { millis: u128 },

    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error("{message}")]
    Http { status: StatusCode, message: String },

    #[error(transparent)]
    Internal(BoxError),
}

impl Error {
    /// An error with an explicit status code, the way handlers report client errors.
    pub fn new<S: ToString>(status: StatusCode, message: S) -> Self {
        Self::Http { status, message: message.to_string() }
    }

    /// Wraps any error without a status; the boundary answers it with 500.
    pub fn internal<E: Into<BoxError>>(e: E) -> Self {
        Self::Internal(e.into())
    }

    pub fn payload_too_large<S: ToString>(limit: S) -> Self {
        Self::PayloadTooLarge { limit: limit.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn unsupported_encoding<S: ToString>(encoding: S) -> Self {
        Self::UnsupportedEncoding { encoding: encoding.to_string() }
    }

    pub fn unsupported_media_type<E: ToString, A: ToString>(expected: E, actual: A) -> Self {
        Self::UnsupportedMediaType { expected: expected.to_string(), actual: actual.to_string() }
    }

    pub fn invalid_form<S: ToString>(str: S) -> Self {
        Self::InvalidForm { reason: str.to_string() }
    }

    pub fn invalid_query<S: ToString>(str: S) -> Self {
        Self::InvalidQuery { reason: str.to_string() }
    }

    pub fn invalid_route<P: ToString, S: ToString>(pattern: P, reason: S) -> Self {
        Self::InvalidRoute { pattern: pattern.to_string(), reason: reason.to_string() }
    }

    /// The status attached to this error, `None` for plain internal failures.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Error::ContextNotLoaded | Error::InvalidRoute { .. } | Error::Internal(_) => None,
            Error::PayloadTooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Error::InvalidBody { .. }
            | Error::UnsupportedMediaType { .. }
            | Error::InvalidJson { .. }
            | Error::InvalidForm { .. }
            | Error::InvalidQuery { .. } => Some(StatusCode::BAD_REQUEST),
            Error::UnsupportedEncoding { .. } => Some(StatusCode::UNSUPPORTED_MEDIA_TYPE),
            Error::Multipart { status, .. } | Error::Http { status, .. } => Some(*status),
            Error::NotFound => Some(StatusCode::NOT_FOUND),
            Error::Timeout { .. } => Some(StatusCode::SERVICE_UNAVAILABLE),
        }
    }

    /// The status used when answering this error, 500 when none is attached.
    pub fn status(&self) -> StatusCode {
        self.status_code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Internal(Box::new(e))
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Self::Internal(Box::new(e))
    }
}

impl From<multer::Error> for Error {
    fn from(e: multer::Error) -> Self {
        let status = match &e {
            multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            _ => StatusCode::BAD_REQUEST,
        };
        Self::Multipart { reason: e.to_string(), status }
    }
}
