//! Error types for the simtrack runtime.
//!
//! Two layers: [`ClientError`] covers the HTTP wire (transport failures and
//! unexpected status codes), [`DecodeError`] covers turning response payloads
//! into typed values. Both are cheap to clone so mock clients in tests can
//! return them verbatim.

use thiserror::Error;

/// HTTP status code for "service temporarily unavailable".
pub const STATUS_UNAVAILABLE: u16 = 503;

/// HTTP status code for "not found".
pub const STATUS_NOT_FOUND: u16 = 404;

/// Errors from talking to the simulation service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    /// Connection or I/O level failure (DNS, refused, timeout, broken body).
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with an unexpected HTTP status.
    #[error("HTTP status {status}: {body}")]
    Protocol { status: u16, body: String },

    /// The response arrived but its payload was not what the protocol promises.
    #[error("invalid response payload: {0}")]
    Payload(String),
}

impl ClientError {
    /// Whether this error is expected to resolve without intervention.
    ///
    /// Transport failures and 503 are transient; retried instead of failing
    /// the job. Everything else is treated as stable.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Protocol { status, .. } => *status == STATUS_UNAVAILABLE,
            Self::Payload(_) => false,
        }
    }

    /// Whether the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Protocol { status, .. } if *status == STATUS_NOT_FOUND)
    }

    /// The HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Errors from decoding a result value against its declared type.
///
/// Decode errors are never retried: the payload is assumed stable, so the job
/// that produced one completes as a (non-permanent) failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    /// The JSON value does not match the declared type.
    #[error("incompatible value for {declared}: {json}")]
    Incompatible { declared: String, json: String },

    /// A requested output was absent from the results response.
    #[error("missing value from response: {0}")]
    MissingField(String),

    /// A time series referenced an ordinate key not present in the response.
    #[error("unresolved time ordinate reference: {0}")]
    UnknownOrdinate(String),

    /// The declared type is not supported by this runtime.
    #[error("unsupported type {0}")]
    Unsupported(String),
}
