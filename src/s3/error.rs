//! Error taxonomy for S3 operations
//!
//! Every failure the transfer engine can surface is one variant of [`S3Error`],
//! so callers match on the kind instead of inspecting strings.

use hyper::StatusCode;
use thiserror::Error;

/// Maximum number of body bytes kept for diagnostics in decode errors
pub const BODY_PREFIX_LIMIT: usize = 256;

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3Error {
    /// Credentials missing or unusable for signing
    #[error("authentication configuration error: {0}")]
    AuthenticationConfig(String),

    /// Declared payload exceeds the largest object the service accepts
    #[error("payload of {size} bytes exceeds maximum object size of {max} bytes")]
    PayloadTooLarge { size: u64, max: u64 },

    /// Byte source ended before the exact-length read was satisfied
    #[error("unexpected short read: expected {expected} bytes, read {actual}")]
    UnexpectedShortRead { expected: u64, actual: u64 },

    /// A listing request was rejected by the service
    #[error("listing failed: {status} - {body}")]
    ListingFailed { status: StatusCode, body: String },

    /// Response body could not be decoded
    #[error("malformed response ({status}): {reason}; body starts with {body_prefix:?}")]
    MalformedResponse {
        status: StatusCode,
        reason: String,
        body_prefix: String,
    },

    /// Non-success status, or an error document embedded in a success response
    #[error("S3 error: {status} {code} - {message}")]
    Service {
        status: StatusCode,
        code: String,
        message: String,
        resource: Option<String>,
        request_id: Option<String>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Connection, TLS or timeout failure inside the HTTP executor
    #[error("transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, S3Error>;

impl S3Error {
    /// Build a `MalformedResponse`, keeping a bounded prefix of the body
    pub fn malformed(status: StatusCode, reason: impl Into<String>, body: &[u8]) -> Self {
        S3Error::MalformedResponse {
            status,
            reason: reason.into(),
            body_prefix: body_prefix(body),
        }
    }

    /// Status code carried by the error, if it came from a response
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            S3Error::ListingFailed { status, .. }
            | S3Error::MalformedResponse { status, .. }
            | S3Error::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a caller-level retry might succeed.
    ///
    /// The engine never retries on its own; this only classifies.
    pub fn is_retryable(&self) -> bool {
        match self {
            S3Error::Transport(_) => true,
            _ => self.status().is_some_and(|status| {
                status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }),
        }
    }
}

/// Lossy UTF-8 prefix of a response body, at most [`BODY_PREFIX_LIMIT`] bytes
pub fn body_prefix(body: &[u8]) -> String {
    let end = body.len().min(BODY_PREFIX_LIMIT);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

impl From<hyper::Error> for S3Error {
    fn from(err: hyper::Error) -> Self {
        S3Error::Transport(err.to_string())
    }
}

impl From<hyper_util::client::legacy::Error> for S3Error {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        S3Error::Transport(format!("client error: {}", err))
    }
}

impl From<hyper::http::Error> for S3Error {
    fn from(err: hyper::http::Error) -> Self {
        S3Error::Transport(format!("request build error: {}", err))
    }
}
