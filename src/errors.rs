//! error types

use crate::utils::xml::parse_error_response;
use crate::BoxStdError;

use hyper::StatusCode;

/// S3 result
pub type S3Result<T> = Result<T, S3Error>;

/// Errors surfaced by the signing middleware, the multipart engine and
/// the client surface.
///
/// Clock-skew and token-refresh rejections are recovered inside the
/// middleware (one retry each) and only appear here when the retry also
/// fails.
#[derive(Debug, thiserror::Error)]
pub enum S3Error {
    /// The credentials provider failed or returned unusable credentials.
    #[error("credential provider failed: {0}")]
    Credential(#[source] BoxStdError),

    /// Internal signing failure (invalid scope, malformed header value).
    #[error("signing failed: {0}")]
    Signing(String),

    /// Downstream HTTP transport failure, surfaced unchanged.
    #[error("transport error: {0}")]
    Transport(#[source] BoxStdError),

    /// The server rejected the request's authentication.
    #[error("auth rejected: {code}: {message}")]
    AuthRejected {
        /// SigV4 error code (`SignatureDoesNotMatch`, `InvalidAccessKeyId`, ...)
        code: String,
        /// server-supplied message
        message: String,
    },

    /// Any other error response from the server.
    #[error("{code}: {message}")]
    Api {
        /// S3 error code
        code: String,
        /// server-supplied message
        message: String,
    },

    /// A multipart upload was aborted.
    ///
    /// `source` is the failure that triggered the abort. If the
    /// best-effort `AbortMultipartUpload` itself failed, that secondary
    /// cause is attached without replacing the primary. `uncertain` is
    /// set when the completion request was already in flight, so the
    /// object may exist server-side.
    #[error("multipart upload aborted (uncertain: {uncertain}): {source}")]
    Multipart {
        /// the original failure
        source: Box<S3Error>,
        /// failure of the abort request, if any
        abort_error: Option<Box<S3Error>>,
        /// true when the commit outcome is unknown
        uncertain: bool,
    },

    /// Malformed XML or a missing expected element.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration bounds were violated.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl S3Error {
    /// Wraps a failure as the primary cause of a multipart abort.
    pub(crate) fn multipart(source: S3Error, abort_error: Option<S3Error>, uncertain: bool) -> Self {
        Self::Multipart {
            source: Box::new(source),
            abort_error: abort_error.map(Box::new),
            uncertain,
        }
    }

    /// True for auth rejections carrying the given SigV4 code.
    #[must_use]
    pub fn is_auth_code(&self, expected: &str) -> bool {
        match *self {
            Self::AuthRejected { ref code, .. } => code == expected,
            _ => false,
        }
    }
}

/// Maps a drained non-2xx response to a typed error.
///
/// 401/403 with a parsable `<Error>` body becomes [`S3Error::AuthRejected`];
/// other parsable bodies become [`S3Error::Api`]; an unparsable body
/// keeps the HTTP status as the code.
pub(crate) fn error_from_response(status: StatusCode, body: &[u8]) -> S3Error {
    match parse_error_response(body) {
        Some((code, message)) => error_from_response_code(status, code, message),
        None => S3Error::Api {
            code: format!("HTTP{}", status.as_u16()),
            message: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

/// Maps an already-parsed error code to a typed error.
pub(crate) fn error_from_response_code(
    status: StatusCode,
    code: String,
    message: Option<String>,
) -> S3Error {
    let message = message.unwrap_or_default();
    if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        S3Error::AuthRejected { code, message }
    } else {
        S3Error::Api { code, message }
    }
}
