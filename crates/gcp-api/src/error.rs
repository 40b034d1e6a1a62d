//! Error types.

use http::StatusCode;
use serde::Deserialize;

/// Failures of the underlying HTTP transport.
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// No connection could be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Anything else the backend reported.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors returned by [`GcpClient`](crate::GcpClient) operations.
#[derive(Debug, thiserror::Error)]
pub enum GcpError {
    /// The API answered with a non-success status.
    #[error("API returned {status}: {message}")]
    Api {
        /// HTTP status of the response.
        status: StatusCode,
        /// Canonical status name, e.g. `NOT_FOUND`, when the body carried one.
        reason: Option<String>,
        /// Human readable message.
        message: String,
    },

    /// The request never produced a response.
    #[error(transparent)]
    Http(#[from] HttpClientError),

    /// A success response could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A request URL could not be built from the configured base.
    #[error("invalid request URL: {0}")]
    Url(String),

    /// The access token cannot be sent as a header.
    #[error("access token contains characters not allowed in a header")]
    InvalidToken,
}

impl GcpError {
    /// The HTTP status, for errors that carry one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the addressed resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Build an [`GcpError::Api`] from an error response body.
    ///
    /// Google APIs wrap errors as `{"error": {"code", "message", "status"}}`; bodies that do not
    /// follow that shape are kept as text.
    pub(crate) fn from_response(status: StatusCode, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) => Self::Api {
                status,
                reason: envelope.error.status,
                message: envelope.error.message,
            },
            Err(_) => Self::Api {
                status,
                reason: None,
                message: String::from_utf8_lossy(body).trim().to_owned(),
            },
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}
