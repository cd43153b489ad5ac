//! Error taxonomy for the FileMaker client and HTTP status classification.
//!
//! # Design
//! The set of variants is closed: every failure a call can produce maps to
//! exactly one of them. `Unauthorized` is the only variant the client
//! recovers from on its own (one re-authentication and one re-issue per
//! logical call); every other variant surfaces to the caller unchanged.
//! Status-bearing variants keep a truncated preview of the response body for
//! debugging.

use thiserror::Error;

/// Maximum number of characters of a response body kept inside an error.
pub const BODY_PREVIEW_LIMIT: usize = 256;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Network-layer failure reported by a [`Transport`](crate::http::Transport)
/// implementation (DNS, TLS, timeout, connection refused, ...).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors returned by every client operation.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A required string parameter was empty. Raised before any request is built.
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// The request URL could not be formed.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The transport failed before an HTTP status was received.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// 400: malformed query syntax or filter expression.
    #[error("bad request: {body}")]
    BadRequest { body: String },

    /// 401: credentials or token rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// 404: unknown table or record.
    #[error("not found")]
    NotFound,

    /// 500: bad table name or invalid payload shape.
    #[error("server error: {body}")]
    Server { body: String },

    /// Any other non-2xx status.
    #[error("unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The response body did not match any accepted shape of the target type.
    #[error("could not decode {target}: {detail} (body: {body})")]
    Decoding {
        target: &'static str,
        detail: String,
        body: String,
    },

    /// The token endpoint rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// HTTP status this error was classified from, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::BadRequest { .. } => Some(400),
            ApiError::Unauthorized => Some(401),
            ApiError::NotFound => Some(404),
            ApiError::Server { .. } => Some(500),
            ApiError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Map an HTTP status code to success or to the matching `ApiError` variant.
pub fn check_status(status: u16, body: &[u8]) -> Result<()> {
    match status {
        200..=299 => Ok(()),
        400 => Err(ApiError::BadRequest {
            body: body_preview(body),
        }),
        401 => Err(ApiError::Unauthorized),
        404 => Err(ApiError::NotFound),
        500 => Err(ApiError::Server {
            body: body_preview(body),
        }),
        status => Err(ApiError::UnexpectedStatus {
            status,
            body: body_preview(body),
        }),
    }
}

/// Lossy UTF-8 rendering of `body`, cut at [`BODY_PREVIEW_LIMIT`] characters.
pub fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut chars = text.chars();
    let preview: String = chars.by_ref().take(BODY_PREVIEW_LIMIT).collect();
    if chars.next().is_some() {
        format!("{preview}...")
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range_passes() {
        for status in [200, 201, 204, 299] {
            assert!(check_status(status, b"").is_ok(), "status {status}");
        }
    }

    #[test]
    fn known_codes_map_to_variants() {
        assert!(matches!(check_status(400, b"bad filter"), Err(ApiError::BadRequest { body }) if body == "bad filter"));
        assert!(matches!(check_status(401, b""), Err(ApiError::Unauthorized)));
        assert!(matches!(check_status(404, b""), Err(ApiError::NotFound)));
        assert!(matches!(check_status(500, b"oops"), Err(ApiError::Server { .. })));
    }

    #[test]
    fn other_codes_keep_raw_status() {
        let err = check_status(418, b"teapot").unwrap_err();
        assert!(matches!(err, ApiError::UnexpectedStatus { status: 418, .. }));
        assert_eq!(err.status(), Some(418));

        let err = check_status(302, b"").unwrap_err();
        assert!(matches!(err, ApiError::UnexpectedStatus { status: 302, .. }));
    }

    #[test]
    fn preview_is_truncated() {
        let long = "x".repeat(BODY_PREVIEW_LIMIT + 10);
        let preview = body_preview(long.as_bytes());
        assert_eq!(preview.len(), BODY_PREVIEW_LIMIT + 3);
        assert!(preview.ends_with("..."));

        assert_eq!(body_preview(b"short"), "short");
    }

    #[test]
    fn transport_error_converts() {
        let err: ApiError = TransportError::new("connection refused").into();
        assert!(matches!(err, ApiError::Transport(_)));
        assert_eq!(err.to_string(), "transport error: connection refused");
        assert_eq!(err.status(), None);
    }
}
