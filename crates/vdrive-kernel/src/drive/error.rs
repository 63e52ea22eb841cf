//! Drive error types.

use std::io;
use thiserror::Error;

/// Drive error type.
///
/// Variants are semantic kinds, not transport details. The HTTP-facing layer
/// maps them to status codes via [`DriveError::http_status`].
#[derive(Debug, Error)]
pub enum DriveError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conflict or capability violation.
    #[error("{reason}")]
    NotAllowed {
        /// Human-readable reason (already translated).
        reason: String,
        /// The offending path(s).
        paths: Vec<String>,
    },

    /// The backend or entry does not implement this operation.
    ///
    /// Callers are expected to have a fallback path for this.
    #[error("operation not supported")]
    Unsupported,

    /// Wrong or missing credentials for the backend.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The backend answered with an unexpected status or body.
    #[error("remote api error ({status}): {message}")]
    RemoteApi {
        /// Status code reported by the backend.
        status: u16,
        /// Human-readable message.
        message: String,
    },

    /// Operation aborted by the caller.
    #[error("operation canceled")]
    Canceled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl DriveError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a NotAllowed error with no path payload.
    pub fn not_allowed(reason: impl Into<String>) -> Self {
        Self::NotAllowed {
            reason: reason.into(),
            paths: Vec::new(),
        }
    }

    /// Create a NotAllowed error naming the offending paths.
    pub fn not_allowed_paths<I, S>(reason: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::NotAllowed {
            reason: reason.into(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Create an Unauthorized error.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create a RemoteApi error.
    pub fn remote_api(status: u16, message: impl Into<String>) -> Self {
        Self::RemoteApi {
            status,
            message: message.into(),
        }
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_not_allowed(&self) -> bool {
        matches!(self, Self::NotAllowed { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Status code the HTTP layer should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::NotAllowed { .. } => 403,
            Self::Unsupported => 501,
            Self::Unauthorized(_) => 401,
            Self::RemoteApi { .. } => 502,
            Self::Canceled => 499,
            Self::Io(_) | Self::Other(_) => 500,
        }
    }
}

/// Convert DriveError to std::io::Error so drive failures can cross
/// `AsyncRead`/`AsyncWrite` boundaries.
impl From<DriveError> for io::Error {
    fn from(e: DriveError) -> Self {
        match e {
            DriveError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            DriveError::NotAllowed { reason, .. } => {
                io::Error::new(io::ErrorKind::PermissionDenied, reason)
            }
            DriveError::Unsupported => io::Error::new(io::ErrorKind::Unsupported, "unsupported"),
            DriveError::Unauthorized(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            DriveError::Canceled => {
                io::Error::new(io::ErrorKind::Interrupted, "operation canceled")
            }
            DriveError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// Drive result type.
pub type DriveResult<T> = Result<T, DriveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(DriveError::not_found("/a").http_status(), 404);
        assert_eq!(DriveError::not_allowed("exists").http_status(), 403);
        assert_eq!(DriveError::Unsupported.http_status(), 501);
        assert_eq!(DriveError::unauthorized("nope").http_status(), 401);
        assert_eq!(DriveError::remote_api(500, "boom").http_status(), 502);
        assert_eq!(DriveError::Canceled.http_status(), 499);
    }

    #[test]
    fn test_not_allowed_keeps_paths() {
        let e = DriveError::not_allowed_paths("type mismatch", ["/a", "/b"]);
        match e {
            DriveError::NotAllowed { reason, paths } => {
                assert_eq!(reason, "type mismatch");
                assert_eq!(paths, vec!["/a".to_string(), "/b".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_canceled_roundtrips_through_io() {
        let io_err: io::Error = DriveError::Canceled.into();
        assert_eq!(io_err.kind(), io::ErrorKind::Interrupted);
    }
}
