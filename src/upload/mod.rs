//! Upload module
//!
//! Routes ingested files to their destination. Storage routes write to
//! category directories or forward to a backend ([`store`], [`forward`],
//! [`policy`]); predict routes proxy a single file to the predictor
//! (see [`crate::predict`]). Both are exposed through [`UploadHandler`].

use crate::ingest::{FileEntry, IngestError};
use thiserror::Error;

pub mod forward;
pub mod policy;
pub mod store;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    /// Missing or malformed file field, wrong arity, not multipart
    #[error("{0}")]
    InvalidInput(String),

    /// Declared type not accepted by the predictor
    #[error("Unsupported file type received: {0}")]
    UnsupportedType(String),

    /// Local I/O failure while creating, deleting or writing
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Upstream answered with a JSON error payload, kept verbatim in `body`
    #[error("Upstream error ({status}): {error}")]
    Upstream {
        status: u16,
        error: String,
        body: serde_json::Value,
    },

    /// Network failure, timeout, or a response that is not JSON
    #[error("Upstream unavailable: {reason}")]
    UpstreamUnavailable { status: Option<u16>, reason: String },

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// HTTP status reported to the caller
    pub fn status(&self) -> u16 {
        match self {
            UploadError::InvalidInput(_) | UploadError::UnsupportedType(_) => 400,
            UploadError::UploadFailed(_) | UploadError::Internal(_) => 500,
            UploadError::Upstream { status, .. } => *status,
            UploadError::UpstreamUnavailable { status, .. } => match status {
                Some(code) if (400..600).contains(code) => *code,
                _ => 500,
            },
            UploadError::PayloadTooLarge(_) => 413,
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::InvalidInput(_) => "invalid_input",
            UploadError::UnsupportedType(_) => "unsupported_type",
            UploadError::UploadFailed(_) => "upload_failed",
            UploadError::Upstream { .. } => "upstream",
            UploadError::UpstreamUnavailable { .. } => "upstream_unavailable",
            UploadError::PayloadTooLarge(_) => "payload_too_large",
            UploadError::Internal(_) => "internal",
        }
    }
}

impl From<IngestError> for UploadError {
    fn from(err: IngestError) -> Self {
        UploadError::InvalidInput(err.to_string())
    }
}

/// Successful outcome of a route
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Files persisted or forwarded; aggregate message for the batch
    Stored {
        message: String,
        files: usize,
        bytes: u64,
    },
    /// Predictor payload, passed through unchanged
    Predicted(serde_json::Value),
}

/// Route strategy: consume a validated batch and produce an outcome
#[async_trait::async_trait]
pub trait UploadHandler: Send + Sync {
    async fn handle(&self, files: Vec<FileEntry>) -> Result<UploadOutcome, UploadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(UploadError::InvalidInput("x".into()).status(), 400);
        assert_eq!(UploadError::UnsupportedType("text/plain".into()).status(), 400);
        assert_eq!(UploadError::UploadFailed("disk".into()).status(), 500);
        assert_eq!(
            UploadError::Upstream {
                status: 503,
                error: "model unavailable".into(),
                body: serde_json::json!({ "error": "model unavailable" }),
            }
            .status(),
            503
        );
        assert_eq!(
            UploadError::UpstreamUnavailable { status: None, reason: "timeout".into() }.status(),
            500
        );
        assert_eq!(
            UploadError::UpstreamUnavailable { status: Some(502), reason: "html".into() }.status(),
            502
        );
        assert_eq!(
            UploadError::UpstreamUnavailable { status: Some(200), reason: "html".into() }.status(),
            500
        );
        assert_eq!(UploadError::PayloadTooLarge(10).status(), 413);
    }

    #[test]
    fn test_ingest_errors_are_invalid_input() {
        let err: UploadError = IngestError::NoFiles.into();
        assert!(matches!(err, UploadError::InvalidInput(ref m) if m == "No valid file received."));
        assert_eq!(err.status(), 400);
    }
}
