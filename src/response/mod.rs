//! Response normalization
//!
//! Collapses every outcome into a JSON body and an HTTP status. Envelopes
//! carry either `message` or `error` plus the numeric `status`. Upstream JSON,
//! success or error, is passed through as it came with the upstream status.

use crate::listing::FileListing;
use crate::upload::{UploadError, UploadOutcome};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::Value;

/// Body returned to callers that do not get an upstream payload
pub const GENERIC_FAILURE: &str = "File upload failed";

/// `{ message | error, status }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: u16,
}

impl ResponseEnvelope {
    pub fn message(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: Some(message.into()),
            error: None,
            status,
        }
    }

    pub fn error(error: impl Into<String>, status: u16) -> Self {
        Self {
            message: None,
            error: Some(error.into()),
            status,
        }
    }

    /// Caller-facing view of an error.
    ///
    /// Local I/O and internal faults are reduced to a generic message so no
    /// filesystem path or internal detail leaves the process.
    pub fn from_error(err: &UploadError) -> Self {
        let status = err.status();
        let error = match err {
            UploadError::InvalidInput(msg) => msg.clone(),
            UploadError::UnsupportedType(_) | UploadError::PayloadTooLarge(_) => err.to_string(),
            UploadError::Upstream { error, .. } => error.clone(),
            UploadError::UpstreamUnavailable { .. } => "Prediction service unavailable".into(),
            UploadError::UploadFailed(_) | UploadError::Internal(_) => GENERIC_FAILURE.into(),
        };
        Self::error(error, status)
    }
}

/// Everything a handler can answer with
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Envelope(ResponseEnvelope),
    /// Raw JSON with an explicit status
    Json { status: u16, body: Value },
    Listing(FileListing),
}

impl ApiResponse {
    /// Normalize a route result
    pub fn from_result(result: Result<UploadOutcome, UploadError>) -> Self {
        match result {
            Ok(UploadOutcome::Stored { message, .. }) => {
                ApiResponse::Envelope(ResponseEnvelope::message(message, 201))
            }
            Ok(UploadOutcome::Predicted(body)) => ApiResponse::Json { status: 200, body },
            Err(UploadError::Upstream { status, body, .. }) => ApiResponse::Json { status, body },
            Err(err) => ApiResponse::Envelope(ResponseEnvelope::from_error(&err)),
        }
    }

    pub fn error(error: impl Into<String>, status: u16) -> Self {
        ApiResponse::Envelope(ResponseEnvelope::error(error, status))
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiResponse::Envelope(envelope) => envelope.status,
            ApiResponse::Json { status, .. } => *status,
            ApiResponse::Listing(_) => 200,
        }
    }

    /// Render as a hyper response
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match &self {
            ApiResponse::Envelope(envelope) => serde_json::to_vec(envelope),
            ApiResponse::Json { body, .. } => serde_json::to_vec(body),
            ApiResponse::Listing(listing) => serde_json::to_vec(listing),
        };
        let body = body.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize response body");
            format!(r#"{{"error":"{}","status":500}}"#, GENERIC_FAILURE).into_bytes()
        });

        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}
