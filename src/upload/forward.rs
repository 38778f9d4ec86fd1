//! Backend forwarding for storage routes
//!
//! Sends a group of files to a backend endpoint as one outbound multipart
//! request, every file under the same field name. The backend answers with
//! `{ "message": ... }` on success or `{ "error": ... }` with a failure status.

use super::UploadError;
use crate::ingest::FileEntry;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;

/// Build a multipart part carrying one file
pub(crate) fn file_part(file: &FileEntry, media_type: Option<&str>) -> Result<Part, UploadError> {
    let part = Part::bytes(file.bytes.to_vec()).file_name(file.file_name.clone());
    match media_type.or(file.content_type.as_deref()) {
        Some(mime) => part
            .mime_str(mime)
            .map_err(|e| UploadError::InvalidInput(format!("Invalid content type '{}': {}", mime, e))),
        None => Ok(part),
    }
}

/// Read an upstream response as JSON, mapping failures onto the error taxonomy.
///
/// Non-JSON bodies are `UpstreamUnavailable`; JSON bodies with a failure
/// status become `Upstream` carrying the backend's `error` (or `message`).
pub(crate) async fn read_upstream_json(response: reqwest::Response) -> Result<Value, UploadError> {
    let status = response.status();
    let body = response.bytes().await.map_err(|e| UploadError::UpstreamUnavailable {
        status: Some(status.as_u16()),
        reason: format!("reading response body: {}", e),
    })?;

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        UploadError::UpstreamUnavailable {
            status: (!status.is_success()).then_some(status.as_u16()),
            reason: format!("response is not JSON: {}", e),
        }
    })?;

    if !status.is_success() {
        let error = payload
            .get("error")
            .or_else(|| payload.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string());
        return Err(UploadError::Upstream {
            status: status.as_u16(),
            error,
            body: payload,
        });
    }

    Ok(payload)
}

/// Map a transport error onto `UpstreamUnavailable`
pub(crate) fn transport_error(err: reqwest::Error) -> UploadError {
    let reason = if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.to_string()
    };
    UploadError::UpstreamUnavailable {
        status: None,
        reason,
    }
}

/// Forwards storage batches to backend endpoints
#[derive(Debug, Clone)]
pub struct BackendForwarder {
    client: reqwest::Client,
}

impl BackendForwarder {
    /// Create a forwarder whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Internal(format!("building HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Use an existing client (shares its connection pool)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Send `files` to `url` and return the backend's message
    #[tracing::instrument(
        name = "forward.batch",
        skip(self, files),
        fields(
            forward.url = %url,
            forward.files = files.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn forward_batch(
        &self,
        url: &str,
        field: &str,
        files: &[&FileEntry],
    ) -> Result<String, UploadError> {
        let mut form = Form::new();
        for file in files {
            form = form.part(field.to_string(), file_part(file, None)?);
        }

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        tracing::Span::current().record("http.status_code", response.status().as_u16());

        let payload = read_upstream_json(response).await?;
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Files uploaded successfully")
            .to_string();

        tracing::info!(message = %message, "Backend accepted forwarded batch");
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry(name: &str) -> FileEntry {
        FileEntry {
            field: "file".into(),
            original_name: name.into(),
            file_name: name.into(),
            content_type: Some("text/plain".into()),
            bytes: Bytes::from_static(b"0 -> song.mp3"),
        }
    }

    fn forwarder() -> BackendForwarder {
        BackendForwarder::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_forward_returns_backend_message() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/mapper"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "message": "Mapper loaded" })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let file = entry("mapper.txt");
        let url = format!("{}/upload/mapper", mock_server.uri());
        let message = forwarder().forward_batch(&url, "file", &[&file]).await.unwrap();

        assert_eq!(message, "Mapper loaded");
        let requests = mock_server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"file\"; filename=\"mapper.txt\""));
    }

    #[tokio::test]
    async fn test_forward_passes_backend_error_and_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(serde_json::json!({ "error": "bad mapper" })),
            )
            .mount(&mock_server)
            .await;

        let file = entry("mapper.txt");
        let result = forwarder()
            .forward_batch(&mock_server.uri(), "file", &[&file])
            .await;

        match result {
            Err(UploadError::Upstream { status, error, body }) => {
                assert_eq!(status, 422);
                assert_eq!(error, "bad mapper");
                assert_eq!(body, serde_json::json!({ "error": "bad mapper" }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forward_non_json_is_unavailable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
            .mount(&mock_server)
            .await;

        let file = entry("mapper.txt");
        let err = forwarder()
            .forward_batch(&mock_server.uri(), "file", &[&file])
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::UpstreamUnavailable { status: Some(502), .. }));
        assert_eq!(err.status(), 502);
    }

    #[tokio::test]
    async fn test_forward_connection_refused_is_unavailable() {
        let file = entry("mapper.txt");
        // Port 9 (discard) is not expected to accept HTTP connections
        let err = forwarder()
            .forward_batch("http://127.0.0.1:9/upload", "file", &[&file])
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::UpstreamUnavailable { status: None, .. }));
        assert_eq!(err.status(), 500);
    }
}
