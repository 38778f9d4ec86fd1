//! Predictor dispatch
//!
//! Proxies one uploaded image or audio file to the external prediction
//! service. The file is classified by its declared media type (sniffed when
//! absent), re-wrapped in a multipart body under the field the predictor
//! expects (`image` or `audio`), and the predictor's JSON is passed through.
//!
//! | Category | Endpoint | Field |
//! |----------|----------|-------|
//! | image | `{base_url}{image_path}` | `image` |
//! | audio | `{base_url}{audio_path}` | `audio` |

use crate::classify::{
    classify_for_prediction, is_specific_media_type, normalize_media_type, sniff, Category,
};
use crate::config::PredictorConfig;
use crate::ingest::FileEntry;
use crate::metrics;
use crate::upload::forward::{file_part, read_upstream_json, transport_error};
use crate::upload::{UploadError, UploadHandler, UploadOutcome};
use async_trait::async_trait;
use reqwest::multipart::Form;
use serde_json::Value;
use std::time::{Duration, Instant};

/// HTTP client for the prediction service
#[derive(Debug, Clone)]
pub struct PredictorClient {
    config: PredictorConfig,
    client: reqwest::Client,
}

impl PredictorClient {
    /// Create a client with the configured timeout
    pub fn new(config: PredictorConfig) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| UploadError::Internal(format!("building HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// The underlying client, shared with backend forwarding
    pub fn http_client(&self) -> reqwest::Client {
        self.client.clone()
    }

    /// Send one file to the predictor and return its JSON payload
    #[tracing::instrument(
        name = "predict.dispatch",
        skip(self, file),
        fields(
            predict.file = %file.file_name,
            predict.declared_type = ?file.content_type,
            predict.category = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn predict(&self, file: &FileEntry) -> Result<Value, UploadError> {
        let declared = file.content_type.as_deref().map(normalize_media_type);
        let category = classify_for_prediction(declared.as_deref(), &file.bytes)
            .ok_or_else(|| {
                UploadError::UnsupportedType(
                    file.content_type
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                )
            })?;
        let span = tracing::Span::current();
        span.record("predict.category", category.as_str());

        let (url, field) = match (self.config.endpoint(category), category) {
            (Some(url), Category::Image) => (url, "image"),
            (Some(url), Category::Audio) => (url, "audio"),
            _ => return Err(UploadError::UnsupportedType(category.to_string())),
        };

        // A missing or generic declared type is replaced by the sniffed one
        let media_type = match declared.as_deref() {
            Some(t) if is_specific_media_type(t) => Some(t),
            _ => sniff(&file.bytes).map(|(_, media_type)| media_type),
        };
        let form = Form::new().part(field, file_part(file, media_type)?);

        let start_time = Instant::now();
        let result = async {
            let response = self
                .client
                .post(&url)
                .multipart(form)
                .send()
                .await
                .map_err(transport_error)?;
            span.record("http.status_code", response.status().as_u16());
            read_upstream_json(response).await
        }
        .await;

        let duration = start_time.elapsed();
        metrics::record_predict(category.as_str(), result.is_ok(), duration.as_secs_f64());

        if result.is_ok() {
            tracing::info!(
                category = %category,
                duration_ms = duration.as_millis(),
                "Prediction completed"
            );
        }
        result
    }
}

/// Dispatch route strategy: exactly one file, proxied to the predictor
pub struct PredictHandler {
    client: PredictorClient,
}

impl PredictHandler {
    pub fn new(client: PredictorClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UploadHandler for PredictHandler {
    async fn handle(&self, files: Vec<FileEntry>) -> Result<UploadOutcome, UploadError> {
        let file = match files.as_slice() {
            [file] => file,
            [] => return Err(UploadError::InvalidInput("No valid file received.".into())),
            more => {
                return Err(UploadError::InvalidInput(format!(
                    "Expected a single file, received {}",
                    more.len()
                )))
            }
        };

        self.client.predict(file).await.map(UploadOutcome::Predicted)
    }
}
