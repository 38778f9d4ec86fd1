//! Request ingestion
//!
//! Parses a buffered `multipart/form-data` body and extracts the file entries
//! carried under a route's field names. Validation is all-or-nothing: a single
//! malformed entry rejects the whole request before anything is written.

use crate::classify::{classify_filename, sanitize_filename, Category};
use bytes::Bytes;
use std::convert::Infallible;
use thiserror::Error;

/// Ingestion errors, all caused by the client
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Expected multipart/form-data: {0}")]
    NotMultipart(String),

    #[error("Failed to parse multipart data: {0}")]
    Malformed(String),

    #[error("No valid file received.")]
    NoFiles,

    #[error("Field '{0}' is not a file")]
    NotAFile(String),

    #[error("File name is missing in field '{0}'")]
    MissingName(String),

    #[error("File '{0}' is empty")]
    EmptyFile(String),

    #[error("Expected a single file, received {0}")]
    TooManyFiles(usize),
}

/// One uploaded file
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Multipart field the file arrived under
    pub field: String,
    /// Filename as sent by the client
    pub original_name: String,
    /// Sanitized filename, safe to join onto a directory
    pub file_name: String,
    /// Client-declared media type, untrusted
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl FileEntry {
    /// Category by extension of the sanitized name
    pub fn category(&self) -> Category {
        classify_filename(&self.file_name)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Which fields to read and how many files to accept
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec<'a> {
    pub fields: &'a [String],
    pub batch: bool,
}

/// Extract the multipart boundary from a `Content-Type` header value
pub fn multipart_boundary(content_type: Option<&str>) -> Result<String, IngestError> {
    let content_type = content_type
        .ok_or_else(|| IngestError::NotMultipart("missing Content-Type header".into()))?;
    multer::parse_boundary(content_type).map_err(|e| IngestError::NotMultipart(e.to_string()))
}

/// Parse a multipart body into validated file entries.
///
/// Fields whose name is not in `spec.fields` are skipped. Every entry under an
/// accepted name must be a file with a usable name and non-empty content.
#[tracing::instrument(
    name = "ingest.multipart",
    skip(body, spec),
    fields(body.bytes = body.len(), files = tracing::field::Empty),
    err
)]
pub async fn read_multipart(
    content_type: Option<&str>,
    body: Bytes,
    spec: FieldSpec<'_>,
) -> Result<Vec<FileEntry>, IngestError> {
    let boundary = multipart_boundary(content_type)?;

    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut entries = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| IngestError::Malformed(e.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        if !spec.fields.iter().any(|accepted| *accepted == field_name) {
            tracing::debug!(field = %field_name, "Skipping unrelated multipart field");
            continue;
        }

        let original_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| IngestError::NotAFile(field_name.clone()))?;
        let content_type = field.content_type().map(|mime| mime.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| IngestError::Malformed(e.to_string()))?;

        let file_name = sanitize_filename(&original_name);
        if file_name.is_empty() {
            return Err(IngestError::MissingName(field_name));
        }
        if bytes.is_empty() {
            return Err(IngestError::EmptyFile(original_name));
        }

        entries.push(FileEntry {
            field: field_name,
            original_name,
            file_name,
            content_type,
            bytes,
        });
    }

    if entries.is_empty() {
        return Err(IngestError::NoFiles);
    }
    if !spec.batch && entries.len() > 1 {
        return Err(IngestError::TooManyFiles(entries.len()));
    }

    tracing::Span::current().record("files", entries.len());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "kagami-test-boundary";

    fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    /// (field, filename, content type, body)
    fn body(parts: &[(&str, Option<&str>, Option<&str>, &[u8])]) -> Bytes {
        let mut out = Vec::new();
        for (field, file_name, ct, data) in parts {
            out.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match file_name {
                Some(name) => out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        field, name
                    )
                    .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n", field).as_bytes(),
                ),
            }
            if let Some(ct) = ct {
                out.extend_from_slice(format!("Content-Type: {}\r\n", ct).as_bytes());
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        Bytes::from(out)
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reads_batch_and_sanitizes_names() {
        let accepted = fields(&["files"]);
        let spec = FieldSpec { fields: &accepted, batch: true };
        let body = body(&[
            ("files", Some("my   song .wav"), Some("audio/wav"), b"RIFF"),
            ("files", Some("b.mp3"), Some("audio/mpeg"), b"ID3"),
        ]);

        let entries = read_multipart(Some(&content_type()), body, spec).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_name, "my_song_.wav");
        assert_eq!(entries[0].original_name, "my   song .wav");
        assert_eq!(entries[0].content_type.as_deref(), Some("audio/wav"));
        assert_eq!(entries[1].category(), Category::Audio);
    }

    #[tokio::test]
    async fn test_skips_unrelated_fields() {
        let accepted = fields(&["file"]);
        let spec = FieldSpec { fields: &accepted, batch: false };
        let body = body(&[
            ("note", None, None, b"hello"),
            ("file", Some("cover.png"), Some("image/png"), b"\x89PNG"),
        ]);

        let entries = read_multipart(Some(&content_type()), body, spec).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field, "file");
    }

    #[tokio::test]
    async fn test_no_matching_entries_is_rejected() {
        let accepted = fields(&["files"]);
        let spec = FieldSpec { fields: &accepted, batch: true };
        let body = body(&[("other", Some("a.mp3"), None, b"ID3")]);

        let result = read_multipart(Some(&content_type()), body, spec).await;
        assert!(matches!(result, Err(IngestError::NoFiles)));
    }

    #[tokio::test]
    async fn test_text_value_under_file_field_is_rejected() {
        let accepted = fields(&["file"]);
        let spec = FieldSpec { fields: &accepted, batch: false };
        let body = body(&[("file", None, None, b"not a file")]);

        let result = read_multipart(Some(&content_type()), body, spec).await;
        assert!(matches!(result, Err(IngestError::NotAFile(f)) if f == "file"));
    }

    #[tokio::test]
    async fn test_empty_file_rejects_whole_batch() {
        let accepted = fields(&["files"]);
        let spec = FieldSpec { fields: &accepted, batch: true };
        let body = body(&[
            ("files", Some("a.mp3"), None, b"ID3"),
            ("files", Some("b.mp3"), None, b""),
        ]);

        let result = read_multipart(Some(&content_type()), body, spec).await;
        assert!(matches!(result, Err(IngestError::EmptyFile(name)) if name == "b.mp3"));
    }

    #[tokio::test]
    async fn test_single_field_rejects_multiple_files() {
        let accepted = fields(&["file"]);
        let spec = FieldSpec { fields: &accepted, batch: false };
        let body = body(&[
            ("file", Some("a.txt"), None, b"a"),
            ("file", Some("b.txt"), None, b"b"),
        ]);

        let result = read_multipart(Some(&content_type()), body, spec).await;
        assert!(matches!(result, Err(IngestError::TooManyFiles(2))));
    }

    #[test]
    fn test_multipart_boundary_from_header() {
        assert_eq!(
            multipart_boundary(Some("multipart/form-data; boundary=abc123")).unwrap(),
            "abc123"
        );
        assert!(matches!(
            multipart_boundary(Some("application/json")),
            Err(IngestError::NotMultipart(_))
        ));
        assert!(matches!(multipart_boundary(None), Err(IngestError::NotMultipart(_))));
    }

    #[tokio::test]
    async fn test_rejects_non_multipart() {
        let accepted = fields(&["file"]);
        let spec = FieldSpec { fields: &accepted, batch: false };

        let result = read_multipart(Some("application/json"), Bytes::from("{}"), spec).await;
        assert!(matches!(result, Err(IngestError::NotMultipart(_))));

        let result = read_multipart(None, Bytes::new(), spec).await;
        assert!(matches!(result, Err(IngestError::NotMultipart(_))));
    }

    #[tokio::test]
    async fn test_path_only_filename_is_rejected() {
        let accepted = fields(&["file"]);
        let spec = FieldSpec { fields: &accepted, batch: false };
        let body = body(&[("file", Some("../"), None, b"data")]);

        let result = read_multipart(Some(&content_type()), body, spec).await;
        assert!(matches!(result, Err(IngestError::MissingName(_))));
    }
}
