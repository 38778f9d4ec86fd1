//! Common Test Infrastructure
//!
//! Provides shared utilities for integration tests:
//! - Test server on an OS-assigned port
//! - Temporary storage root
//! - Multipart request helpers

#![allow(dead_code)]

use kagami_uploadr::config::Config;
use kagami_uploadr::server::http::HttpServer;
use reqwest::multipart::{Form, Part};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Test Environment
///
/// Runs a server against a fresh storage root that is removed on drop.
pub struct TestEnv {
    pub server_addr: SocketAddr,
    pub client: reqwest::Client,
    pub root: TempDir,
    _server_handle: tokio::task::JoinHandle<()>,
}

impl TestEnv {
    /// Start a server with the default routes
    pub async fn new() -> Self {
        Self::with(|_| {}).await
    }

    /// Start a server after adjusting the default configuration
    pub async fn with(adjust: impl FnOnce(&mut Config)) -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::with_storage_root("127.0.0.1:0", root.path());
        adjust(&mut config);

        let server = HttpServer::new(config).await.expect("Failed to create server");
        let server_addr = server.local_addr();

        let server_handle = tokio::spawn(async move {
            let _ = server.run().await;
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build client");

        Self {
            server_addr,
            client,
            root,
            _server_handle: server_handle,
        }
    }

    /// Get the base URL for the test server
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.server_addr, path)
    }

    /// Category directory under the storage root
    pub fn dir(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    /// POST a multipart form
    pub async fn post_form(&self, path: &str, form: Form) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .expect("Request failed")
    }
}

/// Multipart form with one part per `(field, filename, content)`
pub fn form(files: &[(&str, &str, &[u8])]) -> Form {
    files.iter().fold(Form::new(), |form, (field, name, content)| {
        form.part(
            field.to_string(),
            Part::bytes(content.to_vec()).file_name(name.to_string()),
        )
    })
}

/// Multipart form with a single part carrying an explicit media type
pub fn typed_form(field: &str, name: &str, mime: &str, content: &[u8]) -> Form {
    let part = Part::bytes(content.to_vec())
        .file_name(name.to_string())
        .mime_str(mime)
        .expect("valid mime");
    Form::new().part(field.to_string(), part)
}

/// Sorted file names in a directory, empty when it does not exist
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Response status and parsed JSON body
pub async fn json(response: reqwest::Response) -> (u16, serde_json::Value) {
    let status = response.status().as_u16();
    let body = response.json().await.expect("Response is not JSON");
    (status, body)
}
