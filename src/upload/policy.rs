//! Storage-mode routing policy
//!
//! One generic procedure for every storage route: check the route's category
//! restriction, resolve each file's category to a [`Destination`], then write
//! directory groups and forward backend groups. A route's differences
//! (accepted category, replace semantics) are configuration on
//! [`StoreHandler`].

use super::forward::BackendForwarder;
use super::store::DiskStore;
use super::{UploadError, UploadHandler, UploadOutcome};
use crate::classify::Category;
use crate::config::{Destination, StorageConfig};
use crate::ingest::FileEntry;
use async_trait::async_trait;
use std::sync::Arc;

const SUCCESS_MESSAGE: &str = "Files uploaded successfully";

/// Storage route strategy
pub struct StoreHandler {
    storage: StorageConfig,
    category: Option<Category>,
    replace: bool,
    store: Arc<DiskStore>,
    forwarder: BackendForwarder,
}

impl StoreHandler {
    pub fn new(
        storage: StorageConfig,
        store: Arc<DiskStore>,
        forwarder: BackendForwarder,
    ) -> Self {
        Self {
            storage,
            category: None,
            replace: false,
            store,
            forwarder,
        }
    }

    /// Accept only files of `category`
    pub fn restrict_to(mut self, category: Option<Category>) -> Self {
        self.category = category;
        self
    }

    /// Each batch replaces the directory's previous contents
    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    /// Group files by destination, keeping first-seen order
    fn plan<'a>(&'a self, files: &'a [FileEntry]) -> Vec<(&'a Destination, Vec<&'a FileEntry>)> {
        let mut groups: Vec<(&Destination, Vec<&FileEntry>)> = Vec::new();
        for file in files {
            let destination = self.storage.destination(file.category());
            match groups.iter_mut().find(|(d, _)| *d == destination) {
                Some((_, members)) => members.push(file),
                None => groups.push((destination, vec![file])),
            }
        }
        groups
    }
}

#[async_trait]
impl UploadHandler for StoreHandler {
    #[tracing::instrument(
        name = "upload.store",
        skip(self, files),
        fields(
            upload.files = files.len(),
            upload.category = ?self.category,
            upload.replace = self.replace
        ),
        err
    )]
    async fn handle(&self, files: Vec<FileEntry>) -> Result<UploadOutcome, UploadError> {
        if let Some(required) = self.category {
            if let Some(file) = files.iter().find(|f| f.category() != required) {
                tracing::warn!(
                    file = %file.file_name,
                    expected = %required,
                    actual = %file.category(),
                    "Rejecting batch with file of wrong type"
                );
                return Err(UploadError::InvalidInput("Invalid file type received.".into()));
            }
        }

        let groups = self.plan(&files);
        let single_group = groups.len() == 1;
        let mut message = SUCCESS_MESSAGE.to_string();
        let mut total_files = 0;
        let mut total_bytes = 0u64;

        for (destination, members) in groups {
            match destination {
                Destination::Directory { path } => {
                    let receipt = self.store.write_batch(path, &members, self.replace).await?;
                    total_files += receipt.files_written;
                    total_bytes += receipt.bytes_written;
                }
                Destination::Forward { url, field } => {
                    let backend_message =
                        self.forwarder.forward_batch(url, field, &members).await?;
                    total_files += members.len();
                    total_bytes += members.iter().map(|f| f.len() as u64).sum::<u64>();
                    if single_group {
                        message = backend_message;
                    }
                }
            }
        }

        Ok(UploadOutcome::Stored {
            message,
            files: total_files,
            bytes: total_bytes,
        })
    }
}
