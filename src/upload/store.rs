//! Local directory storage
//!
//! Writes files into flat per-category directories. Every batch for a
//! directory runs under that directory's lock, so concurrent batches for the
//! same directory are serialized while different directories never contend.
//!
//! # Replace semantics
//!
//! With `replace` set, the batch becomes the directory's only content. New
//! files are written first and stale entries are removed only after every
//! write succeeded. A failed write therefore leaves the previous set in place
//! (plus whatever part of the new batch was already written) and never an
//! empty directory.

use super::UploadError;
use crate::ingest::FileEntry;
use crate::metrics;
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Result of writing one directory batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreReceipt {
    pub files_written: usize,
    pub bytes_written: u64,
    pub files_removed: usize,
}

/// Directory writer with one async lock per directory
#[derive(Debug, Default)]
pub struct DiskStore {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl DiskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, dir: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Write a batch into `dir`, creating it if needed.
    ///
    /// Files overwrite same-named entries (last write wins). No rollback is
    /// attempted when a later file fails.
    #[tracing::instrument(
        name = "store.write_batch",
        skip(self, files),
        fields(
            store.dir = %dir.display(),
            store.files = files.len(),
            store.replace = replace,
            store.bytes_written = tracing::field::Empty,
            store.files_removed = tracing::field::Empty
        ),
        err
    )]
    pub async fn write_batch(
        &self,
        dir: &Path,
        files: &[&FileEntry],
        replace: bool,
    ) -> Result<StoreReceipt, UploadError> {
        let lock = self.lock_for(dir);
        let _guard = lock.lock().await;
        let start_time = Instant::now();

        // create_dir_all succeeds when the directory already exists
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            UploadError::UploadFailed(format!("creating {}: {}", dir.display(), e))
        })?;

        let mut receipt = StoreReceipt::default();
        for file in files {
            let target = dir.join(&file.file_name);
            tokio::fs::write(&target, &file.bytes).await.map_err(|e| {
                UploadError::UploadFailed(format!("writing {}: {}", target.display(), e))
            })?;

            receipt.files_written += 1;
            receipt.bytes_written += file.len() as u64;
            metrics::record_file_stored(file.category().as_str(), file.len() as u64);
            tracing::debug!(file = %file.file_name, bytes = file.len(), "Stored file");
        }

        if replace {
            let keep: HashSet<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
            receipt.files_removed = remove_stale(dir, &keep).await?;
        }

        let span = tracing::Span::current();
        span.record("store.bytes_written", receipt.bytes_written);
        span.record("store.files_removed", receipt.files_removed);

        tracing::info!(
            files = receipt.files_written,
            bytes = receipt.bytes_written,
            removed = receipt.files_removed,
            duration_ms = start_time.elapsed().as_millis(),
            "Directory batch stored"
        );

        Ok(receipt)
    }
}

/// Delete every entry of `dir` whose name is not in `keep`
async fn remove_stale(dir: &Path, keep: &HashSet<&str>) -> Result<usize, UploadError> {
    let io_err = |e: std::io::Error| {
        UploadError::UploadFailed(format!("cleaning {}: {}", dir.display(), e))
    };

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| keep.contains(n)) {
            continue;
        }

        let path = entry.path();
        if entry.file_type().await.map_err(io_err)?.is_dir() {
            tokio::fs::remove_dir_all(&path).await.map_err(io_err)?;
        } else {
            tokio::fs::remove_file(&path).await.map_err(io_err)?;
        }
        tracing::debug!(path = %path.display(), "Removed stale entry");
        removed += 1;
    }

    Ok(removed)
}
