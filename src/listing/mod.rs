//! Category directory listing
//!
//! Paginated view over a storage directory. The directory itself is the
//! index: there is no manifest, only the files whose extension classifies
//! into the listed category.

use crate::classify::{classify_filename, Category};
use serde::Serialize;
use std::path::Path;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_LIMIT: usize = 5;

/// Requested page, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub page: usize,
    pub limit: usize,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageQuery {
    /// Parse `page` and `limit` from a raw query string.
    ///
    /// Missing, non-numeric or zero values fall back to the defaults (1 and 5).
    pub fn from_query(query: Option<&str>) -> Self {
        let mut result = Self::default();
        for (key, value) in crate::router::parse_query(query) {
            let parsed = value.trim().parse::<usize>().ok().filter(|v| *v > 0);
            match (key.as_str(), parsed) {
                ("page", Some(page)) => result.page = page,
                ("limit", Some(limit)) => result.limit = limit,
                _ => {}
            }
        }
        result
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListing {
    pub files: Vec<String>,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
}

/// List files of `category` in `dir`, sorted by name.
///
/// A directory that does not exist yet is an empty listing.
#[tracing::instrument(name = "listing.page", skip(query), fields(page = query.page, limit = query.limit), err)]
pub async fn list_directory(
    dir: &Path,
    category: Category,
    query: PageQuery,
) -> Result<FileListing, std::io::Error> {
    let mut names = Vec::new();
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => {
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if classify_filename(name) == category {
                        names.push(name.to_string());
                    }
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    names.sort();

    Ok(paginate(names, query))
}

fn paginate(names: Vec<String>, query: PageQuery) -> FileListing {
    let total = names.len();
    let start = query.page.saturating_sub(1).saturating_mul(query.limit);
    let files = names.into_iter().skip(start).take(query.limit).collect();

    FileListing {
        files,
        total,
        page: query.page,
        total_pages: total.div_ceil(query.limit),
    }
}
