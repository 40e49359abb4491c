//! Archive content sources.
//!
//! How archive bytes travel is up to the host; the archive store only needs
//! the index document once and individual file contents on demand.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::path;

/// Source of archive bytes.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Fetch the index document.
    async fn fetch_index(&self) -> VfsResult<Vec<u8>>;

    /// Fetch one file's contents by archive path.
    async fn fetch(&self, path: &str) -> VfsResult<Vec<u8>>;
}

/// Serves an archive laid out in a local directory.
///
/// Archive path `/a/b` maps to `<root>/a/b`; the index lives at
/// `<root>/<index_file>`.
#[derive(Debug, Clone)]
pub struct DirFetcher {
    root: PathBuf,
    index_file: String,
}

impl DirFetcher {
    /// Create a fetcher rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, index_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            index_file: index_file.into(),
        }
    }

    /// Get the root path.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Map an archive path onto the local directory.
    ///
    /// Normalization drops `..` at the root, so the result stays under it.
    fn resolve(&self, archive_path: &str) -> PathBuf {
        let normalized = path::normalize(archive_path);
        self.root.join(normalized.trim_start_matches('/'))
    }
}

#[async_trait]
impl ArchiveFetcher for DirFetcher {
    async fn fetch_index(&self) -> VfsResult<Vec<u8>> {
        let index = self.resolve(&self.index_file);
        tracing::debug!(index = %index.display(), "fetching archive index");
        Ok(tokio::fs::read(index).await?)
    }

    async fn fetch(&self, archive_path: &str) -> VfsResult<Vec<u8>> {
        let local = self.resolve(archive_path);
        match tokio::fs::read(&local).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VfsError::not_found(path::normalize(archive_path)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Serves an archive held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    index: Vec<u8>,
    files: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    /// Create a fetcher for the given index document.
    pub fn new(index: impl Into<Vec<u8>>) -> Self {
        Self {
            index: index.into(),
            files: HashMap::new(),
        }
    }

    /// Add a file's contents.
    pub fn with_file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path::normalize(path), data.into());
        self
    }
}

#[async_trait]
impl ArchiveFetcher for MemoryFetcher {
    async fn fetch_index(&self) -> VfsResult<Vec<u8>> {
        Ok(self.index.clone())
    }

    async fn fetch(&self, archive_path: &str) -> VfsResult<Vec<u8>> {
        let normalized = path::normalize(archive_path);
        self.files
            .get(&normalized)
            .cloned()
            .ok_or_else(|| VfsError::not_found(normalized))
    }
}
