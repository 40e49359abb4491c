//! Backing store traits.
//!
//! Two capability sets back the overlay: an immutable [`ReadOnlyStore`]
//! (the archive layer) and a mutable [`WritableStore`]. Backends describe
//! what they can do through [`StoreCapabilities`] and signal gaps with
//! [`VfsError::Unsupported`](super::VfsError::Unsupported) rather than
//! doing something approximate.
//!
//! All paths are normalized absolute paths (see [`super::path`]).

use async_trait::async_trait;

use super::VfsResult;
use super::types::{DirEntry, FileAttr, WriteFlag};

/// What a writable backend can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// `rename` is implemented natively.
    pub atomic_rename: bool,
    /// Data survives the process.
    pub persistent: bool,
}

/// Immutable, prefetched file tree.
///
/// File sizes are not known per entry: `stat` reports files with a
/// placeholder size that the caller resolves from the size index.
#[async_trait]
pub trait ReadOnlyStore: Send + Sync {
    /// Get attributes, following symlinks.
    async fn stat(&self, path: &str) -> VfsResult<FileAttr>;

    /// Get attributes without following a final symlink.
    async fn lstat(&self, path: &str) -> VfsResult<FileAttr>;

    /// Stored target of the symlink at `path`.
    async fn readlink(&self, path: &str) -> VfsResult<String>;

    /// Read whole file contents.
    async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>>;

    /// List a directory.
    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>>;

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> bool {
        self.lstat(path).await.is_ok()
    }
}

/// Mutable backing store.
///
/// Creating an entry requires its parent directory to exist; a missing
/// parent is reported as `NotFound` for the parent path.
#[async_trait]
pub trait WritableStore: Send + Sync {
    /// Describe this backend.
    fn capabilities(&self) -> StoreCapabilities;

    /// Get attributes.
    async fn stat(&self, path: &str) -> VfsResult<FileAttr>;

    /// Read whole file contents.
    async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>>;

    /// List a directory, sorted by name.
    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>>;

    /// Create or replace a file.
    async fn write_file(&self, path: &str, data: &[u8], flag: WriteFlag) -> VfsResult<()>;

    /// Create a directory. With `Truncate`, an existing directory is kept.
    async fn mkdir(&self, path: &str, flag: WriteFlag) -> VfsResult<()>;

    /// Remove a file.
    async fn unlink(&self, path: &str) -> VfsResult<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &str) -> VfsResult<()>;

    /// Rename a file or directory.
    ///
    /// Backends without `atomic_rename` return `Unsupported`.
    async fn rename(&self, from: &str, to: &str) -> VfsResult<()>;

    /// Remove everything and re-seed an empty root.
    async fn clear(&self) -> VfsResult<()>;

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> bool {
        self.stat(path).await.is_ok()
    }
}
