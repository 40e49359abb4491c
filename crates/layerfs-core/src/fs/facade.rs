//! Per-operation contracts over the composed store.
//!
//! This is where backend error kinds turn into caller-facing behaviour:
//! placeholder stats, empty reads, soft unlinks, rename fallbacks, mount
//! blobs and icon cache eviction. Anything not handled here propagates
//! unchanged.

use crate::vfs::{
    ErrorKind, FileAttr, Mount, RenameOutcome, RootStore, VfsError, VfsResult, WriteFlag,
};

use super::config::FsConfig;

/// The Async Operation Facade over one [`RootStore`].
#[derive(Debug)]
pub struct FsFacade {
    root: RootStore,
    config: FsConfig,
}

impl FsFacade {
    pub fn new(root: RootStore, config: FsConfig) -> Self {
        Self { root, config }
    }

    pub fn root(&self) -> &RootStore {
        &self.root
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Never fails.
    pub async fn exists(&self, path: &str) -> bool {
        self.root.exists(path).await
    }

    pub async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let result = self.root.stat(path).await;
        self.finish_stat(path, result)
    }

    pub async fn lstat(&self, path: &str) -> VfsResult<FileAttr> {
        let result = self.root.lstat(path).await;
        self.finish_stat(path, result)
    }

    /// Benign failures become a placeholder file; archive placeholders get
    /// their real size from the size index.
    fn finish_stat(&self, path: &str, result: VfsResult<FileAttr>) -> VfsResult<FileAttr> {
        match result {
            Ok(attr) if attr.is_file() && attr.is_placeholder() => {
                Ok(attr.with_size(self.root.sizes().size_of(path)))
            }
            Ok(attr) => Ok(attr),
            Err(e) if e.kind().is_benign() => {
                tracing::debug!(
                    path = %path,
                    code = e.kind().code(),
                    "stat miss, returning placeholder"
                );
                Ok(FileAttr::placeholder())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn mkdir(&self, path: &str, overwrite: bool) -> VfsResult<bool> {
        self.root
            .mkdir(path, WriteFlag::from_overwrite(overwrite))
            .await?;
        Ok(true)
    }

    /// Read a file. A mount reads as its raw blob; benign failures read as
    /// empty content.
    pub async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        match self.root.read_file(path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::IsDirectory => {
                match self.root.mount_at(path).await {
                    Some(mount) => Ok(mount.data().to_vec()),
                    None => Err(e),
                }
            }
            Err(e) if e.kind().is_benign() => {
                tracing::debug!(path = %path, code = e.kind().code(), "read miss, returning empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Entry names in listing order.
    pub async fn readdir(&self, path: &str) -> VfsResult<Vec<String>> {
        Ok(self
            .root
            .readdir(path)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    /// Write a file.
    ///
    /// Returns `false` when an `AlreadyExists` was swallowed because
    /// `overwrite` was set. A missing writable root is reported as
    /// [`VfsError::RootCorrupted`] for the initializer to act on.
    pub async fn write_file(&self, path: &str, data: &[u8], overwrite: bool) -> VfsResult<bool> {
        let written = match self
            .root
            .write_file(path, data, WriteFlag::from_overwrite(overwrite))
            .await
        {
            Ok(()) => true,
            Err(e) if overwrite && e.kind() == ErrorKind::AlreadyExists => false,
            Err(e) if e.is_root_not_found() => return Err(VfsError::RootCorrupted),
            Err(e) => return Err(e),
        };

        if !self.config.is_session_file(path) {
            self.evict_icon(path).await;
        }
        Ok(written)
    }

    async fn evict_icon(&self, path: &str) {
        let icon = self.config.icon_cache_path(path);
        if !self.root.exists(&icon).await {
            return;
        }
        match self.root.unlink(&icon).await {
            Ok(()) => tracing::debug!(icon = %icon, "evicted icon cache entry"),
            Err(e) => tracing::debug!(icon = %icon, error = %e, "icon cache eviction failed"),
        }
    }

    /// Rename, falling back as the store requires.
    ///
    /// - store cannot rename: copy then delete (directories are refused)
    /// - source is a mount: unmount and try once more
    /// - benign failure: [`RenameOutcome::Skipped`]
    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<RenameOutcome> {
        let mut unmounted = false;
        loop {
            let err = match self.root.rename(from, to).await {
                Ok(()) => return Ok(RenameOutcome::Renamed),
                Err(e) => e,
            };

            match err.kind() {
                ErrorKind::Unsupported => return self.rename_by_copy(from, to).await,
                ErrorKind::IsDirectory if !unmounted => {
                    if !self.root.umount(from).await {
                        return Err(err);
                    }
                    tracing::info!(from = %from, to = %to, "unmounted rename source, retrying");
                    unmounted = true;
                }
                kind if kind.is_benign() => {
                    tracing::warn!(from = %from, to = %to, code = kind.code(), "rename skipped");
                    return Ok(RenameOutcome::Skipped);
                }
                _ => return Err(err),
            }
        }
    }

    async fn rename_by_copy(&self, from: &str, to: &str) -> VfsResult<RenameOutcome> {
        if self.root.lstat(from).await?.is_dir() {
            return Err(VfsError::DirectoryRename(from.to_string()));
        }

        let data = self.root.read_file(from).await?;
        match self.root.write_file(to, &data, WriteFlag::Truncate).await {
            Err(e) if e.is_root_not_found() => return Err(VfsError::RootCorrupted),
            result => result?,
        }
        self.root.unlink(from).await?;

        tracing::warn!(from = %from, to = %to, "store cannot rename; copied instead");
        Ok(RenameOutcome::Copied)
    }

    pub async fn rmdir(&self, path: &str) -> VfsResult<bool> {
        self.root.rmdir(path).await?;
        Ok(true)
    }

    /// Remove a file. Benign failures are a soft no-op (`false`).
    pub async fn unlink(&self, path: &str) -> VfsResult<bool> {
        match self.root.unlink(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind().is_benign() => {
                tracing::debug!(path = %path, code = e.kind().code(), "unlink miss");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn mount(&self, path: &str, mount: Mount) -> VfsResult<()> {
        self.root.mount(path, mount).await
    }

    pub async fn unmount(&self, path: &str) -> bool {
        self.root.umount(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{
        ArchiveStore, MemoryFetcher, MemoryStore, OverlayStore, WritableStore,
    };
    use std::sync::Arc;

    const INDEX: &str = r#"{
        "version": 4,
        "size": 11,
        "fsroot": [
            ["System", 1, 0, [
                ["boot.ini", 0, 11],
                ["latest", 2, 0, "boot.ini"]
            ]]
        ]
    }"#;

    async fn facade_with(writable: Arc<dyn WritableStore>) -> FsFacade {
        let fetcher = MemoryFetcher::new(INDEX).with_file("/System/boot.ini", "[boot]\nos=1");
        let archive = ArchiveStore::load(Arc::new(fetcher)).await.unwrap();
        let sizes = archive.size_index().clone();
        let overlay = OverlayStore::new(writable, Arc::new(archive)).await.unwrap();
        FsFacade::new(RootStore::new(overlay, sizes), FsConfig::default())
    }

    async fn facade() -> FsFacade {
        facade_with(Arc::new(MemoryStore::new())).await
    }

    #[tokio::test]
    async fn test_stat_resolves_archive_sizes() {
        let fs = facade().await;
        assert_eq!(fs.stat("/System/boot.ini").await.unwrap().size, 11);
        assert_eq!(fs.stat("/System/latest").await.unwrap().size, 11);
        assert!(fs.lstat("/System/latest").await.unwrap().is_symlink());
    }

    #[tokio::test]
    async fn test_stat_missing_is_placeholder() {
        let fs = facade().await;
        let attr = fs.stat("/nope").await.unwrap();
        assert!(attr.is_file());
        assert!(attr.is_placeholder());
        assert!(!fs.exists("/nope").await);
    }

    #[tokio::test]
    async fn test_read_file_miss_is_empty() {
        let fs = facade().await;
        assert!(fs.read_file("/nope").await.unwrap().is_empty());
        assert!(matches!(
            fs.read_file("/System").await,
            Err(VfsError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_read_file_of_mount_returns_blob() {
        let fs = facade().await;
        fs.mount("/disk.iso", Mount::new("disk.iso", vec![9, 9]))
            .await
            .unwrap();
        assert_eq!(fs.read_file("/disk.iso").await.unwrap(), vec![9, 9]);
    }

    #[tokio::test]
    async fn test_write_file_overwrite_semantics() {
        let fs = facade().await;
        assert!(fs.write_file("/a.txt", b"one", false).await.unwrap());
        assert!(matches!(
            fs.write_file("/a.txt", b"two", false).await,
            Err(VfsError::AlreadyExists(_))
        ));
        assert!(fs.write_file("/a.txt", b"two", true).await.unwrap());
        assert_eq!(fs.read_file("/a.txt").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_write_file_evicts_icon() {
        let fs = facade().await;
        let icon = fs.config().icon_cache_path("/a.txt");
        fs.mkdir("/Users", false).await.unwrap();
        fs.mkdir("/Users/Public", false).await.unwrap();
        fs.mkdir("/Users/Public/Icons", false).await.unwrap();
        fs.mkdir("/Users/Public/Icons/Cache", false).await.unwrap();
        fs.write_file(&icon, b"png", false).await.unwrap();

        fs.write_file("/a.txt", b"x", false).await.unwrap();
        assert!(!fs.exists(&icon).await);
    }

    #[tokio::test]
    async fn test_root_not_found_becomes_root_corrupted() {
        let writable = Arc::new(MemoryStore::new());
        let fs = facade_with(writable.clone()).await;
        writable.corrupt_root();
        assert!(matches!(
            fs.write_file("/a.txt", b"x", false).await,
            Err(VfsError::RootCorrupted)
        ));
    }

    #[tokio::test]
    async fn test_rename_native_and_fallback() {
        let fs = facade().await;
        fs.write_file("/a.txt", b"a", false).await.unwrap();
        assert_eq!(
            fs.rename("/a.txt", "/b.txt").await.unwrap(),
            RenameOutcome::Renamed
        );

        let fs = facade_with(Arc::new(MemoryStore::without_atomic_rename())).await;
        fs.write_file("/a.txt", b"a", false).await.unwrap();
        assert_eq!(
            fs.rename("/a.txt", "/b.txt").await.unwrap(),
            RenameOutcome::Copied
        );
        assert_eq!(fs.read_file("/b.txt").await.unwrap(), b"a");
        assert!(!fs.exists("/a.txt").await);
    }

    #[tokio::test]
    async fn test_rename_archive_file_copies_up() {
        let fs = facade().await;
        assert_eq!(
            fs.rename("/System/boot.ini", "/boot.ini").await.unwrap(),
            RenameOutcome::Copied
        );
        assert_eq!(fs.read_file("/boot.ini").await.unwrap(), b"[boot]\nos=1");
        assert!(!fs.exists("/System/boot.ini").await);
    }

    #[tokio::test]
    async fn test_rename_directory_without_native_rename() {
        let fs = facade_with(Arc::new(MemoryStore::without_atomic_rename())).await;
        fs.mkdir("/dir", false).await.unwrap();
        assert!(matches!(
            fs.rename("/dir", "/other").await,
            Err(VfsError::DirectoryRename(_))
        ));
        assert!(fs.exists("/dir").await);
    }

    #[tokio::test]
    async fn test_rename_missing_source_is_skipped() {
        let fs = facade().await;
        assert_eq!(
            fs.rename("/ghost", "/still-ghost").await.unwrap(),
            RenameOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_rename_unmounts_once() {
        let fs = facade().await;
        fs.mkdir("/pack", false).await.unwrap();
        fs.mount("/pack", Mount::new("pack", vec![1])).await.unwrap();

        assert_eq!(
            fs.rename("/pack", "/moved").await.unwrap(),
            RenameOutcome::Renamed
        );
        assert!(fs.root().mounts().await.is_empty());
        assert!(fs.stat("/moved").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_rename_onto_mount_is_not_retried() {
        let fs = facade().await;
        fs.write_file("/a.txt", b"a", false).await.unwrap();
        fs.mount("/pack", Mount::new("pack", vec![1])).await.unwrap();
        assert!(matches!(
            fs.rename("/a.txt", "/pack").await,
            Err(VfsError::IsADirectory(_))
        ));
        assert_eq!(fs.root().mounts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unlink_soft_miss() {
        let fs = facade().await;
        assert!(!fs.unlink("/nope").await.unwrap());
        fs.write_file("/a.txt", b"a", false).await.unwrap();
        assert!(fs.unlink("/a.txt").await.unwrap());
        assert!(matches!(
            fs.unlink("/System").await,
            Err(VfsError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_rmdir_propagates() {
        let fs = facade().await;
        assert!(matches!(
            fs.rmdir("/nope").await,
            Err(VfsError::NotFound(_))
        ));
        fs.mkdir("/empty", false).await.unwrap();
        assert!(fs.rmdir("/empty").await.unwrap());
    }
}
