//! Overlay of a writable layer on top of the read-only archive.
//!
//! Lookups try the writable layer first and fall through to the archive.
//! Deleting something that exists in the archive records a tombstone so it
//! stops showing through; a tombstoned directory hides its whole subtree.
//! Tombstones are persisted in the writable layer at [`DELETION_LOG`].
//!
//! Symlinks live only in the archive, but they are resolved here, one hop at
//! a time, so a link sees the same shadowing and tombstones as its target.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::error::{ErrorKind, VfsError, VfsResult};
use super::path::{self, LinkWalk};
use super::store::{ReadOnlyStore, WritableStore};
use super::types::{DirEntry, FileAttr, WriteFlag};

/// Writable-layer file listing tombstoned archive paths, one per line.
pub const DELETION_LOG: &str = "/.deletedFiles.log";

fn is_not_found(e: &VfsError) -> bool {
    e.kind() == ErrorKind::NotFound
}

/// Writable-over-archive composition.
pub struct OverlayStore {
    writable: Arc<dyn WritableStore>,
    archive: Arc<dyn ReadOnlyStore>,
    deleted: RwLock<BTreeSet<String>>,
}

impl std::fmt::Debug for OverlayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayStore")
            .field("writable", &self.writable.capabilities())
            .field("deleted", &self.deleted.read().len())
            .finish()
    }
}

impl OverlayStore {
    /// Compose the two layers, reloading any persisted tombstones.
    pub async fn new(
        writable: Arc<dyn WritableStore>,
        archive: Arc<dyn ReadOnlyStore>,
    ) -> VfsResult<Self> {
        let deleted = match writable.read_file(DELETION_LOG).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes)
                .lines()
                .filter(|line| !line.is_empty())
                .map(path::normalize)
                .collect(),
            Err(e) if is_not_found(&e) => BTreeSet::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            writable,
            archive,
            deleted: RwLock::new(deleted),
        })
    }

    /// The writable layer.
    pub fn writable(&self) -> &Arc<dyn WritableStore> {
        &self.writable
    }

    /// The archive layer.
    pub fn archive(&self) -> &Arc<dyn ReadOnlyStore> {
        &self.archive
    }

    /// Tombstoned archive paths.
    pub fn deleted_paths(&self) -> Vec<String> {
        self.deleted.read().iter().cloned().collect()
    }

    /// Returns true if `path` or one of its ancestors is tombstoned.
    fn is_deleted(&self, path: &str) -> bool {
        let deleted = self.deleted.read();
        deleted.contains(path) || path::ancestors(path).iter().any(|a| deleted.contains(a))
    }

    /// Returns true if the archive entry at `path` shows through.
    async fn in_archive(&self, path: &str) -> bool {
        !self.is_deleted(path) && self.archive.exists(path).await
    }

    async fn persist_deletions(&self) -> VfsResult<()> {
        let log = {
            let deleted = self.deleted.read();
            deleted.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
        };
        if log.is_empty() {
            return match self.writable.unlink(DELETION_LOG).await {
                Err(e) if !is_not_found(&e) => Err(e),
                _ => Ok(()),
            };
        }
        self.writable
            .write_file(DELETION_LOG, log.as_bytes(), WriteFlag::Truncate)
            .await
    }

    async fn tombstone(&self, path: &str) -> VfsResult<()> {
        self.deleted.write().insert(path.to_string());
        tracing::debug!(path = %path, "tombstoned archive entry");
        self.persist_deletions().await
    }

    /// Lift the tombstone on a re-created path.
    ///
    /// The archive's former children stay hidden beneath it.
    async fn revive(&self, path: &str) -> VfsResult<()> {
        let was_deleted = self.deleted.write().remove(path);
        if !was_deleted {
            return Ok(());
        }
        if let Ok(children) = self.archive.readdir(path).await {
            let mut deleted = self.deleted.write();
            for child in children {
                deleted.insert(path::join(path, &child.name));
            }
        }
        self.persist_deletions().await
    }

    /// Make sure every ancestor of `path` exists as a writable directory,
    /// copying archive directories up as needed.
    async fn prepare_parent(&self, path: &str) -> VfsResult<()> {
        if !self.writable.exists("/").await {
            return Err(VfsError::not_found("/"));
        }

        for dir in path::ancestors(path).into_iter().skip(1) {
            match self.writable.stat(&dir).await {
                Ok(attr) if attr.is_dir() => continue,
                Ok(_) => return Err(VfsError::not_a_directory(dir)),
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(e),
            }

            if self.is_deleted(&dir) {
                return Err(VfsError::not_found(dir));
            }
            match self.archive.stat(&dir).await {
                Ok(attr) if attr.is_dir() => {
                    self.writable.mkdir(&dir, WriteFlag::Truncate).await?;
                    tracing::debug!(path = %dir, "copied directory up from archive");
                }
                Ok(_) => return Err(VfsError::not_a_directory(dir)),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Resolve symlinks along `path` through the composed view.
    ///
    /// Every prefix is looked up in the writable layer first. A tombstoned
    /// directory on the way ends the walk with `NotFound`; a tombstoned or
    /// missing final component is returned as is for the caller to handle.
    pub async fn resolve(&self, path: &str, follow_final: bool) -> VfsResult<String> {
        let mut walk = LinkWalk::new(path);
        while let Some((candidate, last)) = walk.candidate() {
            match self.writable.stat(&candidate).await {
                Ok(attr) if attr.is_dir() || last => {
                    walk.accept();
                    continue;
                }
                Ok(_) => return Err(VfsError::not_found(path::normalize(path))),
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(e),
            }

            if self.is_deleted(&candidate) {
                if last {
                    walk.accept();
                    continue;
                }
                return Err(VfsError::not_found(candidate));
            }
            if last && !follow_final {
                walk.accept();
                continue;
            }

            match self.archive.lstat(&candidate).await {
                Ok(attr) if attr.is_symlink() => {
                    let target = self.archive.readlink(&candidate).await?;
                    walk.follow(&target)?;
                }
                _ => walk.accept(),
            }
        }
        Ok(walk.finish())
    }

    /// Get attributes, following symlinks.
    pub async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let path = self.resolve(path, true).await?;
        match self.writable.stat(&path).await {
            Err(e) if is_not_found(&e) => {
                if self.is_deleted(&path) {
                    return Err(VfsError::not_found(path));
                }
                self.archive.stat(&path).await
            }
            result => result,
        }
    }

    /// Get attributes without following a final symlink.
    pub async fn lstat(&self, path: &str) -> VfsResult<FileAttr> {
        let path = self.resolve(path, false).await?;
        match self.writable.stat(&path).await {
            Err(e) if is_not_found(&e) => {
                if self.is_deleted(&path) {
                    return Err(VfsError::not_found(path));
                }
                self.archive.lstat(&path).await
            }
            result => result,
        }
    }

    /// Check if a path exists in either layer.
    pub async fn exists(&self, path: &str) -> bool {
        self.lstat(path).await.is_ok()
    }

    /// Read whole file contents.
    pub async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let path = self.resolve(path, true).await?;
        match self.writable.read_file(&path).await {
            Err(e) if is_not_found(&e) => {
                if self.is_deleted(&path) {
                    return Err(VfsError::not_found(path));
                }
                self.archive.read_file(&path).await
            }
            result => result,
        }
    }

    /// Union listing of both layers; writable entries win on name clashes.
    pub async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let path = self.resolve(path, true).await?;

        let upper = match self.writable.readdir(&path).await {
            Ok(entries) => Some(entries),
            Err(e) if is_not_found(&e) => None,
            Err(e) => return Err(e),
        };
        let lower = if self.is_deleted(&path) {
            None
        } else {
            match self.archive.readdir(&path).await {
                Ok(entries) => Some(entries),
                Err(e) if is_not_found(&e) => None,
                // A writable directory shadows whatever the archive has here.
                Err(_) if upper.is_some() => None,
                Err(e) => return Err(e),
            }
        };

        if upper.is_none() && lower.is_none() {
            return Err(VfsError::not_found(path));
        }

        let mut merged: BTreeMap<String, DirEntry> = BTreeMap::new();
        for entry in lower.into_iter().flatten() {
            if !self.is_deleted(&path::join(&path, &entry.name)) {
                merged.insert(entry.name.clone(), entry);
            }
        }
        for entry in upper.into_iter().flatten() {
            merged.insert(entry.name.clone(), entry);
        }
        if path::is_root(&path) {
            merged.remove(path::file_name(DELETION_LOG));
        }

        Ok(merged.into_values().collect())
    }

    /// Write a file into the writable layer. A link is written through.
    pub async fn write_file(&self, path: &str, data: &[u8], flag: WriteFlag) -> VfsResult<()> {
        let path = self.resolve(path, true).await?;
        match self.lstat(&path).await {
            Ok(attr) if attr.is_dir() => return Err(VfsError::is_a_directory(path)),
            Ok(_) if flag.is_exclusive() => return Err(VfsError::already_exists(path)),
            Ok(_) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e),
        }

        self.prepare_parent(&path).await?;
        // The archive copy (if any) is shadowed, so the writable layer may
        // create or replace freely here.
        self.writable
            .write_file(&path, data, WriteFlag::Truncate)
            .await?;
        self.revive(&path).await
    }

    /// Create a directory in the writable layer.
    pub async fn mkdir(&self, path: &str, flag: WriteFlag) -> VfsResult<()> {
        let path = self.resolve(path, false).await?;
        match self.stat(&path).await {
            Ok(attr) if attr.is_dir() && !flag.is_exclusive() => return Ok(()),
            Ok(_) => return Err(VfsError::already_exists(path)),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e),
        }

        self.prepare_parent(&path).await?;
        self.writable.mkdir(&path, flag).await?;
        self.revive(&path).await
    }

    /// Remove a file from whichever layers hold it.
    pub async fn unlink(&self, path: &str) -> VfsResult<()> {
        let path = self.resolve(path, false).await?;
        let attr = self.lstat(&path).await?;
        if attr.is_dir() {
            return Err(VfsError::is_a_directory(path));
        }

        let in_archive = self.in_archive(&path).await;
        match self.writable.unlink(&path).await {
            Err(e) if !is_not_found(&e) => return Err(e),
            _ => {}
        }
        if in_archive {
            self.tombstone(&path).await?;
        }
        Ok(())
    }

    /// Remove an empty directory from whichever layers hold it.
    pub async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let path = self.resolve(path, false).await?;
        if path::is_root(&path) {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let attr = self.stat(&path).await?;
        if !attr.is_dir() {
            return Err(VfsError::not_a_directory(path));
        }
        if !self.readdir(&path).await?.is_empty() {
            return Err(VfsError::directory_not_empty(path));
        }

        let in_archive = self.in_archive(&path).await;
        match self.writable.rmdir(&path).await {
            Err(e) if !is_not_found(&e) => return Err(e),
            _ => {}
        }
        if in_archive {
            self.tombstone(&path).await?;
        }
        Ok(())
    }

    /// Rename within the writable layer.
    ///
    /// Sources that need copying up from the archive (anything not in the
    /// writable layer, and directories that merge archive content) are
    /// reported as `Unsupported`.
    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let from = self.resolve(from, false).await?;
        let to = self.resolve(to, false).await?;
        if from == to {
            return Ok(());
        }

        let source = self.lstat(&from).await?;
        let source_in_archive = self.in_archive(&from).await;
        if !self.writable.exists(&from).await || (source.is_dir() && source_in_archive) {
            return Err(VfsError::unsupported(format!("rename {from}: needs copy-up")));
        }

        match self.lstat(&to).await {
            Ok(dest) if dest.is_dir() && !source.is_dir() => {
                return Err(VfsError::is_a_directory(to));
            }
            Ok(dest) if !dest.is_dir() && source.is_dir() => {
                return Err(VfsError::not_a_directory(to));
            }
            Ok(dest) if dest.is_dir() && !self.readdir(&to).await?.is_empty() => {
                return Err(VfsError::directory_not_empty(to));
            }
            _ => {}
        }

        self.prepare_parent(&to).await?;
        self.writable.rename(&from, &to).await?;
        if source_in_archive {
            self.tombstone(&from).await?;
        }
        self.revive(&to).await
    }

    /// Destroy the writable layer's contents and forget every tombstone.
    pub async fn clear(&self) -> VfsResult<()> {
        self.writable.clear().await?;
        self.deleted.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::archive::{ArchiveStore, MemoryFetcher};
    use crate::vfs::backends::MemoryStore;

    const INDEX: &str = r#"{
        "version": 4,
        "size": 9,
        "fsroot": [
            ["docs", 1, 0, [
                ["a.txt", 0, 5],
                ["nested", 1, 0, [
                    ["deep.txt", 0, 4]
                ]]
            ]],
            ["empty", 1, 0, []]
        ]
    }"#;

    async fn overlay_with(writable: Arc<dyn WritableStore>) -> OverlayStore {
        let fetcher = MemoryFetcher::new(INDEX)
            .with_file("/docs/a.txt", "alpha")
            .with_file("/docs/nested/deep.txt", "deep");
        let archive = ArchiveStore::load(Arc::new(fetcher)).await.unwrap();
        OverlayStore::new(writable, Arc::new(archive)).await.unwrap()
    }

    async fn overlay() -> OverlayStore {
        overlay_with(Arc::new(MemoryStore::new())).await
    }

    async fn names(fs: &OverlayStore, path: &str) -> Vec<String> {
        fs.readdir(path)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    #[tokio::test]
    async fn test_reads_fall_through_to_archive() {
        let fs = overlay().await;
        assert_eq!(fs.read_file("/docs/a.txt").await.unwrap(), b"alpha");
        assert!(fs.stat("/docs/a.txt").await.unwrap().is_placeholder());
        assert!(fs.exists("/docs/nested/deep.txt").await);
        assert!(!fs.exists("/docs/b.txt").await);
    }

    #[tokio::test]
    async fn test_writable_shadows_archive() {
        let fs = overlay().await;
        fs.write_file("/docs/a.txt", b"override", WriteFlag::Truncate)
            .await
            .unwrap();

        assert_eq!(fs.read_file("/docs/a.txt").await.unwrap(), b"override");
        assert_eq!(fs.stat("/docs/a.txt").await.unwrap().size, 8);
        assert_eq!(names(&fs, "/docs").await, vec!["a.txt", "nested"]);
    }

    #[tokio::test]
    async fn test_exclusive_write_sees_archive_entries() {
        let fs = overlay().await;
        let err = fs
            .write_file("/docs/a.txt", b"x", WriteFlag::Exclusive)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_write_copies_up_parents() {
        let fs = overlay().await;
        fs.write_file("/docs/nested/new.txt", b"n", WriteFlag::Exclusive)
            .await
            .unwrap();

        assert!(fs.writable().stat("/docs/nested").await.unwrap().is_dir());
        assert_eq!(names(&fs, "/docs/nested").await, vec!["deep.txt", "new.txt"]);
    }

    #[tokio::test]
    async fn test_write_without_parent_fails() {
        let fs = overlay().await;
        let err = fs
            .write_file("/missing/file.txt", b"x", WriteFlag::Exclusive)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::NotFound(ref p) if p == "/missing"));
    }

    #[tokio::test]
    async fn test_unlink_archive_file_tombstones_it() {
        let fs = overlay().await;
        fs.unlink("/docs/a.txt").await.unwrap();

        assert!(!fs.exists("/docs/a.txt").await);
        assert!(matches!(
            fs.read_file("/docs/a.txt").await,
            Err(VfsError::NotFound(_))
        ));
        assert_eq!(names(&fs, "/docs").await, vec!["nested"]);
        assert_eq!(fs.deleted_paths(), vec!["/docs/a.txt"]);
    }

    #[tokio::test]
    async fn test_tombstones_persist_in_writable_layer() {
        let writable: Arc<dyn WritableStore> = Arc::new(MemoryStore::new());
        {
            let fs = overlay_with(Arc::clone(&writable)).await;
            fs.unlink("/docs/a.txt").await.unwrap();
            assert_eq!(names(&fs, "/").await, vec!["docs", "empty"]);
        }

        let fs = overlay_with(writable).await;
        assert!(!fs.exists("/docs/a.txt").await);
    }

    #[tokio::test]
    async fn test_rmdir_hides_subtree() {
        let fs = overlay().await;
        assert!(matches!(
            fs.rmdir("/docs").await,
            Err(VfsError::DirectoryNotEmpty(_))
        ));

        fs.rmdir("/empty").await.unwrap();
        assert!(!fs.exists("/empty").await);
        assert_eq!(names(&fs, "/").await, vec!["docs"]);
    }

    #[tokio::test]
    async fn test_recreated_directory_keeps_archive_children_hidden() {
        let fs = overlay().await;
        fs.unlink("/docs/nested/deep.txt").await.unwrap();
        fs.rmdir("/docs/nested").await.unwrap();

        fs.mkdir("/docs/nested", WriteFlag::Exclusive).await.unwrap();
        assert!(fs.readdir("/docs/nested").await.unwrap().is_empty());
        assert!(!fs.exists("/docs/nested/deep.txt").await);
    }

    #[tokio::test]
    async fn test_mkdir_flags() {
        let fs = overlay().await;
        assert!(matches!(
            fs.mkdir("/docs", WriteFlag::Exclusive).await,
            Err(VfsError::AlreadyExists(_))
        ));
        fs.mkdir("/docs", WriteFlag::Truncate).await.unwrap();
        fs.mkdir("/docs/fresh", WriteFlag::Exclusive).await.unwrap();
        assert!(fs.stat("/docs/fresh").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_rename_archive_source_needs_copy_up() {
        let fs = overlay().await;
        let err = fs.rename("/docs/a.txt", "/docs/b.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_rename_writable_file() {
        let fs = overlay().await;
        fs.write_file("/docs/a.txt", b"mine", WriteFlag::Truncate)
            .await
            .unwrap();

        fs.rename("/docs/a.txt", "/moved.txt").await.unwrap();

        assert_eq!(fs.read_file("/moved.txt").await.unwrap(), b"mine");
        // The shadowed archive copy must not reappear.
        assert!(!fs.exists("/docs/a.txt").await);
    }

    #[tokio::test]
    async fn test_deletion_log_is_hidden() {
        let fs = overlay().await;
        fs.unlink("/docs/a.txt").await.unwrap();
        assert!(fs.writable().exists(DELETION_LOG).await);
        assert!(!names(&fs, "/").await.contains(&".deletedFiles.log".to_string()));
    }

    #[tokio::test]
    async fn test_missing_root_is_reported() {
        let writable = Arc::new(MemoryStore::new());
        let fs = overlay_with(writable.clone()).await;
        writable.corrupt_root();

        let err = fs
            .write_file("/new.txt", b"x", WriteFlag::Exclusive)
            .await
            .unwrap_err();
        assert!(err.is_root_not_found());
    }

    #[tokio::test]
    async fn test_clear_forgets_everything() {
        let fs = overlay().await;
        fs.write_file("/mine.txt", b"x", WriteFlag::Exclusive)
            .await
            .unwrap();
        fs.unlink("/docs/a.txt").await.unwrap();

        fs.clear().await.unwrap();

        assert!(!fs.exists("/mine.txt").await);
        assert!(fs.exists("/docs/a.txt").await);
        assert!(fs.deleted_paths().is_empty());
    }

    const LINKED: &str = r#"{
        "version": 4,
        "size": 13,
        "fsroot": [
            ["docs", 1, 0, [
                ["real.txt", 0, 8],
                ["link", 2, 0, "real.txt"],
                ["sub", 1, 0, [
                    ["inner.txt", 0, 5]
                ]]
            ]],
            ["shortcut", 2, 0, "/docs/sub"]
        ]
    }"#;

    async fn linked_overlay() -> OverlayStore {
        let fetcher = MemoryFetcher::new(LINKED)
            .with_file("/docs/real.txt", "archived")
            .with_file("/docs/sub/inner.txt", "inner");
        let archive = ArchiveStore::load(Arc::new(fetcher)).await.unwrap();
        OverlayStore::new(Arc::new(MemoryStore::new()), Arc::new(archive))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_link_follows_shadowed_target() {
        let fs = linked_overlay().await;
        assert_eq!(fs.read_file("/docs/link").await.unwrap(), b"archived");

        fs.write_file("/docs/real.txt", b"new", WriteFlag::Truncate)
            .await
            .unwrap();

        assert_eq!(fs.read_file("/docs/link").await.unwrap(), b"new");
        assert_eq!(fs.stat("/docs/link").await.unwrap().size, 3);
        assert!(fs.lstat("/docs/link").await.unwrap().is_symlink());
    }

    #[tokio::test]
    async fn test_link_to_deleted_target_dangles() {
        let fs = linked_overlay().await;
        fs.unlink("/docs/real.txt").await.unwrap();

        assert!(matches!(
            fs.read_file("/docs/link").await,
            Err(VfsError::NotFound(_))
        ));
        assert!(matches!(
            fs.stat("/docs/link").await,
            Err(VfsError::NotFound(_))
        ));
        assert!(fs.exists("/docs/link").await);

        // Writing through the link brings the target back.
        fs.write_file("/docs/link", b"again", WriteFlag::Truncate)
            .await
            .unwrap();
        assert_eq!(fs.read_file("/docs/real.txt").await.unwrap(), b"again");
        assert!(fs.lstat("/docs/link").await.unwrap().is_symlink());
    }

    #[tokio::test]
    async fn test_paths_through_directory_links() {
        let fs = linked_overlay().await;
        assert_eq!(fs.read_file("/shortcut/inner.txt").await.unwrap(), b"inner");
        assert_eq!(names(&fs, "/shortcut").await, vec!["inner.txt"]);

        fs.write_file("/shortcut/added.txt", b"via link", WriteFlag::Exclusive)
            .await
            .unwrap();
        assert_eq!(fs.read_file("/docs/sub/added.txt").await.unwrap(), b"via link");
        assert_eq!(names(&fs, "/shortcut").await, vec!["added.txt", "inner.txt"]);

        fs.unlink("/shortcut/inner.txt").await.unwrap();
        assert!(!fs.exists("/docs/sub/inner.txt").await);
        assert_eq!(fs.deleted_paths(), vec!["/docs/sub/inner.txt"]);
    }

    #[tokio::test]
    async fn test_deleted_directory_hides_paths_through_it() {
        let fs = linked_overlay().await;
        fs.unlink("/docs/sub/inner.txt").await.unwrap();
        fs.rmdir("/docs/sub").await.unwrap();

        assert!(matches!(
            fs.read_file("/shortcut/inner.txt").await,
            Err(VfsError::NotFound(_))
        ));
        assert!(!fs.exists("/shortcut/inner.txt").await);
    }
}
