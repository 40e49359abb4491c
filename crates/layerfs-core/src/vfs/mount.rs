//! Mount map over the overlay.
//!
//! A mount attaches an opaque sub-archive blob to a directory path. The
//! mounted path looks like an empty directory, but nothing can be written
//! to it or beneath it until it is unmounted.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::archive::SizeIndex;
use super::error::{ErrorKind, VfsError, VfsResult};
use super::overlay::OverlayStore;
use super::path;
use super::types::{DirEntry, FileAttr, WriteFlag};

/// An embedded sub-archive attached to a directory path.
#[derive(Clone)]
pub struct Mount {
    name: String,
    data: Arc<Vec<u8>>,
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("name", &self.name)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Mount {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: Arc::new(data.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The packed sub-tree, as given.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Information about a mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// The mount path (e.g., "/Users/Public/archive.zip").
    pub path: String,
    pub name: String,
    /// Blob size in bytes.
    pub size: usize,
}

/// The composed root: overlay plus mounts plus the archive size lookup.
pub struct RootStore {
    overlay: OverlayStore,
    /// Mount points, keyed by normalized path.
    mounts: RwLock<BTreeMap<String, Mount>>,
    sizes: SizeIndex,
}

impl std::fmt::Debug for RootStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootStore")
            .field("overlay", &self.overlay)
            .field("mounts", &"<locked>")
            .field("sizes", &self.sizes.len())
            .finish()
    }
}

enum MountHit {
    At,
    Beneath(String),
    Outside,
}

impl RootStore {
    pub fn new(overlay: OverlayStore, sizes: SizeIndex) -> Self {
        Self {
            overlay,
            mounts: RwLock::new(BTreeMap::new()),
            sizes,
        }
    }

    pub fn overlay(&self) -> &OverlayStore {
        &self.overlay
    }

    /// Companion size lookup for archive files.
    pub fn sizes(&self) -> &SizeIndex {
        &self.sizes
    }

    /// Attach a mount at `path`, replacing any existing one.
    pub async fn mount(&self, path: &str, mount: Mount) -> VfsResult<()> {
        let path = path::normalize(path);
        if path::is_root(&path) {
            return Err(VfsError::invalid_path("cannot mount over root"));
        }
        tracing::info!(path = %path, name = %mount.name, bytes = mount.data.len(), "mounted");
        self.mounts.write().await.insert(path, mount);
        Ok(())
    }

    /// Detach the mount at `path`.
    ///
    /// Returns `true` if a mount was removed, `false` if nothing was mounted there.
    pub async fn umount(&self, path: &str) -> bool {
        let path = path::normalize(path);
        let removed = self.mounts.write().await.remove(&path).is_some();
        if removed {
            tracing::info!(path = %path, "unmounted");
        }
        removed
    }

    /// The mount attached exactly at `path`.
    pub async fn mount_at(&self, path: &str) -> Option<Mount> {
        self.mounts.read().await.get(&path::normalize(path)).cloned()
    }

    /// List all current mounts.
    pub async fn mounts(&self) -> Vec<MountInfo> {
        self.mounts
            .read()
            .await
            .iter()
            .map(|(path, mount)| MountInfo {
                path: path.clone(),
                name: mount.name.clone(),
                size: mount.data.len(),
            })
            .collect()
    }

    async fn classify(&self, path: &str) -> MountHit {
        let mounts = self.mounts.read().await;
        if mounts.contains_key(path) {
            return MountHit::At;
        }
        match path::ancestors(path)
            .into_iter()
            .rev()
            .find(|a| mounts.contains_key(a))
        {
            Some(mount_path) => MountHit::Beneath(mount_path),
            None => MountHit::Outside,
        }
    }

    /// Reject write-style operations on or beneath a mount.
    async fn guard_write(&self, path: &str) -> VfsResult<()> {
        match self.classify(path).await {
            MountHit::At => Err(VfsError::is_a_directory(path)),
            MountHit::Beneath(mount) => Err(VfsError::read_only(format!(
                "{path} is inside mount {mount}"
            ))),
            MountHit::Outside => Ok(()),
        }
    }

    pub async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let path = path::normalize(path);
        match self.classify(&path).await {
            MountHit::At => Ok(FileAttr::directory(0o755)),
            MountHit::Beneath(_) => Err(VfsError::not_found(path)),
            MountHit::Outside => self.overlay.stat(&path).await,
        }
    }

    pub async fn lstat(&self, path: &str) -> VfsResult<FileAttr> {
        let path = path::normalize(path);
        match self.classify(&path).await {
            MountHit::At => Ok(FileAttr::directory(0o755)),
            MountHit::Beneath(_) => Err(VfsError::not_found(path)),
            MountHit::Outside => self.overlay.lstat(&path).await,
        }
    }

    pub async fn exists(&self, path: &str) -> bool {
        let path = path::normalize(path);
        match self.classify(&path).await {
            MountHit::At => true,
            MountHit::Beneath(_) => false,
            MountHit::Outside => self.overlay.exists(&path).await,
        }
    }

    /// Read a file. A mounted path reads as a directory.
    pub async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let path = path::normalize(path);
        match self.classify(&path).await {
            MountHit::At => Err(VfsError::is_a_directory(path)),
            MountHit::Beneath(_) => Err(VfsError::not_found(path)),
            MountHit::Outside => self.overlay.read_file(&path).await,
        }
    }

    /// List a directory; mounts show up as directories in their parent.
    pub async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let path = path::normalize(path);
        match self.classify(&path).await {
            MountHit::At => return Ok(Vec::new()),
            MountHit::Beneath(_) => return Err(VfsError::not_found(path)),
            MountHit::Outside => {}
        }

        let child_mounts: Vec<String> = self
            .mounts
            .read()
            .await
            .keys()
            .filter(|m| path::parent(m) == Some(path.as_str()))
            .map(|m| path::file_name(m).to_string())
            .collect();

        let mut entries = match self.overlay.readdir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound && !child_mounts.is_empty() => Vec::new(),
            Err(e) => return Err(e),
        };

        for name in child_mounts {
            match entries.iter_mut().find(|e| e.name == name) {
                Some(existing) => *existing = DirEntry::directory(name),
                None => entries.push(DirEntry::directory(name)),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub async fn write_file(&self, path: &str, data: &[u8], flag: WriteFlag) -> VfsResult<()> {
        let path = path::normalize(path);
        self.guard_write(&path).await?;
        self.overlay.write_file(&path, data, flag).await
    }

    pub async fn mkdir(&self, path: &str, flag: WriteFlag) -> VfsResult<()> {
        let path = path::normalize(path);
        self.guard_write(&path).await?;
        self.overlay.mkdir(&path, flag).await
    }

    pub async fn unlink(&self, path: &str) -> VfsResult<()> {
        let path = path::normalize(path);
        self.guard_write(&path).await?;
        self.overlay.unlink(&path).await
    }

    pub async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let path = path::normalize(path);
        self.guard_write(&path).await?;
        self.overlay.rmdir(&path).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let from = path::normalize(from);
        let to = path::normalize(to);
        self.guard_write(&from).await?;
        self.guard_write(&to).await?;
        self.overlay.rename(&from, &to).await
    }

    /// Drop every mount and reset the writable layer.
    pub async fn clear(&self) -> VfsResult<()> {
        self.mounts.write().await.clear();
        self.overlay.clear().await
    }
}
