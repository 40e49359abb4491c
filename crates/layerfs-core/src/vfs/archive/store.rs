//! Read-only archive store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::fetch::ArchiveFetcher;
use super::index::ArchiveIndex;
use super::sizes::SizeIndex;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::path;
use crate::vfs::store::ReadOnlyStore;
use crate::vfs::types::{DirEntry, FileAttr, FileType, PLACEHOLDER_SIZE};

/// One entry of the flattened tree.
#[derive(Debug, Clone)]
struct ArchiveNode {
    kind: FileType,
    mode: u32,
    mtime: SystemTime,
    target: Option<String>,
    /// Child names, sorted. Empty for non-directories.
    children: Vec<DirEntry>,
}

impl ArchiveNode {
    fn attr(&self) -> FileAttr {
        let size = match self.kind {
            // File sizes come from the size index, not from here.
            FileType::File => PLACEHOLDER_SIZE,
            FileType::Directory => 0,
            FileType::Symlink => self.target.as_ref().map_or(0, |t| t.len() as i64),
        };
        FileAttr::new(self.kind, size, self.mode, self.mtime)
    }
}

/// Immutable archive layer described by an [`ArchiveIndex`].
///
/// The tree is known up front; file contents are fetched lazily and
/// cached for the life of the store.
pub struct ArchiveStore {
    nodes: HashMap<String, ArchiveNode>,
    sizes: SizeIndex,
    fetcher: Arc<dyn ArchiveFetcher>,
    cache: DashMap<String, Arc<Vec<u8>>>,
}

impl std::fmt::Debug for ArchiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStore")
            .field("nodes", &self.nodes.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl ArchiveStore {
    /// Fetch the index and build the store.
    pub async fn load(fetcher: Arc<dyn ArchiveFetcher>) -> VfsResult<Self> {
        let bytes = fetcher.fetch_index().await?;
        let index = ArchiveIndex::from_json(&bytes)?;
        tracing::info!(
            version = ?index.version,
            total_size = index.total_size,
            "loaded archive index"
        );
        Ok(Self::from_index(&index, fetcher))
    }

    /// Build the store from an already parsed index.
    pub fn from_index(index: &ArchiveIndex, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), directory_node(SystemTime::UNIX_EPOCH));

        index.walk(|node_path, node| {
            let mtime = node
                .mtime
                .map_or(UNIX_EPOCH, |secs| UNIX_EPOCH + Duration::from_secs(secs));
            let mut children: Vec<DirEntry> = node
                .children
                .iter()
                .map(|c| DirEntry::new(c.name.clone(), c.kind))
                .collect();
            children.sort_by(|a, b| a.name.cmp(&b.name));
            nodes.insert(
                node_path.to_string(),
                ArchiveNode {
                    kind: node.kind,
                    mode: node.mode,
                    mtime,
                    target: node.target.clone(),
                    children,
                },
            );
        });

        let mut root_children: Vec<DirEntry> = index
            .root
            .iter()
            .map(|c| DirEntry::new(c.name.clone(), c.kind))
            .collect();
        root_children.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(root) = nodes.get_mut("/") {
            root.children = root_children;
        }

        Self {
            nodes,
            sizes: SizeIndex::from_index(index),
            fetcher,
            cache: DashMap::new(),
        }
    }

    /// The companion size lookup for this archive.
    pub fn size_index(&self) -> &SizeIndex {
        &self.sizes
    }

    /// Number of entries, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the archive holds nothing but its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    fn lookup(&self, path: &str) -> VfsResult<(&str, &ArchiveNode)> {
        self.nodes
            .get_key_value(path)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| VfsError::not_found(path))
    }

    fn link_target(&self, path: &str) -> Option<String> {
        match self.nodes.get(path) {
            Some(ArchiveNode {
                kind: FileType::Symlink,
                target: Some(target),
                ..
            }) => Some(target.clone()),
            _ => None,
        }
    }

    /// Resolve symlinks anywhere along `path`. A final link is followed
    /// only with `follow_final`.
    fn resolve(&self, path: &str, follow_final: bool) -> VfsResult<(String, &ArchiveNode)> {
        let resolved = path::resolve_links(path, follow_final, |p| self.link_target(p))?;
        let (_, node) = self.lookup(&resolved)?;
        Ok((resolved, node))
    }
}

fn directory_node(mtime: SystemTime) -> ArchiveNode {
    ArchiveNode {
        kind: FileType::Directory,
        mode: 0o755,
        mtime,
        target: None,
        children: Vec::new(),
    }
}

#[async_trait]
impl ReadOnlyStore for ArchiveStore {
    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let (_, node) = self.resolve(path, true)?;
        Ok(node.attr())
    }

    async fn lstat(&self, path: &str) -> VfsResult<FileAttr> {
        let (_, node) = self.resolve(path, false)?;
        Ok(node.attr())
    }

    async fn readlink(&self, path: &str) -> VfsResult<String> {
        let (resolved, node) = self.resolve(path, false)?;
        match (&node.kind, &node.target) {
            (FileType::Symlink, Some(target)) => Ok(target.clone()),
            _ => Err(VfsError::invalid_path(format!("{resolved} is not a symlink"))),
        }
    }

    async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let (resolved, node) = self.resolve(path, true)?;
        if node.kind.is_dir() {
            return Err(VfsError::is_a_directory(resolved));
        }

        if let Some(cached) = self.cache.get(&resolved) {
            return Ok(cached.as_ref().clone());
        }

        let data = Arc::new(self.fetcher.fetch(&resolved).await?);
        self.cache.insert(resolved, Arc::clone(&data));
        Ok(data.as_ref().clone())
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let (resolved, node) = self.resolve(path, true)?;
        if !node.kind.is_dir() {
            return Err(VfsError::not_a_directory(resolved));
        }
        Ok(node.children.clone())
    }
}
