//! In-memory writable backend.
//!
//! The ephemeral profile: all data is lost when the store is dropped.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::SystemTime;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::path;
use crate::vfs::store::{StoreCapabilities, WritableStore};
use crate::vfs::types::{DirEntry, FileAttr, FileType, WriteFlag};

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
}

impl Node {
    fn attr(&self) -> &FileAttr {
        match self {
            Node::File { attr, .. } => attr,
            Node::Directory { attr } => attr,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }

    fn root() -> Self {
        Node::Directory {
            attr: FileAttr::directory(DIR_MODE),
        }
    }
}

/// In-memory writable store.
///
/// Thread-safe via internal `RwLock`.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Node>>,
    atomic_rename: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert("/".to_string(), Node::root());
        Self {
            entries: RwLock::new(entries),
            atomic_rename: true,
        }
    }

    /// Create a store whose `rename` reports `Unsupported`.
    pub fn without_atomic_rename() -> Self {
        Self {
            atomic_rename: false,
            ..Self::new()
        }
    }

    /// Check that the parent of `path` is an existing directory.
    fn check_parent(entries: &HashMap<String, Node>, path: &str) -> VfsResult<()> {
        let Some(parent) = path::parent(path) else {
            return Ok(());
        };
        match entries.get(parent) {
            Some(node) if node.is_dir() => Ok(()),
            Some(_) => Err(VfsError::not_a_directory(parent)),
            None => Err(VfsError::not_found(parent)),
        }
    }

    fn has_children(entries: &HashMap<String, Node>, dir: &str) -> bool {
        entries
            .keys()
            .any(|k| k != dir && path::parent(k) == Some(dir))
    }
}

#[async_trait]
impl WritableStore for MemoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            atomic_rename: self.atomic_rename,
            persistent: false,
        }
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let normalized = path::normalize(path);
        self.entries
            .read()
            .get(&normalized)
            .map(|node| node.attr().clone())
            .ok_or_else(|| VfsError::not_found(normalized))
    }

    async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let normalized = path::normalize(path);
        match self.entries.read().get(&normalized) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            None => Err(VfsError::not_found(normalized)),
        }
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let normalized = path::normalize(path);
        let entries = self.entries.read();

        match entries.get(&normalized) {
            Some(Node::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(normalized)),
            None => return Err(VfsError::not_found(normalized)),
        }

        let mut result: Vec<DirEntry> = entries
            .iter()
            .filter(|(k, _)| {
                k.as_str() != normalized && path::parent(k) == Some(normalized.as_str())
            })
            .map(|(k, node)| {
                let kind = if node.is_dir() {
                    FileType::Directory
                } else {
                    FileType::File
                };
                DirEntry::new(path::file_name(k), kind)
            })
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn write_file(&self, path: &str, data: &[u8], flag: WriteFlag) -> VfsResult<()> {
        let normalized = path::normalize(path);
        let mut entries = self.entries.write();

        // A missing root is never recreated implicitly.
        if !entries.contains_key("/") {
            return Err(VfsError::not_found("/"));
        }
        Self::check_parent(&entries, &normalized)?;

        let now = SystemTime::now();
        match entries.get_mut(&normalized) {
            Some(Node::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            Some(Node::File { .. }) if flag.is_exclusive() => {
                Err(VfsError::already_exists(normalized))
            }
            Some(Node::File {
                data: file_data,
                attr,
            }) => {
                *file_data = data.to_vec();
                attr.size = data.len() as i64;
                attr.mtime = now;
                attr.ctime = now;
                Ok(())
            }
            None => {
                entries.insert(
                    normalized,
                    Node::File {
                        data: data.to_vec(),
                        attr: FileAttr::new(FileType::File, data.len() as i64, FILE_MODE, now),
                    },
                );
                Ok(())
            }
        }
    }

    async fn mkdir(&self, path: &str, flag: WriteFlag) -> VfsResult<()> {
        let normalized = path::normalize(path);
        let mut entries = self.entries.write();

        if let Some(existing) = entries.get(&normalized) {
            return match existing {
                Node::Directory { .. } if !flag.is_exclusive() => Ok(()),
                _ => Err(VfsError::already_exists(normalized)),
            };
        }
        Self::check_parent(&entries, &normalized)?;

        entries.insert(
            normalized,
            Node::Directory {
                attr: FileAttr::directory(DIR_MODE),
            },
        );
        Ok(())
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        let normalized = path::normalize(path);
        let mut entries = self.entries.write();

        match entries.get(&normalized) {
            Some(Node::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            Some(Node::File { .. }) => {
                entries.remove(&normalized);
                Ok(())
            }
            None => Err(VfsError::not_found(normalized)),
        }
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let normalized = path::normalize(path);

        if path::is_root(&normalized) {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let mut entries = self.entries.write();
        match entries.get(&normalized) {
            Some(Node::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(normalized)),
            None => return Err(VfsError::not_found(normalized)),
        }

        if Self::has_children(&entries, &normalized) {
            return Err(VfsError::directory_not_empty(normalized));
        }

        entries.remove(&normalized);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        if !self.atomic_rename {
            return Err(VfsError::unsupported("rename"));
        }

        let from = path::normalize(from);
        let to = path::normalize(to);
        if from == to {
            return Ok(());
        }
        if path::is_root(&from) || path::is_within(&to, &from) {
            return Err(VfsError::invalid_path(format!("cannot move {} into {}", from, to)));
        }

        let mut entries = self.entries.write();
        let source_is_dir = match entries.get(&from) {
            Some(node) => node.is_dir(),
            None => return Err(VfsError::not_found(from)),
        };
        Self::check_parent(&entries, &to)?;

        match entries.get(&to) {
            Some(Node::Directory { .. }) if !source_is_dir => {
                return Err(VfsError::is_a_directory(to));
            }
            Some(Node::Directory { .. }) if Self::has_children(&entries, &to) => {
                return Err(VfsError::directory_not_empty(to));
            }
            Some(Node::File { .. }) if source_is_dir => {
                return Err(VfsError::not_a_directory(to));
            }
            _ => {}
        }

        // Move the entry and, for directories, every descendant.
        let moved: Vec<String> = entries
            .keys()
            .filter(|k| path::is_within(k, &from))
            .cloned()
            .collect();
        for old in moved {
            let new = path::rebase(&old, &from, &to);
            if let (Some(node), Some(new)) = (entries.remove(&old), new) {
                entries.insert(new, node);
            }
        }
        Ok(())
    }

    async fn clear(&self) -> VfsResult<()> {
        let mut entries = self.entries.write();
        entries.clear();
        entries.insert("/".to_string(), Node::root());
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Drop the root entry, leaving the store in a corrupted state.
    pub(crate) fn corrupt_root(&self) {
        self.entries.write().remove("/");
    }
}
