//! Companion size lookup for archive files.
//!
//! The archive store reports files with a placeholder size; the facade
//! resolves the real value here, keyed by path.

use std::collections::HashMap;

use super::index::ArchiveIndex;
use crate::vfs::path;
use crate::vfs::types::FileType;

/// Size of every archive file, keyed by absolute path.
#[derive(Debug, Clone, Default)]
pub struct SizeIndex {
    sizes: HashMap<String, u64>,
    /// Symlink targets as stored, for paths that go through links.
    links: HashMap<String, String>,
    total: u64,
}

impl SizeIndex {
    /// Build from a parsed index. Paths that go through symlinks get the
    /// size of the file they resolve to.
    pub fn from_index(index: &ArchiveIndex) -> Self {
        let mut sizes = HashMap::new();
        let mut links = HashMap::new();

        index.walk(|node_path, node| match node.kind {
            FileType::File => {
                sizes.insert(node_path.to_string(), node.size);
            }
            FileType::Symlink => {
                if let Some(target) = &node.target {
                    links.insert(node_path.to_string(), target.clone());
                }
            }
            FileType::Directory => {}
        });

        Self {
            sizes,
            links,
            total: index.total_size,
        }
    }

    /// Size recorded for `path`, if any.
    pub fn get(&self, path: &str) -> Option<u64> {
        let resolved = path::resolve_links(path, true, |p| self.links.get(p).cloned()).ok()?;
        self.sizes.get(&resolved).copied()
    }

    /// Size for `path`, or 0 when the index has no record of it.
    pub fn size_of(&self, path: &str) -> u64 {
        self.get(path).unwrap_or(0)
    }

    /// Total byte size of the archive.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of sized files.
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    /// Returns true if no entries are sized.
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> ArchiveIndex {
        ArchiveIndex::from_json(
            br#"{
                "version": 4,
                "size": 300,
                "fsroot": [
                    ["docs", 1, 0, [
                        ["a.txt", 0, 100],
                        ["b.txt", 0, 200],
                        ["link", 2, 0, "b.txt"],
                        ["abs", 2, 0, "/docs/link"],
                        ["loop", 2, 0, "loop"]
                    ]],
                    ["alias", 2, 0, "docs"]
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_file_sizes() {
        let sizes = SizeIndex::from_index(&index());
        assert_eq!(sizes.get("/docs/a.txt"), Some(100));
        assert_eq!(sizes.get("docs/b.txt"), Some(200));
        assert_eq!(sizes.get("/docs"), None);
        assert_eq!(sizes.total(), 300);
    }

    #[test]
    fn test_links_resolve_to_target_size() {
        let sizes = SizeIndex::from_index(&index());
        assert_eq!(sizes.get("/docs/link"), Some(200));
        assert_eq!(sizes.get("/docs/abs"), Some(200));
        assert_eq!(sizes.get("/docs/loop"), None);
    }

    #[test]
    fn test_paths_through_directory_links() {
        let sizes = SizeIndex::from_index(&index());
        assert_eq!(sizes.get("/alias/a.txt"), Some(100));
        assert_eq!(sizes.get("/alias/link"), Some(200));
        assert_eq!(sizes.get("/alias/missing.txt"), None);
    }

    #[test]
    fn test_unknown_paths_are_zero() {
        let sizes = SizeIndex::from_index(&index());
        assert_eq!(sizes.size_of("/nope"), 0);
        assert_eq!(sizes.len(), 2);
    }
}
