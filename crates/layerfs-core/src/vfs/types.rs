//! Core VFS types.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Size sentinel for archive entries whose size lives in the size index.
pub const PLACEHOLDER_SIZE: i64 = -1;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// File attributes (metadata) for one logical entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttr {
    /// File type.
    pub kind: FileType,
    /// Size in bytes, or [`PLACEHOLDER_SIZE`] when unresolved.
    pub size: i64,
    /// Unix permissions (e.g., 0o644).
    pub mode: u32,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
    /// Creation time.
    pub birthtime: SystemTime,
}

impl FileAttr {
    /// Attributes with every timestamp set to `time`.
    pub fn new(kind: FileType, size: i64, mode: u32, time: SystemTime) -> Self {
        Self {
            kind,
            size,
            mode,
            atime: time,
            mtime: time,
            ctime: time,
            birthtime: time,
        }
    }

    /// Create attributes for a new file.
    pub fn file(size: u64, mode: u32) -> Self {
        Self::new(FileType::File, size as i64, mode, SystemTime::now())
    }

    /// Create attributes for a new directory.
    pub fn directory(mode: u32) -> Self {
        Self::new(FileType::Directory, 0, mode, SystemTime::now())
    }

    /// Create attributes for a symlink.
    pub fn symlink(target_len: u64) -> Self {
        Self::new(FileType::Symlink, target_len as i64, 0o777, SystemTime::now())
    }

    /// A file entry with unresolved size and epoch timestamps.
    ///
    /// Returned for paths in an unknown state instead of an error.
    pub fn placeholder() -> Self {
        Self::new(FileType::File, PLACEHOLDER_SIZE, 0o644, SystemTime::UNIX_EPOCH)
    }

    /// Returns true if the size has not been resolved yet.
    pub fn is_placeholder(&self) -> bool {
        self.size == PLACEHOLDER_SIZE
    }

    /// Replace the size, keeping every other attribute.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size as i64;
        self
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

/// Creation flag for writes and mkdir.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFlag {
    /// Fail with `AlreadyExists` if the path exists (`wx`).
    Exclusive,
    /// Create or replace (`w`).
    Truncate,
}

impl WriteFlag {
    /// `Truncate` when overwriting is requested, `Exclusive` otherwise.
    pub fn from_overwrite(overwrite: bool) -> Self {
        if overwrite {
            WriteFlag::Truncate
        } else {
            WriteFlag::Exclusive
        }
    }

    /// Node-style flag string.
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteFlag::Exclusive => "wx",
            WriteFlag::Truncate => "w",
        }
    }

    /// Returns true for exclusive-create.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, WriteFlag::Exclusive)
    }
}

/// How a rename completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameOutcome {
    /// The store renamed the entry natively.
    Renamed,
    /// The store lacks rename; the file was copied and the source removed.
    Copied,
    /// The source was in an unknown state; nothing happened.
    Skipped,
}

impl RenameOutcome {
    /// Returns true only for a native rename.
    pub fn is_native(&self) -> bool {
        matches!(self, RenameOutcome::Renamed)
    }

    /// Returns true if the entry now lives at the new path.
    pub fn is_moved(&self) -> bool {
        !matches!(self, RenameOutcome::Skipped)
    }
}
