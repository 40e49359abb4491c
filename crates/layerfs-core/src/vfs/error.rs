//! VFS error types.
//!
//! Backends translate their own failures into [`VfsError`] at the boundary.
//! Everything above the backends reasons about failures only through the
//! closed [`ErrorKind`] set returned by [`VfsError::kind`].

use std::io;
use thiserror::Error;

/// Closed set of error kinds the facade understands.
///
/// The string form of each kind is its POSIX-style code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum ErrorKind {
    #[strum(serialize = "ENOENT")]
    NotFound,
    #[strum(serialize = "EEXIST")]
    AlreadyExists,
    #[strum(serialize = "EISDIR")]
    IsDirectory,
    #[strum(serialize = "ENOTDIR")]
    NotDirectory,
    #[strum(serialize = "ENOTEMPTY")]
    NotEmpty,
    #[strum(serialize = "ENOTSUP")]
    Unsupported,
    #[strum(serialize = "EACCES")]
    PermissionDenied,
    #[strum(serialize = "EROFS")]
    ReadOnly,
    #[strum(serialize = "EINVAL")]
    InvalidInput,
    #[strum(serialize = "ELOOP")]
    TooManySymlinks,
    #[strum(serialize = "EIO")]
    Io,
    #[strum(serialize = "EUNKNOWN")]
    Other,
}

impl ErrorKind {
    /// Kinds meaning "there is nothing to do here".
    ///
    /// Best-effort operations swallow these into soft results.
    pub const BENIGN: &'static [ErrorKind] = &[ErrorKind::NotFound, ErrorKind::Io];

    /// Returns true if this kind is in the fixed benign set.
    pub fn is_benign(self) -> bool {
        Self::BENIGN.contains(&self)
    }

    /// POSIX-style code, e.g. `"ENOENT"`.
    pub fn code(self) -> &'static str {
        self.into()
    }
}

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Path lives in a read-only layer.
    #[error("read-only: {0}")]
    ReadOnly(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file (or the path is a mount).
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The backend does not implement this operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Rename fell back to copy semantics but the source is a directory.
    #[error("directories cannot be renamed on this store: {0}")]
    DirectoryRename(String),

    /// Too many symbolic links.
    #[error("too many symbolic links: {0}")]
    TooManySymlinks(String),

    /// Malformed archive index.
    #[error("archive index: {0}")]
    Index(String),

    /// Persistent store failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The composed store could not be constructed.
    #[error("filesystem unavailable: {0}")]
    Unavailable(String),

    /// A write found the writable root missing.
    ///
    /// Consumed by the initializer, which resets storage and restarts.
    /// Never returned from [`crate::AsyncFs`].
    #[error("writable root is missing")]
    RootCorrupted,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a ReadOnly error.
    pub fn read_only(path: impl Into<String>) -> Self {
        Self::ReadOnly(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(op: impl Into<String>) -> Self {
        Self::Unsupported(op.into())
    }

    /// Create an Index error.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::NotFound(_) => ErrorKind::NotFound,
            VfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VfsError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            VfsError::ReadOnly(_) => ErrorKind::ReadOnly,
            VfsError::NotADirectory(_) => ErrorKind::NotDirectory,
            VfsError::IsADirectory(_) => ErrorKind::IsDirectory,
            VfsError::DirectoryNotEmpty(_) => ErrorKind::NotEmpty,
            VfsError::InvalidPath(_) | VfsError::Index(_) => ErrorKind::InvalidInput,
            VfsError::Unsupported(_) => ErrorKind::Unsupported,
            VfsError::TooManySymlinks(_) => ErrorKind::TooManySymlinks,
            VfsError::Storage(_) => ErrorKind::Io,
            VfsError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                io::ErrorKind::IsADirectory => ErrorKind::IsDirectory,
                io::ErrorKind::NotADirectory => ErrorKind::NotDirectory,
                _ => ErrorKind::Io,
            },
            VfsError::DirectoryRename(_)
            | VfsError::Unavailable(_)
            | VfsError::RootCorrupted
            | VfsError::Other(_) => ErrorKind::Other,
        }
    }

    /// Returns true if this is a NotFound for the filesystem root itself.
    pub fn is_root_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound(path) if path == "/")
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::PermissionDenied(msg) | VfsError::ReadOnly(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::Unsupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            VfsError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
