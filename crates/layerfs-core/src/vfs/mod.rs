//! Layered virtual filesystem.
//!
//! Key components:
//!
//! - [`ReadOnlyStore`] / [`WritableStore`] - Backing store capability sets
//! - [`ArchiveStore`] - Immutable archive described by a JSON index
//! - [`MemoryStore`] / [`SqliteStore`] - Ephemeral and persistent writable layers
//! - [`OverlayStore`] - Writable layer shadowing the archive
//! - [`RootStore`] - Overlay plus mounted sub-archives
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: every store keys entries by a normalized
//!   absolute path string.
//! - **Closed error kinds**: layers above the backends only look at
//!   [`ErrorKind`], never at backend-specific errors.
//! - **Placeholder sizes**: archive files stat with size `-1`; the real size
//!   lives in the [`SizeIndex`] and is filled in by the facade.

pub mod archive;
pub mod backends;
mod error;
mod mount;
mod overlay;
pub mod path;
mod store;
mod types;

pub use archive::{ArchiveFetcher, ArchiveIndex, ArchiveStore, DirFetcher, MemoryFetcher, SizeIndex};
pub use backends::{MemoryStore, SqliteStore};
pub use error::{ErrorKind, VfsError, VfsResult};
pub use mount::{Mount, MountInfo, RootStore};
pub use overlay::{DELETION_LOG, OverlayStore};
pub use store::{ReadOnlyStore, StoreCapabilities, WritableStore};
pub use types::{DirEntry, FileAttr, FileType, PLACEHOLDER_SIZE, RenameOutcome, WriteFlag};
