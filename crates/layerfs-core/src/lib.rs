//! Asynchronous layered filesystem.
//!
//! A read-only archive described by a JSON index sits underneath a writable
//! layer (in memory or SQLite). [`AsyncFs`] presents the combination through
//! one async API that is usable before the store has finished building.
//!
//! - [`vfs`] - the layers: stores, archive, overlay, mounts
//! - [`fs`] - the facade, call queue, configuration and recovery

pub mod fs;
pub mod vfs;

pub use fs::{
    AsyncFs, AsyncFsBuilder, ConfigError, FixedProbe, FsConfig, FsState, PersistenceProbe,
    ProcessExit, RestartHandler, RestartSignal, SqliteProbe, StorageMode,
};
pub use vfs::{
    ArchiveFetcher, DirFetcher, ErrorKind, FileAttr, FileType, MemoryFetcher, Mount,
    RenameOutcome, VfsError, VfsResult,
};
