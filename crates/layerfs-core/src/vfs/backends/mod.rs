//! Writable backends.
//!
//! Backends implement [`WritableStore`](crate::vfs::WritableStore) for
//! different storage profiles.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
