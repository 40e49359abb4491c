//! The read-only archive layer.
//!
//! A prefetched index describes the whole tree; contents arrive through an
//! [`ArchiveFetcher`] on first read.

mod fetch;
mod index;
mod sizes;
mod store;

pub use fetch::{ArchiveFetcher, DirFetcher, MemoryFetcher};
pub use index::{ArchiveIndex, IndexNode, IndexVersion};
pub use sizes::SizeIndex;
pub use store::ArchiveStore;
