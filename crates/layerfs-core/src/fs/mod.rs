//! The public async filesystem handle.
//!
//! [`AsyncFs`] can be used immediately after it is built. The composed store
//! (archive + writable layer + mounts) is constructed on the first call;
//! calls made in the meantime are queued and replayed in order.
//!
//! ```no_run
//! # async fn demo() -> layerfs_core::VfsResult<()> {
//! use layerfs_core::{AsyncFs, DirFetcher, FsConfig};
//!
//! let config = FsConfig::default();
//! let fs = AsyncFs::builder(DirFetcher::new("public", &config.index_file))
//!     .config(config)
//!     .build();
//!
//! fs.mkdir("/Users/Public/Desktop", true).await?;
//! fs.write_file("/Users/Public/Desktop/hello.txt", "hello", false).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod facade;
mod probe;
mod queue;
mod recovery;

pub use config::{ConfigError, FsConfig, StorageMode};
pub use facade::FsFacade;
pub use probe::{FixedProbe, PersistenceProbe, SqliteProbe};
pub use queue::FsState;
pub use recovery::{ProcessExit, RecoveryController, RestartHandler, RestartSignal};

use std::sync::Arc;
use tokio::sync::oneshot;

use crate::vfs::{ArchiveFetcher, FileAttr, Mount, RenameOutcome, VfsResult, WritableStore};
use queue::{FsCall, Initializer, StoreBuilder};

/// Asynchronous filesystem over an archive and a writable layer.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct AsyncFs {
    init: Arc<Initializer>,
}

impl std::fmt::Debug for AsyncFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFs").finish_non_exhaustive()
    }
}

impl AsyncFs {
    pub fn builder(fetcher: impl ArchiveFetcher + 'static) -> AsyncFsBuilder {
        AsyncFsBuilder::new(Arc::new(fetcher))
    }

    pub fn state(&self) -> FsState {
        self.init.state()
    }

    /// Submit a call and wait for its answer.
    ///
    /// The call is issued on the first poll and runs even if this future is
    /// dropped afterwards. A call that is never answered (the store is being
    /// reset under it) never completes.
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> FsCall) -> T {
        let (tx, rx) = oneshot::channel();
        self.init.submit(make(tx));
        match rx.await {
            Ok(value) => value,
            Err(_) => std::future::pending::<T>().await,
        }
    }

    /// Returns true if `path` exists. Never fails.
    pub async fn exists(&self, path: &str) -> bool {
        let path = path.to_string();
        self.call(|reply| FsCall::Exists { path, reply }).await
    }

    /// Attributes of `path`, following symlinks.
    ///
    /// A missing path yields a placeholder file entry (size `-1`) rather
    /// than an error.
    pub async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let path = path.to_string();
        self.call(|reply| FsCall::Stat { path, reply }).await
    }

    /// Like [`stat`](Self::stat) without following a final symlink.
    pub async fn lstat(&self, path: &str) -> VfsResult<FileAttr> {
        let path = path.to_string();
        self.call(|reply| FsCall::Lstat { path, reply }).await
    }

    /// Create a directory. Without `overwrite`, an existing path is
    /// `AlreadyExists`.
    pub async fn mkdir(&self, path: &str, overwrite: bool) -> VfsResult<bool> {
        let path = path.to_string();
        self.call(|reply| FsCall::Mkdir { path, overwrite, reply }).await
    }

    pub async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let path = path.to_string();
        self.call(|reply| FsCall::ReadFile { path, reply }).await
    }

    pub async fn readdir(&self, path: &str) -> VfsResult<Vec<String>> {
        let path = path.to_string();
        self.call(|reply| FsCall::Readdir { path, reply }).await
    }

    /// Write bytes or text to `path`.
    pub async fn write_file(
        &self,
        path: &str,
        data: impl AsRef<[u8]>,
        overwrite: bool,
    ) -> VfsResult<bool> {
        let path = path.to_string();
        let data = data.as_ref().to_vec();
        self.call(|reply| FsCall::WriteFile {
            path,
            data,
            overwrite,
            reply,
        })
        .await
    }

    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<RenameOutcome> {
        let (from, to) = (from.to_string(), to.to_string());
        self.call(|reply| FsCall::Rename { from, to, reply }).await
    }

    pub async fn rmdir(&self, path: &str) -> VfsResult<bool> {
        let path = path.to_string();
        self.call(|reply| FsCall::Rmdir { path, reply }).await
    }

    /// Remove a file; `Ok(false)` if there was nothing to remove.
    pub async fn unlink(&self, path: &str) -> VfsResult<bool> {
        let path = path.to_string();
        self.call(|reply| FsCall::Unlink { path, reply }).await
    }

    /// Attach a sub-archive at `path`.
    pub async fn mount(&self, path: &str, mount: Mount) -> VfsResult<()> {
        let path = path.to_string();
        self.call(|reply| FsCall::Mount { path, mount, reply }).await
    }

    /// Detach the sub-archive at `path`. Returns true if one was removed.
    pub async fn unmount(&self, path: &str) -> bool {
        let path = path.to_string();
        self.call(|reply| FsCall::Unmount { path, reply }).await
    }
}

/// Builder for [`AsyncFs`].
pub struct AsyncFsBuilder {
    fetcher: Arc<dyn ArchiveFetcher>,
    config: FsConfig,
    probe: Option<Arc<dyn PersistenceProbe>>,
    restart: Option<Arc<dyn RestartHandler>>,
    writable: Option<Arc<dyn WritableStore>>,
}

impl AsyncFsBuilder {
    fn new(fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        Self {
            fetcher,
            config: FsConfig::default(),
            probe: None,
            restart: None,
            writable: None,
        }
    }

    pub fn config(mut self, config: FsConfig) -> Self {
        self.config = config;
        self
    }

    /// Persistence probe for [`StorageMode::Auto`]. Defaults to
    /// [`SqliteProbe`] on the configured database.
    pub fn probe(mut self, probe: impl PersistenceProbe + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Restart handler for storage recovery. Defaults to a
    /// [`RestartSignal`] nobody listens to.
    pub fn restart(mut self, restart: impl RestartHandler + 'static) -> Self {
        self.restart = Some(Arc::new(restart));
        self
    }

    /// Use this writable layer instead of building one from the config.
    pub fn writable_store(mut self, store: Arc<dyn WritableStore>) -> Self {
        self.writable = Some(store);
        self
    }

    pub fn build(self) -> AsyncFs {
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SqliteProbe::new(self.config.database.clone())));
        let restart = self
            .restart
            .unwrap_or_else(|| Arc::new(RestartSignal::new()));

        let builder = StoreBuilder::new(self.fetcher, self.config, probe, self.writable);
        AsyncFs {
            init: Arc::new(Initializer::new(builder, RecoveryController::new(restart))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{MemoryFetcher, VfsError};

    fn memory_fs(index: &str) -> AsyncFs {
        AsyncFs::builder(MemoryFetcher::new(index.to_string()))
            .config(FsConfig {
                storage: StorageMode::Memory,
                ..FsConfig::default()
            })
            .build()
    }

    const EMPTY: &str = r#"{"version": 4, "size": 0, "fsroot": []}"#;

    #[tokio::test]
    async fn test_first_call_initializes() {
        let fs = memory_fs(EMPTY);
        assert_eq!(fs.state(), FsState::Uninitialized);
        assert!(fs.exists("/").await);
        assert_eq!(fs.state(), FsState::Ready);
    }

    #[tokio::test]
    async fn test_clones_share_store() {
        let fs = memory_fs(EMPTY);
        let other = fs.clone();
        fs.write_file("/a.txt", "hello", false).await.unwrap();
        assert_eq!(other.read_file("/a.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_bad_index_fails_queued_calls() {
        let fs = memory_fs("not json");
        assert!(!fs.exists("/").await);
        assert!(matches!(
            fs.readdir("/").await,
            Err(VfsError::Unavailable(_))
        ));
        assert_eq!(fs.state(), FsState::Uninitialized);
    }

    #[tokio::test]
    async fn test_probe_selects_profile() {
        let dir = tempfile::tempdir().unwrap();
        let config = FsConfig {
            database: dir.path().join("fs.db"),
            ..FsConfig::default()
        };
        let fs = AsyncFs::builder(MemoryFetcher::new(EMPTY))
            .config(config.clone())
            .probe(FixedProbe(true))
            .build();
        fs.write_file("/kept.txt", "x", false).await.unwrap();
        assert!(config.database.exists());

        let reopened = AsyncFs::builder(MemoryFetcher::new(EMPTY))
            .config(config)
            .probe(FixedProbe(true))
            .build();
        assert!(reopened.exists("/kept.txt").await);
    }
}
