//! Call queue and initializer.
//!
//! The composed store is built on first use. Every call is sent to a single
//! worker task over an unbounded channel; sending is the moment of issuance.
//! Calls sent while the store is being built wait in the channel and are
//! replayed in issuance order once it is ready, then later calls run one at
//! a time in the same order.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{OnceCell, mpsc, oneshot};

use super::config::{FsConfig, StorageMode};
use super::facade::FsFacade;
use super::probe::PersistenceProbe;
use super::recovery::RecoveryController;
use crate::vfs::{
    ArchiveFetcher, ArchiveStore, FileAttr, MemoryStore, Mount, OverlayStore, RenameOutcome,
    RootStore, SqliteStore, VfsError, VfsResult, WritableStore,
};

type Reply<T> = oneshot::Sender<VfsResult<T>>;

/// Readiness of an [`AsyncFs`](super::AsyncFs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FsState {
    /// Nothing has been called yet, or the store was reset.
    Uninitialized,
    /// The store is being built; calls are queued.
    Initializing,
    /// Calls run against the store as they arrive.
    Ready,
}

/// One facade call with its reply channel.
#[derive(strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum FsCall {
    Exists { path: String, reply: oneshot::Sender<bool> },
    Stat { path: String, reply: Reply<FileAttr> },
    Lstat { path: String, reply: Reply<FileAttr> },
    Mkdir { path: String, overwrite: bool, reply: Reply<bool> },
    ReadFile { path: String, reply: Reply<Vec<u8>> },
    Readdir { path: String, reply: Reply<Vec<String>> },
    WriteFile { path: String, data: Vec<u8>, overwrite: bool, reply: Reply<bool> },
    Rename { from: String, to: String, reply: Reply<RenameOutcome> },
    Rmdir { path: String, reply: Reply<bool> },
    Unlink { path: String, reply: Reply<bool> },
    Mount { path: String, mount: Mount, reply: Reply<()> },
    Unmount { path: String, reply: oneshot::Sender<bool> },
}

/// What running a call did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Executed {
    Completed,
    /// The call found the writable root missing and was not answered.
    RootCorrupted,
}

impl FsCall {
    fn name(&self) -> &'static str {
        self.into()
    }

    /// Run against the facade and answer the caller.
    ///
    /// A dropped receiver just means the caller stopped waiting.
    pub(crate) async fn execute(self, fs: &FsFacade) -> Executed {
        match self {
            FsCall::Exists { path, reply } => {
                let _ = reply.send(fs.exists(&path).await);
            }
            FsCall::Stat { path, reply } => {
                let _ = reply.send(fs.stat(&path).await);
            }
            FsCall::Lstat { path, reply } => {
                let _ = reply.send(fs.lstat(&path).await);
            }
            FsCall::Mkdir { path, overwrite, reply } => {
                let _ = reply.send(fs.mkdir(&path, overwrite).await);
            }
            FsCall::ReadFile { path, reply } => {
                let _ = reply.send(fs.read_file(&path).await);
            }
            FsCall::Readdir { path, reply } => {
                let _ = reply.send(fs.readdir(&path).await);
            }
            FsCall::WriteFile { path, data, overwrite, reply } => {
                match fs.write_file(&path, &data, overwrite).await {
                    Err(VfsError::RootCorrupted) => {
                        tracing::warn!(path = %path, "write found the writable root missing");
                        return Executed::RootCorrupted;
                    }
                    result => {
                        let _ = reply.send(result);
                    }
                }
            }
            FsCall::Rename { from, to, reply } => match fs.rename(&from, &to).await {
                Err(VfsError::RootCorrupted) => {
                    tracing::warn!(
                        from = %from,
                        to = %to,
                        "rename found the writable root missing"
                    );
                    return Executed::RootCorrupted;
                }
                result => {
                    let _ = reply.send(result);
                }
            },
            FsCall::Rmdir { path, reply } => {
                let _ = reply.send(fs.rmdir(&path).await);
            }
            FsCall::Unlink { path, reply } => {
                let _ = reply.send(fs.unlink(&path).await);
            }
            FsCall::Mount { path, mount, reply } => {
                let _ = reply.send(fs.mount(&path, mount).await);
            }
            FsCall::Unmount { path, reply } => {
                let _ = reply.send(fs.unmount(&path).await);
            }
        }
        Executed::Completed
    }

    /// Answer the caller without running, because no store could be built.
    pub(crate) fn fail(self, cause: &VfsError) {
        let err = || VfsError::Unavailable(cause.to_string());
        match self {
            FsCall::Exists { reply, .. } | FsCall::Unmount { reply, .. } => {
                let _ = reply.send(false);
            }
            FsCall::Stat { reply, .. } | FsCall::Lstat { reply, .. } => {
                let _ = reply.send(Err(err()));
            }
            FsCall::Mkdir { reply, .. }
            | FsCall::WriteFile { reply, .. }
            | FsCall::Rmdir { reply, .. }
            | FsCall::Unlink { reply, .. } => {
                let _ = reply.send(Err(err()));
            }
            FsCall::ReadFile { reply, .. } => {
                let _ = reply.send(Err(err()));
            }
            FsCall::Readdir { reply, .. } => {
                let _ = reply.send(Err(err()));
            }
            FsCall::Rename { reply, .. } => {
                let _ = reply.send(Err(err()));
            }
            FsCall::Mount { reply, .. } => {
                let _ = reply.send(Err(err()));
            }
        }
    }
}

/// Builds the composed store.
pub(crate) struct StoreBuilder {
    pub(crate) fetcher: Arc<dyn ArchiveFetcher>,
    pub(crate) config: FsConfig,
    pub(crate) probe: Arc<dyn PersistenceProbe>,
    pub(crate) writable: Option<Arc<dyn WritableStore>>,
    /// Probe answer, asked at most once.
    persistent: OnceCell<bool>,
}

impl StoreBuilder {
    pub(crate) fn new(
        fetcher: Arc<dyn ArchiveFetcher>,
        config: FsConfig,
        probe: Arc<dyn PersistenceProbe>,
        writable: Option<Arc<dyn WritableStore>>,
    ) -> Self {
        Self {
            fetcher,
            config,
            probe,
            writable,
            persistent: OnceCell::new(),
        }
    }

    async fn wants_persistence(&self) -> bool {
        match self.config.storage {
            StorageMode::Memory => false,
            StorageMode::Persistent => true,
            StorageMode::Auto => {
                *self
                    .persistent
                    .get_or_init(|| self.probe.supports_persistence())
                    .await
            }
        }
    }

    async fn writable_store(&self) -> VfsResult<Arc<dyn WritableStore>> {
        if let Some(store) = &self.writable {
            return Ok(Arc::clone(store));
        }

        if !self.wants_persistence().await {
            tracing::info!("using in-memory writable layer");
            return Ok(Arc::new(MemoryStore::new()));
        }

        let path = self.config.database.clone();
        tracing::info!(database = %path.display(), "using persistent writable layer");
        let store = tokio::task::spawn_blocking(move || -> VfsResult<SqliteStore> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            SqliteStore::open(&path)
        })
        .await
        .map_err(|e| VfsError::other(format!("storage task failed: {e}")))??;
        Ok(Arc::new(store))
    }

    pub(crate) async fn build(&self) -> VfsResult<FsFacade> {
        let archive = ArchiveStore::load(Arc::clone(&self.fetcher)).await?;
        let sizes = archive.size_index().clone();
        let writable = self.writable_store().await?;
        let overlay = OverlayStore::new(writable, Arc::new(archive)).await?;
        Ok(FsFacade::new(
            RootStore::new(overlay, sizes),
            self.config.clone(),
        ))
    }
}

/// Where the initializer is, plus the inbox of the running worker.
struct Session {
    state: FsState,
    calls: Option<mpsc::UnboundedSender<FsCall>>,
}

/// Owns the state machine and the worker that runs calls.
///
/// Submitting a call only sends it to the worker, so a call runs to the end
/// even if its caller stops waiting. The worker builds the store, then
/// replays everything it has received in order and keeps serving calls one
/// at a time.
pub(crate) struct Initializer {
    session: Mutex<Session>,
    builder: StoreBuilder,
    recovery: RecoveryController,
}

impl Initializer {
    pub(crate) fn new(builder: StoreBuilder, recovery: RecoveryController) -> Self {
        Self {
            session: Mutex::new(Session {
                state: FsState::Uninitialized,
                calls: None,
            }),
            builder,
            recovery,
        }
    }

    pub(crate) fn state(&self) -> FsState {
        self.session.lock().state
    }

    /// Hand `call` to the worker, starting one if none is running.
    pub(crate) fn submit(self: &Arc<Self>, call: FsCall) {
        let name = call.name();
        let mut session = self.session.lock();
        let call = match &session.calls {
            Some(tx) => match tx.send(call) {
                Ok(()) => {
                    if session.state == FsState::Initializing {
                        tracing::debug!(call = name, "queued call until the store is ready");
                    }
                    return;
                }
                Err(mpsc::error::SendError(call)) => call,
            },
            None => call,
        };

        tracing::info!(call = name, "initializing filesystem");
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(call);
        session.calls = Some(tx);
        session.state = FsState::Initializing;
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(rx).await });
    }

    /// Close the session so the next call starts a fresh worker.
    fn end_session(&self) {
        let mut session = self.session.lock();
        session.calls = None;
        session.state = FsState::Uninitialized;
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<FsCall>) {
        let facade = match self.builder.build().await {
            Ok(facade) => facade,
            Err(e) => {
                self.end_session();
                let mut failed = 0;
                while let Ok(call) = rx.try_recv() {
                    call.fail(&e);
                    failed += 1;
                }
                tracing::error!(error = %e, queued = failed, "filesystem initialization failed");
                return;
            }
        };

        self.session.lock().state = FsState::Ready;
        tracing::info!("filesystem ready");

        while let Some(call) = rx.recv().await {
            if call.execute(&facade).await == Executed::RootCorrupted {
                self.recovery.recover(facade.root()).await;
                self.end_session();
                let mut dropped = 0;
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
                tracing::warn!(dropped, "dropped pending calls for storage reset");
                return;
            }
        }
    }
}
