//! Recovery from a lost writable root.
//!
//! A write that finds the writable layer's root missing leaves the overlay
//! with nothing to stand on. The only way out is to wipe the writable layer
//! and start over, so the controller resets storage and asks the host to
//! restart.

use std::sync::Arc;
use tokio::sync::watch;

use crate::vfs::RootStore;

/// What "restart" means for the host.
pub trait RestartHandler: Send + Sync {
    fn restart(&self);
}

/// Restart notification the host observes through a watch channel.
///
/// The value counts restarts requested so far.
#[derive(Debug, Clone)]
pub struct RestartSignal {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for RestartSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl RestartSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Restarts requested so far.
    pub fn count(&self) -> u64 {
        *self.tx.borrow()
    }
}

impl RestartHandler for RestartSignal {
    fn restart(&self) {
        self.tx.send_modify(|n| *n += 1);
    }
}

/// Exits the process so a supervisor can start it again.
#[derive(Debug, Clone, Copy)]
pub struct ProcessExit {
    pub code: i32,
}

impl Default for ProcessExit {
    fn default() -> Self {
        // EX_TEMPFAIL
        Self { code: 75 }
    }
}

impl RestartHandler for ProcessExit {
    fn restart(&self) {
        tracing::error!(code = self.code, "exiting for restart after storage reset");
        std::process::exit(self.code);
    }
}

/// Resets storage and triggers the restart.
#[derive(Clone)]
pub struct RecoveryController {
    restart: Arc<dyn RestartHandler>,
}

impl std::fmt::Debug for RecoveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryController").finish_non_exhaustive()
    }
}

impl RecoveryController {
    pub fn new(restart: Arc<dyn RestartHandler>) -> Self {
        Self { restart }
    }

    pub async fn recover(&self, root: &RootStore) {
        tracing::warn!("writable root is missing; resetting storage");
        if let Err(e) = root.clear().await {
            tracing::error!(error = %e, "failed to reset writable layer");
        }
        self.restart.restart();
    }
}
