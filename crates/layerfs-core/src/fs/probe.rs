//! Persistence capability probe.
//!
//! Asked once, when the first call builds the store, to decide between the
//! persistent and the in-memory writable profile.

use async_trait::async_trait;
use std::path::PathBuf;

/// Answers "can this host keep data across sessions?".
#[async_trait]
pub trait PersistenceProbe: Send + Sync {
    async fn supports_persistence(&self) -> bool;
}

/// Probes by creating and opening the SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteProbe {
    path: PathBuf,
}

impl SqliteProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PersistenceProbe for SqliteProbe {
    async fn supports_persistence(&self) -> bool {
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            rusqlite::Connection::open(&path)?.execute_batch("SELECT 1")?;
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(
                    path = %self.path.display(),
                    error = %e,
                    "persistence probe failed"
                );
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "persistence probe panicked");
                false
            }
        }
    }
}

/// A fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub bool);

#[async_trait]
impl PersistenceProbe for FixedProbe {
    async fn supports_persistence(&self) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_probe_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("fs.db");
        assert!(SqliteProbe::new(&db).supports_persistence().await);
        assert!(db.exists());
    }

    #[tokio::test]
    async fn test_sqlite_probe_fails_on_unusable_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let probe = SqliteProbe::new(blocker.join("fs.db"));
        assert!(!probe.supports_persistence().await);
    }

    #[tokio::test]
    async fn test_fixed_probe() {
        assert!(FixedProbe(true).supports_persistence().await);
        assert!(!FixedProbe(false).supports_persistence().await);
    }
}
