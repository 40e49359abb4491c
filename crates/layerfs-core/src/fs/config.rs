//! Filesystem configuration, loaded from RON.
//!
//! ```ron
//! (
//!     storage: Persistent,
//!     database: "/var/lib/layerfs/fs.db",
//!     session_file: "/Users/Public/session.json",
//! )
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vfs::path;

/// Which writable profile to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    /// Persistent if the persistence probe succeeds, memory otherwise.
    #[default]
    Auto,
    /// Process-lifetime storage.
    Memory,
    /// SQLite-backed storage that survives restarts.
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub storage: StorageMode,
    /// SQLite database for the persistent profile.
    pub database: PathBuf,
    /// Archive index location, relative to the archive root.
    pub index_file: String,
    pub icon_cache_dir: String,
    pub icon_cache_extension: String,
    /// Written constantly; exempt from icon cache eviction.
    pub session_file: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            storage: StorageMode::Auto,
            database: default_db_path(),
            index_file: ".index/fs.json".into(),
            icon_cache_dir: "/Users/Public/Icons/Cache".into(),
            icon_cache_extension: ".cache".into(),
            session_file: "/Users/Public/session.json".into(),
        }
    }
}

/// Get the default database path.
fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("layerfs")
        .join("fs.db")
}

impl FsConfig {
    /// Parse a RON document.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Load a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Icon cache entry for `path`.
    pub fn icon_cache_path(&self, target: &str) -> String {
        let target = path::normalize(target);
        path::join(
            &self.icon_cache_dir,
            &format!("{}{}", target, self.icon_cache_extension),
        )
    }

    /// Returns true for the path whose writes never evict its icon.
    pub fn is_session_file(&self, target: &str) -> bool {
        path::normalize(target) == path::normalize(&self.session_file)
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FsConfig::default();
        assert_eq!(config.storage, StorageMode::Auto);
        assert_eq!(config.index_file, ".index/fs.json");
        assert!(config.database.ends_with("layerfs/fs.db"));
    }

    #[test]
    fn test_partial_ron() {
        let config = FsConfig::from_ron(
            r#"(storage: Memory, icon_cache_extension: ".ico", session_file: "/s.json")"#,
        )
        .unwrap();
        assert_eq!(config.storage, StorageMode::Memory);
        assert_eq!(config.icon_cache_extension, ".ico");
        assert_eq!(config.icon_cache_dir, "/Users/Public/Icons/Cache");
        assert!(config.is_session_file("s.json"));
    }

    #[test]
    fn test_bad_ron() {
        assert!(matches!(
            FsConfig::from_ron("(storage: Floppy)"),
            Err(ConfigError::Ron(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("fs.ron");
        std::fs::write(&file, "(storage: Persistent)").unwrap();
        assert_eq!(FsConfig::load(&file).unwrap().storage, StorageMode::Persistent);
        assert!(matches!(
            FsConfig::load(dir.path().join("missing.ron")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_icon_cache_path() {
        let config = FsConfig::default();
        assert_eq!(
            config.icon_cache_path("/Users/Public/Desktop/notes.txt"),
            "/Users/Public/Icons/Cache/Users/Public/Desktop/notes.txt.cache"
        );
        assert!(config.is_session_file("/Users/Public/session.json"));
        assert!(!config.is_session_file("/Users/Public/other.json"));
    }
}
