//! SQLite-backed writable backend.
//!
//! The persistent profile. One row per entry, keyed by normalized path.
//! The store has no native rename; callers fall back to copy + delete.
//!
//! rusqlite is synchronous, so every statement runs in
//! `tokio::task::spawn_blocking` with the connection behind a mutex.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::path;
use crate::vfs::store::{StoreCapabilities, WritableStore};
use crate::vfs::types::{DirEntry, FileAttr, FileType, WriteFlag};

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    path TEXT PRIMARY KEY,
    parent TEXT,
    kind TEXT NOT NULL,
    mode INTEGER NOT NULL,
    data BLOB,
    atime INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    ctime INTEGER NOT NULL,
    birthtime INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entries_parent ON entries(parent);
"#;

fn kind_str(kind: FileType) -> &'static str {
    match kind {
        FileType::File => "file",
        FileType::Directory => "directory",
        FileType::Symlink => "symlink",
    }
}

fn kind_from_str(s: &str) -> FileType {
    match s {
        "directory" => FileType::Directory,
        "symlink" => FileType::Symlink,
        _ => FileType::File,
    }
}

fn to_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn from_millis(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}

/// Row metadata without the data blob.
struct Row {
    kind: FileType,
    size: i64,
    mode: u32,
    atime: i64,
    mtime: i64,
    ctime: i64,
    birthtime: i64,
}

impl Row {
    fn attr(&self) -> FileAttr {
        FileAttr {
            kind: self.kind,
            size: self.size,
            mode: self.mode,
            atime: from_millis(self.atime),
            mtime: from_millis(self.mtime),
            ctime: from_millis(self.ctime),
            birthtime: from_millis(self.birthtime),
        }
    }
}

/// Persistent writable store on SQLite.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> VfsResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> VfsResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> VfsResult<Self> {
        conn.execute_batch(SCHEMA)?;
        // Seed the root only for a fresh database; a root lost later stays lost.
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        if count == 0 {
            Self::insert_root(&conn)?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> VfsResult<T>
    where
        F: FnOnce(&Connection) -> VfsResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| VfsError::other(format!("spawn_blocking: {e}")))?
    }

    fn insert_root(conn: &Connection) -> rusqlite::Result<()> {
        let now = to_millis(SystemTime::now());
        conn.execute(
            "INSERT INTO entries (path, parent, kind, mode, data, atime, mtime, ctime, birthtime)
             VALUES ('/', NULL, 'directory', ?1, NULL, ?2, ?2, ?2, ?2)",
            params![DIR_MODE, now],
        )?;
        Ok(())
    }

    fn row(conn: &Connection, path: &str) -> rusqlite::Result<Option<Row>> {
        conn.query_row(
            "SELECT kind, COALESCE(LENGTH(data), 0), mode, atime, mtime, ctime, birthtime
             FROM entries WHERE path = ?1",
            params![path],
            |row| {
                let kind: String = row.get(0)?;
                Ok(Row {
                    kind: kind_from_str(&kind),
                    size: row.get(1)?,
                    mode: row.get(2)?,
                    atime: row.get(3)?,
                    mtime: row.get(4)?,
                    ctime: row.get(5)?,
                    birthtime: row.get(6)?,
                })
            },
        )
        .optional()
    }

    fn check_parent(conn: &Connection, path: &str) -> VfsResult<()> {
        let Some(parent) = path::parent(path) else {
            return Ok(());
        };
        match Self::row(conn, parent)? {
            Some(row) if row.kind.is_dir() => Ok(()),
            Some(_) => Err(VfsError::not_a_directory(parent)),
            None => Err(VfsError::not_found(parent)),
        }
    }

    fn has_children(conn: &Connection, dir: &str) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM entries WHERE parent = ?1)",
            params![dir],
            |row| row.get(0),
        )
    }

    fn insert(
        conn: &Connection,
        path: &str,
        kind: FileType,
        data: Option<&[u8]>,
    ) -> rusqlite::Result<()> {
        let now = to_millis(SystemTime::now());
        let mode = if kind.is_dir() { DIR_MODE } else { FILE_MODE };
        conn.execute(
            "INSERT INTO entries (path, parent, kind, mode, data, atime, mtime, ctime, birthtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6, ?6)",
            params![path, path::parent(path), kind_str(kind), mode, data, now],
        )?;
        Ok(())
    }
}

#[async_trait]
impl WritableStore for SqliteStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            atomic_rename: false,
            persistent: true,
        }
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let normalized = path::normalize(path);
        self.with_conn(move |conn| {
            Self::row(conn, &normalized)?
                .map(|row| row.attr())
                .ok_or_else(|| VfsError::not_found(normalized))
        })
        .await
    }

    async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let normalized = path::normalize(path);
        self.with_conn(move |conn| {
            let found: Option<(String, Option<Vec<u8>>)> = conn
                .query_row(
                    "SELECT kind, data FROM entries WHERE path = ?1",
                    params![normalized],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match found {
                Some((kind, _)) if kind_from_str(&kind).is_dir() => {
                    Err(VfsError::is_a_directory(normalized))
                }
                Some((_, data)) => Ok(data.unwrap_or_default()),
                None => Err(VfsError::not_found(normalized)),
            }
        })
        .await
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let normalized = path::normalize(path);
        self.with_conn(move |conn| {
            match Self::row(conn, &normalized)? {
                Some(row) if row.kind.is_dir() => {}
                Some(_) => return Err(VfsError::not_a_directory(normalized)),
                None => return Err(VfsError::not_found(normalized)),
            }

            let mut stmt =
                conn.prepare("SELECT path, kind FROM entries WHERE parent = ?1 ORDER BY path")?;
            let rows = stmt.query_map(params![normalized], |row| {
                let child: String = row.get(0)?;
                let kind: String = row.get(1)?;
                Ok(DirEntry::new(path::file_name(&child), kind_from_str(&kind)))
            })?;

            let mut result = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            result.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(result)
        })
        .await
    }

    async fn write_file(&self, path: &str, data: &[u8], flag: WriteFlag) -> VfsResult<()> {
        let normalized = path::normalize(path);
        let data = data.to_vec();
        self.with_conn(move |conn| {
            if Self::row(conn, "/")?.is_none() {
                return Err(VfsError::not_found("/"));
            }
            Self::check_parent(conn, &normalized)?;

            match Self::row(conn, &normalized)? {
                Some(row) if row.kind.is_dir() => Err(VfsError::is_a_directory(normalized)),
                Some(_) if flag.is_exclusive() => Err(VfsError::already_exists(normalized)),
                Some(_) => {
                    let now = to_millis(SystemTime::now());
                    conn.execute(
                        "UPDATE entries SET data = ?2, mtime = ?3, ctime = ?3 WHERE path = ?1",
                        params![normalized, data, now],
                    )?;
                    Ok(())
                }
                None => {
                    Self::insert(conn, &normalized, FileType::File, Some(&data))?;
                    Ok(())
                }
            }
        })
        .await
    }

    async fn mkdir(&self, path: &str, flag: WriteFlag) -> VfsResult<()> {
        let normalized = path::normalize(path);
        self.with_conn(move |conn| {
            if let Some(row) = Self::row(conn, &normalized)? {
                return if row.kind.is_dir() && !flag.is_exclusive() {
                    Ok(())
                } else {
                    Err(VfsError::already_exists(normalized))
                };
            }
            Self::check_parent(conn, &normalized)?;

            Self::insert(conn, &normalized, FileType::Directory, None)?;
            Ok(())
        })
        .await
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        let normalized = path::normalize(path);
        self.with_conn(move |conn| match Self::row(conn, &normalized)? {
            Some(row) if row.kind.is_dir() => Err(VfsError::is_a_directory(normalized)),
            Some(_) => {
                conn.execute("DELETE FROM entries WHERE path = ?1", params![normalized])?;
                Ok(())
            }
            None => Err(VfsError::not_found(normalized)),
        })
        .await
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let normalized = path::normalize(path);
        if path::is_root(&normalized) {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        self.with_conn(move |conn| {
            match Self::row(conn, &normalized)? {
                Some(row) if row.kind.is_dir() => {}
                Some(_) => return Err(VfsError::not_a_directory(normalized)),
                None => return Err(VfsError::not_found(normalized)),
            }
            if Self::has_children(conn, &normalized)? {
                return Err(VfsError::directory_not_empty(normalized));
            }

            conn.execute("DELETE FROM entries WHERE path = ?1", params![normalized])?;
            Ok(())
        })
        .await
    }

    async fn rename(&self, _from: &str, _to: &str) -> VfsResult<()> {
        Err(VfsError::unsupported("rename"))
    }

    async fn clear(&self) -> VfsResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM entries", [])?;
            Self::insert_root(conn)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .write_file("/hello.txt", b"hello", WriteFlag::Exclusive)
            .await
            .unwrap();

        assert_eq!(store.read_file("/hello.txt").await.unwrap(), b"hello");
        let attr = store.stat("/hello.txt").await.unwrap();
        assert!(attr.is_file());
        assert_eq!(attr.size, 5);
    }

    #[tokio::test]
    async fn test_exclusive_and_truncate() {
        let store = SqliteStore::in_memory().unwrap();
        store.write_file("/a", b"1", WriteFlag::Exclusive).await.unwrap();

        let err = store.write_file("/a", b"2", WriteFlag::Exclusive).await.unwrap_err();
        assert!(matches!(err, VfsError::AlreadyExists(_)));

        store.write_file("/a", b"22", WriteFlag::Truncate).await.unwrap();
        assert_eq!(store.read_file("/a").await.unwrap(), b"22");
        assert_eq!(store.stat("/a").await.unwrap().size, 2);
    }

    #[tokio::test]
    async fn test_directories() {
        let store = SqliteStore::in_memory().unwrap();
        store.mkdir("/docs", WriteFlag::Exclusive).await.unwrap();
        store
            .write_file("/docs/b.txt", b"", WriteFlag::Exclusive)
            .await
            .unwrap();
        store
            .write_file("/docs/a.txt", b"", WriteFlag::Exclusive)
            .await
            .unwrap();

        let names: Vec<_> = store
            .readdir("/docs")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        assert!(matches!(
            store.rmdir("/docs").await,
            Err(VfsError::DirectoryNotEmpty(_))
        ));
        assert!(matches!(
            store.read_file("/docs").await,
            Err(VfsError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_is_unsupported() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(
            store.capabilities(),
            StoreCapabilities {
                atomic_rename: false,
                persistent: true
            }
        );
        store.write_file("/a", b"x", WriteFlag::Exclusive).await.unwrap();
        assert!(matches!(
            store.rename("/a", "/b").await,
            Err(VfsError::Unsupported(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_statements_run_off_the_runtime() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.mkdir("/many", WriteFlag::Exclusive).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let path = format!("/many/{i}.txt");
                    store
                        .write_file(&path, i.to_string().as_bytes(), WriteFlag::Exclusive)
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.readdir("/many").await.unwrap().len(), 8);
        assert_eq!(store.read_file("/many/7.txt").await.unwrap(), b"7");
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("fs.db");

        {
            let store = SqliteStore::open(&db).unwrap();
            store.mkdir("/keep", WriteFlag::Exclusive).await.unwrap();
            store
                .write_file("/keep/me.txt", b"still here", WriteFlag::Exclusive)
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&db).unwrap();
        assert_eq!(store.read_file("/keep/me.txt").await.unwrap(), b"still here");
    }

    #[tokio::test]
    async fn test_lost_root_is_detected_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("fs.db");

        {
            let store = SqliteStore::open(&db).unwrap();
            store.write_file("/a", b"x", WriteFlag::Exclusive).await.unwrap();
        }
        {
            let conn = Connection::open(&db).unwrap();
            conn.execute("DELETE FROM entries WHERE path = '/'", []).unwrap();
        }

        let store = SqliteStore::open(&db).unwrap();
        let err = store.write_file("/b", b"x", WriteFlag::Exclusive).await.unwrap_err();
        assert!(err.is_root_not_found());

        store.clear().await.unwrap();
        assert!(store.exists("/").await);
        assert!(!store.exists("/a").await);
        store.write_file("/b", b"x", WriteFlag::Exclusive).await.unwrap();
    }
}
