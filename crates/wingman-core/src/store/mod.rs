//! Durable, process-shared storage for app/download/inference state, backed
//! by a WAL-mode SQLite connection behind `Arc<Mutex<Connection>>`.

mod app;
mod downloads;
mod wingman;

pub use app::*;
pub use downloads::*;
pub use wingman::*;

use crate::config::TimeoutConfig;
use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

/// Shared handle to the relational store. Cheap to clone; all clones share
/// the same underlying connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if absent) the database at `path`, creating the three
    /// tables if they don't already exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_with_path(e, parent))?;
        }

        let conn = Connection::open(path).map_err(|e| Error::StoreUnavailable {
            message: format!("failed to open store at {}: {e}", path.display()),
            source: Some(e),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=1000;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store, for tests that don't need a filesystem root.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS app (
                name TEXT NOT NULL,
                key TEXT NOT NULL DEFAULT 'default',
                value TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created INTEGER NOT NULL,
                updated INTEGER NOT NULL,
                PRIMARY KEY (name, key)
            );

            CREATE TABLE IF NOT EXISTS downloads (
                modelRepo TEXT NOT NULL,
                filePath TEXT NOT NULL,
                status TEXT NOT NULL,
                totalBytes INTEGER NOT NULL DEFAULT 0,
                downloadedBytes INTEGER NOT NULL DEFAULT 0,
                downloadSpeed TEXT NOT NULL DEFAULT '0 B/s',
                progress REAL NOT NULL DEFAULT 0,
                error TEXT,
                metadata TEXT,
                created INTEGER NOT NULL,
                updated INTEGER NOT NULL,
                PRIMARY KEY (modelRepo, filePath)
            );
            CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads(status);
            CREATE INDEX IF NOT EXISTS idx_downloads_created ON downloads(created);

            CREATE TABLE IF NOT EXISTS wingman (
                alias TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                modelRepo TEXT NOT NULL,
                filePath TEXT NOT NULL,
                address TEXT NOT NULL DEFAULT 'localhost',
                port INTEGER NOT NULL DEFAULT 6567,
                contextSize INTEGER NOT NULL DEFAULT 0,
                gpuLayers INTEGER NOT NULL DEFAULT -1,
                force INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created INTEGER NOT NULL,
                updated INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_wingman_status ON wingman(status);
            CREATE INDEX IF NOT EXISTS idx_wingman_created ON wingman(created);
            CREATE INDEX IF NOT EXISTS idx_wingman_port ON wingman(port);
            "#,
        )?;
        Ok(())
    }

    /// Lock the connection, retrying with a short bounded backoff on
    /// transient `SQLITE_BUSY` contention rather than surfacing the error.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        let mut attempts = 0;
        loop {
            match self.conn.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(std::sync::TryLockError::WouldBlock) => {
                    attempts += 1;
                    if attempts >= TimeoutConfig::STORE_BUSY_RETRY_ATTEMPTS {
                        // Fall back to a blocking lock rather than failing outright;
                        // contention this long means the holder is doing real work.
                        return Ok(self.conn.lock().map_err(|_| Error::StoreUnavailable {
                            message: "store mutex poisoned".to_string(),
                            source: None,
                        })?);
                    }
                    thread::sleep(TimeoutConfig::STORE_BUSY_RETRY_DELAY);
                }
                Err(std::sync::TryLockError::Poisoned(_)) => {
                    return Err(Error::StoreUnavailable {
                        message: "store mutex poisoned".to_string(),
                        source: None,
                    })
                }
            }
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_tables() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path().join("wingman.db")).unwrap();
        assert_eq!(store.download_count().unwrap(), 0);
        assert_eq!(store.wingman_count().unwrap(), 0);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("wingman.db");
        let store1 = Store::open(&db_path).unwrap();
        store1.app_set("test", "value").unwrap();
        drop(store1);

        let store2 = Store::open(&db_path).unwrap();
        assert_eq!(store2.app_get("test").unwrap().unwrap().value, "value");
    }
}
