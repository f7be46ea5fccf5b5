//! SQLite-backed plugin storage.

use super::{HostError, HostResult, StorageService};
use crate::db::{open_db, open_db_in_memory, DbError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Key/value rows in `plugin_storage`, primary key `(plugin_id, key)`.
///
/// Queries run on the blocking thread pool so callers only suspend.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn in_memory() -> Result<Self, DbError> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, query: F) -> HostResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            query(&conn)
        })
        .await
        .map_err(|err| HostError::Storage(format!("storage task failed: {err}")))?
        .map_err(|err| HostError::Storage(err.to_string()))
    }
}

#[async_trait]
impl StorageService for SqliteStorage {
    async fn get(&self, plugin_id: &str, key: &str) -> HostResult<Option<String>> {
        let (plugin_id, key) = (plugin_id.to_string(), key.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM plugin_storage WHERE plugin_id = ?1 AND key = ?2",
                params![plugin_id, key],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })
        .await
    }

    async fn set(&self, plugin_id: &str, key: &str, value: &str) -> HostResult<()> {
        let (plugin_id, key, value) = (plugin_id.to_string(), key.to_string(), value.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO plugin_storage (plugin_id, key, value)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (plugin_id, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = CAST(strftime('%s', 'now') AS INTEGER) * 1000",
                params![plugin_id, key, value],
            )
            .map(|_| ())
        })
        .await
    }

    async fn delete(&self, plugin_id: &str, key: &str) -> HostResult<()> {
        let (plugin_id, key) = (plugin_id.to_string(), key.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM plugin_storage WHERE plugin_id = ?1 AND key = ?2",
                params![plugin_id, key],
            )
            .map(|_| ())
        })
        .await
    }
}
