use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::KvStore;
use crate::error::{IngestError, Result};

/// Local key-value store with the same path semantics as the remote database.
///
/// Each row holds the JSON value stored at one path. Writing a path replaces
/// the whole subtree below it.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                path TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IngestError::Store("sqlite connection lock poisoned".to_string()))
    }

    fn shallow_keys_sync(&self, path: &str) -> Result<HashSet<String>> {
        let conn = self.lock()?;
        let (lower, upper) = child_range(path);

        let mut stmt =
            conn.prepare_cached("SELECT path FROM kv_entries WHERE path > ?1 AND path < ?2")?;
        let rows = stmt.query_map(params![lower, upper], |row| row.get::<_, String>(0))?;

        let mut keys = HashSet::new();
        for row in rows {
            let full = row?;
            if let Some(child) = full[lower.len()..].split('/').next() {
                if !child.is_empty() {
                    keys.insert(child.to_string());
                }
            }
        }
        Ok(keys)
    }

    fn update_sync(&self, entries: &Map<String, Value>) -> Result<()> {
        let mut conn = self.lock()?;
        let timestamp = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;

        {
            let mut clear = tx.prepare_cached(
                "DELETE FROM kv_entries WHERE path > ?1 AND path < ?2",
            )?;
            let mut upsert = tx.prepare_cached(
                "INSERT INTO kv_entries (path, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(path)
                 DO UPDATE SET value = ?2, updated_at = ?3",
            )?;

            for (path, value) in entries {
                let path = path.trim_matches('/');
                if path.is_empty() {
                    return Err(IngestError::Store("empty path in update".to_string()));
                }
                let (lower, upper) = child_range(path);
                clear.execute(params![lower, upper])?;
                upsert.execute(params![path, value.to_string(), timestamp])?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

/// Bounds selecting every path strictly below `prefix`. `0` sorts right after `/`.
fn child_range(prefix: &str) -> (String, String) {
    let prefix = prefix.trim_matches('/');
    (format!("{}/", prefix), format!("{}0", prefix))
}

#[async_trait]
impl KvStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn shallow_keys(&self, path: &str) -> Result<HashSet<String>> {
        let store = self.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || store.shallow_keys_sync(&path))
            .await
            .map_err(|e| IngestError::Store(format!("sqlite read task failed: {}", e)))?
    }

    async fn update(&self, entries: Map<String, Value>) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update_sync(&entries))
            .await
            .map_err(|e| IngestError::Store(format!("sqlite write task failed: {}", e)))?
    }
}
