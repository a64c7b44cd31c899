use crate::error::StorageError;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Durable key/value storage. Values are JSON documents.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the values present for `keys`; absent keys are simply missing from the map.
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError>;

    /// Writes every entry or none of them.
    async fn set(&self, entries: Vec<(String, Value)>) -> Result<(), StorageError>;
}

/// SQLite-backed store, one row per key.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Arc<Self>, StorageError> {
        std::fs::create_dir_all(db_path.parent().unwrap_or_else(|| Path::new(".")))?;
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            CREATE TABLE IF NOT EXISTS kv (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL,
              updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Arc::new(Self {
            db_path: db_path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn connect(db_path: &Path) -> Result<Connection, StorageError> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn get_blocking(db_path: &Path, keys: &[String]) -> Result<HashMap<String, Value>, StorageError> {
        let conn = Self::connect(db_path)?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?")?;
        let mut out = HashMap::new();
        for key in keys {
            let mut rows = stmt.query(params![key])?;
            if let Some(row) = rows.next()? {
                let raw: String = row.get(0)?;
                out.insert(key.clone(), serde_json::from_str(&raw)?);
            }
        }
        Ok(out)
    }

    fn set_blocking(db_path: &Path, entries: &[(String, String)]) -> Result<(), StorageError> {
        let conn = Self::connect(db_path)?;
        let tx = conn.unchecked_transaction()?;
        let now = Self::now_ms();
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError> {
        let db_path = self.db_path.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        tokio::task::spawn_blocking(move || Self::get_blocking(&db_path, &keys))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<(), StorageError> {
        let db_path = self.db_path.clone();
        let encoded = entries
            .into_iter()
            .map(|(k, v)| Ok((k, serde_json::to_string(&v)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        tokio::task::spawn_blocking(move || Self::set_blocking(&db_path, &encoded))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>, StorageError> {
        self.values
            .lock()
            .map_err(|_| StorageError::Task("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError> {
        let values = self.lock()?;
        Ok(keys
            .iter()
            .filter_map(|k| values.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<(), StorageError> {
        let mut values = self.lock()?;
        for (k, v) in entries {
            values.insert(k, v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_roundtrip_and_missing_keys() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("nested").join("db.sqlite")).unwrap();

        store
            .set(vec![
                ("a".to_string(), json!([1, 2, 3])),
                ("b".to_string(), json!({"x": true})),
            ])
            .await
            .unwrap();

        let got = store.get(&["a", "b", "c"]).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got["a"], json!([1, 2, 3]));
        assert_eq!(got["b"]["x"], json!(true));
    }

    #[tokio::test]
    async fn test_sqlite_overwrite_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.sqlite");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set(vec![("k".to_string(), json!(1))]).await.unwrap();
            store.set(vec![("k".to_string(), json!(2))]).await.unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get(&["k"]).await.unwrap()["k"], json!(2));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.get(&["k"]).await.unwrap().is_empty());
        store.set(vec![("k".to_string(), json!("v"))]).await.unwrap();
        assert_eq!(store.get(&["k"]).await.unwrap()["k"], json!("v"));
    }
}
