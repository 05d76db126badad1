//! SQLite-backed store.
//!
//! rusqlite is synchronous, so every call runs on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::{KeyValueStore, StoreError};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }

        let conn = Connection::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS set_members (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            )",
            [],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        tracing::info!("SQLite store initialized with database: {}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            f(&conn).map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        })
        .await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let (key, member) = (key.to_string(), member.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO set_members (key, member) VALUES (?1, ?2)",
                params![key, member],
            )
            .map(|_| ())
        })
        .await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let (key, member) = (key.to_string(), member.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM set_members WHERE key = ?1 AND member = ?2",
                params![key, member],
            )
            .map(|_| ())
        })
        .await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT member FROM set_members WHERE key = ?1 ORDER BY member")?;
            let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
        })
        .await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kv_and_sets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.db");
        let store = SqliteStore::new(path.to_str().unwrap()).unwrap();

        store.set("head:h1", "one").await.unwrap();
        store.set("head:h1", "uno").await.unwrap();
        store.set("head:h2", "two").await.unwrap();
        store.set("routing:policy", "{}").await.unwrap();
        assert_eq!(store.get("head:h1").await.unwrap(), Some("uno".to_string()));
        assert!(store.get("head:h3").await.unwrap().is_none());
        assert_eq!(store.keys("head:").await.unwrap(), vec!["head:h1", "head:h2"]);

        store.sadd("model:llama-3:heads", "h2").await.unwrap();
        store.sadd("model:llama-3:heads", "h1").await.unwrap();
        store.sadd("model:llama-3:heads", "h1").await.unwrap();
        assert_eq!(
            store.smembers("model:llama-3:heads").await.unwrap(),
            vec!["h1", "h2"]
        );

        store.srem("model:llama-3:heads", "h1").await.unwrap();
        assert_eq!(store.smembers("model:llama-3:heads").await.unwrap(), vec!["h2"]);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("nested/fleet.db").display());

        {
            let store = SqliteStore::new(&url).unwrap();
            store.set("routing:policy", "saved").await.unwrap();
        }

        let reopened = SqliteStore::new(&url).unwrap();
        assert_eq!(
            reopened.get("routing:policy").await.unwrap(),
            Some("saved".to_string())
        );
    }
}
