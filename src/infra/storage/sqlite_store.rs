// SQLite-backed implementation of the key/value contract.
//
// One table, values stored as JSON text:
// - kv_entries(key TEXT PRIMARY KEY, value TEXT NOT NULL)
//
// `increment` is a single upsert-with-RETURNING statement, so concurrent
// violations for the same key serialize at the database.

use crate::core::storage::{KeyValueStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteKvStore {
    pool: Pool<Sqlite>,
}

impl SqliteKvStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create the table.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn prefix_pattern(prefix: &str) -> String {
        // Keys never contain LIKE wildcards; a plain suffix wildcard is enough.
        format!("{prefix}%")
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match row {
            Some(row) => {
                let raw: String = row.get("value");
                let value =
                    serde_json::from_str(&raw).map_err(|e| StoreError::InvalidValue {
                        key: key.to_owned(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value) VALUES (?, '1')
            ON CONFLICT(key) DO UPDATE SET
                value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)
            RETURNING CAST(value AS INTEGER) AS value
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let count: i64 = row.get("value");
        if count < 1 {
            return Err(StoreError::InvalidValue {
                key: key.to_owned(),
                reason: "not an unsigned integer".to_owned(),
            });
        }
        Ok(count as u64)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, prefix: &str) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kv_entries WHERE key LIKE ?")
            .bind(Self::prefix_pattern(prefix))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<(String, Value)>, StoreError> {
        let rows = sqlx::query(
            "SELECT key, value FROM kv_entries WHERE key LIKE ? ORDER BY key LIMIT ?",
        )
        .bind(Self::prefix_pattern(prefix))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("key");
            let raw: String = row.get("value");
            match serde_json::from_str(&raw) {
                Ok(value) => entries.push((key, value)),
                Err(e) => {
                    tracing::warn!(key, error = %e, "corrupt stored value skipped in scan");
                }
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqliteKvStore {
        // A single connection so the in-memory database is shared.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteKvStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn get_set_delete_round_trip() {
        let store = store().await;

        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("a", json!({"links": true})).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({"links": true})));

        store.set("a", json!({"links": false})).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({"links": false})));

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn increment_upserts_and_returns_new_value() {
        let store = store().await;

        assert_eq!(store.increment("warnings:-1:7").await.unwrap(), 1);
        assert_eq!(store.increment("warnings:-1:7").await.unwrap(), 2);
        assert_eq!(store.increment("warnings:-1:7").await.unwrap(), 3);

        assert_eq!(
            store.get("warnings:-1:7").await.unwrap(),
            Some(json!(3))
        );
    }

    #[tokio::test]
    async fn values_survive_a_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("kv.db").display()
        );

        {
            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(1)
                .connect(&url)
                .await
                .unwrap();
            let store = SqliteKvStore::new(pool);
            store.migrate().await.unwrap();
            store.set("policy:-100", json!({"links": false})).await.unwrap();
        }

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .unwrap();
        let store = SqliteKvStore::new(pool);
        store.migrate().await.unwrap();
        assert_eq!(
            store.get("policy:-100").await.unwrap(),
            Some(json!({"links": false}))
        );
    }

    #[tokio::test]
    async fn count_and_scan_filter_by_prefix() {
        let store = store().await;
        store.set("policy:-100", json!({})).await.unwrap();
        store.set("policy:-200", json!({})).await.unwrap();
        store.set("whitelist:5", json!({})).await.unwrap();

        assert_eq!(store.count("policy:").await.unwrap(), 2);
        assert_eq!(store.count("whitelist:").await.unwrap(), 1);

        let entries = store.scan("policy:", 10).await.unwrap();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["policy:-100", "policy:-200"]);

        let limited = store.scan("policy:", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
