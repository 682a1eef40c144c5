// In-memory implementation of the key/value contract.
//
// Used by the test suite and usable as a throwaway backend when running
// without a database. DashMap keeps each operation atomic per key, which is
// what the escalation engine's increment relies on.

use crate::core::storage::{KeyValueStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};

pub struct MemoryKvStore {
    data: DashMap<String, Value>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.data.get(key).map(|entry| entry.clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.data.insert(key.to_owned(), value);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        // The entry guard holds the shard lock, so read-add-write is atomic.
        let mut entry = self.data.entry(key.to_owned()).or_insert_with(|| json!(0));
        let current = entry.as_u64().ok_or_else(|| StoreError::InvalidValue {
            key: key.to_owned(),
            reason: "not an unsigned integer".to_owned(),
        })?;
        let next = current + 1;
        *entry = json!(next);
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.data.remove(key).is_some())
    }

    async fn count(&self, prefix: &str) -> Result<u64, StoreError> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .count() as u64)
    }

    async fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<(String, Value)>, StoreError> {
        let mut entries: Vec<(String, Value)> = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_delete_round_trip() {
        let store = MemoryKvStore::new();

        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("a", json!({"x": 1})).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!({"x": 1})));

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn increment_starts_at_one() {
        let store = MemoryKvStore::new();

        assert_eq!(store.increment("n").await.unwrap(), 1);
        assert_eq!(store.increment("n").await.unwrap(), 2);
        assert_eq!(store.get("n").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn increment_rejects_non_numeric_values() {
        let store = MemoryKvStore::new();
        store.set("n", json!("hello")).await.unwrap();

        assert!(matches!(
            store.increment("n").await,
            Err(StoreError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_increments_never_lose_updates() {
        use std::sync::Arc;

        let store = Arc::new(MemoryKvStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.increment("n").await.unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results.sort();
        let expected: Vec<u64> = (1..=50).collect();
        assert_eq!(results, expected);
    }

    #[tokio::test]
    async fn scan_respects_prefix_order_and_limit() {
        let store = MemoryKvStore::new();
        store.set("p:2", json!(2)).await.unwrap();
        store.set("p:1", json!(1)).await.unwrap();
        store.set("q:1", json!(9)).await.unwrap();

        assert_eq!(store.count("p:").await.unwrap(), 2);

        let all = store.scan("p:", 10).await.unwrap();
        assert_eq!(all, vec![("p:1".into(), json!(1)), ("p:2".into(), json!(2))]);

        let limited = store.scan("p:", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].0, "p:1");
    }
}
