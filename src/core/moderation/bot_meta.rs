// Bot-wide runtime flags kept in the store: the maintenance switch and the
// single-slot pending broadcast. Both are owner-scoped.

use super::moderation_models::PendingBroadcast;
use crate::core::storage::{KeyValueStore, StoreError};
use serde_json::json;
use std::sync::Arc;

const MAINTENANCE_KEY: &str = "meta:maintenance_active";
const PENDING_BROADCAST_KEY: &str = "meta:pending_broadcast";

pub struct BotMeta<S: KeyValueStore> {
    store: Arc<S>,
}

impl<S: KeyValueStore> Clone for BotMeta<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore> BotMeta<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Whether maintenance mode is on. Degrades to "off" on storage errors
    /// so a flaky backend cannot freeze the bot.
    pub async fn maintenance_active(&self) -> bool {
        match self.store.get(MAINTENANCE_KEY).await {
            Ok(value) => value.and_then(|v| v.as_bool()).unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "maintenance flag read failed, assuming off");
                false
            }
        }
    }

    pub async fn set_maintenance(&self, active: bool) -> Result<(), StoreError> {
        self.store.set(MAINTENANCE_KEY, json!(active)).await
    }

    pub async fn pending_broadcast(&self) -> Result<Option<PendingBroadcast>, StoreError> {
        let value = self.store.get(PENDING_BROADCAST_KEY).await?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    /// Replaces any previous slot - at most one broadcast is ever pending.
    pub async fn set_pending_broadcast(
        &self,
        pending: PendingBroadcast,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(&pending).map_err(|e| StoreError::InvalidValue {
            key: PENDING_BROADCAST_KEY.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set(PENDING_BROADCAST_KEY, value).await
    }

    pub async fn clear_pending_broadcast(&self) -> Result<(), StoreError> {
        self.store.delete(PENDING_BROADCAST_KEY).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::storage::MemoryKvStore;

    #[tokio::test]
    async fn maintenance_defaults_to_off() {
        let meta = BotMeta::new(Arc::new(MemoryKvStore::new()));
        assert!(!meta.maintenance_active().await);

        meta.set_maintenance(true).await.unwrap();
        assert!(meta.maintenance_active().await);

        meta.set_maintenance(false).await.unwrap();
        assert!(!meta.maintenance_active().await);
    }

    #[tokio::test]
    async fn broadcast_slot_holds_at_most_one_reference() {
        let meta = BotMeta::new(Arc::new(MemoryKvStore::new()));
        assert_eq!(meta.pending_broadcast().await.unwrap(), None);

        let first = PendingBroadcast {
            chat_id: 1,
            message_id: 10,
        };
        let second = PendingBroadcast {
            chat_id: 2,
            message_id: 20,
        };
        meta.set_pending_broadcast(first).await.unwrap();
        meta.set_pending_broadcast(second.clone()).await.unwrap();

        assert_eq!(meta.pending_broadcast().await.unwrap(), Some(second));

        meta.clear_pending_broadcast().await.unwrap();
        assert_eq!(meta.pending_broadcast().await.unwrap(), None);
    }
}
