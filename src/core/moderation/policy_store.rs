// Per-chat policy store.
//
// Policies are created lazily: the first read of an unknown chat persists
// the defaults so the record shows up in listings. Reads never fail - on a
// storage error the defaults apply and moderation continues. Writes surface
// errors to the command issuer.

use super::moderation_models::{ChatPolicy, PolicyField};
use crate::core::storage::{KeyValueStore, StoreError};
use std::sync::Arc;

const KEY_PREFIX: &str = "policy:";

pub struct PolicyStore<S: KeyValueStore> {
    store: Arc<S>,
}

impl<S: KeyValueStore> Clone for PolicyStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore> PolicyStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn key(chat_id: i64) -> String {
        format!("{KEY_PREFIX}{chat_id}")
    }

    /// Get the policy for a chat, falling back to defaults.
    ///
    /// A missing record is persisted with defaults on the spot. A storage
    /// error degrades to defaults - all categories on - rather than
    /// blocking the pipeline.
    pub async fn get(&self, chat_id: i64) -> ChatPolicy {
        let key = Self::key(chat_id);
        match self.store.get(&key).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(chat_id, error = %e, "corrupt chat policy, using defaults");
                ChatPolicy::default()
            }),
            Ok(None) => {
                let policy = ChatPolicy::default();
                if let Ok(value) = serde_json::to_value(&policy) {
                    if let Err(e) = self.store.set(&key, value).await {
                        tracing::warn!(chat_id, error = %e, "failed to persist default policy");
                    }
                }
                policy
            }
            Err(e) => {
                tracing::warn!(chat_id, error = %e, "policy read failed, using defaults");
                ChatPolicy::default()
            }
        }
    }

    /// Toggle one detection flag. Storage errors propagate to the caller
    /// (the command handler), never into the moderation path.
    pub async fn set(
        &self,
        chat_id: i64,
        field: PolicyField,
        value: bool,
    ) -> Result<(), StoreError> {
        let mut policy = self.get(chat_id).await;
        match field {
            PolicyField::Links => policy.links = value,
            PolicyField::BotUsernames => policy.bot_usernames = value,
            PolicyField::Usernames => policy.usernames = value,
            PolicyField::BioLinks => policy.bio_links = value,
        }
        let json = serde_json::to_value(&policy).map_err(|e| StoreError::InvalidValue {
            key: Self::key(chat_id),
            reason: e.to_string(),
        })?;
        self.store.set(&Self::key(chat_id), json).await
    }

    /// Number of chats with a policy record, i.e. every chat the bot has
    /// ever moderated.
    pub async fn chat_count(&self) -> Result<u64, StoreError> {
        self.store.count(KEY_PREFIX).await
    }

    /// Chat ids with a policy record, for listings and broadcast fan-out.
    pub async fn chat_ids(&self, limit: usize) -> Result<Vec<i64>, StoreError> {
        let entries = self.store.scan(KEY_PREFIX, limit).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, _)| key.strip_prefix(KEY_PREFIX)?.parse().ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::storage::MemoryKvStore;

    #[tokio::test]
    async fn unknown_chat_gets_defaults_and_is_persisted() {
        let store = Arc::new(MemoryKvStore::new());
        let policies = PolicyStore::new(Arc::clone(&store));

        let policy = policies.get(-100).await;
        assert_eq!(policy, ChatPolicy::default());

        // First read created the record.
        assert_eq!(store.count("policy:").await.unwrap(), 1);
        assert!(store.get("policy:-100").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn toggles_round_trip() {
        let policies = PolicyStore::new(Arc::new(MemoryKvStore::new()));

        policies.set(-100, PolicyField::Links, false).await.unwrap();
        policies
            .set(-100, PolicyField::BioLinks, false)
            .await
            .unwrap();

        let policy = policies.get(-100).await;
        assert!(!policy.links);
        assert!(!policy.bio_links);
        assert!(policy.usernames);
        assert!(policy.bot_usernames);

        // Another chat is unaffected.
        assert_eq!(policies.get(-200).await, ChatPolicy::default());
    }

    #[tokio::test]
    async fn chat_ids_lists_known_chats() {
        let policies = PolicyStore::new(Arc::new(MemoryKvStore::new()));

        policies.get(-100).await;
        policies.get(-200).await;

        let mut ids = policies.chat_ids(50).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![-200, -100]);
        assert_eq!(policies.chat_count().await.unwrap(), 2);
    }
}
