// Exemption registry - per-user overrides that bypass moderation entirely.
//
// Two independent facets: `whitelisted` (granted by admins, persists until
// revoked) and `approved` (self-granted by chat admins via /approveme).
// Removing a user from the whitelist also clears their approval; the
// reverse does not hold.
//
// This gate runs on every inbound message, so it only ever touches the
// store - never the platform API.

use super::moderation_models::WhitelistEntry;
use crate::core::storage::{KeyValueStore, StoreError};
use serde_json::json;
use std::sync::Arc;

const WHITELIST_PREFIX: &str = "whitelist:";
const APPROVED_PREFIX: &str = "approved:";

pub struct ExemptionRegistry<S: KeyValueStore> {
    store: Arc<S>,
}

impl<S: KeyValueStore> Clone for ExemptionRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore> ExemptionRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn whitelist_key(user_id: u64) -> String {
        format!("{WHITELIST_PREFIX}{user_id}")
    }

    fn approved_key(user_id: u64) -> String {
        format!("{APPROVED_PREFIX}{user_id}")
    }

    /// Whitelisted OR approved. A storage error degrades to "not exempt"
    /// so a flaky backend can never switch moderation off.
    pub async fn is_exempt(&self, user_id: u64) -> bool {
        let whitelisted = match self.store.get(&Self::whitelist_key(user_id)).await {
            Ok(v) => v.is_some(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "whitelist lookup failed");
                false
            }
        };
        if whitelisted {
            return true;
        }
        match self.store.get(&Self::approved_key(user_id)).await {
            Ok(v) => v.is_some(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "approval lookup failed");
                false
            }
        }
    }

    pub async fn add_whitelist(
        &self,
        user_id: u64,
        full_name: &str,
        username: Option<&str>,
    ) -> Result<(), StoreError> {
        let entry = WhitelistEntry {
            user_id,
            full_name: full_name.to_string(),
            username: username.map(|s| s.to_string()),
        };
        let value = serde_json::to_value(&entry).map_err(|e| StoreError::InvalidValue {
            key: Self::whitelist_key(user_id),
            reason: e.to_string(),
        })?;
        self.store.set(&Self::whitelist_key(user_id), value).await
    }

    /// Remove a user from the whitelist. Also clears their approval - a
    /// revoked user must not keep a self-granted pass.
    pub async fn remove_whitelist(&self, user_id: u64) -> Result<(), StoreError> {
        self.store.delete(&Self::whitelist_key(user_id)).await?;
        self.store.delete(&Self::approved_key(user_id)).await?;
        Ok(())
    }

    pub async fn approve(&self, user_id: u64) -> Result<(), StoreError> {
        self.store
            .set(&Self::approved_key(user_id), json!({ "approved": true }))
            .await
    }

    pub async fn whitelist_entries(&self, limit: usize) -> Result<Vec<WhitelistEntry>, StoreError> {
        let entries = self.store.scan(WHITELIST_PREFIX, limit).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| {
                serde_json::from_value(value)
                    .map_err(|e| {
                        tracing::warn!(key, error = %e, "corrupt whitelist entry skipped");
                        e
                    })
                    .ok()
            })
            .collect())
    }

    pub async fn whitelist_count(&self) -> Result<u64, StoreError> {
        self.store.count(WHITELIST_PREFIX).await
    }

    pub async fn approved_count(&self) -> Result<u64, StoreError> {
        self.store.count(APPROVED_PREFIX).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::storage::MemoryKvStore;

    fn registry() -> ExemptionRegistry<MemoryKvStore> {
        ExemptionRegistry::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn absent_user_is_not_exempt() {
        assert!(!registry().is_exempt(42).await);
    }

    #[tokio::test]
    async fn whitelist_grants_exemption() {
        let reg = registry();
        reg.add_whitelist(42, "Some User", Some("someuser"))
            .await
            .unwrap();

        assert!(reg.is_exempt(42).await);
        assert!(!reg.is_exempt(43).await);
    }

    #[tokio::test]
    async fn approval_grants_exemption() {
        let reg = registry();
        reg.approve(42).await.unwrap();

        assert!(reg.is_exempt(42).await);
    }

    #[tokio::test]
    async fn removing_whitelist_also_clears_approval() {
        let reg = registry();
        reg.add_whitelist(42, "Some User", None).await.unwrap();
        reg.approve(42).await.unwrap();

        reg.remove_whitelist(42).await.unwrap();

        assert!(!reg.is_exempt(42).await);
        assert_eq!(reg.approved_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn whitelist_listing_returns_recorded_details() {
        let reg = registry();
        reg.add_whitelist(1, "Alice", Some("alice")).await.unwrap();
        reg.add_whitelist(2, "Bob", None).await.unwrap();

        let mut entries = reg.whitelist_entries(50).await.unwrap();
        entries.sort_by_key(|e| e.user_id);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].full_name, "Alice");
        assert_eq!(entries[0].username.as_deref(), Some("alice"));
        assert_eq!(entries[1].username, None);
        assert_eq!(reg.whitelist_count().await.unwrap(), 2);
    }
}
