// Escalation engine - the warning -> mute state machine.
//
// One counter per (chat, user). Every confirmed violation increments it by
// exactly 1. At the threshold the engine asks the caller to apply a timed
// mute; the counter resets to 0 only if that application succeeds. A denied
// mute leaves the counter untouched so the next violation retries.
//
// The engine is the sole writer of warning state. The increment, the mute
// attempt, and the reset happen under a per-key lock so two near-
// simultaneous violations cannot race past the threshold together.

use super::moderation_models::{EscalationOutcome, ModerationConfig, TransportError};
use crate::core::storage::{KeyValueStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

const KEY_PREFIX: &str = "warnings:";

pub struct EscalationEngine<S: KeyValueStore> {
    store: Arc<S>,
    warning_threshold: u32,
    mute_duration: Duration,
    // Serializes transitions per (chat, user)
    locks: DashMap<(i64, u64), Arc<Mutex<()>>>,
}

impl<S: KeyValueStore> EscalationEngine<S> {
    pub fn new(store: Arc<S>, config: &ModerationConfig) -> Self {
        Self {
            store,
            warning_threshold: config.warning_threshold,
            mute_duration: Duration::seconds(config.mute_duration_secs as i64),
            locks: DashMap::new(),
        }
    }

    fn key(chat_id: i64, user_id: u64) -> String {
        format!("{KEY_PREFIX}{chat_id}:{user_id}")
    }

    fn lock_for(&self, chat_id: i64, user_id: u64) -> Arc<Mutex<()>> {
        self.locks
            .entry((chat_id, user_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record one confirmed violation and decide warn vs mute.
    ///
    /// `apply_mute` is invoked with the absolute expiry timestamp when the
    /// threshold is reached. `Ok` or `NotFound` (already restricted) counts
    /// as success and resets the counter; `PermissionDenied` and any other
    /// failure leave the counter in place and yield `MuteDenied`.
    pub async fn record_violation<F, Fut>(
        &self,
        chat_id: i64,
        user_id: u64,
        apply_mute: F,
    ) -> Result<EscalationOutcome, StoreError>
    where
        F: FnOnce(DateTime<Utc>) -> Fut + Send,
        Fut: Future<Output = Result<(), TransportError>> + Send,
    {
        let lock = self.lock_for(chat_id, user_id);
        let _guard = lock.lock().await;

        let key = Self::key(chat_id, user_id);
        let count = self.store.increment(&key).await? as u32;
        self.store
            .set(
                &format!("{key}:last"),
                serde_json::json!(Utc::now().to_rfc3339()),
            )
            .await?;

        if count < self.warning_threshold {
            return Ok(EscalationOutcome::Warned { count });
        }

        let until = Utc::now() + self.mute_duration;
        match apply_mute(until).await {
            Ok(()) | Err(TransportError::NotFound) => {
                // Reset belongs to the same logical transition as the mute.
                self.store.delete(&key).await?;
                self.store.delete(&format!("{key}:last")).await?;
                Ok(EscalationOutcome::Muted { until })
            }
            Err(TransportError::PermissionDenied) => {
                tracing::warn!(chat_id, user_id, "mute denied, keeping warning count");
                Ok(EscalationOutcome::MuteDenied { count })
            }
            Err(e) => {
                tracing::error!(chat_id, user_id, error = %e, "mute failed, keeping warning count");
                Ok(EscalationOutcome::MuteDenied { count })
            }
        }
    }

    /// Current warning count for a user in a chat.
    pub async fn warning_count(&self, chat_id: i64, user_id: u64) -> Result<u32, StoreError> {
        let value = self.store.get(&Self::key(chat_id, user_id)).await?;
        Ok(value.and_then(|v| v.as_u64()).unwrap_or(0) as u32)
    }

    /// Manual reset (admin action).
    pub async fn reset_warnings(&self, chat_id: i64, user_id: u64) -> Result<(), StoreError> {
        let key = Self::key(chat_id, user_id);
        self.store.delete(&key).await?;
        self.store.delete(&format!("{key}:last")).await?;
        Ok(())
    }

    /// Sum of all outstanding warning counters, for the owner stats view.
    pub async fn total_warnings(&self) -> Result<u64, StoreError> {
        let entries = self.store.scan(KEY_PREFIX, 10_000).await?;
        Ok(entries
            .into_iter()
            .filter(|(key, _)| !key.ends_with(":last"))
            .filter_map(|(_, value)| value.as_u64())
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::storage::MemoryKvStore;

    fn engine() -> EscalationEngine<MemoryKvStore> {
        EscalationEngine::new(Arc::new(MemoryKvStore::new()), &ModerationConfig::default())
    }

    async fn no_mute(_until: DateTime<Utc>) -> Result<(), TransportError> {
        panic!("mute should not be attempted below the threshold");
    }

    #[tokio::test]
    async fn warnings_increment_by_one() {
        let eng = engine();

        let first = eng.record_violation(-100, 7, no_mute).await.unwrap();
        assert_eq!(first, EscalationOutcome::Warned { count: 1 });

        let second = eng.record_violation(-100, 7, no_mute).await.unwrap();
        assert_eq!(second, EscalationOutcome::Warned { count: 2 });

        assert_eq!(eng.warning_count(-100, 7).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn warnings_are_scoped_per_chat() {
        let eng = engine();

        eng.record_violation(-100, 7, no_mute).await.unwrap();
        eng.record_violation(-200, 7, no_mute).await.unwrap();

        assert_eq!(eng.warning_count(-100, 7).await.unwrap(), 1);
        assert_eq!(eng.warning_count(-200, 7).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn third_violation_mutes_and_resets() {
        let eng = engine();
        eng.record_violation(-100, 7, no_mute).await.unwrap();
        eng.record_violation(-100, 7, no_mute).await.unwrap();

        let before = Utc::now();
        let outcome = eng
            .record_violation(-100, 7, |_until| async { Ok(()) })
            .await
            .unwrap();

        match outcome {
            EscalationOutcome::Muted { until } => {
                let expected = before + Duration::seconds(5 * 60);
                let delta = (until - expected).num_seconds().abs();
                assert!(delta <= 2, "expiry should be ~5 minutes out");
            }
            other => panic!("expected mute, got {other:?}"),
        }

        // Count reset atomically with the successful mute.
        assert_eq!(eng.warning_count(-100, 7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn denied_mute_keeps_the_counter() {
        let eng = engine();
        eng.record_violation(-100, 7, no_mute).await.unwrap();
        eng.record_violation(-100, 7, no_mute).await.unwrap();

        let outcome = eng
            .record_violation(-100, 7, |_until| async {
                Err(TransportError::PermissionDenied)
            })
            .await
            .unwrap();
        assert_eq!(outcome, EscalationOutcome::MuteDenied { count: 3 });
        assert_eq!(eng.warning_count(-100, 7).await.unwrap(), 3);

        // The next violation retries the mute.
        let retry = eng
            .record_violation(-100, 7, |_until| async { Ok(()) })
            .await
            .unwrap();
        assert!(matches!(retry, EscalationOutcome::Muted { .. }));
        assert_eq!(eng.warning_count(-100, 7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn already_restricted_counts_as_success() {
        let eng = engine();
        eng.record_violation(-100, 7, no_mute).await.unwrap();
        eng.record_violation(-100, 7, no_mute).await.unwrap();

        let outcome = eng
            .record_violation(-100, 7, |_until| async { Err(TransportError::NotFound) })
            .await
            .unwrap();
        assert!(matches!(outcome, EscalationOutcome::Muted { .. }));
        assert_eq!(eng.warning_count(-100, 7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_violations_trigger_exactly_one_mute() {
        let eng = Arc::new(engine());
        eng.record_violation(-100, 7, no_mute).await.unwrap();
        eng.record_violation(-100, 7, no_mute).await.unwrap();

        // Two more violations race; counts 3 and 4 both cross the threshold,
        // but each transition is serialized and each resets on success, so
        // the second sees count 1 and only warns.
        let a = {
            let eng = Arc::clone(&eng);
            tokio::spawn(async move {
                eng.record_violation(-100, 7, |_until| async { Ok(()) })
                    .await
                    .unwrap()
            })
        };
        let b = {
            let eng = Arc::clone(&eng);
            tokio::spawn(async move {
                eng.record_violation(-100, 7, |_until| async { Ok(()) })
                    .await
                    .unwrap()
            })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let mutes = [&a, &b]
            .iter()
            .filter(|o| matches!(o, EscalationOutcome::Muted { .. }))
            .count();
        assert_eq!(mutes, 1, "outcomes were {a:?} and {b:?}");
        assert_eq!(eng.warning_count(-100, 7).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn total_warnings_sums_across_keys() {
        let eng = engine();
        eng.record_violation(-100, 7, no_mute).await.unwrap();
        eng.record_violation(-100, 7, no_mute).await.unwrap();
        eng.record_violation(-200, 8, no_mute).await.unwrap();

        assert_eq!(eng.total_warnings().await.unwrap(), 3);
    }
}
