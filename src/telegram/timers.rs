// Deferred message deletion.
//
// Violation notices and command replies are posted with a TTL; each one gets
// a detached sleep-then-delete task recorded here so shutdown can abort
// whatever is still pending.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::MessageId;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct EphemeralTimers {
    handles: DashMap<(i64, i32), JoinHandle<()>>,
}

impl EphemeralTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete `message_id` in `chat_id` after `ttl`. A message that is
    /// already gone by then is not an error.
    pub fn schedule_delete(self: &Arc<Self>, bot: Bot, chat_id: i64, message_id: i32, ttl: Duration) {
        let timers = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = bot
                .delete_message(ChatId(chat_id), MessageId(message_id))
                .await
            {
                tracing::debug!(chat_id, message_id, error = %e, "scheduled deletion failed");
            }
            timers.handles.remove(&(chat_id, message_id));
        });
        if let Some(previous) = self.handles.insert((chat_id, message_id), handle) {
            previous.abort();
        }
    }

    /// Abort every outstanding deletion task.
    pub fn shutdown(&self) {
        for entry in self.handles.iter() {
            entry.value().abort();
        }
        self.handles.clear();
    }
}
