// Telegram implementations of the moderation ports.
//
// `TelegramTransport` maps the pipeline's chat operations onto Bot API
// calls; `TelegramAuditSink` posts audit entries to the operator log chat.
// Every outbound request is wrapped in a timeout so a stalled API call can
// never wedge the pipeline.

use crate::core::moderation::moderation_models::{
    AuditEvent, AuditKind, MemberRank, TransportError,
};
use crate::core::moderation::pipeline::{AuditSink, ChatTransport};
use crate::telegram::timers::EphemeralTimers;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{
    ChatPermissions, InlineKeyboardButton, InlineKeyboardMarkup, MessageId,
};
use teloxide::ApiError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Translate the open-ended Bot API error set into the closed taxonomy the
/// pipeline branches on. The string fallback covers API errors teloxide
/// only knows as `Unknown`.
fn map_request_error(e: teloxide::RequestError) -> TransportError {
    if let teloxide::RequestError::Api(ref api) = e {
        match api {
            ApiError::MessageToDeleteNotFound
            | ApiError::MessageIdInvalid
            | ApiError::ChatNotFound
            | ApiError::UserNotFound => return TransportError::NotFound,
            ApiError::MessageCantBeDeleted | ApiError::NotEnoughRightsToRestrict => {
                return TransportError::PermissionDenied;
            }
            _ => {}
        }
    }
    let text = e.to_string().to_lowercase();
    if text.contains("not found") {
        TransportError::NotFound
    } else if text.contains("rights") || text.contains("forbidden") || text.contains("kicked") {
        TransportError::PermissionDenied
    } else {
        TransportError::Other(e.to_string())
    }
}

async fn bounded<T, F>(request: F) -> Result<T, TransportError>
where
    F: IntoFuture<Output = Result<T, teloxide::RequestError>>,
{
    match tokio::time::timeout(REQUEST_TIMEOUT, request).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(map_request_error(e)),
        Err(_) => Err(TransportError::Other("request timed out".to_string())),
    }
}

pub struct TelegramTransport {
    bot: Bot,
    timers: Arc<EphemeralTimers>,
}

impl TelegramTransport {
    pub fn new(bot: Bot, timers: Arc<EphemeralTimers>) -> Self {
        Self { bot, timers }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        bounded(self.bot.delete_message(ChatId(chat_id), MessageId(message_id))).await?;
        Ok(())
    }

    async fn restrict_member(
        &self,
        chat_id: i64,
        user_id: u64,
        until: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        bounded(
            self.bot
                .restrict_chat_member(ChatId(chat_id), UserId(user_id), ChatPermissions::empty())
                .until_date(until),
        )
        .await?;
        Ok(())
    }

    async fn member_rank(&self, chat_id: i64, user_id: u64) -> Result<MemberRank, TransportError> {
        let member = bounded(self.bot.get_chat_member(ChatId(chat_id), UserId(user_id))).await?;
        let kind = &member.kind;
        let rank = if kind.is_owner() {
            MemberRank::Creator
        } else if kind.is_administrator() {
            MemberRank::Administrator
        } else if kind.is_restricted() {
            MemberRank::Restricted
        } else if kind.is_left() {
            MemberRank::Left
        } else if kind.is_banned() {
            MemberRank::Banned
        } else {
            MemberRank::Member
        };
        Ok(rank)
    }

    async fn user_bio(&self, user_id: u64) -> Result<Option<String>, TransportError> {
        // A user's bio only comes back from getChat on the private chat
        // with that user.
        let chat = bounded(self.bot.get_chat(ChatId(user_id as i64))).await?;
        Ok(chat.bio().map(|b| b.to_string()))
    }

    async fn send_ephemeral(
        &self,
        chat_id: i64,
        text: &str,
        ttl: Duration,
    ) -> Result<(), TransportError> {
        let sent = bounded(self.bot.send_message(ChatId(chat_id), text)).await?;
        self.timers
            .schedule_delete(self.bot.clone(), chat_id, sent.id.0, ttl);
        Ok(())
    }

    async fn send_mute_notice(
        &self,
        chat_id: i64,
        muted_user: u64,
        text: &str,
        ttl: Duration,
    ) -> Result<(), TransportError> {
        let keyboard = InlineKeyboardMarkup::new([[InlineKeyboardButton::callback(
            "🔓 Unmute",
            format!("unmute:{chat_id}:{muted_user}"),
        )]]);
        let sent = bounded(
            self.bot
                .send_message(ChatId(chat_id), text)
                .reply_markup(keyboard),
        )
        .await?;
        self.timers
            .schedule_delete(self.bot.clone(), chat_id, sent.id.0, ttl);
        Ok(())
    }
}

/// Posts audit entries to the configured log chat. Delivery failures are
/// logged locally and swallowed: the log channel must never affect
/// moderation.
pub struct TelegramAuditSink {
    bot: Bot,
    log_chat_id: i64,
}

impl TelegramAuditSink {
    pub fn new(bot: Bot, log_chat_id: i64) -> Self {
        Self { bot, log_chat_id }
    }

    fn format_event(event: &AuditEvent) -> String {
        let chat = match &event.chat_title {
            Some(title) => format!("{title} ({})", event.chat_id),
            None => event.chat_id.to_string(),
        };
        let header = match event.kind {
            AuditKind::Violation => {
                let label = event
                    .category
                    .map(|c| c.audit_label())
                    .unwrap_or("violation");
                format!("🚫 Message removed ({label})")
            }
            AuditKind::Mute => "🔇 User muted".to_string(),
            AuditKind::Error => format!(
                "❌ Error: {}",
                event.detail.as_deref().unwrap_or("unknown")
            ),
        };
        format!(
            "{header}\nChat: {chat}\nUser: @{} ({})",
            event.sender_name, event.user_id
        )
    }
}

#[async_trait]
impl AuditSink for TelegramAuditSink {
    async fn log_event(&self, event: AuditEvent) {
        let text = Self::format_event(&event);
        let result = tokio::time::timeout(
            REQUEST_TIMEOUT,
            self.bot.send_message(ChatId(self.log_chat_id), text),
        )
        .await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!(log_chat_id = self.log_chat_id, error = %e, "audit entry not delivered");
            }
            Err(_) => {
                tracing::warn!(log_chat_id = self.log_chat_id, "audit entry timed out");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::ViolationCategory;

    #[test]
    fn violation_entry_carries_chat_and_user() {
        let event = AuditEvent {
            chat_id: -100,
            chat_title: Some("Test Group".to_string()),
            user_id: 7,
            sender_name: "offender".to_string(),
            category: Some(ViolationCategory::Links),
            kind: AuditKind::Violation,
            detail: None,
        };

        let text = TelegramAuditSink::format_event(&event);
        assert!(text.contains("Message removed (links)"));
        assert!(text.contains("Test Group (-100)"));
        assert!(text.contains("@offender (7)"));
    }

    #[test]
    fn error_entry_carries_detail() {
        let event = AuditEvent {
            chat_id: -100,
            chat_title: None,
            user_id: 7,
            sender_name: "offender".to_string(),
            category: None,
            kind: AuditKind::Error,
            detail: Some("storage error: backend gone".to_string()),
        };

        let text = TelegramAuditSink::format_event(&event);
        assert!(text.starts_with("❌ Error: storage error"));
        assert!(text.contains("Chat: -100"));
    }
}
