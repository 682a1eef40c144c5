// Telegram event loop.
//
// Wires the teloxide dispatcher: message updates feed the moderation
// pipeline (or the command dispatcher), callback queries handle the unmute
// button and broadcast confirmation.

use crate::core::moderation::bot_meta::BotMeta;
use crate::core::moderation::escalation::EscalationEngine;
use crate::core::moderation::exemptions::ExemptionRegistry;
use crate::core::moderation::moderation_models::{
    AuditEvent, AuditKind, ChatKind, InboundMessage, ModerationConfig,
};
use crate::core::moderation::pipeline::{AuditSink, ModerationPipeline};
use crate::core::moderation::policy_store::PolicyStore;
use crate::infra::storage::SqliteKvStore;
use crate::telegram::commands;
use crate::telegram::timers::EphemeralTimers;
use crate::telegram::transport::TelegramAuditSink;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatPermissions, MessageId};

/// Shared dependencies injected into teloxide handlers via `dptree::deps!`.
#[derive(Clone)]
pub struct SharedState {
    pub config: ModerationConfig,
    pub pipeline: Arc<ModerationPipeline<SqliteKvStore>>,
    pub policies: PolicyStore<SqliteKvStore>,
    pub exemptions: ExemptionRegistry<SqliteKvStore>,
    pub escalation: Arc<EscalationEngine<SqliteKvStore>>,
    pub meta: BotMeta<SqliteKvStore>,
    pub timers: Arc<EphemeralTimers>,
    pub audit: Arc<TelegramAuditSink>,
    pub owner_id: u64,
}

/// Run the bot until Ctrl+C.
pub async fn run_bot(bot: Bot, state: SharedState) {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    tracing::info!("telegram dispatcher starting");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn chat_kind(msg: &Message) -> ChatKind {
    if msg.chat.is_private() {
        ChatKind::Private
    } else if msg.chat.is_group() {
        ChatKind::Group
    } else if msg.chat.is_supergroup() {
        ChatKind::Supergroup
    } else {
        ChatKind::Channel
    }
}

async fn handle_message(bot: Bot, msg: Message, state: SharedState) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    // Media without text or caption carries nothing to classify.
    let Some(text) = msg.text().or_else(|| msg.caption()) else {
        return Ok(());
    };
    let text = text.to_owned();

    // A recognized command is claimed by its handler. Anything else,
    // slash-prefixed or not, goes through moderation.
    if let Some((command, args)) = commands::parse_command(&text) {
        return commands::dispatch_command(&bot, &msg, &state, command, args).await;
    }

    let inbound = InboundMessage {
        chat_id: msg.chat.id.0,
        chat_title: msg.chat.title().map(|t| t.to_string()),
        chat_kind: chat_kind(&msg),
        message_id: msg.id.0,
        user_id: user.id.0,
        sender_name: user
            .username
            .clone()
            .unwrap_or_else(|| user.first_name.clone()),
        text,
    };

    // The pipeline handles its own degradations; an error here means the
    // store write path itself failed. Log it and tell the operator once.
    if let Err(e) = state.pipeline.process(&inbound).await {
        tracing::error!(chat_id = inbound.chat_id, user_id = inbound.user_id, error = %e, "moderation pipeline failed");
        state
            .audit
            .log_event(AuditEvent {
                chat_id: inbound.chat_id,
                chat_title: inbound.chat_title.clone(),
                user_id: inbound.user_id,
                sender_name: inbound.sender_name.clone(),
                category: None,
                kind: AuditKind::Error,
                detail: Some(e.to_string()),
            })
            .await;
    }
    Ok(())
}

async fn handle_callback(bot: Bot, query: CallbackQuery, state: SharedState) -> ResponseResult<()> {
    let Some(data) = query.data.clone() else {
        bot.answer_callback_query(&query.id).await?;
        return Ok(());
    };

    let answer = if let Some(rest) = data.strip_prefix("unmute:") {
        handle_unmute(&bot, &query, &state, rest).await
    } else if data == "broadcast:confirm" {
        handle_broadcast_confirm(&bot, &query, &state).await
    } else if data == "broadcast:cancel" {
        handle_broadcast_cancel(&query, &state).await
    } else {
        "Unknown action".to_string()
    };

    bot.answer_callback_query(&query.id).text(answer).await?;
    Ok(())
}

/// Callback data is "unmute:{chat_id}:{user_id}". Only chat admins (or the
/// owner) may press it; a successful unmute also clears the warning slate.
async fn handle_unmute(bot: &Bot, query: &CallbackQuery, state: &SharedState, rest: &str) -> String {
    let Some((chat_part, user_part)) = rest.split_once(':') else {
        return "Malformed action".to_string();
    };
    let (Ok(chat_id), Ok(user_id)) = (chat_part.parse::<i64>(), user_part.parse::<u64>()) else {
        return "Malformed action".to_string();
    };

    let presser = query.from.id.0;
    let is_admin = presser == state.owner_id
        || match bot.get_chat_member(ChatId(chat_id), UserId(presser)).await {
            Ok(member) => member.is_privileged(),
            Err(e) => {
                tracing::debug!(chat_id, presser, error = %e, "admin check for unmute failed");
                false
            }
        };
    if !is_admin {
        return "Only admins can unmute.".to_string();
    }

    match bot
        .restrict_chat_member(ChatId(chat_id), UserId(user_id), ChatPermissions::all())
        .await
    {
        Ok(_) => {
            if let Err(e) = state.escalation.reset_warnings(chat_id, user_id).await {
                tracing::warn!(chat_id, user_id, error = %e, "warning reset after unmute failed");
            }
            "User unmuted.".to_string()
        }
        Err(e) => {
            tracing::warn!(chat_id, user_id, error = %e, "unmute failed");
            "Could not unmute the user.".to_string()
        }
    }
}

async fn handle_broadcast_confirm(bot: &Bot, query: &CallbackQuery, state: &SharedState) -> String {
    if query.from.id.0 != state.owner_id {
        return "Only the owner can do that.".to_string();
    }

    let pending = match state.meta.pending_broadcast().await {
        Ok(Some(pending)) => pending,
        Ok(None) => return "No broadcast is pending.".to_string(),
        Err(e) => {
            tracing::error!(error = %e, "pending broadcast read failed");
            return "Could not load the pending broadcast.".to_string();
        }
    };
    let chat_ids = match state.policies.chat_ids(1000).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(error = %e, "group listing for broadcast failed");
            return "Could not list groups.".to_string();
        }
    };

    if let Err(e) = state.meta.clear_pending_broadcast().await {
        tracing::warn!(error = %e, "failed to clear broadcast slot");
    }

    // The throttled fan-out can run for minutes; the callback has to be
    // answered within seconds. Detach the send loop and report back to the
    // owner's chat when it finishes.
    let total = chat_ids.len();
    let bot = bot.clone();
    tokio::spawn(async move {
        let mut sent = 0u32;
        let mut failed = 0u32;
        for chat_id in chat_ids {
            match bot
                .copy_message(
                    ChatId(chat_id),
                    ChatId(pending.chat_id),
                    MessageId(pending.message_id),
                )
                .await
            {
                Ok(_) => sent += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(chat_id, error = %e, "broadcast copy failed");
                }
            }
            // Throttle to stay under the Bot API send rate.
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
        if let Err(e) = bot
            .send_message(
                ChatId(pending.chat_id),
                format!("📣 Broadcast done: {sent} sent, {failed} failed."),
            )
            .await
        {
            tracing::warn!(error = %e, "broadcast summary not delivered");
        }
    });
    format!("Broadcast to {total} groups started.")
}

async fn handle_broadcast_cancel(query: &CallbackQuery, state: &SharedState) -> String {
    if query.from.id.0 != state.owner_id {
        return "Only the owner can do that.".to_string();
    }
    if let Err(e) = state.meta.clear_pending_broadcast().await {
        tracing::error!(error = %e, "failed to clear broadcast slot");
        return "Could not cancel the broadcast.".to_string();
    }
    "Broadcast cancelled.".to_string()
}
