// Slash command handling.
//
// Group commands are admin-gated via getChatMember; owner commands check
// the configured owner id and stay silent for anyone else. Replies in
// groups are ephemeral: both the reply and the invoking command message
// are scheduled for deletion.

use crate::core::moderation::moderation_models::{PendingBroadcast, PolicyField};
use crate::telegram::events::SharedState;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

const HELP_TEXT: &str = "\
🛡 Anti-link moderation bot

Group admin commands:
/links on|off - link filtering
/username on|off - @mention filtering
/botlink on|off - bot mention filtering
/biolinks on|off - profile bio link filtering
/approveme - exempt yourself from filtering
/whitelistadd - whitelist a user (reply or user id)
/whitelistremove - remove a user from the whitelist
/whitelistshow - list whitelisted users

Add me to a group as admin with delete and restrict permissions.";

/// Commands this bot answers to. A slash message naming anything else is
/// ordinary text: it falls through to moderation like any other message.
const KNOWN_COMMANDS: &[&str] = &[
    "start",
    "help",
    "approveme",
    "links",
    "username",
    "botlink",
    "biolinks",
    "whitelistadd",
    "whitelistremove",
    "whitelistshow",
    "whitelistinfo",
    "botstats",
    "listgroups",
    "groupinfo",
    "broadcast",
    "maintenance",
];

/// Split a slash message into (command, args), or `None` when the command
/// is not one of ours.
pub fn parse_command(text: &str) -> Option<(&str, &str)> {
    let without_slash = text.strip_prefix('/')?;
    let (full_command, args) = match without_slash.split_once(' ') {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (without_slash, ""),
    };
    // Strip "@bot_name" suffixes like "/links@some_bot on".
    let command = full_command.split('@').next().unwrap_or(full_command);
    KNOWN_COMMANDS.contains(&command).then_some((command, args))
}

pub async fn dispatch_command(
    bot: &Bot,
    msg: &Message,
    state: &SharedState,
    command: &str,
    args: &str,
) -> ResponseResult<()> {
    match command {
        "start" | "help" => reply(bot, msg, state, HELP_TEXT).await,
        "approveme" => handle_approveme(bot, msg, state).await,
        "links" => handle_toggle(bot, msg, state, command, PolicyField::Links, args).await,
        "username" => handle_toggle(bot, msg, state, command, PolicyField::Usernames, args).await,
        "botlink" => {
            handle_toggle(bot, msg, state, command, PolicyField::BotUsernames, args).await
        }
        "biolinks" => handle_toggle(bot, msg, state, command, PolicyField::BioLinks, args).await,
        "whitelistadd" => handle_whitelist_add(bot, msg, state, args).await,
        "whitelistremove" => handle_whitelist_remove(bot, msg, state, args).await,
        "whitelistshow" => handle_whitelist_show(bot, msg, state).await,
        "whitelistinfo" => handle_whitelist_info(bot, msg, state).await,
        "botstats" => handle_botstats(bot, msg, state).await,
        "listgroups" => handle_listgroups(bot, msg, state).await,
        "groupinfo" => handle_groupinfo(bot, msg, state, args).await,
        "broadcast" => handle_broadcast(bot, msg, state).await,
        "maintenance" => handle_maintenance(bot, msg, state, args).await,
        // `parse_command` only routes names from KNOWN_COMMANDS.
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Gates and small helpers
// ---------------------------------------------------------------------------

fn sender_id(msg: &Message) -> Option<u64> {
    msg.from.as_ref().map(|u| u.id.0)
}

fn in_group(msg: &Message) -> bool {
    msg.chat.is_group() || msg.chat.is_supergroup()
}

fn issuer_is_owner(msg: &Message, state: &SharedState) -> bool {
    sender_id(msg) == Some(state.owner_id)
}

async fn issuer_is_admin(bot: &Bot, msg: &Message, state: &SharedState) -> bool {
    let Some(user_id) = sender_id(msg) else {
        return false;
    };
    if user_id == state.owner_id {
        return true;
    }
    match bot.get_chat_member(msg.chat.id, UserId(user_id)).await {
        Ok(member) => member.is_privileged(),
        Err(e) => {
            tracing::debug!(chat_id = msg.chat.id.0, user_id, error = %e, "admin check failed");
            false
        }
    }
}

/// Reply to a command. In groups both the reply and the command itself are
/// scheduled for deletion; in private chats the reply stays.
async fn reply(bot: &Bot, msg: &Message, state: &SharedState, text: &str) -> ResponseResult<()> {
    let sent = bot.send_message(msg.chat.id, text).await?;
    if in_group(msg) {
        let ttl = Duration::from_secs(state.config.command_notice_ttl_secs);
        state
            .timers
            .schedule_delete(bot.clone(), msg.chat.id.0, sent.id.0, ttl);
        state
            .timers
            .schedule_delete(bot.clone(), msg.chat.id.0, msg.id.0, ttl);
    }
    Ok(())
}

/// Resolve a command's target: the replied-to message's sender, or a
/// numeric user id argument.
fn target_user(msg: &Message, args: &str) -> Option<(u64, String, Option<String>)> {
    if let Some(source) = msg.reply_to_message() {
        if let Some(user) = source.from.as_ref() {
            return Some((user.id.0, user.full_name(), user.username.clone()));
        }
    }
    args.parse::<u64>()
        .ok()
        .map(|id| (id, String::new(), None))
}

// ---------------------------------------------------------------------------
// Group admin commands
// ---------------------------------------------------------------------------

async fn handle_approveme(bot: &Bot, msg: &Message, state: &SharedState) -> ResponseResult<()> {
    if !in_group(msg) {
        return reply(bot, msg, state, "This command only works in groups.").await;
    }
    if !issuer_is_admin(bot, msg, state).await {
        return reply(bot, msg, state, "❌ Only group admins can approve themselves.").await;
    }
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };

    let name = user
        .username
        .clone()
        .unwrap_or_else(|| user.first_name.clone());
    match state.exemptions.approve(user.id.0).await {
        Ok(()) => {
            reply(
                bot,
                msg,
                state,
                &format!("✅ @{name}, you are approved. Your messages will not be filtered."),
            )
            .await
        }
        Err(e) => {
            tracing::error!(user_id = user.id.0, error = %e, "approval write failed");
            reply(bot, msg, state, "❌ Could not save the approval, try again later.").await
        }
    }
}

async fn handle_toggle(
    bot: &Bot,
    msg: &Message,
    state: &SharedState,
    command: &str,
    field: PolicyField,
    args: &str,
) -> ResponseResult<()> {
    if !in_group(msg) {
        return reply(bot, msg, state, "This command only works in groups.").await;
    }
    if !issuer_is_admin(bot, msg, state).await {
        return reply(bot, msg, state, "❌ Only group admins can change filters.").await;
    }
    let enabled = match args {
        "on" => true,
        "off" => false,
        _ => {
            return reply(bot, msg, state, &format!("Usage: /{command} on|off")).await;
        }
    };

    match state.policies.set(msg.chat.id.0, field, enabled).await {
        Ok(()) => {
            let status = if enabled { "enabled" } else { "disabled" };
            reply(
                bot,
                msg,
                state,
                &format!("✅ {} filter {status} for this group.", field.label()),
            )
            .await
        }
        Err(e) => {
            tracing::error!(chat_id = msg.chat.id.0, error = %e, "policy write failed");
            reply(bot, msg, state, "❌ Could not update the setting, try again later.").await
        }
    }
}

async fn handle_whitelist_add(
    bot: &Bot,
    msg: &Message,
    state: &SharedState,
    args: &str,
) -> ResponseResult<()> {
    if !in_group(msg) {
        return reply(bot, msg, state, "This command only works in groups.").await;
    }
    if !issuer_is_admin(bot, msg, state).await {
        return reply(bot, msg, state, "❌ Only group admins can manage the whitelist.").await;
    }
    let Some((user_id, full_name, username)) = target_user(msg, args) else {
        return reply(
            bot,
            msg,
            state,
            "Reply to the user's message or pass a numeric user id.",
        )
        .await;
    };

    match state
        .exemptions
        .add_whitelist(user_id, &full_name, username.as_deref())
        .await
    {
        Ok(()) => reply(bot, msg, state, &format!("✅ User {user_id} whitelisted.")).await,
        Err(e) => {
            tracing::error!(user_id, error = %e, "whitelist write failed");
            reply(bot, msg, state, "❌ Could not update the whitelist, try again later.").await
        }
    }
}

async fn handle_whitelist_remove(
    bot: &Bot,
    msg: &Message,
    state: &SharedState,
    args: &str,
) -> ResponseResult<()> {
    if !in_group(msg) {
        return reply(bot, msg, state, "This command only works in groups.").await;
    }
    if !issuer_is_admin(bot, msg, state).await {
        return reply(bot, msg, state, "❌ Only group admins can manage the whitelist.").await;
    }
    let Some((user_id, _, _)) = target_user(msg, args) else {
        return reply(
            bot,
            msg,
            state,
            "Reply to the user's message or pass a numeric user id.",
        )
        .await;
    };

    match state.exemptions.remove_whitelist(user_id).await {
        Ok(()) => {
            reply(
                bot,
                msg,
                state,
                &format!("✅ User {user_id} removed from the whitelist."),
            )
            .await
        }
        Err(e) => {
            tracing::error!(user_id, error = %e, "whitelist delete failed");
            reply(bot, msg, state, "❌ Could not update the whitelist, try again later.").await
        }
    }
}

async fn handle_whitelist_show(bot: &Bot, msg: &Message, state: &SharedState) -> ResponseResult<()> {
    if !in_group(msg) {
        return reply(bot, msg, state, "This command only works in groups.").await;
    }
    if !issuer_is_admin(bot, msg, state).await {
        return reply(bot, msg, state, "❌ Only group admins can view the whitelist.").await;
    }

    let entries = match state.exemptions.whitelist_entries(50).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, "whitelist listing failed");
            return reply(bot, msg, state, "❌ Could not load the whitelist, try again later.")
                .await;
        }
    };
    if entries.is_empty() {
        return reply(bot, msg, state, "The whitelist is empty.").await;
    }

    let mut lines = vec![format!("📋 Whitelisted users ({}):", entries.len())];
    for entry in &entries {
        let name = if entry.full_name.is_empty() {
            "(no name)".to_string()
        } else {
            entry.full_name.clone()
        };
        lines.push(match &entry.username {
            Some(username) => format!("• {name} @{username} ({})", entry.user_id),
            None => format!("• {name} ({})", entry.user_id),
        });
    }
    reply(bot, msg, state, &lines.join("\n")).await
}

// ---------------------------------------------------------------------------
// Owner commands
// ---------------------------------------------------------------------------

/// Owner view of the whitelist, usable outside any group.
async fn handle_whitelist_info(bot: &Bot, msg: &Message, state: &SharedState) -> ResponseResult<()> {
    if !issuer_is_owner(msg, state) {
        return Ok(());
    }

    let entries = match state.exemptions.whitelist_entries(20).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, "whitelist listing failed");
            return reply(bot, msg, state, "❌ Could not load the whitelist, try again later.")
                .await;
        }
    };
    if entries.is_empty() {
        return reply(bot, msg, state, "❌ No whitelisted users.").await;
    }

    let mut lines = vec![format!("👤 Whitelisted users (first {}):", entries.len())];
    for entry in &entries {
        let name = if entry.full_name.is_empty() {
            "Unknown".to_string()
        } else {
            entry.full_name.clone()
        };
        let username = match &entry.username {
            Some(username) => format!("@{username}"),
            None => "No username".to_string(),
        };
        lines.push(format!("• {name} ({username}) - ID: {}", entry.user_id));
    }
    reply(bot, msg, state, &lines.join("\n")).await
}

async fn handle_botstats(bot: &Bot, msg: &Message, state: &SharedState) -> ResponseResult<()> {
    if !issuer_is_owner(msg, state) {
        return Ok(());
    }

    let groups = state.policies.chat_count().await.unwrap_or(0);
    let whitelisted = state.exemptions.whitelist_count().await.unwrap_or(0);
    let approved = state.exemptions.approved_count().await.unwrap_or(0);
    let warnings = state.escalation.total_warnings().await.unwrap_or(0);

    reply(
        bot,
        msg,
        state,
        &format!(
            "📊 Bot stats\nGroups: {groups}\nWhitelisted users: {whitelisted}\nApproved users: {approved}\nActive warnings: {warnings}"
        ),
    )
    .await
}

async fn handle_listgroups(bot: &Bot, msg: &Message, state: &SharedState) -> ResponseResult<()> {
    if !issuer_is_owner(msg, state) {
        return Ok(());
    }

    let chat_ids = match state.policies.chat_ids(100).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(error = %e, "group listing failed");
            return reply(bot, msg, state, "❌ Could not list groups.").await;
        }
    };
    if chat_ids.is_empty() {
        return reply(bot, msg, state, "No groups on record.").await;
    }

    let mut lines = vec![format!("👥 Known groups ({}):", chat_ids.len())];
    for chat_id in chat_ids {
        // Title lookup is best-effort; the bot may have been removed.
        let title = bot
            .get_chat(ChatId(chat_id))
            .await
            .ok()
            .and_then(|chat| chat.title().map(|t| t.to_string()));
        lines.push(match title {
            Some(title) => format!("• {title} ({chat_id})"),
            None => format!("• {chat_id}"),
        });
    }
    reply(bot, msg, state, &lines.join("\n")).await
}

async fn handle_groupinfo(
    bot: &Bot,
    msg: &Message,
    state: &SharedState,
    args: &str,
) -> ResponseResult<()> {
    if !issuer_is_owner(msg, state) {
        return Ok(());
    }
    let Ok(chat_id) = args.parse::<i64>() else {
        return reply(bot, msg, state, "Usage: /groupinfo <chat_id>").await;
    };

    let policy = state.policies.get(chat_id).await;
    let title = bot
        .get_chat(ChatId(chat_id))
        .await
        .ok()
        .and_then(|chat| chat.title().map(|t| t.to_string()))
        .unwrap_or_else(|| chat_id.to_string());

    fn flag(enabled: bool) -> &'static str {
        if enabled {
            "on"
        } else {
            "off"
        }
    }
    reply(
        bot,
        msg,
        state,
        &format!(
            "ℹ️ {title}\nLinks: {}\nBot usernames: {}\nUsernames: {}\nBio links: {}",
            flag(policy.links),
            flag(policy.bot_usernames),
            flag(policy.usernames),
            flag(policy.bio_links),
        ),
    )
    .await
}

async fn handle_broadcast(bot: &Bot, msg: &Message, state: &SharedState) -> ResponseResult<()> {
    if !issuer_is_owner(msg, state) {
        return Ok(());
    }
    let Some(source) = msg.reply_to_message() else {
        return reply(
            bot,
            msg,
            state,
            "Reply to the message you want to broadcast, then send /broadcast.",
        )
        .await;
    };

    let pending = PendingBroadcast {
        chat_id: msg.chat.id.0,
        message_id: source.id.0,
    };
    if let Err(e) = state.meta.set_pending_broadcast(pending).await {
        tracing::error!(error = %e, "failed to stage broadcast");
        return reply(bot, msg, state, "❌ Could not stage the broadcast.").await;
    }

    let groups = state.policies.chat_count().await.unwrap_or(0);
    let keyboard = InlineKeyboardMarkup::new([[
        InlineKeyboardButton::callback("✅ Send", "broadcast:confirm"),
        InlineKeyboardButton::callback("❌ Cancel", "broadcast:cancel"),
    ]]);
    bot.send_message(
        msg.chat.id,
        format!("Broadcast this message to {groups} groups?"),
    )
    .reply_markup(keyboard)
    .await?;
    Ok(())
}

async fn handle_maintenance(
    bot: &Bot,
    msg: &Message,
    state: &SharedState,
    args: &str,
) -> ResponseResult<()> {
    if !issuer_is_owner(msg, state) {
        return Ok(());
    }
    let active = match args {
        "on" => true,
        "off" => false,
        _ => return reply(bot, msg, state, "Usage: /maintenance on|off").await,
    };

    match state.meta.set_maintenance(active).await {
        Ok(()) => {
            let text = if active {
                "🛠 Maintenance mode on. Messages are ignored until it is turned off."
            } else {
                "✅ Maintenance mode off."
            };
            reply(bot, msg, state, text).await
        }
        Err(e) => {
            tracing::error!(error = %e, "maintenance flag write failed");
            reply(bot, msg, state, "❌ Could not change maintenance mode.").await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_commands_are_routed_with_args() {
        assert_eq!(parse_command("/links on"), Some(("links", "on")));
        assert_eq!(parse_command("/help"), Some(("help", "")));
        assert_eq!(parse_command("/groupinfo -100"), Some(("groupinfo", "-100")));
    }

    #[test]
    fn bot_mention_suffix_is_stripped() {
        assert_eq!(parse_command("/links@some_bot off"), Some(("links", "off")));
        assert_eq!(parse_command("/help@some_bot"), Some(("help", "")));
    }

    #[test]
    fn unknown_slash_text_is_not_a_command() {
        // A slash prefix must not shield content from moderation.
        assert_eq!(parse_command("/x t.me/spam"), None);
        assert_eq!(parse_command("/notacommand"), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("links on"), None);
    }
}
