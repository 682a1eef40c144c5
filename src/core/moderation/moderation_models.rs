// Moderation domain models - data structures for the anti-link system.
//
// These are pure domain types with no Telegram dependencies.
// The telegram layer converts these to platform-specific actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the fixed content categories a message can be flagged for.
///
/// The ordering here is significant: categories are evaluated top to bottom
/// and the first match wins. `BotUsername` must come before `Username`
/// because every bot mention is also a plain mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationCategory {
    /// Message text contains a URL or a known social/messaging domain
    Links,
    /// Message text contains an @-mention ending in "bot"
    BotUsername,
    /// Message text contains any @-mention
    Username,
    /// The sender's profile bio contains any of the above
    BioLinks,
}

impl ViolationCategory {
    /// Short label used in audit log entries.
    pub fn audit_label(&self) -> &'static str {
        match self {
            ViolationCategory::Links => "links",
            ViolationCategory::BotUsername => "bot username",
            ViolationCategory::Username => "username",
            ViolationCategory::BioLinks => "bio links",
        }
    }

    /// User-facing notice text for a removed message.
    pub fn notice_text(&self, sender: &str) -> String {
        match self {
            ViolationCategory::Links => format!(
                "@{sender} Your message was hidden. Links are not allowed in this group, please remove them."
            ),
            ViolationCategory::BotUsername => format!(
                "@{sender} Your message was hidden. Bot usernames are not allowed in this group, please remove them."
            ),
            ViolationCategory::Username => format!(
                "@{sender} Your message was hidden. Usernames are not allowed in this group, please remove them."
            ),
            ViolationCategory::BioLinks => format!(
                "@{sender} Your message was hidden. Bio links are not allowed in this group, please remove them."
            ),
        }
    }
}

impl std::fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.audit_label())
    }
}

/// Per-chat detection flags. Every category defaults to enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPolicy {
    pub links: bool,
    pub bot_usernames: bool,
    pub usernames: bool,
    pub bio_links: bool,
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self {
            links: true,
            bot_usernames: true,
            usernames: true,
            bio_links: true,
        }
    }
}

/// Which `ChatPolicy` flag a toggle command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyField {
    Links,
    BotUsernames,
    Usernames,
    BioLinks,
}

impl PolicyField {
    pub fn label(&self) -> &'static str {
        match self {
            PolicyField::Links => "Links",
            PolicyField::BotUsernames => "Bot usernames",
            PolicyField::Usernames => "Usernames",
            PolicyField::BioLinks => "Bio links",
        }
    }
}

/// Tunables for the moderation core. Supplied by the bootstrap, consumed here.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Violations before a mute is applied
    pub warning_threshold: u32,
    /// Mute duration in seconds
    pub mute_duration_secs: u64,
    /// How long violation notices stay visible before auto-deletion
    pub notice_ttl_secs: u64,
    /// How long command replies stay visible
    pub command_notice_ttl_secs: u64,
    /// Domain literals treated as links even without an http(s) scheme
    pub link_domains: Vec<String>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 3,
            mute_duration_secs: 5 * 60,
            notice_ttl_secs: 5,
            command_notice_ttl_secs: 10,
            link_domains: [
                "t.me/",
                "telegram.me",
                "wa.me",
                "whatsapp.com",
                "instagram.com",
                "youtube.com",
                "facebook.com",
                "twitter.com",
                "linkedin.com",
                "snapchat.com",
                "pinterest.com",
                "reddit.com",
                "tiktok.com",
                "discord.gg",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// What kind of conversation a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    /// Moderation only applies to group-style chats.
    pub fn is_group(&self) -> bool {
        matches!(self, ChatKind::Group | ChatKind::Supergroup)
    }
}

/// A chat member's rank as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRank {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberRank {
    pub fn is_admin(&self) -> bool {
        matches!(self, MemberRank::Creator | MemberRank::Administrator)
    }
}

/// A message event as seen by the moderation pipeline.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub chat_title: Option<String>,
    pub chat_kind: ChatKind,
    pub message_id: i32,
    pub user_id: u64,
    /// Username if set, otherwise first name - used in notices and audit entries
    pub sender_name: String,
    /// Text or caption, whichever the message carried
    pub text: String,
}

/// Why the pipeline took no action on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Maintenance mode is active and the sender is not the owner
    Maintenance,
    /// Direct messages and channels are never moderated
    NotAGroup,
    /// Sender is whitelisted or approved
    Exempt,
    /// No category matched
    Clean,
    /// The offending message could not be deleted; later steps were aborted
    DeleteFailed,
}

/// Final result of running one message through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationOutcome {
    Skipped(SkipReason),
    /// An admin's message was removed with a courtesy notice; no escalation
    AdminNotified { category: ViolationCategory },
    Warned {
        category: ViolationCategory,
        count: u32,
    },
    Muted {
        category: ViolationCategory,
        until: DateTime<Utc>,
    },
    /// Mute was due but the restriction could not be applied; counter kept
    MuteDenied {
        category: ViolationCategory,
        count: u32,
    },
}

/// Outcome of recording one confirmed violation with the escalation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    Warned { count: u32 },
    Muted { until: DateTime<Utc> },
    /// Threshold was reached but the mute could not be applied
    MuteDenied { count: u32 },
}

/// Errors surfaced by the chat transport boundary.
///
/// The closed taxonomy matters: `NotFound` on deletion is recovered locally,
/// `PermissionDenied` is reported to the chat, anything else is `Other`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not found")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("transport error: {0}")]
    Other(String),
}

/// A whitelisted user as recorded for the admin listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub user_id: u64,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Single-slot reference to a message awaiting broadcast confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBroadcast {
    pub chat_id: i64,
    pub message_id: i32,
}

/// What kind of audit entry is being emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Violation,
    Mute,
    Error,
}

/// An entry for the operator-facing log channel.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub chat_id: i64,
    pub chat_title: Option<String>,
    pub user_id: u64,
    pub sender_name: String,
    pub category: Option<ViolationCategory>,
    pub kind: AuditKind,
    /// Free-form detail, used by `AuditKind::Error` entries
    pub detail: Option<String>,
}
