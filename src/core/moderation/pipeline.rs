// Moderation pipeline - orchestrates one inbound message event.
//
// Order of gates: maintenance, group-only, admin path, exemption, policy +
// classification, deletion, escalation, notices, audit. The pipeline owns
// no persistent state; it reads the stores and issues commands through the
// transport and audit ports below.
//
// NO Telegram dependencies here - the telegram layer implements the ports.

use super::bot_meta::BotMeta;
use super::classifier::ContentClassifier;
use super::escalation::EscalationEngine;
use super::exemptions::ExemptionRegistry;
use super::moderation_models::{
    AuditEvent, AuditKind, ChatPolicy, EscalationOutcome, InboundMessage, MemberRank,
    ModerationConfig, ModerationOutcome, SkipReason, TransportError, ViolationCategory,
};
use super::policy_store::PolicyStore;
use crate::core::storage::{KeyValueStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// TRANSPORT AND AUDIT PORTS
// ============================================================================

/// Chat-platform operations the pipeline needs. Every call carries a
/// timeout enforced by the implementation; failures come back as
/// `TransportError`, never as an unbounded suspension.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError>;

    /// Restrict a member from sending until the given absolute expiry.
    async fn restrict_member(
        &self,
        chat_id: i64,
        user_id: u64,
        until: DateTime<Utc>,
    ) -> Result<(), TransportError>;

    async fn member_rank(&self, chat_id: i64, user_id: u64) -> Result<MemberRank, TransportError>;

    /// Fetch a user's profile bio. `None` when the profile has no bio.
    async fn user_bio(&self, user_id: u64) -> Result<Option<String>, TransportError>;

    /// Post a notice scheduled for automatic removal after `ttl`.
    async fn send_ephemeral(
        &self,
        chat_id: i64,
        text: &str,
        ttl: Duration,
    ) -> Result<(), TransportError>;

    /// Post the mute confirmation, carrying an unmute affordance for admins.
    async fn send_mute_notice(
        &self,
        chat_id: i64,
        muted_user: u64,
        text: &str,
        ttl: Duration,
    ) -> Result<(), TransportError>;
}

/// Append-only operator log. Delivery failures are the implementation's
/// problem: they get logged locally and swallowed.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_event(&self, event: AuditEvent);
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct ModerationPipeline<S: KeyValueStore> {
    config: ModerationConfig,
    classifier: ContentClassifier,
    policies: PolicyStore<S>,
    exemptions: ExemptionRegistry<S>,
    escalation: Arc<EscalationEngine<S>>,
    meta: BotMeta<S>,
    transport: Arc<dyn ChatTransport>,
    audit: Arc<dyn AuditSink>,
    owner_id: u64,
}

impl<S: KeyValueStore> ModerationPipeline<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ModerationConfig,
        policies: PolicyStore<S>,
        exemptions: ExemptionRegistry<S>,
        escalation: Arc<EscalationEngine<S>>,
        meta: BotMeta<S>,
        transport: Arc<dyn ChatTransport>,
        audit: Arc<dyn AuditSink>,
        owner_id: u64,
    ) -> Result<Self, regex::Error> {
        let classifier = ContentClassifier::new(&config.link_domains)?;
        Ok(Self {
            config,
            classifier,
            policies,
            exemptions,
            escalation,
            meta,
            transport,
            audit,
            owner_id,
        })
    }

    /// Run one message event through the full moderation sequence.
    pub async fn process(
        &self,
        msg: &InboundMessage,
    ) -> Result<ModerationOutcome, ModerationError> {
        if self.meta.maintenance_active().await && msg.user_id != self.owner_id {
            return Ok(ModerationOutcome::Skipped(SkipReason::Maintenance));
        }

        if !msg.chat_kind.is_group() {
            return Ok(ModerationOutcome::Skipped(SkipReason::NotAGroup));
        }

        let policy = self.policies.get(msg.chat_id).await;

        let rank = match self.transport.member_rank(msg.chat_id, msg.user_id).await {
            Ok(rank) => rank,
            Err(e) => {
                tracing::debug!(
                    chat_id = msg.chat_id,
                    user_id = msg.user_id,
                    error = %e,
                    "rank lookup failed, treating sender as regular member"
                );
                MemberRank::Member
            }
        };

        // Admins sit structurally outside the escalation state machine:
        // their offending messages are removed with a courtesy notice, but
        // no exemption check, no warning, no counter.
        if rank.is_admin() {
            let Some(category) = self.classify(msg, &policy).await else {
                return Ok(ModerationOutcome::Skipped(SkipReason::Clean));
            };
            if !self.delete_offending(msg).await {
                return Ok(ModerationOutcome::Skipped(SkipReason::DeleteFailed));
            }
            let text = format!(
                "🗑️ Admin @{}, your message was removed. Please approve yourself first using /approveme",
                msg.sender_name
            );
            self.notify(msg.chat_id, &text).await;
            return Ok(ModerationOutcome::AdminNotified { category });
        }

        if self.exemptions.is_exempt(msg.user_id).await {
            return Ok(ModerationOutcome::Skipped(SkipReason::Exempt));
        }

        let Some(category) = self.classify(msg, &policy).await else {
            return Ok(ModerationOutcome::Skipped(SkipReason::Clean));
        };

        if !self.delete_offending(msg).await {
            return Ok(ModerationOutcome::Skipped(SkipReason::DeleteFailed));
        }

        let transport = Arc::clone(&self.transport);
        let (chat_id, user_id) = (msg.chat_id, msg.user_id);
        let outcome = self
            .escalation
            .record_violation(chat_id, user_id, move |until| async move {
                transport.restrict_member(chat_id, user_id, until).await
            })
            .await?;

        self.notify(msg.chat_id, &category.notice_text(&msg.sender_name))
            .await;
        self.audit
            .log_event(self.audit_event(msg, Some(category), AuditKind::Violation))
            .await;

        match outcome {
            EscalationOutcome::Warned { count } => {
                Ok(ModerationOutcome::Warned { category, count })
            }
            EscalationOutcome::Muted { until } => {
                let text = format!(
                    "🔇 @{} muted for {} min.",
                    msg.sender_name,
                    self.config.mute_duration_secs / 60
                );
                if let Err(e) = self
                    .transport
                    .send_mute_notice(msg.chat_id, msg.user_id, &text, self.notice_ttl())
                    .await
                {
                    tracing::warn!(chat_id = msg.chat_id, error = %e, "failed to post mute notice");
                }
                self.audit
                    .log_event(self.audit_event(msg, Some(category), AuditKind::Mute))
                    .await;
                Ok(ModerationOutcome::Muted { category, until })
            }
            EscalationOutcome::MuteDenied { count } => {
                self.notify(msg.chat_id, "❌ I need admin permissions to mute users!")
                    .await;
                Ok(ModerationOutcome::MuteDenied { category, count })
            }
        }
    }

    /// Classify text first; only when the text is clean and the chat allows
    /// it, fetch the sender's bio and apply the same predicates to it.
    async fn classify(
        &self,
        msg: &InboundMessage,
        policy: &ChatPolicy,
    ) -> Option<ViolationCategory> {
        if let Some(category) = self.classifier.classify(&msg.text, policy) {
            return Some(category);
        }
        if policy.bio_links {
            match self.transport.user_bio(msg.user_id).await {
                Ok(Some(bio)) if self.classifier.matches_any(&bio) => {
                    return Some(ViolationCategory::BioLinks);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(user_id = msg.user_id, error = %e, "bio fetch failed");
                }
            }
        }
        None
    }

    /// Delete the offending message. A message that is already gone counts
    /// as deleted; a permission failure is reported to the chat; anything
    /// else is logged. Returns whether the pipeline should continue.
    async fn delete_offending(&self, msg: &InboundMessage) -> bool {
        match self
            .transport
            .delete_message(msg.chat_id, msg.message_id)
            .await
        {
            Ok(()) | Err(TransportError::NotFound) => true,
            Err(TransportError::PermissionDenied) => {
                tracing::warn!(
                    chat_id = msg.chat_id,
                    message_id = msg.message_id,
                    "missing permission to delete message"
                );
                self.notify(msg.chat_id, "❌ I need admin permissions to delete messages!")
                    .await;
                false
            }
            Err(e) => {
                tracing::error!(
                    chat_id = msg.chat_id,
                    message_id = msg.message_id,
                    error = %e,
                    "message deletion failed"
                );
                false
            }
        }
    }

    /// Notices are best-effort; a failed send never aborts the pipeline.
    async fn notify(&self, chat_id: i64, text: &str) {
        if let Err(e) = self
            .transport
            .send_ephemeral(chat_id, text, self.notice_ttl())
            .await
        {
            tracing::warn!(chat_id, error = %e, "failed to post notice");
        }
    }

    fn notice_ttl(&self) -> Duration {
        Duration::from_secs(self.config.notice_ttl_secs)
    }

    fn audit_event(
        &self,
        msg: &InboundMessage,
        category: Option<ViolationCategory>,
        kind: AuditKind,
    ) -> AuditEvent {
        AuditEvent {
            chat_id: msg.chat_id,
            chat_title: msg.chat_title.clone(),
            user_id: msg.user_id,
            sender_name: msg.sender_name.clone(),
            category,
            kind,
            detail: None,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
