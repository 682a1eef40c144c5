// This is the entry point of the Telegram anti-link bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (storage backends)
// - `telegram/` = Telegram-specific adapters (transport, commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Wire up the Telegram dispatcher

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with a handful of mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "telegram/telegram_layer.rs"]
mod telegram;

use crate::core::moderation::bot_meta::BotMeta;
use crate::core::moderation::escalation::EscalationEngine;
use crate::core::moderation::exemptions::ExemptionRegistry;
use crate::core::moderation::moderation_models::ModerationConfig;
use crate::core::moderation::pipeline::{AuditSink, ChatTransport, ModerationPipeline};
use crate::core::moderation::policy_store::PolicyStore;
use crate::infra::storage::SqliteKvStore;
use crate::telegram::events::{run_bot, SharedState};
use crate::telegram::timers::EphemeralTimers;
use crate::telegram::transport::{TelegramAuditSink, TelegramTransport};
use std::sync::Arc;
use teloxide::Bot;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let token = std::env::var("BOT_TOKEN").expect("Missing BOT_TOKEN environment variable!");
    let owner_id: u64 = std::env::var("BOT_OWNER_ID")
        .expect("Missing BOT_OWNER_ID environment variable!")
        .parse()
        .expect("BOT_OWNER_ID must be a numeric Telegram user id");
    let log_chat_id: i64 = std::env::var("LOG_CHAT_ID")
        .expect("Missing LOG_CHAT_ID environment variable!")
        .parse()
        .expect("LOG_CHAT_ID must be a numeric chat id");

    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string());
    std::fs::create_dir_all(&data_dir).expect("Failed to create data directory for SQLite files");

    let db_path = format!("{data_dir}/linkshield.db");
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{db_path}?mode=rwc"))
        .await
        .expect("Failed to connect to moderation DB");
    let store = Arc::new(SqliteKvStore::new(pool));
    store
        .migrate()
        .await
        .expect("Failed to migrate moderation DB");

    let config = ModerationConfig::default();
    let bot = Bot::new(token);
    let timers = Arc::new(EphemeralTimers::new());
    let transport = Arc::new(TelegramTransport::new(bot.clone(), Arc::clone(&timers)));
    let audit = Arc::new(TelegramAuditSink::new(bot.clone(), log_chat_id));

    let policies = PolicyStore::new(Arc::clone(&store));
    let exemptions = ExemptionRegistry::new(Arc::clone(&store));
    let escalation = Arc::new(EscalationEngine::new(Arc::clone(&store), &config));
    let meta = BotMeta::new(Arc::clone(&store));

    let pipeline = Arc::new(
        ModerationPipeline::new(
            config.clone(),
            policies.clone(),
            exemptions.clone(),
            Arc::clone(&escalation),
            meta.clone(),
            Arc::clone(&transport) as Arc<dyn ChatTransport>,
            Arc::clone(&audit) as Arc<dyn AuditSink>,
            owner_id,
        )
        .expect("Failed to compile content filters"),
    );

    let state = SharedState {
        config,
        pipeline,
        policies,
        exemptions,
        escalation,
        meta,
        timers: Arc::clone(&timers),
        audit,
        owner_id,
    };

    run_bot(bot, state).await;

    // The dispatcher returned (Ctrl+C); drop the pending deletion tasks.
    timers.shutdown();
}
