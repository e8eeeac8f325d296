// This is the entry point of the content moderation bot.
//
// **Architecture Overview:**
// - `core/` = The moderation pipeline (platform-agnostic)
// - `infra/` = Implementations of core traits (classifiers, SQLite, audit sinks)
// - `discord/` = Discord-specific adapters (host, commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize stores and sinks (dependency injection)
// 3. Set up the Discord framework
// 4. Start the pipeline once the bot knows its own user id

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::{AuditSink, ModerationPipeline};
use crate::discord::moderation::events as moderation_events;
use crate::discord::moderation::DiscordHost;
use crate::discord::{Data, Error};
use crate::infra::moderation::{
    AuditSinks, BackendClassifiers, SqliteAuditLog, SqliteExcludedChannelStore, TracingAuditSink,
};
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command Discord events.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            moderation_events::handle_new_message(data, new_message);
        }
        serenity::FullEvent::MessageUpdate { new, event, .. } => {
            moderation_events::handle_message_update(data, new.as_ref(), event);
        }
        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let token = std::env::var("DISCORD_TOKEN").context(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    )?;

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    let data_dir = std::env::var("MODERATION_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
    let db_path = format!("{}/moderation.db", data_dir);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", db_path))
        .await
        .context("Failed to connect to moderation DB")?;

    let excluded_channels = Arc::new(SqliteExcludedChannelStore::new(pool.clone()));
    excluded_channels
        .migrate()
        .await
        .context("Failed to migrate excluded channels table")?;

    let audit_log = SqliteAuditLog::new(pool);
    audit_log
        .migrate()
        .await
        .context("Failed to migrate audit log table")?;

    let audit_sink: Arc<dyn AuditSink> = Arc::new(AuditSinks::new(vec![
        Arc::new(TracingAuditSink) as Arc<dyn AuditSink>,
        Arc::new(audit_log) as Arc<dyn AuditSink>,
    ]));

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::DIRECT_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::moderation::commands::moderation()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                tracing::info!(bot = %ready.user.name, "Bot is starting up");

                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                // The host needs the live HTTP client, so the pipeline is built here.
                let host = Arc::new(DiscordHost::new(ctx.http.clone()));
                let pipeline = Arc::new(ModerationPipeline::new(
                    host,
                    audit_sink,
                    Arc::new(BackendClassifiers),
                ));
                pipeline.set_self_bot_id(ready.user.id.get());

                let data = Data {
                    moderation: pipeline,
                    excluded_channels,
                };

                // A bad moderation config leaves moderation off, not the bot.
                if let Err(e) = moderation_events::reload_from_env(&data).await {
                    tracing::warn!(err = %e, "Content moderation not started");
                }

                tracing::info!("Bot is ready");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}
