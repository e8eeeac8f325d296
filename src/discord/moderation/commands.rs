// Content moderation slash commands.

use super::events::{refresh_excluded_channels, reload_from_env};
use crate::core::moderation::audit::{
    AUDIT_EVENT_MANAGE_CHANNEL_MODERATION, AUDIT_META_ACTION, AUDIT_META_CHANNEL_ID,
    AUDIT_META_USER_ID,
};
use crate::core::moderation::{AuditRecord, ExcludedChannel, ExcludedChannelStore};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

/// Content moderation management.
#[poise::command(
    slash_command,
    subcommands("channel", "reload"),
    required_permissions = "MANAGE_CHANNELS",
    guild_only
)]
pub async fn moderation(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Turn moderation on or off for a channel.
#[poise::command(
    slash_command,
    subcommands("disable", "enable", "status", "list"),
    required_permissions = "MANAGE_CHANNELS",
    guild_only
)]
pub async fn channel(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

fn management_record(ctx: &Context<'_>, channel_id: u64, action: &str) -> AuditRecord {
    let mut record = AuditRecord::attempt(AUDIT_EVENT_MANAGE_CHANNEL_MODERATION);
    record.add_meta(AUDIT_META_CHANNEL_ID, channel_id);
    record.add_meta(AUDIT_META_USER_ID, ctx.author().id.get());
    record.add_meta(AUDIT_META_ACTION, action);
    record
}

async fn reply(ctx: Context<'_>, text: impl Into<String>) -> Result<(), Error> {
    ctx.send(
        poise::CreateReply::default()
            .content(text.into())
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Stop moderating this channel.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_CHANNELS")]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    let channel_id = ctx.channel_id();
    let name = channel_id
        .name(ctx.serenity_context())
        .await
        .unwrap_or_else(|_| channel_id.to_string());

    let record = management_record(&ctx, channel_id.get(), "disable");
    let audit = ctx.data().moderation.audit_logger();

    let excluded = ExcludedChannel {
        id: channel_id.get(),
        name,
    };
    if let Err(e) = ctx.data().excluded_channels.exclude(excluded).await {
        tracing::error!(
            channel_id = channel_id.get(),
            err = %e,
            "Failed to disable channel moderation"
        );
        audit.fail(record, "Failed to disable channel moderation", &e);
        return Err(e.into());
    }

    refresh_excluded_channels(ctx.data()).await?;
    audit.success(record);

    reply(ctx, format!("Content moderation is now **disabled** in <#{}>.", channel_id)).await
}

/// Moderate this channel again.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_CHANNELS")]
pub async fn enable(ctx: Context<'_>) -> Result<(), Error> {
    let channel_id = ctx.channel_id();
    let record = management_record(&ctx, channel_id.get(), "enable");
    let audit = ctx.data().moderation.audit_logger();

    if let Err(e) = ctx.data().excluded_channels.include(channel_id.get()).await {
        tracing::error!(
            channel_id = channel_id.get(),
            err = %e,
            "Failed to enable channel moderation"
        );
        audit.fail(record, "Failed to enable channel moderation", &e);
        return Err(e.into());
    }

    refresh_excluded_channels(ctx.data()).await?;
    audit.success(record);

    reply(ctx, format!("Content moderation is now **enabled** in <#{}>.", channel_id)).await
}

/// Show whether this channel is moderated.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_CHANNELS")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let channel_id = ctx.channel_id();
    let excluded = ctx
        .data()
        .excluded_channels
        .is_excluded(channel_id.get())
        .await?;

    let text = match (ctx.data().moderation.is_active(), excluded) {
        (false, _) => "Content moderation is turned off for this server.".to_string(),
        (true, true) => format!("Content moderation is **disabled** in <#{}>.", channel_id),
        (true, false) => format!("Content moderation is **enabled** in <#{}>.", channel_id),
    };
    reply(ctx, text).await
}

/// List channels where moderation has been disabled.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_CHANNELS")]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let channels = ctx.data().excluded_channels.list_excluded().await?;

    let description = if channels.is_empty() {
        "No channels are excluded from moderation.".to_string()
    } else {
        channels
            .iter()
            .map(|c| format!("• <#{}> ({})", c.id, c.name))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let embed = serenity::CreateEmbed::default()
        .title("Channels Excluded From Moderation")
        .color(serenity::Color::BLURPLE)
        .description(description)
        .timestamp(serenity::Timestamp::now());

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Reload moderation settings from the environment.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn reload(ctx: Context<'_>) -> Result<(), Error> {
    match reload_from_env(ctx.data()).await {
        Ok(()) if ctx.data().moderation.is_active() => {
            reply(ctx, "✅ Content moderation reloaded and running.").await
        }
        Ok(()) => reply(ctx, "Content moderation reloaded. It is turned off.").await,
        Err(e) => reply(ctx, format!("❌ Content moderation stays off: {}", e)).await,
    }
}
