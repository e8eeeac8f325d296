// Discord layer - commands, event handlers and the moderation host.

#[path = "moderation/mod.rs"]
pub mod moderation;

use crate::core::moderation::ModerationPipeline;
use crate::infra::moderation::SqliteExcludedChannelStore;
use std::sync::Arc;

/// Type alias for our bot's context.
/// This is what every command receives as its first parameter.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Data that's shared across all commands and event handlers.
pub struct Data {
    pub moderation: Arc<ModerationPipeline>,
    pub excluded_channels: Arc<SqliteExcludedChannelStore>,
}
