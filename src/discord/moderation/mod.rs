// Discord glue for content moderation.

pub mod commands;
pub mod events;
pub mod host;

pub use host::DiscordHost;
