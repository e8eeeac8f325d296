// Discord implementation of the moderation host.
//
// Everything goes through the HTTP client so the pipeline workers never
// touch the gateway cache.

use crate::core::moderation::{ChannelKind, HostError, ModeratedMessage, ModerationHost};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

pub struct DiscordHost {
    http: Arc<serenity::Http>,
}

impl DiscordHost {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

fn api_error(action: &'static str) -> impl FnOnce(serenity::Error) -> HostError {
    move |e| HostError::Api {
        action,
        reason: e.to_string(),
    }
}

/// Private threads, and channels that hide themselves from @everyone, count
/// as private. DMs are direct. Anything else is open.
pub fn classify_channel(channel: &serenity::Channel) -> ChannelKind {
    match channel {
        serenity::Channel::Private(_) => ChannelKind::Direct,
        serenity::Channel::Guild(guild_channel) => {
            if guild_channel.kind == serenity::ChannelType::PrivateThread {
                return ChannelKind::Private;
            }

            // The @everyone role shares its id with the guild.
            let everyone = guild_channel.guild_id.get();
            let hidden = guild_channel.permission_overwrites.iter().any(|overwrite| {
                let is_everyone = matches!(
                    overwrite.kind,
                    serenity::PermissionOverwriteType::Role(role) if role.get() == everyone
                );
                is_everyone && overwrite.deny.contains(serenity::Permissions::VIEW_CHANNEL)
            });

            if hidden {
                ChannelKind::Private
            } else {
                ChannelKind::Open
            }
        }
        _ => ChannelKind::Open,
    }
}

#[async_trait]
impl ModerationHost for DiscordHost {
    async fn delete_message(&self, message: &ModeratedMessage) -> Result<(), HostError> {
        serenity::ChannelId::new(message.channel_id)
            .delete_message(&self.http, serenity::MessageId::new(message.id))
            .await
            .map_err(api_error("delete message"))
    }

    async fn channel_kind(&self, channel_id: u64) -> Result<ChannelKind, HostError> {
        let channel = self
            .http
            .get_channel(serenity::ChannelId::new(channel_id))
            .await
            .map_err(api_error("get channel"))?;
        Ok(classify_channel(&channel))
    }

    async fn post_channel_notice(
        &self,
        channel_id: u64,
        root_id: Option<u64>,
        text: &str,
    ) -> Result<(), HostError> {
        let channel = serenity::ChannelId::new(channel_id);
        let mut notice = serenity::CreateMessage::new().content(text);
        if let Some(root_id) = root_id {
            notice = notice.reference_message((channel, serenity::MessageId::new(root_id)));
        }

        channel
            .send_message(&self.http, notice)
            .await
            .map_err(api_error("post channel notice"))?;
        Ok(())
    }

    async fn send_direct_message(&self, user_id: u64, text: &str) -> Result<(), HostError> {
        let dm = serenity::UserId::new(user_id)
            .create_dm_channel(&self.http)
            .await
            .map_err(api_error("open direct message channel"))?;

        dm.id
            .say(&self.http, text)
            .await
            .map_err(api_error("send direct message"))?;
        Ok(())
    }
}
