// Maps Discord message events onto the moderation lifecycle hooks.
//
// Discord only tells us about a message once it exists, so a new message
// fires the before-create and after-create hooks back to back. There is no
// notification delivery hook on Discord, so the notification gate is not
// wired here.

use crate::core::moderation::{ModeratedMessage, ModerationConfig};
use crate::discord::{Data, Error};
use poise::serenity_prelude as serenity;

/// Reply target for the removal notice. Forwards and crossposts reference
/// messages in other channels, and a reply can't point there.
fn same_channel_root(
    channel_id: u64,
    reference_channel_id: u64,
    reference_message_id: Option<u64>,
) -> Option<u64> {
    if reference_channel_id != channel_id {
        return None;
    }
    reference_message_id
}

pub fn to_moderated(msg: &serenity::Message) -> ModeratedMessage {
    ModeratedMessage {
        id: msg.id.get(),
        author_id: msg.author.id.get(),
        channel_id: msg.channel_id.get(),
        root_id: msg.message_reference.as_ref().and_then(|reference| {
            same_channel_root(
                msg.channel_id.get(),
                reference.channel_id.get(),
                reference.message_id.map(|id| id.get()),
            )
        }),
        text: msg.content.clone(),
    }
}

pub fn handle_new_message(data: &Data, msg: &serenity::Message) {
    let message = to_moderated(msg);
    data.moderation.before_create(&message);
    data.moderation.after_create(message);
}

/// Edits are moderated like new messages. Updates without new content
/// (embeds resolving, pins) are ignored.
pub fn handle_message_update(
    data: &Data,
    new: Option<&serenity::Message>,
    event: &serenity::MessageUpdateEvent,
) {
    let message = match (new, &event.author, &event.content) {
        (Some(msg), _, Some(_)) => to_moderated(msg),
        (None, Some(author), Some(content)) => ModeratedMessage {
            id: event.id.get(),
            author_id: author.id.get(),
            channel_id: event.channel_id.get(),
            root_id: None,
            text: content.clone(),
        },
        _ => return,
    };

    data.moderation.before_update(&message);
    data.moderation.after_update(message);
}

/// Rebuild the exclusion policy from the configured ids plus the stored ones.
pub async fn refresh_excluded_channels(data: &Data) -> Result<(), Error> {
    let stored = data.excluded_channels.excluded_ids().await?;
    data.moderation.refresh_excluded_channels(&stored);
    Ok(())
}

/// Re-read the environment and restart the pipeline from it.
pub async fn reload_from_env(data: &Data) -> Result<(), Error> {
    dotenv::dotenv().ok();
    let config = ModerationConfig::from_env();

    // Stored channels first, so the new policy starts with them.
    refresh_excluded_channels(data).await?;

    if let Err(e) = data.moderation.apply_config(&config) {
        tracing::error!(err = %e, "Failed to initialize content moderation");
        return Err(e.into());
    }
    Ok(())
}
