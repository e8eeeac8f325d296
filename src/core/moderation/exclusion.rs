// Exclusion policy - which messages skip moderation entirely.
//
// The policy is an immutable snapshot swapped wholesale when the
// configuration or the stored channel list changes. Readers clone the Arc
// and never see a half-updated policy.

use super::moderation_models::{ChannelKind, ExclusionReason, ModeratedMessage};
use super::moderation_ports::ModerationHost;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// How long a looked-up channel kind is trusted.
pub const CHANNEL_KIND_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    /// The moderation bot's own user id.
    pub self_bot_id: Option<u64>,
    pub excluded_user_ids: HashSet<u64>,
    pub excluded_channel_ids: HashSet<u64>,
    pub exclude_direct_messages: bool,
    pub exclude_private_channels: bool,
}

impl ExclusionPolicy {
    /// Rules that only need the message itself, in precedence order:
    /// the bot itself, the user list, then the channel list.
    pub fn identity_exclusion(&self, message: &ModeratedMessage) -> Option<ExclusionReason> {
        if self.self_bot_id == Some(message.author_id) {
            return Some(ExclusionReason::SelfBot);
        }
        if self.excluded_user_ids.contains(&message.author_id) {
            return Some(ExclusionReason::UserList);
        }
        if self.excluded_channel_ids.contains(&message.channel_id) {
            return Some(ExclusionReason::ChannelList);
        }
        None
    }

    /// Rules that depend on what kind of channel the message is in.
    pub fn channel_kind_exclusion(&self, kind: ChannelKind) -> Option<ExclusionReason> {
        if self.exclude_direct_messages && kind.is_direct_or_group() {
            return Some(ExclusionReason::DirectMessages);
        }
        if self.exclude_private_channels && kind == ChannelKind::Private {
            return Some(ExclusionReason::PrivateChannels);
        }
        None
    }

    /// Channel kind lookups are skipped entirely when no rule uses them.
    pub fn needs_channel_kind(&self) -> bool {
        self.exclude_direct_messages || self.exclude_private_channels
    }

    /// Copy of this policy with a different excluded-channel set.
    pub fn with_excluded_channels(&self, channel_ids: HashSet<u64>) -> Self {
        Self {
            excluded_channel_ids: channel_ids,
            ..self.clone()
        }
    }
}

/// Channel id -> (kind, fetched at). Read far more often than written.
pub struct ChannelKindCache {
    entries: DashMap<u64, (ChannelKind, Instant)>,
    ttl: Duration,
}

impl Default for ChannelKindCache {
    fn default() -> Self {
        Self::new(CHANNEL_KIND_CACHE_TTL)
    }
}

impl ChannelKindCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached kind if still fresh, otherwise ask the host.
    ///
    /// A failed lookup counts as an open channel and is not cached.
    pub async fn resolve(&self, host: &dyn ModerationHost, channel_id: u64) -> ChannelKind {
        // Copy out so no map guard is held across the await below.
        let cached = self.entries.get(&channel_id).map(|entry| *entry.value());
        if let Some((kind, fetched_at)) = cached {
            if fetched_at.elapsed() <= self.ttl {
                return kind;
            }
        }

        match host.channel_kind(channel_id).await {
            Ok(kind) => {
                self.entries.insert(channel_id, (kind, Instant::now()));
                kind
            }
            Err(err) => {
                tracing::error!(
                    channel_id,
                    err = %err,
                    "Failed to get channel type for moderation check"
                );
                ChannelKind::Open
            }
        }
    }
}

/// The live policy plus the channel kind cache, shared by the post
/// processor and the notification gate.
pub struct ExclusionRules {
    policy: RwLock<Arc<ExclusionPolicy>>,
    channel_kinds: ChannelKindCache,
}

impl ExclusionRules {
    pub fn new(policy: ExclusionPolicy) -> Self {
        Self::with_channel_cache(policy, ChannelKindCache::default())
    }

    pub fn with_channel_cache(policy: ExclusionPolicy, channel_kinds: ChannelKindCache) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
            channel_kinds,
        }
    }

    pub fn snapshot(&self) -> Arc<ExclusionPolicy> {
        let guard = self
            .policy
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, policy: ExclusionPolicy) {
        let mut guard = self
            .policy
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(policy);
    }

    /// First matching exclusion rule for `message`, if any.
    pub async fn check(
        &self,
        host: &dyn ModerationHost,
        message: &ModeratedMessage,
    ) -> Option<ExclusionReason> {
        let policy = self.snapshot();

        if let Some(reason) = policy.identity_exclusion(message) {
            return Some(reason);
        }

        if !policy.needs_channel_kind() {
            return None;
        }

        let kind = self.channel_kinds.resolve(host, message.channel_id).await;
        policy.channel_kind_exclusion(kind)
    }
}

// ============================================================================
// TESTS
// ============================================================================
