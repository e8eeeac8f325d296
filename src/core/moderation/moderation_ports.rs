// Ports the moderation pipeline consumes.
//
// Core only knows these traits. The infra layer provides the classifier
// backends and stores, the Discord layer provides the host.

use super::moderation_config::{ConfigError, ModerationConfig};
use super::moderation_models::{ChannelKind, ExcludedChannel, ModeratedMessage, Severities};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("classifier returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed classifier response: {0}")]
    Malformed(String),

    #[error("invalid severity value: category={category}, severity={severity}")]
    InvalidSeverity { category: String, severity: i32 },

    #[error("classification timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("{action} failed: {reason}")]
    Api { action: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Failures on the decision path. Every one of them leaves the message alone.
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("moderation did not complete in time")]
    DeadlineExceeded,

    #[error("moderation result from cache is still pending")]
    StillPending,

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("failed to notify about removed content: {0}")]
    Notification(String),
}

// ============================================================================
// CLASSIFIER (PORT)
// ============================================================================

/// A content-safety backend.
///
/// The dispatch processor calls it one text at a time and bounds each call
/// with its own timeout, so implementations don't need one of their own.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Severities, ClassifierError>;
}

/// Builds the classifier a configuration asks for. Called on every
/// configuration change.
pub trait ClassifierFactory: Send + Sync {
    fn build(&self, config: &ModerationConfig) -> Result<Arc<dyn Classifier>, ConfigError>;
}

// ============================================================================
// HOST (PORT)
// ============================================================================

/// The chat platform the pipeline moderates.
#[async_trait]
pub trait ModerationHost: Send + Sync {
    /// Remove a message that was flagged.
    async fn delete_message(&self, message: &ModeratedMessage) -> Result<(), HostError>;

    /// Look up what kind of channel this is.
    async fn channel_kind(&self, channel_id: u64) -> Result<ChannelKind, HostError>;

    /// Post a notice as the moderation bot, threaded under `root_id` when given.
    async fn post_channel_notice(
        &self,
        channel_id: u64,
        root_id: Option<u64>,
        text: &str,
    ) -> Result<(), HostError>;

    /// Send a direct message from the moderation bot to a user.
    async fn send_direct_message(&self, user_id: u64, text: &str) -> Result<(), HostError>;
}

// ============================================================================
// EXCLUDED CHANNELS (PORT)
// ============================================================================

/// Channels excluded from moderation by administrators at runtime.
#[async_trait]
pub trait ExcludedChannelStore: Send + Sync {
    async fn exclude(&self, channel: ExcludedChannel) -> Result<(), StoreError>;

    async fn include(&self, channel_id: u64) -> Result<(), StoreError>;

    async fn is_excluded(&self, channel_id: u64) -> Result<bool, StoreError>;

    async fn list_excluded(&self) -> Result<Vec<ExcludedChannel>, StoreError>;
}
