// Notification gate - asked by the host right before it delivers a
// notification for a message.
//
// This sits on the host's synchronous delivery path, so it waits on the
// results cache with a much shorter timeout than the post processor.
// Only a flagged outcome suppresses; everything else lets it through.

use super::exclusion::ExclusionRules;
use super::moderation_models::{ModeratedMessage, OutcomeState};
use super::moderation_ports::ModerationHost;
use super::results_cache::ResultsCache;
use std::sync::Arc;
use std::time::Duration;

pub const NOTIFICATION_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

pub const SUPPRESSION_REASON: &str = "content flagged by moderation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub suppress: bool,
    pub reason: String,
}

impl GateDecision {
    fn deliver(reason: impl Into<String>) -> Self {
        Self {
            suppress: false,
            reason: reason.into(),
        }
    }

    fn suppress() -> Self {
        Self {
            suppress: true,
            reason: SUPPRESSION_REASON.to_string(),
        }
    }
}

pub struct NotificationGate {
    cache: Arc<ResultsCache>,
    exclusions: Arc<ExclusionRules>,
    host: Arc<dyn ModerationHost>,
    wait_timeout: Duration,
}

impl NotificationGate {
    pub fn new(
        cache: Arc<ResultsCache>,
        exclusions: Arc<ExclusionRules>,
        host: Arc<dyn ModerationHost>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            exclusions,
            host,
            wait_timeout,
        }
    }

    pub async fn should_suppress(&self, message: &ModeratedMessage) -> GateDecision {
        if let Some(reason) = self.exclusions.check(self.host.as_ref(), message).await {
            return GateDecision::deliver(format!("excluded: {}", reason));
        }

        let Some(outcome) = self.cache.wait_for(&message.text, self.wait_timeout).await else {
            tracing::error!(
                message_id = message.id,
                "Failed to complete content moderation before notification timeout"
            );
            return GateDecision::deliver("moderation did not complete in time");
        };

        match outcome.state {
            OutcomeState::Flagged => GateDecision::suppress(),
            OutcomeState::Clear => GateDecision::deliver("clear"),
            OutcomeState::Errored => GateDecision::deliver("moderation error"),
            OutcomeState::Pending => GateDecision::deliver("moderation still pending"),
        }
    }
}
