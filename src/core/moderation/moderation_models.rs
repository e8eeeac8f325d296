// Moderation domain models - data structures for the content moderation pipeline.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts its own message/channel types into these.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Category name -> severity, as reported by a classifier.
///
/// A BTreeMap keeps audit records and log lines in a stable order.
pub type Severities = BTreeMap<String, i32>;

/// A message that already exists on the host and may be moderated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeratedMessage {
    pub id: u64,
    pub author_id: u64,
    pub channel_id: u64,
    /// Message this one is threaded under (a reply target), if any.
    pub root_id: Option<u64>,
    pub text: String,
}

/// Channel categories the exclusion policy cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Public guild channel. Also the fallback when the host can't tell us.
    Open,
    /// Guild channel hidden from @everyone, or a private thread.
    Private,
    /// One-to-one direct message.
    Direct,
    /// Group direct message.
    #[allow(dead_code)]
    Group,
}

impl ChannelKind {
    pub fn is_direct_or_group(self) -> bool {
        matches!(self, ChannelKind::Direct | ChannelKind::Group)
    }
}

/// Where a classification currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeState {
    /// Queued or in flight, no answer yet.
    Pending,
    /// At least one category met or exceeded the threshold.
    Flagged,
    /// Every category stayed below the threshold.
    Clear,
    /// The classifier failed or timed out.
    Errored,
}

impl OutcomeState {
    pub fn is_terminal(self) -> bool {
        self != OutcomeState::Pending
    }
}

/// Result of classifying one piece of text.
///
/// Keyed by the raw text in the results cache, so identical messages
/// from different authors share one outcome.
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub state: OutcomeState,
    pub severities: Severities,
    /// Classifier error description for `Errored` outcomes.
    pub error: Option<String>,
    pub last_touched: Instant,
}

impl ClassificationOutcome {
    pub fn pending() -> Self {
        Self {
            state: OutcomeState::Pending,
            severities: Severities::new(),
            error: None,
            last_touched: Instant::now(),
        }
    }

    pub fn flagged(severities: Severities) -> Self {
        Self {
            state: OutcomeState::Flagged,
            severities,
            error: None,
            last_touched: Instant::now(),
        }
    }

    pub fn clear(severities: Severities) -> Self {
        Self {
            state: OutcomeState::Clear,
            severities,
            error: None,
            last_touched: Instant::now(),
        }
    }

    pub fn errored(error: String) -> Self {
        Self {
            state: OutcomeState::Errored,
            severities: Severities::new(),
            error: Some(error),
            last_touched: Instant::now(),
        }
    }
}

/// Returns true when any category meets or exceeds the threshold.
/// An empty map is never flagged.
pub fn severity_above_threshold(severities: &Severities, threshold: i32) -> bool {
    severities.values().any(|&severity| severity >= threshold)
}

/// Why a message was skipped before its classification was even looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Posted by the moderation bot itself.
    SelfBot,
    UserList,
    ChannelList,
    DirectMessages,
    PrivateChannels,
}

impl ExclusionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExclusionReason::SelfBot => "self",
            ExclusionReason::UserList => "user-list",
            ExclusionReason::ChannelList => "channel-list",
            ExclusionReason::DirectMessages => "direct-messages",
            ExclusionReason::PrivateChannels => "private-channels",
        }
    }
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A channel an administrator excluded from moderation at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedChannel {
    pub id: u64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn severities(pairs: &[(&str, i32)]) -> Severities {
        pairs
            .iter()
            .map(|(category, severity)| (category.to_string(), *severity))
            .collect()
    }

    #[test]
    fn test_any_category_at_threshold_flags() {
        let result = severities(&[("hate", 2), ("sexual", 5)]);
        assert!(severity_above_threshold(&result, 5));
    }

    #[test]
    fn test_all_below_threshold_is_clear() {
        let result = severities(&[("hate", 4)]);
        assert!(!severity_above_threshold(&result, 5));
    }

    #[test]
    fn test_empty_severities_is_clear() {
        assert!(!severity_above_threshold(&Severities::new(), 5));
        assert!(!severity_above_threshold(&Severities::new(), 0));
    }

    #[test]
    fn test_only_pending_is_not_terminal() {
        assert!(!OutcomeState::Pending.is_terminal());
        assert!(OutcomeState::Flagged.is_terminal());
        assert!(OutcomeState::Clear.is_terminal());
        assert!(OutcomeState::Errored.is_terminal());
    }
}
