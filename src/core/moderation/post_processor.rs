// Post processor - decides what happens to messages that are already visible.
//
// For each queued message: check the exclusion rules, wait on the shared
// results cache, then delete and notify when the text was flagged. Every
// outcome ends in exactly one audit record. Anything uncertain leaves the
// message alone.

use super::audit::{
    AuditLogger, AuditRecord, AUDIT_EVENT_CONTENT_MODERATION, AUDIT_META_EXCLUDED,
    AUDIT_META_FLAGGED, AUDIT_META_MESSAGE, AUDIT_META_RESULT, AUDIT_META_THRESHOLD,
};
use super::dispatch_processor::MAX_QUEUE_SIZE;
use super::exclusion::ExclusionRules;
use super::moderation_models::{ExclusionReason, ModeratedMessage, OutcomeState, Severities};
use super::moderation_ports::{ModerationError, ModerationHost};
use super::results_cache::ResultsCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

/// How long a visible message waits for its classification.
pub const POST_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

pub const CHANNEL_NOTICE_TEMPLATE: &str =
    "_A message with potentially offensive content was flagged and removed._";

/// Direct message sent to the author of removed content.
pub fn author_notice(text: &str) -> String {
    format!(
        "_Your message with the following content was flagged and removed:_\n\n{}",
        text
    )
}

#[derive(Debug, Clone)]
pub struct PostProcessorSettings {
    pub threshold: i32,
    pub wait_timeout: Duration,
    pub queue_capacity: usize,
}

impl PostProcessorSettings {
    pub fn new(threshold: i32) -> Self {
        Self {
            threshold,
            wait_timeout: POST_WAIT_TIMEOUT,
            queue_capacity: MAX_QUEUE_SIZE,
        }
    }
}

/// What the post processor did with one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationDecision {
    Excluded(ExclusionReason),
    Clear,
    Removed,
    /// Deleted, but the channel notice or author DM failed.
    RemovedWithoutNotice,
    DeleteFailed,
    TimedOut,
    ClassifierFailed,
    StillPending,
}

/// Handle to the running post worker.
pub struct PostProcessor {
    queue_tx: mpsc::Sender<ModeratedMessage>,
    shutdown_tx: watch::Sender<bool>,
}

impl PostProcessor {
    pub fn start(engine: DecisionEngine) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(engine.settings.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(engine.run(queue_rx, shutdown_rx));

        Self {
            queue_tx,
            shutdown_tx,
        }
    }

    /// Queue a created message for follow-up. Never blocks.
    pub fn submit(&self, message: ModeratedMessage) {
        if message.text.is_empty() {
            return;
        }

        let message_id = message.id;
        match self.queue_tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::error!(
                    message_id,
                    "Content moderation unable to analyze message: exceeded maximum queue size"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!(
                    message_id,
                    "Content moderation unable to analyze message: processor is shut down"
                );
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl Drop for PostProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The per-message decision logic, independent of the queue.
pub struct DecisionEngine {
    cache: Arc<ResultsCache>,
    exclusions: Arc<ExclusionRules>,
    host: Arc<dyn ModerationHost>,
    audit: AuditLogger,
    settings: PostProcessorSettings,
}

impl DecisionEngine {
    pub fn new(
        cache: Arc<ResultsCache>,
        exclusions: Arc<ExclusionRules>,
        host: Arc<dyn ModerationHost>,
        audit: AuditLogger,
        settings: PostProcessorSettings,
    ) -> Self {
        Self {
            cache,
            exclusions,
            host,
            audit,
            settings,
        }
    }

    async fn run(
        self,
        mut queue_rx: mpsc::Receiver<ModeratedMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let message = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = queue_rx.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            let decision = self.moderate(&message).await;
            tracing::debug!(
                message_id = message.id,
                decision = ?decision,
                "Content moderation finished"
            );
        }

        tracing::debug!("Moderation post worker stopped");
    }

    /// Decide on one message and carry out the action.
    pub async fn moderate(&self, message: &ModeratedMessage) -> ModerationDecision {
        let mut record = AuditRecord::attempt(AUDIT_EVENT_CONTENT_MODERATION);
        record.add_meta(AUDIT_META_MESSAGE, message);

        if let Some(reason) = self.exclusions.check(self.host.as_ref(), message).await {
            record.add_meta(AUDIT_META_EXCLUDED, reason.as_str());
            tracing::debug!(
                message_id = message.id,
                reason = reason.as_str(),
                "Message excluded from moderation, no action needed"
            );
            self.audit.success(record);
            return ModerationDecision::Excluded(reason);
        }

        let Some(outcome) = self
            .cache
            .wait_for(&message.text, self.settings.wait_timeout)
            .await
        else {
            let err = ModerationError::DeadlineExceeded;
            tracing::error!(
                message_id = message.id,
                err = %err,
                "Failed to complete content moderation"
            );
            self.audit
                .fail(record, "Failed to complete content moderation", &err);
            return ModerationDecision::TimedOut;
        };

        record.add_meta(AUDIT_META_THRESHOLD, self.settings.threshold);
        record.add_meta(AUDIT_META_RESULT, &outcome.severities);

        match outcome.state {
            OutcomeState::Clear => {
                record.add_meta(AUDIT_META_FLAGGED, false);
                self.audit.success(record);
                ModerationDecision::Clear
            }
            OutcomeState::Pending => {
                let err = ModerationError::StillPending;
                tracing::error!(
                    message_id = message.id,
                    err = %err,
                    "Failed to complete content moderation"
                );
                self.audit
                    .fail(record, "Failed to complete content moderation", &err);
                ModerationDecision::StillPending
            }
            OutcomeState::Errored => {
                let err = ModerationError::Classifier(outcome.error.unwrap_or_default());
                tracing::error!(
                    message_id = message.id,
                    user_id = message.author_id,
                    err = %err,
                    "Content moderation error"
                );
                self.audit.fail(record, "Content moderation error", &err);
                ModerationDecision::ClassifierFailed
            }
            OutcomeState::Flagged => {
                record.add_meta(AUDIT_META_FLAGGED, true);
                self.log_flagged(message.id, &outcome.severities);
                self.remove(message, record).await
            }
        }
    }

    /// Delete a flagged message, then tell the channel and the author.
    async fn remove(&self, message: &ModeratedMessage, record: AuditRecord) -> ModerationDecision {
        if let Err(err) = self.host.delete_message(message).await {
            let err = ModerationError::from(err);
            tracing::error!(
                message_id = message.id,
                err = %err,
                "Failed to delete message flagged by content moderation"
            );
            self.audit.fail(
                record,
                "Failed to delete message flagged by content moderation",
                &err,
            );
            return ModerationDecision::DeleteFailed;
        }

        if let Err(err) = self.notify_removal(message).await {
            tracing::error!(
                message_id = message.id,
                err = %err,
                "Failed to report content moderation event"
            );
            self.audit
                .fail(record, "Failed to report content moderation event", &err);
            return ModerationDecision::RemovedWithoutNotice;
        }

        self.audit.success(record);
        ModerationDecision::Removed
    }

    /// Both sends are attempted even if the first one fails.
    async fn notify_removal(&self, message: &ModeratedMessage) -> Result<(), ModerationError> {
        let mut failures = Vec::new();

        if let Err(err) = self
            .host
            .post_channel_notice(message.channel_id, message.root_id, CHANNEL_NOTICE_TEMPLATE)
            .await
        {
            failures.push(format!("channel notice: {}", err));
        }

        if let Err(err) = self
            .host
            .send_direct_message(message.author_id, &author_notice(&message.text))
            .await
        {
            failures.push(format!("direct message: {}", err));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ModerationError::Notification(failures.join("; ")))
        }
    }

    fn log_flagged(&self, message_id: u64, severities: &Severities) {
        let flagged: Vec<String> = severities
            .iter()
            .filter(|(_, severity)| **severity >= self.settings.threshold)
            .map(|(category, severity)| format!("{}={}", category, severity))
            .collect();

        tracing::info!(
            message_id,
            severity_threshold = self.settings.threshold,
            categories = %flagged.join(","),
            "Content was flagged by moderation"
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
