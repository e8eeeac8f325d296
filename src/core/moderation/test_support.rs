// Shared test doubles for the moderation pipeline.

use super::audit::{AuditRecord, AuditSink};
use super::moderation_models::{ChannelKind, ModeratedMessage, Severities};
use super::moderation_ports::{Classifier, ClassifierError, HostError, ModerationHost};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn message(id: u64, author_id: u64, channel_id: u64, text: &str) -> ModeratedMessage {
    ModeratedMessage {
        id,
        author_id,
        channel_id,
        root_id: None,
        text: text.to_string(),
    }
}

pub fn severities(pairs: &[(&str, i32)]) -> Severities {
    pairs
        .iter()
        .map(|(category, severity)| (category.to_string(), *severity))
        .collect()
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Scripted classifier. Unknown texts come back with no categories.
pub struct MockClassifier {
    responses: DashMap<String, Severities>,
    failures: DashSet<String>,
    history: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self {
            responses: DashMap::new(),
            failures: DashSet::new(),
            history: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond(&self, text: &str, pairs: &[(&str, i32)]) {
        self.responses.insert(text.to_string(), severities(pairs));
    }

    pub fn fail_on(&self, text: &str) {
        self.failures.insert(text.to_string());
    }

    pub fn calls(&self, text: &str) -> usize {
        self.history().iter().filter(|seen| *seen == text).count()
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, text: &str) -> Result<Severities, ClassifierError> {
        self.history.lock().unwrap().push(text.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failures.contains(text) {
            return Err(ClassifierError::Status {
                status: 500,
                body: "scripted failure".to_string(),
            });
        }

        Ok(self
            .responses
            .get(text)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

// ============================================================================
// HOST
// ============================================================================

/// Records every side effect instead of talking to a chat platform.
pub struct MockHost {
    kinds: DashMap<u64, ChannelKind>,
    lookups: AtomicUsize,
    fail_lookups: AtomicBool,
    fail_deletes: AtomicBool,
    fail_notices: AtomicBool,
    fail_direct_messages: AtomicBool,
    deleted: Mutex<Vec<u64>>,
    notices: Mutex<Vec<(u64, Option<u64>, String)>>,
    direct_messages: Mutex<Vec<(u64, String)>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            kinds: DashMap::new(),
            lookups: AtomicUsize::new(0),
            fail_lookups: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_notices: AtomicBool::new(false),
            fail_direct_messages: AtomicBool::new(false),
            deleted: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
            direct_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn set_channel_kind(&self, channel_id: u64, kind: ChannelKind) {
        self.kinds.insert(channel_id, kind);
    }

    pub fn fail_channel_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub fn fail_notices(&self) {
        self.fail_notices.store(true, Ordering::SeqCst);
    }

    pub fn fail_direct_messages(&self) {
        self.fail_direct_messages.store(true, Ordering::SeqCst);
    }

    pub fn channel_lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<u64> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<(u64, Option<u64>, String)> {
        self.notices.lock().unwrap().clone()
    }

    pub fn direct_messages(&self) -> Vec<(u64, String)> {
        self.direct_messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModerationHost for MockHost {
    async fn delete_message(&self, message: &ModeratedMessage) -> Result<(), HostError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(HostError::Api {
                action: "delete message",
                reason: "missing permissions".to_string(),
            });
        }
        self.deleted.lock().unwrap().push(message.id);
        Ok(())
    }

    async fn channel_kind(&self, channel_id: u64) -> Result<ChannelKind, HostError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(HostError::Api {
                action: "get channel",
                reason: format!("unknown channel {}", channel_id),
            });
        }
        Ok(self
            .kinds
            .get(&channel_id)
            .map(|kind| *kind.value())
            .unwrap_or(ChannelKind::Open))
    }

    async fn post_channel_notice(
        &self,
        channel_id: u64,
        root_id: Option<u64>,
        text: &str,
    ) -> Result<(), HostError> {
        if self.fail_notices.load(Ordering::SeqCst) {
            return Err(HostError::Api {
                action: "post channel notice",
                reason: "channel archived".to_string(),
            });
        }
        self.notices
            .lock()
            .unwrap()
            .push((channel_id, root_id, text.to_string()));
        Ok(())
    }

    async fn send_direct_message(&self, user_id: u64, text: &str) -> Result<(), HostError> {
        if self.fail_direct_messages.load(Ordering::SeqCst) {
            return Err(HostError::Api {
                action: "send direct message",
                reason: "user has direct messages disabled".to_string(),
            });
        }
        self.direct_messages
            .lock()
            .unwrap()
            .push((user_id, text.to_string()));
        Ok(())
    }
}

// ============================================================================
// AUDIT
// ============================================================================

pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}
