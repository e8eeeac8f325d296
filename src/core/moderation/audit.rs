// Audit records for moderation decisions and channel management.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

pub const AUDIT_EVENT_CONTENT_MODERATION: &str = "contentModeration";
pub const AUDIT_EVENT_MANAGE_CHANNEL_MODERATION: &str = "manageChannelModeration";

pub const AUDIT_META_MESSAGE: &str = "message";
pub const AUDIT_META_EXCLUDED: &str = "exclusion_reason";
pub const AUDIT_META_FLAGGED: &str = "flagged";
pub const AUDIT_META_RESULT: &str = "result";
pub const AUDIT_META_THRESHOLD: &str = "threshold";
pub const AUDIT_META_CHANNEL_ID: &str = "channel_id";
pub const AUDIT_META_USER_ID: &str = "user_id";
pub const AUDIT_META_ACTION: &str = "action";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Attempt,
    Success,
    Fail,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Attempt => "attempt",
            AuditStatus::Success => "success",
            AuditStatus::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub event_type: String,
    pub status: AuditStatus,
    pub meta: BTreeMap<String, serde_json::Value>,
    pub error_description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn attempt(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            status: AuditStatus::Attempt,
            meta: BTreeMap::new(),
            error_description: None,
            created_at: Utc::now(),
        }
    }

    pub fn add_meta(&mut self, key: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.meta.insert(key.to_string(), value);
    }

    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.meta.get(key)
    }

    pub fn mark_success(&mut self) {
        self.status = AuditStatus::Success;
    }

    pub fn mark_fail(&mut self, description: &str, err: &dyn Display) {
        self.status = AuditStatus::Fail;
        self.error_description = Some(format!("{}: {}", description, err));
    }
}

/// Where audit records go. Fire-and-forget: a sink never reports back.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Finishes records and hands them to the sink when auditing is enabled.
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    enabled: bool,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>, enabled: bool) -> Self {
        Self { sink, enabled }
    }

    pub fn success(&self, mut record: AuditRecord) {
        if !self.enabled {
            return;
        }
        record.mark_success();
        self.sink.record(&record);
    }

    pub fn fail(&self, mut record: AuditRecord, description: &str, err: &dyn Display) {
        if !self.enabled {
            return;
        }
        record.mark_fail(description, err);
        self.sink.record(&record);
    }
}
