// Audit sinks: structured log lines and a SQLite audit table.
//
// Sinks are fire-and-forget. The SQLite sink spawns its insert so the
// moderation workers never wait on disk.

use crate::core::moderation::{AuditRecord, AuditSink, StoreError};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;

/// Writes each record as a tracing event on the `audit` target.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        let meta = serde_json::to_string(&record.meta).unwrap_or_default();
        tracing::info!(
            target: "audit",
            event_type = %record.event_type,
            status = record.status.as_str(),
            meta = %meta,
            error = record.error_description.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

#[derive(Clone)]
pub struct SqliteAuditLog {
    pool: Pool<Sqlite>,
}

impl SqliteAuditLog {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                status TEXT NOT NULL,
                meta TEXT NOT NULL,
                error_description TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_log_event_time
                ON audit_log(event_type, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub async fn insert(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let meta = serde_json::to_string(&record.meta)
            .map_err(|e| StoreError::StorageError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (event_type, status, meta, error_description, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.event_type)
        .bind(record.status.as_str())
        .bind(meta)
        .bind(&record.error_description)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::StorageError(e.to_string()))?;
        Ok(())
    }
}

impl AuditSink for SqliteAuditLog {
    fn record(&self, record: &AuditRecord) {
        let log = self.clone();
        let record = record.clone();
        tokio::spawn(async move {
            if let Err(e) = log.insert(&record).await {
                tracing::error!(
                    event_type = %record.event_type,
                    err = %e,
                    "Failed to write audit record"
                );
            }
        });
    }
}

/// Sends every record to each inner sink.
pub struct AuditSinks {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditSinks {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for AuditSinks {
    fn record(&self, record: &AuditRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}
