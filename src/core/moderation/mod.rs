// Core moderation module - the content moderation pipeline.
// Platform-agnostic: the host, classifier and stores come in through ports.

pub mod audit;
pub mod dispatch_processor;
pub mod exclusion;
pub mod moderation_config;
pub mod moderation_models;
pub mod moderation_ports;
pub mod moderation_service;
pub mod notification_gate;
pub mod post_processor;
pub mod results_cache;

#[cfg(test)]
pub mod test_support;

pub use audit::{AuditLogger, AuditRecord, AuditSink, AuditStatus};
pub use moderation_config::{BackendKind, ConfigError, ModerationConfig};
pub use moderation_models::*;
pub use moderation_ports::*;
pub use moderation_service::ModerationPipeline;
