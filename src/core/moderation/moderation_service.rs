// Moderation pipeline - the facade the host talks to.
//
// Owns the currently active pipeline (results cache, both processors,
// notification gate) as one immutable snapshot. A configuration change
// stops the old snapshot and installs a new one; hooks that run
// concurrently see either the old or the new one, never a mix.
//
// NO Discord dependencies here - the host comes in through ModerationHost.

use super::audit::{AuditLogger, AuditSink};
use super::dispatch_processor::{
    DispatchProcessor, DispatchSettings, CLASSIFIER_TIMEOUT, MAX_QUEUE_SIZE, SWEEP_INTERVAL,
};
use super::exclusion::{ExclusionPolicy, ExclusionRules};
use super::moderation_config::{ConfigError, ModerationConfig};
use super::moderation_models::ModeratedMessage;
use super::moderation_ports::{ClassifierFactory, ModerationHost};
use super::notification_gate::{NotificationGate, NOTIFICATION_WAIT_TIMEOUT};
use super::post_processor::{
    DecisionEngine, PostProcessor, PostProcessorSettings, POST_WAIT_TIMEOUT,
};
use super::results_cache::ResultsCache;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Every wait and interval the pipeline uses, in one place so tests can
/// shrink them.
#[derive(Debug, Clone)]
pub struct PipelineTimings {
    pub post_wait: Duration,
    pub notification_wait: Duration,
    pub classifier_timeout: Duration,
    pub sweep_interval: Duration,
    pub queue_capacity: usize,
}

impl Default for PipelineTimings {
    fn default() -> Self {
        Self {
            post_wait: POST_WAIT_TIMEOUT,
            notification_wait: NOTIFICATION_WAIT_TIMEOUT,
            classifier_timeout: CLASSIFIER_TIMEOUT,
            sweep_interval: SWEEP_INTERVAL,
            queue_capacity: MAX_QUEUE_SIZE,
        }
    }
}

/// One running configuration. Dropped as a whole on reconfiguration.
struct ActivePipeline {
    cache: Arc<ResultsCache>,
    exclusions: Arc<ExclusionRules>,
    dispatch: DispatchProcessor,
    post: PostProcessor,
    gate: NotificationGate,
    /// Channel ids from configuration, kept apart from stored ones so a
    /// store refresh can rebuild the union.
    configured_channels: HashSet<u64>,
}

impl ActivePipeline {
    fn stop(&self) {
        self.dispatch.shutdown();
        self.post.shutdown();
        // Anyone still waiting is released instead of hanging on a dead pipeline.
        self.cache.sweep(true);
    }
}

pub struct ModerationPipeline {
    host: Arc<dyn ModerationHost>,
    audit_sink: Arc<dyn AuditSink>,
    classifiers: Arc<dyn ClassifierFactory>,
    timings: PipelineTimings,
    self_bot_id: RwLock<Option<u64>>,
    stored_channels: RwLock<HashSet<u64>>,
    audit_enabled: AtomicBool,
    active: RwLock<Option<Arc<ActivePipeline>>>,
}

impl ModerationPipeline {
    pub fn new(
        host: Arc<dyn ModerationHost>,
        audit_sink: Arc<dyn AuditSink>,
        classifiers: Arc<dyn ClassifierFactory>,
    ) -> Self {
        Self::with_timings(host, audit_sink, classifiers, PipelineTimings::default())
    }

    pub fn with_timings(
        host: Arc<dyn ModerationHost>,
        audit_sink: Arc<dyn AuditSink>,
        classifiers: Arc<dyn ClassifierFactory>,
        timings: PipelineTimings,
    ) -> Self {
        Self {
            host,
            audit_sink,
            classifiers,
            timings,
            self_bot_id: RwLock::new(None),
            stored_channels: RwLock::new(HashSet::new()),
            audit_enabled: AtomicBool::new(false),
            active: RwLock::new(None),
        }
    }

    /// The bot's own user id. Takes effect on the next `apply_config`.
    pub fn set_self_bot_id(&self, bot_id: u64) {
        *self
            .self_bot_id
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(bot_id);
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<ActivePipeline>> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn swap_active(&self, next: Option<Arc<ActivePipeline>>) -> Option<Arc<ActivePipeline>> {
        let mut guard = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, next)
    }

    /// Stop whatever is running and start over from `config`.
    ///
    /// On error the pipeline stays disabled. The host keeps working either way.
    pub fn apply_config(&self, config: &ModerationConfig) -> Result<(), ConfigError> {
        self.deactivate();
        self.audit_enabled.store(config.audit_logging, Ordering::SeqCst);

        if !config.enabled {
            tracing::info!("Content moderation is disabled");
            return Ok(());
        }

        config.validate()?;
        let threshold = config.threshold_value()?;
        let next = self.build_active(config, threshold)?;
        self.install(next);

        tracing::info!(
            backend = %config.backend,
            threshold,
            rate_limit_per_minute = config.rate_limit_value(),
            "Content moderation enabled"
        );
        Ok(())
    }

    /// Start a fresh cache with both processors for an already validated `config`.
    fn build_active(
        &self,
        config: &ModerationConfig,
        threshold: i32,
    ) -> Result<ActivePipeline, ConfigError> {
        let classifier = self.classifiers.build(config)?;

        let configured_channels = config.excluded_channel_set();
        let policy = ExclusionPolicy {
            self_bot_id: *self
                .self_bot_id
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            excluded_user_ids: config.excluded_user_set(),
            excluded_channel_ids: self.channel_union(&configured_channels),
            exclude_direct_messages: config.exclude_direct_messages,
            exclude_private_channels: config.exclude_private_channels,
        };

        let cache = Arc::new(ResultsCache::new());
        let exclusions = Arc::new(ExclusionRules::new(policy));

        let dispatch = DispatchProcessor::start(
            Arc::clone(&cache),
            classifier,
            DispatchSettings {
                classifier_timeout: self.timings.classifier_timeout,
                sweep_interval: self.timings.sweep_interval,
                queue_capacity: self.timings.queue_capacity,
                ..DispatchSettings::new(threshold, config.rate_limit_value())
            },
        );

        let post = PostProcessor::start(DecisionEngine::new(
            Arc::clone(&cache),
            Arc::clone(&exclusions),
            Arc::clone(&self.host),
            AuditLogger::new(Arc::clone(&self.audit_sink), config.audit_logging),
            PostProcessorSettings {
                threshold,
                wait_timeout: self.timings.post_wait,
                queue_capacity: self.timings.queue_capacity,
            },
        ));

        let gate = NotificationGate::new(
            Arc::clone(&cache),
            Arc::clone(&exclusions),
            Arc::clone(&self.host),
            self.timings.notification_wait,
        );

        Ok(ActivePipeline {
            cache,
            exclusions,
            dispatch,
            post,
            gate,
            configured_channels,
        })
    }

    /// Make `next` the active pipeline. Two reloads can race, so whatever
    /// was still installed gets stopped here too.
    fn install(&self, next: ActivePipeline) {
        if let Some(replaced) = self.swap_active(Some(Arc::new(next))) {
            replaced.stop();
        }
    }

    /// Stop the running pipeline, if any.
    pub fn deactivate(&self) {
        if let Some(previous) = self.swap_active(None) {
            previous.stop();
        }
    }

    /// Replace the stored part of the excluded-channel set.
    pub fn refresh_excluded_channels(&self, stored: &[u64]) {
        *self
            .stored_channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = stored.iter().copied().collect();

        if let Some(active) = self.current() {
            let channels = self.channel_union(&active.configured_channels);
            let policy = active.exclusions.snapshot().with_excluded_channels(channels);
            active.exclusions.replace(policy);
        }
    }

    fn channel_union(&self, configured: &HashSet<u64>) -> HashSet<u64> {
        let stored = self
            .stored_channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        configured.union(&stored).copied().collect()
    }

    /// Logger for management actions, following the configured audit flag.
    pub fn audit_logger(&self) -> AuditLogger {
        AuditLogger::new(
            Arc::clone(&self.audit_sink),
            self.audit_enabled.load(Ordering::SeqCst),
        )
    }

    // ========================================================================
    // HOST HOOKS
    // ========================================================================

    fn is_self(&self, message: &ModeratedMessage) -> bool {
        *self
            .self_bot_id
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            == Some(message.author_id)
    }

    /// A message is about to be created. Starts classification; never blocks.
    ///
    /// The bot's own notices are never classified; they would only be
    /// skipped as "self" afterwards.
    pub fn before_create(&self, message: &ModeratedMessage) {
        if self.is_self(message) {
            return;
        }
        if let Some(active) = self.current() {
            active.dispatch.submit(&message.text);
        }
    }

    /// A message is about to be edited.
    pub fn before_update(&self, message: &ModeratedMessage) {
        self.before_create(message);
    }

    /// A message is now visible. Queues the delete-or-pass decision.
    pub fn after_create(&self, message: ModeratedMessage) {
        if let Some(active) = self.current() {
            active.post.submit(message);
        }
    }

    pub fn after_update(&self, message: ModeratedMessage) {
        self.after_create(message);
    }

    /// The host is about to deliver a notification for `message`.
    ///
    /// Returns a reason when delivery should be suppressed. Discord has no
    /// such hook, so only other hosts call this.
    #[allow(dead_code)]
    pub async fn before_notification(&self, message: &ModeratedMessage) -> Option<String> {
        let active = self.current()?;
        let decision = active.gate.should_suppress(message).await;
        decision.suppress.then_some(decision.reason)
    }
}

impl Drop for ModerationPipeline {
    fn drop(&mut self) {
        self.deactivate();
    }
}

// ============================================================================
// TESTS
// ============================================================================
