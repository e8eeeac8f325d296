// Dispatch processor - rate-limited classification of queued message text.
//
// One bounded queue, one worker. Producers never block: a full queue drops
// the text and logs, and the cache entry stays pending until swept so any
// waiter times out instead of hanging.

use super::moderation_models::severity_above_threshold;
use super::moderation_ports::{Classifier, ClassifierError};
use super::results_cache::ResultsCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

/// Bounded queue size shared by both processors.
pub const MAX_QUEUE_SIZE: usize = 10_000;

/// Upper bound on a single classifier call.
pub const CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(15);

/// Classifications per minute when nothing else is configured.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 500;

/// How often expired cache entries are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub threshold: i32,
    pub rate_limit_per_minute: u32,
    pub classifier_timeout: Duration,
    pub sweep_interval: Duration,
    pub queue_capacity: usize,
}

impl DispatchSettings {
    pub fn new(threshold: i32, rate_limit_per_minute: u32) -> Self {
        Self {
            threshold,
            rate_limit_per_minute,
            classifier_timeout: CLASSIFIER_TIMEOUT,
            sweep_interval: SWEEP_INTERVAL,
            queue_capacity: MAX_QUEUE_SIZE,
        }
    }

    /// Pause between two classifier calls. Caps steady-state throughput
    /// at exactly the configured rate, with no bursts.
    pub fn dispatch_interval(&self) -> Duration {
        let rate = if self.rate_limit_per_minute == 0 {
            DEFAULT_RATE_LIMIT_PER_MINUTE
        } else {
            self.rate_limit_per_minute
        };
        Duration::from_secs(60) / rate
    }
}

/// Handle to the running dispatch worker and sweep ticker.
pub struct DispatchProcessor {
    cache: Arc<ResultsCache>,
    queue_tx: mpsc::Sender<String>,
    shutdown_tx: watch::Sender<bool>,
}

impl DispatchProcessor {
    /// Spawn the worker and the sweep ticker on the current runtime.
    pub fn start(
        cache: Arc<ResultsCache>,
        classifier: Arc<dyn Classifier>,
        settings: DispatchSettings,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweep_loop(
            Arc::clone(&cache),
            settings.sweep_interval,
            shutdown_rx.clone(),
        ));

        let worker = DispatchWorker {
            cache: Arc::clone(&cache),
            classifier,
            settings,
        };
        tokio::spawn(worker.run(queue_rx, shutdown_rx));

        Self {
            cache,
            queue_tx,
            shutdown_tx,
        }
    }

    /// Queue `text` for classification unless an outcome already exists.
    ///
    /// Never blocks. A full or closed queue drops the text.
    pub fn submit(&self, text: &str) {
        if text.is_empty() {
            return;
        }

        if !self.cache.mark_pending(text) {
            return;
        }

        match self.queue_tx.try_send(text.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::error!(
                    "Content moderation unable to analyze message: exceeded maximum queue size"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!(
                    "Content moderation unable to analyze message: processor is shut down"
                );
            }
        }
    }

    /// Stop the worker and the sweep ticker. Safe to call more than once.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl Drop for DispatchProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct DispatchWorker {
    cache: Arc<ResultsCache>,
    classifier: Arc<dyn Classifier>,
    settings: DispatchSettings,
}

impl DispatchWorker {
    async fn run(self, mut queue_rx: mpsc::Receiver<String>, mut shutdown: watch::Receiver<bool>) {
        let interval = self.settings.dispatch_interval();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let text = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = queue_rx.recv() => match next {
                    Some(text) => text,
                    None => break,
                },
            };

            self.classify(&text).await;

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::debug!("Moderation dispatch worker stopped");
    }

    /// Run one classification and publish its outcome to the cache.
    async fn classify(&self, text: &str) {
        let timeout = self.settings.classifier_timeout;
        let result = match tokio::time::timeout(timeout, self.classifier.classify(text)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout(timeout)),
        };

        match result {
            Ok(severities) => {
                if severity_above_threshold(&severities, self.settings.threshold) {
                    self.cache.set_flagged(text, severities);
                } else {
                    self.cache.set_clear(text, severities);
                }
            }
            Err(err) => {
                tracing::warn!(err = %err, "Content classification failed");
                self.cache.set_errored(text, err.to_string());
            }
        }
    }
}

async fn sweep_loop(
    cache: Arc<ResultsCache>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let removed = cache.sweep(false);
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired moderation results");
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::OutcomeState;
    use crate::core::moderation::test_support::MockClassifier;
    use std::time::Instant;

    fn fast_settings(threshold: i32) -> DispatchSettings {
        DispatchSettings {
            rate_limit_per_minute: 60_000,
            ..DispatchSettings::new(threshold, 0)
        }
    }

    #[test]
    fn test_dispatch_interval_follows_rate() {
        assert_eq!(
            DispatchSettings::new(5, 500).dispatch_interval(),
            Duration::from_millis(120)
        );
        assert_eq!(
            DispatchSettings::new(5, 60).dispatch_interval(),
            Duration::from_secs(1)
        );
        // Zero falls back to the default rate.
        assert_eq!(
            DispatchSettings::new(5, 0).dispatch_interval(),
            Duration::from_millis(120)
        );
    }

    #[tokio::test]
    async fn test_flagged_when_any_category_reaches_threshold() {
        let cache = Arc::new(ResultsCache::new());
        let classifier = Arc::new(MockClassifier::new());
        classifier.respond("bad text", &[("violence", 7), ("hate", 0)]);

        let processor =
            DispatchProcessor::start(Arc::clone(&cache), classifier.clone(), fast_settings(5));
        processor.submit("bad text");

        let outcome = cache
            .wait_for("bad text", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.state, OutcomeState::Flagged);
        assert_eq!(outcome.severities.get("violence"), Some(&7));
    }

    #[tokio::test]
    async fn test_clear_when_all_below_threshold() {
        let cache = Arc::new(ResultsCache::new());
        let classifier = Arc::new(MockClassifier::new());
        classifier.respond("fine text", &[("hate", 4)]);

        let processor =
            DispatchProcessor::start(Arc::clone(&cache), classifier.clone(), fast_settings(5));
        processor.submit("fine text");

        let outcome = cache
            .wait_for("fine text", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.state, OutcomeState::Clear);
    }

    #[tokio::test]
    async fn test_classifier_error_becomes_errored_outcome() {
        let cache = Arc::new(ResultsCache::new());
        let classifier = Arc::new(MockClassifier::new());
        classifier.fail_on("broken");

        let processor =
            DispatchProcessor::start(Arc::clone(&cache), classifier.clone(), fast_settings(5));
        processor.submit("broken");

        let outcome = cache
            .wait_for("broken", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.state, OutcomeState::Errored);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_slow_classifier_times_out() {
        let cache = Arc::new(ResultsCache::new());
        let classifier = Arc::new(MockClassifier::new().with_delay(Duration::from_secs(5)));

        let settings = DispatchSettings {
            classifier_timeout: Duration::from_millis(20),
            ..fast_settings(5)
        };
        let processor = DispatchProcessor::start(Arc::clone(&cache), classifier.clone(), settings);
        processor.submit("slow");

        let outcome = cache
            .wait_for("slow", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(outcome.state, OutcomeState::Errored);
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_duplicate_text_classified_once() {
        let cache = Arc::new(ResultsCache::new());
        let classifier = Arc::new(MockClassifier::new());

        let processor =
            DispatchProcessor::start(Arc::clone(&cache), classifier.clone(), fast_settings(5));
        processor.submit("same");
        processor.submit("same");

        cache.wait_for("same", Duration::from_secs(5)).await.unwrap();
        processor.submit("same");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(classifier.calls("same"), 1);
    }

    #[tokio::test]
    async fn test_texts_classified_in_submission_order() {
        let cache = Arc::new(ResultsCache::new());
        let classifier = Arc::new(MockClassifier::new());

        let processor =
            DispatchProcessor::start(Arc::clone(&cache), classifier.clone(), fast_settings(5));
        for text in ["one", "two", "three"] {
            processor.submit(text);
        }

        cache.wait_for("three", Duration::from_secs(5)).await.unwrap();
        assert_eq!(classifier.history(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_rate_limit_spaces_out_calls() {
        let cache = Arc::new(ResultsCache::new());
        let classifier = Arc::new(MockClassifier::new());

        // 600 per minute -> 100ms between calls.
        let settings = DispatchSettings::new(5, 600);
        let processor = DispatchProcessor::start(Arc::clone(&cache), classifier.clone(), settings);

        let started = Instant::now();
        processor.submit("first");
        processor.submit("second");
        cache.wait_for("second", Duration::from_secs(5)).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_leaves_pending() {
        let cache = Arc::new(ResultsCache::new());
        let classifier = Arc::new(MockClassifier::new().with_delay(Duration::from_millis(200)));

        let settings = DispatchSettings {
            queue_capacity: 1,
            ..fast_settings(5)
        };
        let processor = DispatchProcessor::start(Arc::clone(&cache), classifier.clone(), settings);

        processor.submit("a");
        // Wait for the worker to pick "a" up so the queue is empty again.
        while classifier.history().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        processor.submit("b");
        processor.submit("c");

        assert!(cache.wait_for("c", Duration::from_millis(400)).await.is_none());
        assert_eq!(cache.state_of("c"), Some(OutcomeState::Pending));
        assert_eq!(classifier.calls("c"), 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_does_not_panic() {
        let cache = Arc::new(ResultsCache::new());
        let classifier = Arc::new(MockClassifier::new());

        let processor =
            DispatchProcessor::start(Arc::clone(&cache), classifier.clone(), fast_settings(5));
        processor.shutdown();
        processor.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 0..5 {
            processor.submit(&format!("late {}", i));
        }
        assert_eq!(classifier.calls("late 0"), 0);
    }

    #[tokio::test]
    async fn test_empty_text_is_never_dispatched() {
        let cache = Arc::new(ResultsCache::new());
        let classifier = Arc::new(MockClassifier::new());

        let processor =
            DispatchProcessor::start(Arc::clone(&cache), classifier.clone(), fast_settings(5));
        processor.submit("");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.is_empty());
        assert!(classifier.history().is_empty());
    }
}
