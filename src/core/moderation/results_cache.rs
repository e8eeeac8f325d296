// Results cache - shared classification outcomes keyed by message text.
//
// Three independent consumers (notification gate, post processor, and
// anything else that asks) block on the same in-flight classification here.
// Keying by text instead of message id is deliberate: identical messages
// share one classifier call and one fate.

use super::moderation_models::{ClassificationOutcome, OutcomeState, Severities};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// How long an untouched outcome stays in the cache.
pub const RESULTS_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// A blocked consumer. Delivered to at most once, then dropped.
struct Waiter {
    id: u64,
    tx: oneshot::Sender<Option<ClassificationOutcome>>,
}

#[derive(Default)]
struct CacheState {
    outcomes: HashMap<String, ClassificationOutcome>,
    waiters: HashMap<String, Vec<Waiter>>,
    next_waiter_id: u64,
}

impl CacheState {
    /// Wake every waiter on `key` with `outcome` and forget them.
    fn notify_waiters(&mut self, key: &str, outcome: Option<&ClassificationOutcome>) {
        if let Some(waiters) = self.waiters.remove(key) {
            for waiter in waiters {
                // The receiver may already be gone if its wait timed out.
                let _ = waiter.tx.send(outcome.cloned());
            }
        }
    }
}

/// Outcome map and waiter map, guarded together by one mutex.
///
/// Nothing awaits while the lock is held; waiters block on their own
/// oneshot channel after releasing it.
pub struct ResultsCache {
    state: Mutex<CacheState>,
    ttl: Duration,
}

impl Default for ResultsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultsCache {
    pub fn new() -> Self {
        Self::with_ttl(RESULTS_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock can't leave the maps half-written,
        // so a poisoned lock is still usable.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a pending outcome for `key`.
    ///
    /// Returns true only when the caller must dispatch classification work.
    /// An existing entry (in any state) just gets its timestamp refreshed.
    pub fn mark_pending(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }

        let mut state = self.lock();
        if let Some(existing) = state.outcomes.get_mut(key) {
            existing.last_touched = Instant::now();
            return false;
        }

        state
            .outcomes
            .insert(key.to_string(), ClassificationOutcome::pending());
        true
    }

    pub fn set_flagged(&self, key: &str, severities: Severities) {
        self.store_terminal(key, ClassificationOutcome::flagged(severities));
    }

    pub fn set_clear(&self, key: &str, severities: Severities) {
        self.store_terminal(key, ClassificationOutcome::clear(severities));
    }

    pub fn set_errored(&self, key: &str, error: String) {
        self.store_terminal(key, ClassificationOutcome::errored(error));
    }

    fn store_terminal(&self, key: &str, outcome: ClassificationOutcome) {
        if key.is_empty() {
            return;
        }

        let mut state = self.lock();
        state.notify_waiters(key, Some(&outcome));
        state.outcomes.insert(key.to_string(), outcome);
    }

    /// Wait up to `timeout` for a terminal outcome on `key`.
    ///
    /// Returns immediately when one is already cached. `None` means the wait
    /// timed out or the entry was swept; callers treat both the same.
    pub async fn wait_for(&self, key: &str, timeout: Duration) -> Option<ClassificationOutcome> {
        if key.is_empty() {
            return None;
        }

        let (waiter_id, rx) = {
            let mut state = self.lock();
            if let Some(outcome) = state.outcomes.get(key) {
                if outcome.state.is_terminal() {
                    return Some(outcome.clone());
                }
            }

            let (tx, rx) = oneshot::channel();
            let id = state.next_waiter_id;
            state.next_waiter_id = state.next_waiter_id.wrapping_add(1);
            state
                .waiters
                .entry(key.to_string())
                .or_default()
                .push(Waiter { id, tx });
            (id, rx)
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without a value: closed by a sweep.
            Ok(Err(_)) => None,
            Err(_) => {
                self.remove_waiter(key, waiter_id);
                None
            }
        }
    }

    /// Drop a timed-out waiter so the waiter list stays bounded between sweeps.
    fn remove_waiter(&self, key: &str, waiter_id: u64) {
        let mut state = self.lock();
        if let Some(waiters) = state.waiters.get_mut(key) {
            waiters.retain(|waiter| waiter.id != waiter_id);
            if waiters.is_empty() {
                state.waiters.remove(key);
            }
        }
    }

    /// Remove outcomes older than the TTL, or everything when `force` is set.
    ///
    /// Waiters on removed keys are released with `None` so nobody blocks
    /// past a sweep. A forced sweep releases every outstanding waiter.
    pub fn sweep(&self, force: bool) -> usize {
        let mut state = self.lock();
        let now = Instant::now();
        let ttl = self.ttl;

        let expired: Vec<String> = state
            .outcomes
            .iter()
            .filter(|(_, outcome)| force || now.duration_since(outcome.last_touched) > ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.outcomes.remove(key);
            state.notify_waiters(key, None);
        }

        if force {
            let keys: Vec<String> = state.waiters.keys().cloned().collect();
            for key in keys {
                state.notify_waiters(&key, None);
            }
        }

        expired.len()
    }

    /// Current state for `key`, without waiting.
    #[allow(dead_code)]
    pub fn state_of(&self, key: &str) -> Option<OutcomeState> {
        self.lock().outcomes.get(key).map(|outcome| outcome.state)
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.lock().outcomes.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.lock().waiters.values().map(Vec::len).sum()
    }

    #[cfg(test)]
    fn last_touched(&self, key: &str) -> Option<Instant> {
        self.lock().outcomes.get(key).map(|outcome| outcome.last_touched)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn severities(category: &str, severity: i32) -> Severities {
        let mut result = Severities::new();
        result.insert(category.to_string(), severity);
        result
    }

    #[test]
    fn test_mark_pending_twice() {
        let cache = ResultsCache::new();

        assert!(cache.mark_pending("hello"));
        let first_touch = cache.last_touched("hello").unwrap();

        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.mark_pending("hello"));

        assert_eq!(cache.state_of("hello"), Some(OutcomeState::Pending));
        assert!(cache.last_touched("hello").unwrap() > first_touch);
    }

    #[test]
    fn test_mark_pending_on_terminal_entry_keeps_state() {
        let cache = ResultsCache::new();
        cache.set_clear("hello", Severities::new());

        assert!(!cache.mark_pending("hello"));
        assert_eq!(cache.state_of("hello"), Some(OutcomeState::Clear));
    }

    #[test]
    fn test_empty_key_is_ignored() {
        let cache = ResultsCache::new();

        assert!(!cache.mark_pending(""));
        cache.set_flagged("", severities("hate", 6));
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_terminal_outcome_returned_immediately() {
        let cache = ResultsCache::new();
        cache.set_flagged("bad", severities("violence", 7));

        let started = Instant::now();
        let outcome = cache
            .wait_for("bad", Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome.state, OutcomeState::Flagged);
        assert_eq!(outcome.severities.get("violence"), Some(&7));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_all_waiters_receive_the_outcome() {
        let cache = Arc::new(ResultsCache::new());
        cache.mark_pending("shared");

        let mut handles = Vec::new();
        for _ in 0..3 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.wait_for("shared", Duration::from_secs(5)).await
            }));
        }

        // Give every waiter time to register.
        while cache.waiter_count() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cache.set_clear("shared", severities("hate", 1));

        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.state, OutcomeState::Clear);
        }
        assert_eq!(cache.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_errored_outcome_carries_error() {
        let cache = Arc::new(ResultsCache::new());
        cache.mark_pending("text");

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.wait_for("text", Duration::from_secs(5)).await })
        };
        while cache.waiter_count() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cache.set_errored("text", "boom".to_string());

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.state, OutcomeState::Errored);
        assert_eq!(outcome.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_wait_times_out_within_bounds() {
        let cache = ResultsCache::new();
        let timeout = Duration::from_millis(50);

        let started = Instant::now();
        let outcome = cache.wait_for("never classified", timeout).await;
        let elapsed = started.elapsed();

        assert!(outcome.is_none());
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_timed_out_waiter_is_unregistered() {
        let cache = ResultsCache::new();
        cache.mark_pending("slow");

        assert!(cache
            .wait_for("slow", Duration::from_millis(10))
            .await
            .is_none());
        assert_eq!(cache.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_forced_sweep_releases_waiters() {
        let cache = Arc::new(ResultsCache::new());
        cache.mark_pending("pending");
        cache.set_clear("done", Severities::new());

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.wait_for("pending", Duration::from_secs(30)).await })
        };
        let orphan = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.wait_for("unknown", Duration::from_secs(30)).await })
        };
        while cache.waiter_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let started = Instant::now();
        assert_eq!(cache.sweep(true), 2);

        assert!(waiter.await.unwrap().is_none());
        assert!(orphan.await.unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_releases_waiters_on_expired_keys() {
        let cache = Arc::new(ResultsCache::with_ttl(Duration::from_millis(30)));
        cache.mark_pending("stale");

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.wait_for("stale", Duration::from_secs(10)).await })
        };
        while cache.waiter_count() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        let started = Instant::now();
        assert_eq!(cache.sweep(false), 1);

        assert!(waiter.await.unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(cache.waiter_count(), 0);
        assert_eq!(cache.state_of("stale"), None);
    }

    #[test]
    fn test_sweep_removes_only_expired_entries() {
        let cache = ResultsCache::with_ttl(Duration::from_millis(50));

        cache.mark_pending("expired");
        std::thread::sleep(Duration::from_millis(80));
        cache.mark_pending("fresh");

        assert_eq!(cache.sweep(false), 1);
        assert_eq!(cache.state_of("fresh"), Some(OutcomeState::Pending));
        assert_eq!(cache.state_of("expired"), None);
    }

    #[test]
    fn test_refresh_keeps_entry_alive() {
        let cache = ResultsCache::with_ttl(Duration::from_millis(50));

        cache.set_clear("repeat", Severities::new());
        std::thread::sleep(Duration::from_millis(30));
        cache.mark_pending("repeat");
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.sweep(false), 0);
        assert_eq!(cache.state_of("repeat"), Some(OutcomeState::Clear));
    }
}
