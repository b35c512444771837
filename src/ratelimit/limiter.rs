//! Core sliding-window rate limiter.

use dashmap::DashMap;
use tracing::{debug, trace};

use super::window::{EventLog, OutOfOrderPolicy, WindowPolicy};
use crate::error::{LimiterError, Result};

/// Per-key sliding-window-log rate limiter.
///
/// Each key owns a log of admitted timestamps. A check at time `t` counts the
/// entries inside the half-open window `(t - window_seconds, t]`; the event is
/// admitted while that count is below `max_events`.
///
/// This struct is thread-safe and can be shared across threads behind an
/// `Arc`. The prune-count-append sequence for a key runs under the write lock
/// of the map shard holding that key, so concurrent checks for the same key
/// serialize while keys in other shards proceed independently.
#[derive(Debug)]
pub struct RateLimiter {
    policy: WindowPolicy,
    /// Event logs indexed by identity key
    histories: DashMap<String, EventLog>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_events` per `window_seconds` for each
    /// key, rejecting out-of-order timestamps.
    pub fn new(max_events: u64, window_seconds: i64) -> Result<Self> {
        Ok(Self::with_policy(WindowPolicy::new(max_events, window_seconds)?))
    }

    /// Create a limiter from an already validated policy.
    pub fn with_policy(policy: WindowPolicy) -> Self {
        Self {
            policy,
            histories: DashMap::new(),
        }
    }

    /// Decide whether an event for `key` at `timestamp` is admitted.
    ///
    /// Returns `Ok(true)` and records the event when fewer than `max_events`
    /// entries remain in `(timestamp - window_seconds, timestamp]`, otherwise
    /// returns `Ok(false)` without recording it.
    ///
    /// This is not a query. Every evaluated call is a new event attempt, so
    /// repeating a call with identical arguments can yield a different answer.
    /// Even a rejected call mutates state: it advances the key's last-seen
    /// timestamp, and any stale entries found during the check stay pruned.
    ///
    /// Errors are reserved for caller mistakes: an empty key, or (under
    /// [`OutOfOrderPolicy::Reject`]) a timestamp older than the latest one
    /// already evaluated for the key. Neither error touches any history.
    pub fn check_admission(&self, key: &str, timestamp: i64) -> Result<bool> {
        if key.is_empty() {
            return Err(LimiterError::InvalidKey);
        }

        trace!(key = %key, timestamp = timestamp, "Checking admission");

        let mut log = match self.histories.get_mut(key) {
            Some(log) => log,
            None => self.histories.entry(key.to_string()).or_insert_with(|| {
                debug!(key = %key, "Creating new event log");
                EventLog::new()
            }),
        };

        if self.policy.out_of_order() == OutOfOrderPolicy::Reject {
            if let Some(last_seen) = log.last_seen() {
                if timestamp < last_seen {
                    debug!(
                        key = %key,
                        timestamp = timestamp,
                        last_seen = last_seen,
                        "Rejecting out-of-order timestamp"
                    );
                    return Err(LimiterError::OutOfOrder {
                        key: key.to_string(),
                        timestamp,
                        last_seen,
                    });
                }
            }
        }

        log.observe(timestamp);
        let pruned = log.prune(self.policy.window_start(timestamp));
        let in_window = log.len() as u64;

        if in_window < self.policy.max_events() {
            log.push(timestamp);
            trace!(
                key = %key,
                timestamp = timestamp,
                pruned = pruned,
                in_window = in_window + 1,
                "Event admitted"
            );
            Ok(true)
        } else {
            debug!(
                key = %key,
                timestamp = timestamp,
                in_window = in_window,
                limit = self.policy.max_events(),
                "Rate limit exceeded"
            );
            Ok(false)
        }
    }

    /// Remove every key whose whole history is stale as of `now`.
    ///
    /// A key is idle once its last-seen timestamp is at or before
    /// `now - window_seconds`; its next check would prune everything anyway,
    /// so removing it leaves in-order admission decisions unchanged.
    ///
    /// Decisions for out-of-order timestamps can change. Under
    /// [`OutOfOrderPolicy::Reject`] a swept key forgets its last-seen marker,
    /// so an older timestamp is evaluated instead of failing. Under
    /// [`OutOfOrderPolicy::Accept`] an older timestamp whose window still
    /// covers the swept entries is admitted where it would have been denied.
    ///
    /// Returns the number of keys removed.
    pub fn sweep_idle(&self, now: i64) -> usize {
        let window_seconds = self.policy.window_seconds();
        let mut removed = 0;

        self.histories.retain(|key, log| {
            let idle = log.is_idle(now, window_seconds);
            if idle {
                trace!(key = %key, last_seen = ?log.last_seen(), "Evicting idle key");
                removed += 1;
            }
            !idle
        });

        if removed > 0 {
            debug!(
                removed = removed,
                remaining = self.histories.len(),
                now = now,
                "Swept idle keys"
            );
        }

        removed
    }

    /// Get the number of stored entries for a key, without pruning.
    ///
    /// Returns `None` if the key is not tracked.
    pub fn history_len(&self, key: &str) -> Option<usize> {
        self.histories.get(key).map(|log| log.len())
    }

    /// Get the last-seen timestamp for a key.
    pub fn last_seen(&self, key: &str) -> Option<i64> {
        self.histories.get(key).and_then(|log| log.last_seen())
    }

    /// Get the number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.histories.len()
    }

    /// Clear all histories.
    pub fn clear(&self) {
        self.histories.clear();
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    pub fn max_events(&self) -> u64 {
        self.policy.max_events()
    }

    pub fn window_seconds(&self) -> i64 {
        self.policy.window_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn reference_limiter() -> RateLimiter {
        RateLimiter::new(10, 60).unwrap()
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = reference_limiter();
        assert_eq!(limiter.key_count(), 0);
        assert_eq!(limiter.max_events(), 10);
        assert_eq!(limiter.window_seconds(), 60);
    }

    #[test]
    fn test_invalid_configuration_fails() {
        assert!(matches!(
            RateLimiter::new(0, 60),
            Err(LimiterError::Config(_))
        ));
        assert!(matches!(
            RateLimiter::new(10, -1),
            Err(LimiterError::Config(_))
        ));
    }

    #[test]
    fn test_boundary_exactness() {
        let limiter = reference_limiter();

        for i in 1..=10 {
            assert!(limiter.check_admission("userA", i * 5).unwrap());
        }

        // All ten entries are inside (-5, 55].
        assert!(!limiter.check_admission("userA", 55).unwrap());
        assert_eq!(limiter.history_len("userA"), Some(10));
    }

    #[test]
    fn test_window_edge_eviction() {
        let limiter = reference_limiter();
        for i in 1..=10 {
            assert!(limiter.check_admission("userA", i * 5).unwrap());
        }
        assert!(!limiter.check_admission("userA", 55).unwrap());

        // 5 > 64 - 60, still counted.
        assert!(!limiter.check_admission("userA", 64).unwrap());
        // 5 <= 65 - 60, pruned.
        assert!(limiter.check_admission("userA", 65).unwrap());
        assert_eq!(limiter.history_len("userA"), Some(10));
    }

    #[test]
    fn test_keys_are_isolated() {
        let limiter = RateLimiter::new(3, 60).unwrap();

        for ts in 1..=3 {
            assert!(limiter.check_admission("a", ts).unwrap());
        }
        assert!(!limiter.check_admission("a", 4).unwrap());

        for ts in 1..=3 {
            assert!(limiter.check_admission("b", ts).unwrap());
        }
        assert_eq!(limiter.key_count(), 2);
    }

    #[test]
    fn test_repeated_call_is_not_idempotent() {
        let limiter = RateLimiter::new(1, 60).unwrap();

        // Same arguments, different answers: the first call recorded an event.
        assert!(limiter.check_admission("user", 100).unwrap());
        assert!(!limiter.check_admission("user", 100).unwrap());
    }

    #[test]
    fn test_window_slides_over_sequence() {
        let limiter = RateLimiter::new(2, 10).unwrap();

        assert!(limiter.check_admission("user", 1).unwrap());
        assert!(limiter.check_admission("user", 9).unwrap());
        // (1, 11]: entry 1 pruned, 9 kept.
        assert!(limiter.check_admission("user", 11).unwrap());
        // (2, 12]: 9 and 11 in window.
        assert!(!limiter.check_admission("user", 12).unwrap());
        assert_eq!(limiter.history_len("user"), Some(2));

        // (9, 19]: 9 pruned, 11 kept.
        assert!(limiter.check_admission("user", 19).unwrap());
        // (10, 20]: 11 and 19 in window.
        assert!(!limiter.check_admission("user", 20).unwrap());
        // (19, 29]: both pruned.
        assert!(limiter.check_admission("user", 29).unwrap());
        assert_eq!(limiter.history_len("user"), Some(1));
    }

    #[test]
    fn test_count_never_exceeds_limit() {
        let limiter = RateLimiter::new(4, 7).unwrap();

        for ts in 0..200 {
            let allowed = limiter.check_admission("user", ts / 3).unwrap();
            let stored = limiter.history_len("user").unwrap();
            assert!(stored <= 4);
            if !allowed {
                // Only a full window rejects.
                assert_eq!(stored, 4, "rejected at {} with {} stored", ts / 3, stored);
            }
        }
    }

    #[test]
    fn test_empty_key_fails() {
        let limiter = reference_limiter();

        let err = assert_err!(limiter.check_admission("", 1));
        assert!(matches!(err, LimiterError::InvalidKey));
        assert_eq!(limiter.key_count(), 0);
    }

    #[test]
    fn test_out_of_order_rejected_by_default() {
        let limiter = reference_limiter();

        assert_ok!(limiter.check_admission("user", 50));
        let err = assert_err!(limiter.check_admission("user", 40));
        match err {
            LimiterError::OutOfOrder {
                key,
                timestamp,
                last_seen,
            } => {
                assert_eq!(key, "user");
                assert_eq!(timestamp, 40);
                assert_eq!(last_seen, 50);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // State untouched; equal timestamps are still in order.
        assert_eq!(limiter.history_len("user"), Some(1));
        assert!(limiter.check_admission("user", 50).unwrap());
    }

    #[test]
    fn test_last_seen_advances_on_rejection() {
        let limiter = RateLimiter::new(1, 60).unwrap();

        assert!(limiter.check_admission("user", 10).unwrap());
        assert!(!limiter.check_admission("user", 20).unwrap());
        assert_eq!(limiter.last_seen("user"), Some(20));
        assert_err!(limiter.check_admission("user", 15));
    }

    #[test]
    fn test_out_of_order_accepted_when_configured() {
        let policy = WindowPolicy::new(2, 60)
            .unwrap()
            .with_out_of_order(OutOfOrderPolicy::Accept);
        let limiter = RateLimiter::with_policy(policy);

        assert!(limiter.check_admission("user", 100).unwrap());
        // Window (-10, 50]: the later entry at 100 still counts.
        assert!(limiter.check_admission("user", 50).unwrap());
        assert!(!limiter.check_admission("user", 30).unwrap());

        // Window (70, 130]: 50 pruned, 100 kept.
        assert!(limiter.check_admission("user", 130).unwrap());
        assert_eq!(limiter.history_len("user"), Some(2));
        assert_eq!(limiter.last_seen("user"), Some(130));
    }

    #[test]
    fn test_independent_limiters() {
        let strict = RateLimiter::new(1, 60).unwrap();
        let lenient = RateLimiter::new(5, 60).unwrap();

        assert!(strict.check_admission("user", 1).unwrap());
        assert!(!strict.check_admission("user", 2).unwrap());

        assert!(lenient.check_admission("user", 1).unwrap());
        assert!(lenient.check_admission("user", 2).unwrap());
    }

    #[test]
    fn test_sweep_removes_only_idle_keys() {
        let limiter = reference_limiter();

        assert_ok!(limiter.check_admission("old", 5));
        assert_ok!(limiter.check_admission("fresh", 30));

        // At 65 the entry at 5 is out of (5, 65]; 30 is still in.
        assert_eq!(limiter.sweep_idle(65), 1);
        assert_eq!(limiter.history_len("old"), None);
        assert_eq!(limiter.history_len("fresh"), Some(1));
        assert_eq!(limiter.key_count(), 1);
    }

    #[test]
    fn test_sweep_does_not_change_decisions() {
        let swept = RateLimiter::new(2, 10).unwrap();
        let unswept = RateLimiter::new(2, 10).unwrap();

        for ts in [0, 3, 8, 12, 30, 31, 32, 45] {
            swept.sweep_idle(ts);
            assert_eq!(
                swept.check_admission("user", ts).unwrap(),
                unswept.check_admission("user", ts).unwrap(),
                "decision diverged at {ts}"
            );
        }
    }

    #[test]
    fn test_sweep_forgets_history_for_late_timestamps() {
        let policy = WindowPolicy::new(1, 60)
            .unwrap()
            .with_out_of_order(OutOfOrderPolicy::Accept);
        let swept = RateLimiter::with_policy(policy);
        let unswept = RateLimiter::with_policy(policy);

        assert!(swept.check_admission("user", 100).unwrap());
        assert!(unswept.check_admission("user", 100).unwrap());

        assert_eq!(swept.sweep_idle(160), 1);

        // The unswept limiter still counts the entry at 100 inside (-10, 50].
        assert!(swept.check_admission("user", 50).unwrap());
        assert!(!unswept.check_admission("user", 50).unwrap());
    }

    #[test]
    fn test_sweep_keeps_active_key() {
        let limiter = RateLimiter::new(2, 60).unwrap();

        assert_ok!(limiter.check_admission("user", 10));
        assert_ok!(limiter.check_admission("user", 20));
        assert_eq!(limiter.sweep_idle(69), 0);

        assert!(!limiter.check_admission("user", 69).unwrap());
    }

    #[test]
    fn test_clear() {
        let limiter = reference_limiter();

        assert_ok!(limiter.check_admission("user", 1));
        assert_eq!(limiter.key_count(), 1);

        limiter.clear();
        assert_eq!(limiter.key_count(), 0);
        assert_eq!(limiter.history_len("user"), None);
    }
}
