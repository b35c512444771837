//! Sliding window policy and per-key event log.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{LimiterError, Result};

/// How a timestamp older than a key's last-seen timestamp is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfOrderPolicy {
    /// Fail the call with `LimiterError::OutOfOrder` and leave state untouched.
    #[default]
    Reject,
    /// Evaluate the call against the window ending at the supplied timestamp.
    Accept,
}

impl std::str::FromStr for OutOfOrderPolicy {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(OutOfOrderPolicy::Reject),
            "accept" => Ok(OutOfOrderPolicy::Accept),
            other => Err(LimiterError::Config(format!(
                "unknown out-of-order policy '{}' (expected 'reject' or 'accept')",
                other
            ))),
        }
    }
}

/// Validated, immutable limiter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    max_events: u64,
    window_seconds: i64,
    out_of_order: OutOfOrderPolicy,
}

impl WindowPolicy {
    /// Create a policy admitting at most `max_events` per trailing window of
    /// `window_seconds`.
    ///
    /// Both values must be positive; they are never clamped.
    pub fn new(max_events: u64, window_seconds: i64) -> Result<Self> {
        if max_events == 0 {
            return Err(LimiterError::Config(
                "max_events must be greater than 0".to_string(),
            ));
        }
        if window_seconds <= 0 {
            return Err(LimiterError::Config(format!(
                "window_seconds must be greater than 0, got {}",
                window_seconds
            )));
        }

        Ok(Self {
            max_events,
            window_seconds,
            out_of_order: OutOfOrderPolicy::default(),
        })
    }

    /// Set the out-of-order handling.
    pub fn with_out_of_order(mut self, out_of_order: OutOfOrderPolicy) -> Self {
        self.out_of_order = out_of_order;
        self
    }

    pub fn max_events(&self) -> u64 {
        self.max_events
    }

    pub fn window_seconds(&self) -> i64 {
        self.window_seconds
    }

    pub fn out_of_order(&self) -> OutOfOrderPolicy {
        self.out_of_order
    }

    /// Exclusive lower bound of the window ending at `timestamp`.
    pub fn window_start(&self, timestamp: i64) -> i64 {
        timestamp.saturating_sub(self.window_seconds)
    }
}

/// Admitted timestamps for one key.
///
/// Entries are kept in insertion order. Under the accept policy an
/// out-of-order timestamp may be appended after a larger one, so pruning
/// compares every entry rather than stopping at the first survivor.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    timestamps: VecDeque<i64>,
    last_seen: Option<i64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry at or before `window_start`.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self, window_start: i64) -> usize {
        let before = self.timestamps.len();
        self.timestamps.retain(|&ts| ts > window_start);
        before - self.timestamps.len()
    }

    /// Record an admitted event.
    pub fn push(&mut self, timestamp: i64) {
        self.timestamps.push_back(timestamp);
    }

    /// Advance the last-seen marker to `timestamp` if it is newer.
    pub fn observe(&mut self, timestamp: i64) {
        self.last_seen = Some(self.last_seen.map_or(timestamp, |seen| seen.max(timestamp)));
    }

    /// Greatest timestamp ever evaluated for this key, admitted or not.
    pub fn last_seen(&self) -> Option<i64> {
        self.last_seen
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.timestamps.iter().copied()
    }

    /// Whether a check at `now` would prune the whole history.
    ///
    /// Every stored entry is at or before `last_seen`, so once `last_seen`
    /// falls out of the window nothing in the log can count again for a
    /// check at or after `now`. An earlier, out-of-order check could still
    /// see those entries.
    pub fn is_idle(&self, now: i64, window_seconds: i64) -> bool {
        match self.last_seen {
            Some(seen) => seen <= now.saturating_sub(window_seconds),
            None => true,
        }
    }
}
