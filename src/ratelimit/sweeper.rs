//! Background eviction of idle keys.
//!
//! Keys are created lazily and pruned only when checked, so a key that stops
//! receiving traffic would otherwise stay in memory forever. The sweeper runs
//! [`RateLimiter::sweep_idle`] on a fixed interval, off the admission path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;
use crate::clock::Clock;
use crate::error::{LimiterError, Result};

/// Sweeper configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    interval: Duration,
}

impl SweeperConfig {
    /// Create a sweeper config with the given interval.
    ///
    /// Returns `LimiterError::Config` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(LimiterError::Config(
                "sweep interval must be greater than 0".to_string(),
            ));
        }
        Ok(Self { interval })
    }

    /// Time between sweeps.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Periodic idle-key sweeper for a [`RateLimiter`].
pub struct Sweeper {
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(limiter: Arc<RateLimiter>, clock: Arc<dyn Clock>, config: SweeperConfig) -> Self {
        Self {
            limiter,
            clock,
            config,
        }
    }

    /// Run a single sweep at the clock's current time.
    ///
    /// Returns the number of keys removed.
    pub fn sweep_once(&self) -> usize {
        let now = self.clock.now();
        let removed = self.limiter.sweep_idle(now);
        debug!(
            now = now,
            removed = removed,
            keys = self.limiter.key_count(),
            "Sweep completed"
        );
        removed
    }

    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// The first sweep happens one interval after start.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        info!(
            interval_ms = self.config.interval().as_millis() as u64,
            "Starting idle-key sweeper"
        );

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once();
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            info!("Idle-key sweeper stopped");
        });

        SweeperHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }
}

/// Handle to a running sweeper task.
///
/// Dropping the handle without calling [`SweeperHandle::shutdown`] stops the
/// loop at its next wakeup, since the shutdown channel closes.
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
