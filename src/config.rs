//! # Global engine configuration.
//!
//! [`Config`] centralizes the engine's knobs: dispatcher pool size, shutdown
//! grace period, snapshot publication cadence, subscriber buffering, the
//! succeeded-task retention cap, and the recurring tick period.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use taskloom::Config;
//!
//! let mut cfg = Config::default();
//! cfg.grace = Duration::from_secs(10);
//! cfg.max_succeeded = 25;
//!
//! assert_eq!(cfg.max_succeeded, 25);
//! ```

use std::time::Duration;

/// Global configuration for the engine.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of dispatcher workers draining the intake queue.
    ///
    /// Must exceed every semaphore limit so a fully contended class cannot
    /// stall unrelated classes.
    pub dispatchers: usize,
    /// Maximum time `stop()` waits for in-flight tasks to unwind.
    pub grace: Duration,
    /// Minimum interval between coalesced snapshot publications while a
    /// task runs. Terminal snapshots always publish immediately.
    pub publish_interval: Duration,
    /// Cadence at which a body's `progress_hook` is sampled.
    pub hook_interval: Duration,
    /// Bounded buffer depth per topic subscriber. A subscriber that falls
    /// this far behind is dropped rather than blocking the publisher.
    pub subscriber_buffer: usize,
    /// Retention cap for records in `done` status; older successes beyond
    /// the cap are pruned after each completion.
    pub max_succeeded: usize,
    /// Period of the recurring engine's scheduling tick.
    pub recurring_tick: Duration,
}

impl Default for Config {
    /// Provides the stock configuration:
    /// - `dispatchers = 20`
    /// - `grace = 5s`
    /// - `publish_interval = 100ms`
    /// - `hook_interval = 100ms`
    /// - `subscriber_buffer = 16`
    /// - `max_succeeded = 10`
    /// - `recurring_tick = 1s`
    fn default() -> Self {
        Self {
            dispatchers: 20,
            grace: Duration::from_secs(5),
            publish_interval: Duration::from_millis(100),
            hook_interval: Duration::from_millis(100),
            subscriber_buffer: 16,
            max_succeeded: 10,
            recurring_tick: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Dispatcher count clamped to at least one worker.
    pub(crate) fn dispatchers_clamped(&self) -> usize {
        self.dispatchers.max(1)
    }

    /// Subscriber buffer clamped to at least one slot (replay needs it).
    pub(crate) fn subscriber_buffer_clamped(&self) -> usize {
        self.subscriber_buffer.max(1)
    }
}
