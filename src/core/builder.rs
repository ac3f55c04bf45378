//! # Builder wiring the engine's runtime components.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::{ClockRef, SystemClock};
use crate::config::Config;
use crate::core::engine::TaskEngine;
use crate::core::semaphores::SemaphoreRegistry;
use crate::core::store::TaskStore;
use crate::core::Submitter;
use crate::events::EventBus;
use crate::recurring::RecurringEngine;

/// Builder for a [`TaskEngine`] with optional overrides.
///
/// ## Example
/// ```rust
/// use taskloom::{Config, EngineBuilder};
///
/// let engine = EngineBuilder::new(Config::default())
///     .with_semaphore("gpu", 2)
///     .build();
/// # let _ = engine;
/// ```
pub struct EngineBuilder {
    cfg: Config,
    clock: ClockRef,
    semaphores: Vec<(String, usize)>,
}

impl EngineBuilder {
    /// Creates a builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            clock: Arc::new(SystemClock),
            semaphores: Vec::new(),
        }
    }

    /// Injects a clock (tests drive a [`ManualClock`](crate::ManualClock)).
    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = clock;
        self
    }

    /// Registers an additional semaphore class before the engine starts.
    pub fn with_semaphore(mut self, name: impl Into<String>, permits: usize) -> Self {
        self.semaphores.push((name.into(), permits));
        self
    }

    /// Builds the engine. Call [`TaskEngine::start`] to begin dispatching.
    pub fn build(self) -> Arc<TaskEngine> {
        let bus = Arc::new(EventBus::new(self.cfg.subscriber_buffer_clamped()));
        let store = Arc::new(TaskStore::new(Arc::clone(&bus), self.cfg.max_succeeded));
        let semaphores = Arc::new(SemaphoreRegistry::new(self.semaphores));

        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let runtime_token = CancellationToken::new();
        let shutdown = Arc::new(AtomicBool::new(false));

        let submitter = Arc::new(Submitter::new(
            Arc::clone(&bus),
            Arc::clone(&store),
            intake_tx,
            runtime_token.clone(),
            Arc::clone(&shutdown),
        ));
        let recurring = RecurringEngine::new(
            Arc::clone(&self.clock),
            Arc::clone(&submitter),
            Arc::clone(&bus),
            self.cfg.recurring_tick,
        );

        Arc::new(TaskEngine::new_internal(
            self.cfg,
            self.clock,
            bus,
            store,
            semaphores,
            submitter,
            recurring,
            runtime_token,
            shutdown,
            intake_rx,
        ))
    }
}
