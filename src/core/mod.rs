//! Engine core: admission, dispatch, storage, and shutdown.
//!
//! The only public API re-exported from here is [`TaskEngine`] (plus its
//! builder and the process-wide default). Everything else is an internal
//! building block the engine wires together.
//!
//! ## Files & responsibilities
//! - **engine.rs**: public facade; owns the runtime (bus, store, semaphore
//!   registry, recurring engine), spawns the dispatcher pool, drives
//!   grace-bounded shutdown.
//! - **builder.rs**: constructs and wires the components.
//! - **intake.rs**: admission — record creation, `task_added` publication,
//!   FIFO intake queue; shared with the recurring engine.
//! - **runner.rs**: one task's execution: class admission, monitor loop
//!   (coalesced snapshots + progress hook), terminal capture, topic close.
//! - **store.rs**: insertion-ordered records, search, deletion, pruning.
//! - **semaphores.rs**: named concurrency classes.
//!
//! ## Event data-plane (who publishes what)
//! - **Submitter**  → queue `task_added`, task-topic queued snapshot
//! - **Runner**     → task-topic running/progress snapshots, terminal close
//! - **TaskStore**  → queue `task_removed` (delete, prune)
//! - **TaskEngine** → forced topic closes at shutdown
//!
//! ## Shutdown timeline
//! ```text
//! stop() → reject new work → stop recurring → cancel runtime token
//!        → dispatchers drain (≤ grace) → force-close open topics
//! ```

mod builder;
mod engine;
mod intake;
mod runner;
mod semaphores;
mod store;

pub use builder::EngineBuilder;
pub use engine::{default_engine, TaskEngine};

pub(crate) use intake::Submitter;
