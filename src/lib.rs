//! # taskloom
//!
//! **taskloom** is an in-process task-management engine for services that
//! run long units of work and want to watch them happen: submit an opaque
//! body, run it under a named concurrency class, stream every progress
//! mutation to any number of subscribers (who may join late and still see
//! the latest state), and spawn recurring instances from cron expressions.
//!
//! | Area | Description | Key types |
//! |------|-------------|-----------|
//! | **Engine** | Submit, cancel, search, delete, lifecycle | [`TaskEngine`], [`EngineBuilder`] |
//! | **Bodies** | Opaque user work with cancellation and progress | [`TaskBody`], [`BodyFn`], [`TaskControl`] |
//! | **Events** | Per-task and queue topics with replay and terminal close | [`Subscription`], [`EngineEvent`], [`QueueEvent`] |
//! | **Recurrence** | Cron-driven template spawning with a concurrency cap | [`RecurringSnapshot`] |
//! | **HTTP/SSE** | axum router projecting the engine onto the wire | [`api::router`] |
//! | **Errors** | Typed engine errors; body failures as values | [`EngineError`], [`TaskFailure`] |
//!
//! ```no_run
//! use taskloom::{BodyFn, Config, EngineBuilder, TaskControl, TaskFailure};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = EngineBuilder::new(Config::default()).build();
//!     engine.start().await;
//!
//!     let body = BodyFn::arc("demo", "default", |ctl: TaskControl, ctx: CancellationToken| async move {
//!         for step in 0..100 {
//!             if ctx.is_cancelled() {
//!                 return Err(TaskFailure::cancelled());
//!             }
//!             ctl.set_progress(step);
//!             tokio::time::sleep(std::time::Duration::from_millis(20)).await;
//!         }
//!         Ok(())
//!     });
//!     let task_id = engine.submit(body).await?;
//!
//!     let mut updates = engine.subscribe_task(&task_id).await?;
//!     while let Some(event) = updates.recv().await? {
//!         println!("{}", event.to_wire_json());
//!     }
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! The engine is in-process and ephemeral: nothing persists across
//! restarts, failed tasks stay observable until deleted, and successful
//! tasks are pruned beyond a retention cap.

pub mod api;
mod clock;
mod config;
mod core;
mod error;
mod events;
mod recurring;
mod tasks;

// ---- Public re-exports ----

pub use crate::clock::{Clock, ClockRef, ManualClock, SystemClock};
pub use crate::config::Config;
pub use crate::core::{default_engine, EngineBuilder, TaskEngine};
pub use crate::error::{EngineError, TaskFailure};
pub use crate::events::{task_topic, EngineEvent, QueueEvent, Subscription, QUEUE_TOPIC};
pub use crate::recurring::RecurringSnapshot;
pub use crate::tasks::{
    BodyFn, BodyRef, CpuDemoBody, IoDemoBody, TaskBody, TaskControl, TaskRecord, TaskSnapshot,
    TaskStatus,
};
