//! Recurring tasks: cron-scheduled spawning of template instances.
//!
//! - **schedule.rs**: 5-field cron parsing and next-fire computation
//! - **info.rs**: per-recurrence state and its public snapshot
//! - **engine.rs**: the tick loop, capacity cap, and child watchers

mod engine;
mod info;
mod schedule;

pub use info::RecurringSnapshot;

pub(crate) use engine::RecurringEngine;
