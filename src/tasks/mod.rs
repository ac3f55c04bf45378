//! Task model: records, snapshots, the body capability, and mutation handles.
//!
//! A task is a pair: a [`TaskRecord`] (pure data, owned by the engine) and a
//! [`TaskBody`] (opaque user code). The body never touches the record
//! directly; it mutates through a [`TaskControl`] handle, and the runner
//! publishes the record's [`TaskSnapshot`] projection whenever observable
//! fields change.
//!
//! - **record.rs**: `TaskStatus`, `TaskRecord`, `TaskSnapshot`
//! - **body.rs**: the `TaskBody` trait, `BodyRef`, and the `BodyFn` closure adapter
//! - **control.rs**: `TaskControl` and the engine-internal shared task state
//! - **samples.rs**: demo bodies backing the example factory endpoints

mod body;
mod control;
mod record;
mod samples;

pub use body::{BodyFn, BodyRef, TaskBody};
pub use control::TaskControl;
pub use record::{TaskRecord, TaskSnapshot, TaskStatus};
pub use samples::{CpuDemoBody, IoDemoBody};

pub(crate) use control::TaskShared;
