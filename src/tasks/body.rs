//! # Body capability: the user code a task runs.
//!
//! [`TaskBody`] is the seam between the engine and opaque work. A body:
//! - names its kind (used as the record's `task_type`),
//! - names its concurrency class (a registered semaphore, else `default`),
//! - does its work in [`run`](TaskBody::run), mutating display fields and
//!   progress through the [`TaskControl`] handle,
//! - may sample external progress in [`progress_hook`](TaskBody::progress_hook),
//! - can clone itself so recurrence templates can spawn fresh instances.
//!
//! ## Rules
//! - `run` receives a [`CancellationToken`] and **must** check it at
//!   reasonable intervals; the engine never kills a body forcibly.
//! - Returning `Err(TaskFailure)` records a terminal `failed`; returning
//!   `Ok(())` without an explicit failure records `done`.
//!
//! [`BodyFn`] wraps a closure as a body, mirroring the pattern of defining
//! one-off tasks without a dedicated struct.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskFailure;
use crate::tasks::control::TaskControl;

/// Shared handle to a body object.
pub type BodyRef = Arc<dyn TaskBody>;

/// Opaque, cancellable unit of work.
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    /// Stable kind name; becomes the record's `task_type`.
    fn kind(&self) -> &str;

    /// Concurrency class to acquire before running. Unregistered names fall
    /// back to `default`.
    fn semaphore(&self) -> &str {
        "default"
    }

    /// Performs the work.
    ///
    /// ### Cancellation
    /// The future must observe `ctx.is_cancelled()` (or select on
    /// `ctx.cancelled()`) and return promptly; a common convention is
    /// returning [`TaskFailure::cancelled`] so the record reflects the
    /// cancellation.
    async fn run(&self, ctl: TaskControl, ctx: CancellationToken) -> Result<(), TaskFailure>;

    /// Samples external progress (files, APIs) between publications.
    ///
    /// Invoked by the engine at a configurable cadence while the body runs.
    /// Panics are caught and logged, never propagated.
    fn progress_hook(&self, _ctl: &TaskControl) {}

    /// Clones this body for template spawning.
    ///
    /// Each clone must be an independent instance: recurrence instances run
    /// concurrently and must not share mutable state through the body.
    fn clone_body(&self) -> BodyRef;
}

/// Function-backed body.
///
/// Wraps a closure that creates a fresh future per run.
///
/// ## Example
/// ```rust
/// use taskloom::{BodyFn, BodyRef, TaskBody, TaskControl, TaskFailure};
///
/// let body: BodyRef = BodyFn::arc("greeter", "default", |ctl: TaskControl, _ctx| async move {
///     ctl.set_heading("hello");
///     ctl.set_progress(100);
///     Ok::<_, TaskFailure>(())
/// });
/// assert_eq!(body.kind(), "greeter");
/// ```
pub struct BodyFn<F> {
    inner: Arc<BodyFnInner<F>>,
}

struct BodyFnInner<F> {
    kind: Cow<'static, str>,
    semaphore: Cow<'static, str>,
    f: F,
}

impl<F> BodyFn<F> {
    /// Creates a function-backed body in the given semaphore class.
    pub fn new(
        kind: impl Into<Cow<'static, str>>,
        semaphore: impl Into<Cow<'static, str>>,
        f: F,
    ) -> Self {
        Self {
            inner: Arc::new(BodyFnInner {
                kind: kind.into(),
                semaphore: semaphore.into(),
                f,
            }),
        }
    }

    /// Creates the body and returns it as a shared [`BodyRef`]-compatible handle.
    pub fn arc(
        kind: impl Into<Cow<'static, str>>,
        semaphore: impl Into<Cow<'static, str>>,
        f: F,
    ) -> Arc<Self> {
        Arc::new(Self::new(kind, semaphore, f))
    }
}

#[async_trait]
impl<F, Fut> TaskBody for BodyFn<F>
where
    F: Fn(TaskControl, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskFailure>> + Send + 'static,
{
    fn kind(&self) -> &str {
        &self.inner.kind
    }

    fn semaphore(&self) -> &str {
        &self.inner.semaphore
    }

    async fn run(&self, ctl: TaskControl, ctx: CancellationToken) -> Result<(), TaskFailure> {
        (self.inner.f)(ctl, ctx).await
    }

    fn clone_body(&self) -> BodyRef {
        Arc::new(Self {
            inner: Arc::clone(&self.inner),
        })
    }
}
