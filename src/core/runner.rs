//! # Execution of one task: admission, monitoring, terminal recording.
//!
//! A dispatcher hands each dequeued task to [`Runner::execute`], which owns
//! the full lifecycle of a single run:
//!
//! ```text
//! dequeue ─► skip if already terminal (cancelled while queued)
//!         ─► acquire class permit (cancellable)
//!         ─► stamp started_at, status=running, publish
//!         ─► spawn monitor loop ──► progress_hook (panics caught)
//!         │                     └─► coalesced snapshot publication
//!         ─► body.run(ctl, token) under catch_unwind
//!         ─► record terminal (done / failed / cancelled / panic)
//!         ─► release permit
//!         ─► close topic with the final snapshot
//!         ─► prune succeeded records
//! ```
//!
//! ## Rules
//! - The monitor never publishes a terminal snapshot; the terminal event is
//!   always the topic's final event, published exactly once via `close`.
//! - Body errors and panics are captured into the record, never propagated.
//! - `started_at`/`completed_at` come from the injected clock and are
//!   stamped exactly once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{AcquireError, OwnedSemaphorePermit};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::ClockRef;
use crate::core::semaphores::SemaphoreRegistry;
use crate::core::store::TaskStore;
use crate::error::TaskFailure;
use crate::events::{task_topic, EngineEvent, EventBus};
use crate::tasks::{TaskControl, TaskShared, TaskStatus};

type PermitFuture = Pin<Box<dyn Future<Output = Result<OwnedSemaphorePermit, AcquireError>> + Send>>;

/// An in-flight semaphore acquisition, started at dequeue time.
///
/// The dispatcher polls the acquire once while it still holds the intake
/// queue, so tasks join their class's waiter queue in dequeue order — this
/// is what makes intake FIFO per semaphore class even though many
/// dispatchers run concurrently.
pub(crate) enum Admission {
    /// Permit was free at dequeue.
    Ready(Result<OwnedSemaphorePermit, AcquireError>),
    /// Waiting in the class FIFO.
    Pending(PermitFuture),
}

impl Admission {
    /// Starts acquiring the task's class permit and registers the waiter.
    ///
    /// Never suspends; the single `poll!` only enrolls the acquire in the
    /// semaphore's queue (or grabs a free permit on the spot).
    pub(crate) async fn begin(semaphores: &SemaphoreRegistry, shared: &TaskShared) -> Self {
        let semaphore = semaphores.get(&shared.lock().semaphore_name);
        let mut fut: PermitFuture = Box::pin(semaphore.acquire_owned());
        match futures::poll!(fut.as_mut()) {
            Poll::Ready(res) => Admission::Ready(res),
            Poll::Pending => Admission::Pending(fut),
        }
    }
}

/// Executes single tasks on behalf of the dispatcher pool.
pub(crate) struct Runner {
    pub(crate) bus: Arc<EventBus>,
    pub(crate) store: Arc<TaskStore>,
    pub(crate) semaphores: Arc<SemaphoreRegistry>,
    pub(crate) clock: ClockRef,
    pub(crate) publish_interval: Duration,
    pub(crate) hook_interval: Duration,
}

impl Runner {
    /// Runs one task to its terminal state.
    pub(crate) async fn execute(&self, shared: Arc<TaskShared>, admission: Admission) {
        let task_id = {
            let rec = shared.lock();
            if rec.status.is_terminal() {
                // Cancelled while queued; its topic is already closed.
                // Dropping the admission releases any permit or FIFO slot.
                return;
            }
            rec.task_id.clone()
        };
        let topic = task_topic(&task_id);

        let acquired = match admission {
            Admission::Ready(res) => res,
            Admission::Pending(mut fut) => {
                tokio::select! {
                    res = &mut fut => res,
                    _ = shared.cancel.cancelled() => {
                        self.finish_cancelled(&shared, &topic);
                        return;
                    }
                }
            }
        };
        let permit = match acquired {
            Ok(permit) => permit,
            Err(_closed) => {
                self.finish_cancelled(&shared, &topic);
                return;
            }
        };
        if shared.cancel.is_cancelled() || shared.lock().status.is_terminal() {
            drop(permit);
            self.finish_cancelled(&shared, &topic);
            return;
        }

        let running = {
            let mut rec = shared.lock();
            rec.status = TaskStatus::Running;
            rec.started_at = Some(self.clock.now_utc());
            rec.snapshot()
        };
        let _ = self.bus.publish(&topic, EngineEvent::Task(running));

        let monitor_stop = CancellationToken::new();
        let monitor = tokio::spawn(Self::monitor(
            Arc::clone(&shared),
            Arc::clone(&self.bus),
            topic.clone(),
            self.publish_interval,
            self.hook_interval,
            monitor_stop.clone(),
        ));

        let ctl = TaskControl::new(Arc::clone(&shared));
        let outcome = std::panic::AssertUnwindSafe(shared.body.run(ctl, shared.cancel.clone()))
            .catch_unwind()
            .await;

        monitor_stop.cancel();
        let _ = monitor.await;

        let final_snapshot = {
            let mut rec = shared.lock();
            match outcome {
                Ok(Ok(())) => {
                    if rec.status != TaskStatus::Failed {
                        rec.status = TaskStatus::Done;
                        rec.progress = 100;
                    }
                }
                Ok(Err(failure)) => {
                    if rec.status != TaskStatus::Failed {
                        rec.fail_with(&failure);
                    }
                    if failure.is_cancelled() {
                        debug!(task_id = %task_id, "body unwound after cancellation");
                    }
                }
                Err(panic) => {
                    let info = panic_message(panic.as_ref());
                    warn!(task_id = %task_id, info = %info, "task body panicked");
                    let trace = format!("panic in task body '{}': {info}", rec.task_type);
                    rec.fail_with(&TaskFailure::new("panic", &info).with_trace(trace));
                }
            }
            if rec.completed_at.is_none() {
                rec.completed_at = Some(self.clock.now_utc());
            }
            rec.snapshot()
        };
        drop(permit);

        let succeeded = final_snapshot.status == TaskStatus::Done;
        self.bus.close(&topic, Some(EngineEvent::Task(final_snapshot)));

        if succeeded {
            self.store.prune_succeeded().await;
        }
        // Deleted mid-run: the store already announced task_removed, the
        // topic just delivered its terminal event, nothing retains it now.
        if !self.store.contains(&task_id).await {
            self.bus.remove(&topic);
        }
    }

    /// Coalesced snapshot publication plus progress-hook sampling.
    async fn monitor(
        shared: Arc<TaskShared>,
        bus: Arc<EventBus>,
        topic: String,
        publish_every: Duration,
        hook_every: Duration,
        stop: CancellationToken,
    ) {
        let ctl = TaskControl::new(Arc::clone(&shared));
        let mut last = shared.snapshot();

        let mut publish_tick = interval(publish_every);
        publish_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut hook_tick = interval(hook_every);
        hook_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                // Task cancellation also ends monitoring; the terminal state
                // is published by the closing runner, not the monitor.
                _ = shared.cancel.cancelled() => break,
                _ = hook_tick.tick() => {
                    let body = Arc::clone(&shared.body);
                    let hook_ctl = ctl.clone();
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        body.progress_hook(&hook_ctl)
                    }))
                    .is_err()
                    {
                        warn!(topic = %topic, "progress hook panicked; ignoring");
                    }
                }
                _ = publish_tick.tick() => {
                    let snapshot = shared.snapshot();
                    // Terminal snapshots are left to the closing publication.
                    if snapshot != last && !snapshot.status.is_terminal() {
                        if bus.publish(&topic, EngineEvent::Task(snapshot.clone())).is_ok() {
                            last = snapshot;
                        }
                    }
                }
            }
        }
    }

    /// Records a cancellation observed before the body ever ran.
    ///
    /// Idempotent: a task the engine already failed synchronously (queued
    /// cancellation) is left untouched.
    fn finish_cancelled(&self, shared: &Arc<TaskShared>, topic: &str) {
        let snapshot = {
            let mut rec = shared.lock();
            if rec.status.is_terminal() {
                None
            } else {
                rec.fail_with(&TaskFailure::cancelled());
                rec.completed_at = Some(self.clock.now_utc());
                Some(rec.snapshot())
            }
        };
        if let Some(snapshot) = snapshot {
            self.bus.close(topic, Some(EngineEvent::Task(snapshot)));
        }
    }
}

/// Best-effort panic payload formatting.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
