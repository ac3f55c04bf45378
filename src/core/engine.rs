//! # TaskEngine: the public facade.
//!
//! Owns every runtime component and wires them together:
//!
//! ```text
//! caller ──► submit(body) ──► Submitter ──► Store + queue topic + intake FIFO
//!                                               │
//!                 dispatcher pool (N workers) ◄─┘
//!                     │  dequeue → begin class acquire (FIFO per class)
//!                     └─► Runner::execute → body → terminal → close topic
//!
//! RecurringEngine ──► tick ──► Submitter (parent_id = recurring_id)
//!
//! subscribers ──► EventBus topics (task/<id>, queue)
//! ```
//!
//! ## Rules
//! - Dispatchers outnumber every semaphore limit, so a fully contended
//!   class never stalls unrelated classes.
//! - `stop()` stops the recurring engine first, cancels in-flight task
//!   tokens, waits up to `Config::grace`, then force-closes every topic
//!   that is still open with a final snapshot.
//! - One engine per host process is the intended shape; [`default_engine`]
//!   is a convenience for hosts that want exactly that.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::ClockRef;
use crate::config::Config;
use crate::core::runner::{Admission, Runner};
use crate::core::semaphores::SemaphoreRegistry;
use crate::core::store::TaskStore;
use crate::core::Submitter;
use crate::error::{EngineError, TaskFailure};
use crate::events::{task_topic, EngineEvent, EventBus, Subscription, QUEUE_TOPIC};
use crate::recurring::{RecurringEngine, RecurringSnapshot};
use crate::tasks::{BodyRef, TaskShared, TaskSnapshot, TaskStatus};

/// In-process task-management engine.
///
/// Built by [`EngineBuilder`](crate::EngineBuilder); started once with
/// [`start`](TaskEngine::start) and torn down with [`stop`](TaskEngine::stop).
pub struct TaskEngine {
    cfg: Config,
    clock: ClockRef,
    bus: Arc<EventBus>,
    store: Arc<TaskStore>,
    semaphores: Arc<SemaphoreRegistry>,
    submitter: Arc<Submitter>,
    recurring: Arc<RecurringEngine>,
    runtime_token: CancellationToken,
    shutdown: Arc<AtomicBool>,
    started: AtomicBool,
    intake_rx: StdMutex<Option<mpsc::UnboundedReceiver<Arc<TaskShared>>>>,
    workers: Mutex<Option<JoinSet<()>>>,
}

impl TaskEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_internal(
        cfg: Config,
        clock: ClockRef,
        bus: Arc<EventBus>,
        store: Arc<TaskStore>,
        semaphores: Arc<SemaphoreRegistry>,
        submitter: Arc<Submitter>,
        recurring: Arc<RecurringEngine>,
        runtime_token: CancellationToken,
        shutdown: Arc<AtomicBool>,
        intake_rx: mpsc::UnboundedReceiver<Arc<TaskShared>>,
    ) -> Self {
        Self {
            cfg,
            clock,
            bus,
            store,
            semaphores,
            submitter,
            recurring,
            runtime_token,
            shutdown,
            started: AtomicBool::new(false),
            intake_rx: StdMutex::new(Some(intake_rx)),
            workers: Mutex::new(None),
        }
    }

    /// Spawns the dispatcher pool and the recurring tick. Idempotent.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let rx = self
            .intake_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("intake receiver taken exactly once");
        let rx = Arc::new(Mutex::new(rx));

        let mut set = JoinSet::new();
        for _ in 0..self.cfg.dispatchers_clamped() {
            let rx = Arc::clone(&rx);
            let token = self.runtime_token.clone();
            let runner = self.runner();
            set.spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        let item = tokio::select! {
                            _ = token.cancelled() => None,
                            item = rx.recv() => item,
                        };
                        match item {
                            // Enroll in the class FIFO before the next
                            // record can be dequeued.
                            Some(shared) => {
                                let admission =
                                    Admission::begin(&runner.semaphores, &shared).await;
                                Some((shared, admission))
                            }
                            None => None,
                        }
                    };
                    match next {
                        Some((shared, admission)) => runner.execute(shared, admission).await,
                        None => break,
                    }
                }
            });
        }
        *self.workers.lock().await = Some(set);

        Arc::clone(&self.recurring).run();
        info!(dispatchers = self.cfg.dispatchers_clamped(), "task engine started");
    }

    /// Stops accepting work, drains in-flight tasks within the grace
    /// period, then force-closes every topic that is still open.
    pub async fn stop(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Recurring first, so no new submissions arrive mid-shutdown.
        self.recurring.stop();
        self.runtime_token.cancel();

        if let Some(mut set) = self.workers.lock().await.take() {
            let drained = async {
                while set.join_next().await.is_some() {}
            };
            if timeout(self.cfg.grace, drained).await.is_err() {
                warn!(grace = ?self.cfg.grace, "grace period exceeded; aborting dispatchers");
                set.abort_all();
                while set.join_next().await.is_some() {}
            }
        }

        for name in self.bus.open_topics() {
            let final_event = match name.strip_prefix("task/") {
                Some(task_id) => self
                    .store
                    .get(task_id)
                    .await
                    .map(|shared| EngineEvent::Task(shared.snapshot())),
                None => None,
            };
            self.bus.close(&name, final_event);
        }
        info!("task engine stopped");
    }

    // ---- Tasks ----

    /// Submits a body for execution; returns the new task id.
    pub async fn submit(&self, body: BodyRef) -> Result<String, EngineError> {
        self.submitter.submit(body, None).await
    }

    /// Cancels a task.
    ///
    /// A `queued` task is failed with `error_type = "cancelled"` and its
    /// topic closed synchronously. A `running` task is signalled through its
    /// cancellation token and records the failure when the body unwinds.
    /// Cancelling a terminal task is a no-op.
    pub async fn cancel(&self, task_id: &str) -> Result<(), EngineError> {
        let shared = self
            .store
            .get(task_id)
            .await
            .ok_or_else(|| EngineError::not_found(task_id))?;

        let queued_final = {
            let mut rec = shared.lock();
            if rec.status == TaskStatus::Queued {
                rec.fail_with(&TaskFailure::cancelled());
                rec.completed_at = Some(self.clock.now_utc());
                Some(rec.snapshot())
            } else {
                None
            }
        };
        shared.cancel.cancel();
        if let Some(snapshot) = queued_final {
            self.bus
                .close(&task_topic(task_id), Some(EngineEvent::Task(snapshot)));
        }
        Ok(())
    }

    /// Snapshot of one task, if it is still stored.
    pub async fn get(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.store.get(task_id).await.map(|shared| shared.snapshot())
    }

    /// Snapshots of all stored tasks, in insertion order.
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        self.store.list().await
    }

    /// Ids of tasks whose record matches every criterion by equality.
    pub async fn search(
        &self,
        criteria: &serde_json::Map<String, serde_json::Value>,
    ) -> Vec<String> {
        self.store.search(criteria).await
    }

    /// Removes a task from the store, announcing `task_removed`.
    pub async fn delete(&self, task_id: &str) -> Result<(), EngineError> {
        if self.store.delete(task_id).await {
            Ok(())
        } else {
            Err(EngineError::not_found(task_id))
        }
    }

    /// Removes every terminal task. Returns `(done_count, failed_count)`.
    pub async fn delete_completed(&self) -> (usize, usize) {
        self.store.delete_completed().await
    }

    // ---- Subscriptions ----

    /// Subscribes to one task's topic. Works at any point in the task's
    /// life, including after completion (replay of the final snapshot).
    pub async fn subscribe_task(&self, task_id: &str) -> Result<Subscription, EngineError> {
        if self.submitter.shutting_down() {
            return Err(EngineError::ShutdownInProgress);
        }
        if !self.store.contains(task_id).await {
            return Err(EngineError::not_found(task_id));
        }
        Ok(self.bus.subscribe(&task_topic(task_id)))
    }

    /// Subscribes to queue membership events.
    pub fn subscribe_queue(&self) -> Result<Subscription, EngineError> {
        if self.submitter.shutting_down() {
            return Err(EngineError::ShutdownInProgress);
        }
        Ok(self.bus.subscribe(QUEUE_TOPIC))
    }

    // ---- Recurring ----

    /// Registers a recurrence and spawns its initial instance.
    pub async fn add_recurring(
        &self,
        cron_expression: &str,
        template: BodyRef,
        max_concurrent: usize,
    ) -> Result<String, EngineError> {
        if self.submitter.shutting_down() {
            return Err(EngineError::ShutdownInProgress);
        }
        self.recurring
            .add(cron_expression, template, max_concurrent)
            .await
    }

    /// Deletes a recurrence configuration. Active children keep running.
    pub async fn remove_recurring(&self, recurring_id: &str) -> Result<(), EngineError> {
        self.recurring.remove(recurring_id).await
    }

    /// Resumes spawning for a disabled recurrence.
    pub async fn enable_recurring(&self, recurring_id: &str) -> Result<(), EngineError> {
        self.recurring.enable(recurring_id).await
    }

    /// Stops future spawns; never cancels active children.
    pub async fn disable_recurring(&self, recurring_id: &str) -> Result<(), EngineError> {
        self.recurring.disable(recurring_id).await
    }

    /// One recurrence's current view.
    pub async fn get_recurring(&self, recurring_id: &str) -> Option<RecurringSnapshot> {
        self.recurring.get(recurring_id).await
    }

    /// All recurrences, oldest first.
    pub async fn list_recurring(&self) -> Vec<RecurringSnapshot> {
        self.recurring.list().await
    }

    fn runner(&self) -> Runner {
        Runner {
            bus: Arc::clone(&self.bus),
            store: Arc::clone(&self.store),
            semaphores: Arc::clone(&self.semaphores),
            clock: Arc::clone(&self.clock),
            publish_interval: self.cfg.publish_interval,
            hook_interval: self.cfg.hook_interval,
        }
    }
}

static DEFAULT_ENGINE: OnceLock<Arc<TaskEngine>> = OnceLock::new();

/// Process-wide engine with stock configuration.
///
/// Convenience for hosts that want exactly one engine; the host still owns
/// the lifecycle (`start` at boot, `stop` at shutdown).
pub fn default_engine() -> Arc<TaskEngine> {
    Arc::clone(DEFAULT_ENGINE.get_or_init(|| crate::core::builder::EngineBuilder::new(Config::default()).build()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::time::Duration;

    use crate::core::builder::EngineBuilder;
    use crate::events::QueueEvent;
    use crate::tasks::{BodyFn, TaskControl};

    fn quick_config() -> Config {
        Config {
            publish_interval: Duration::from_millis(10),
            hook_interval: Duration::from_millis(10),
            grace: Duration::from_millis(500),
            ..Config::default()
        }
    }

    async fn started_engine() -> Arc<TaskEngine> {
        let engine = EngineBuilder::new(quick_config()).build();
        engine.start().await;
        engine
    }

    async fn wait_for<F, Fut>(mut cond: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                if cond().await {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not met within 5s");
    }

    fn sleeper(kind: &'static str, class: &'static str, ms: u64) -> BodyRef {
        BodyFn::arc(kind, class, move |_ctl: TaskControl, _ctx: CancellationToken| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(())
        })
    }

    /// Body that blocks until `release` is cancelled.
    fn gated(kind: &'static str, class: &'static str, release: CancellationToken) -> BodyRef {
        BodyFn::arc(kind, class, move |_ctl: TaskControl, ctx: CancellationToken| {
            let release = release.clone();
            async move {
                tokio::select! {
                    _ = release.cancelled() => Ok(()),
                    _ = ctx.cancelled() => Err(TaskFailure::cancelled()),
                }
            }
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submit_then_list_yields_ids_in_submission_order() {
        let engine = started_engine().await;
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(engine.submit(sleeper("quick", "multiple", 5)).await.unwrap());
        }
        let listed: Vec<String> = engine.list().await.into_iter().map(|s| s.task_id).collect();
        assert_eq!(listed, ids);
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_class_serializes_execution() {
        let engine = started_engine().await;
        let a = engine.submit(sleeper("serial", "single", 50)).await.unwrap();
        let b = engine.submit(sleeper("serial", "single", 50)).await.unwrap();
        let c = engine.submit(sleeper("serial", "single", 50)).await.unwrap();

        wait_for(|| {
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .list()
                    .await
                    .iter()
                    .all(|s| s.status == TaskStatus::Done)
            }
        })
        .await;

        let snap = |id: &String| {
            let engine = Arc::clone(&engine);
            let id = id.clone();
            async move { engine.get(&id).await.unwrap() }
        };
        let (sa, sb, sc) = (snap(&a).await, snap(&b).await, snap(&c).await);

        // FIFO start order within the class, and no interval overlap.
        assert!(sa.started_at < sb.started_at);
        assert!(sb.started_at < sc.started_at);
        assert!(sa.completed_at <= sb.started_at);
        assert!(sb.completed_at <= sc.started_at);
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn multiple_class_runs_ten_wide() {
        let engine = started_engine().await;
        let release = CancellationToken::new();
        for _ in 0..12 {
            engine
                .submit(gated("wide", "multiple", release.clone()))
                .await
                .unwrap();
        }

        wait_for(|| {
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .list()
                    .await
                    .iter()
                    .filter(|s| s.status == TaskStatus::Running)
                    .count()
                    == 10
            }
        })
        .await;

        let snaps = engine.list().await;
        let running = snaps.iter().filter(|s| s.status == TaskStatus::Running).count();
        let queued = snaps.iter().filter(|s| s.status == TaskStatus::Queued).count();
        assert_eq!((running, queued), (10, 2));

        release.cancel();
        wait_for(|| {
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .list()
                    .await
                    .iter()
                    .all(|s| s.status == TaskStatus::Done)
            }
        })
        .await;
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn late_subscriber_sees_final_snapshot_then_end() {
        let engine = started_engine().await;
        let body = BodyFn::arc("late", "default", |ctl: TaskControl, _ctx: CancellationToken| async move {
            ctl.set_progress(50);
            Ok(())
        });
        let id = engine.submit(body).await.unwrap();

        wait_for(|| {
            let engine = Arc::clone(&engine);
            let id = id.clone();
            async move { engine.get(&id).await.unwrap().status == TaskStatus::Done }
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut sub = engine.subscribe_task(&id).await.unwrap();
        let first = sub.recv().await.unwrap().expect("replay of final snapshot");
        let snap = first.task_snapshot().unwrap();
        assert_eq!(snap.status, TaskStatus::Done);
        assert_eq!(snap.progress, 100);
        assert!(sub.recv().await.unwrap().is_none(), "stream must end");
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_is_captured_and_survives_pruning() {
        let engine = started_engine().await;
        let bad = BodyFn::arc("bad", "default", |_ctl: TaskControl, _ctx: CancellationToken| async {
            Err(TaskFailure::new("ValueError", "boom"))
        });
        let failed_id = engine.submit(bad).await.unwrap();

        wait_for(|| {
            let engine = Arc::clone(&engine);
            let id = failed_id.clone();
            async move { engine.get(&id).await.unwrap().status == TaskStatus::Failed }
        })
        .await;

        let snap = engine.get(&failed_id).await.unwrap();
        assert_eq!(snap.error_type.as_deref(), Some("ValueError"));
        assert_eq!(snap.error_message.as_deref(), Some("boom"));
        assert!(snap.error_traceback.as_deref().is_some_and(|t| !t.is_empty()));

        // Successes prune; the failure stays.
        for _ in 0..12 {
            engine.submit(sleeper("filler", "multiple", 1)).await.unwrap();
        }
        wait_for(|| {
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .list()
                    .await
                    .iter()
                    .all(|s| s.status.is_terminal())
            }
        })
        .await;
        let done = engine
            .list()
            .await
            .iter()
            .filter(|s| s.status == TaskStatus::Done)
            .count();
        assert!(done <= 10);
        assert!(engine.get(&failed_id).await.is_some());
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_twice_reports_not_found() {
        let engine = started_engine().await;
        let id = engine.submit(sleeper("quick", "default", 1)).await.unwrap();
        wait_for(|| {
            let engine = Arc::clone(&engine);
            let id = id.clone();
            async move { engine.get(&id).await.unwrap().status == TaskStatus::Done }
        })
        .await;

        engine.delete(&id).await.unwrap();
        let err = engine.delete(&id).await.unwrap_err();
        assert_eq!(err.as_label(), "not_found");
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancel_queued_task_fails_it_synchronously() {
        let engine = started_engine().await;
        let release = CancellationToken::new();
        let _running = engine
            .submit(gated("gate", "single", release.clone()))
            .await
            .unwrap();
        let queued = engine
            .submit(gated("gate", "single", release.clone()))
            .await
            .unwrap();

        wait_for(|| {
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .list()
                    .await
                    .iter()
                    .any(|s| s.status == TaskStatus::Running)
            }
        })
        .await;

        engine.cancel(&queued).await.unwrap();
        let snap = engine.get(&queued).await.unwrap();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert_eq!(snap.error_type.as_deref(), Some("cancelled"));

        // Its topic is already terminal: replay then end-of-stream.
        let mut sub = engine.subscribe_task(&queued).await.unwrap();
        assert!(sub.recv().await.unwrap().is_some());
        assert!(sub.recv().await.unwrap().is_none());

        release.cancel();
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancel_running_task_is_best_effort() {
        let engine = started_engine().await;
        let release = CancellationToken::new();
        let id = engine
            .submit(gated("gate", "default", release.clone()))
            .await
            .unwrap();

        wait_for(|| {
            let engine = Arc::clone(&engine);
            let id = id.clone();
            async move { engine.get(&id).await.unwrap().status == TaskStatus::Running }
        })
        .await;

        engine.cancel(&id).await.unwrap();
        wait_for(|| {
            let engine = Arc::clone(&engine);
            let id = id.clone();
            async move { engine.get(&id).await.unwrap().status == TaskStatus::Failed }
        })
        .await;
        assert_eq!(
            engine.get(&id).await.unwrap().error_type.as_deref(),
            Some("cancelled")
        );
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn deleting_running_task_keeps_its_topic_until_terminal() {
        let engine = started_engine().await;
        let release = CancellationToken::new();
        let id = engine
            .submit(gated("gate", "default", release.clone()))
            .await
            .unwrap();

        wait_for(|| {
            let engine = Arc::clone(&engine);
            let id = id.clone();
            async move { engine.get(&id).await.unwrap().status == TaskStatus::Running }
        })
        .await;

        let mut task_sub = engine.subscribe_task(&id).await.unwrap();
        let mut queue_sub = engine.subscribe_queue().unwrap();

        engine.delete(&id).await.unwrap();

        // task_removed lands promptly on the queue topic.
        let removed = timeout(Duration::from_millis(100), async {
            loop {
                let ev = queue_sub.recv().await.unwrap().unwrap();
                if let Some(QueueEvent::TaskRemoved { task_id }) = ev.queue_event() {
                    break task_id.clone();
                }
            }
        })
        .await
        .expect("task_removed within 100ms");
        assert_eq!(removed, id);

        // The prior task subscriber still gets the terminal event.
        release.cancel();
        let terminal = timeout(Duration::from_secs(2), async {
            loop {
                match task_sub.recv().await.unwrap() {
                    Some(ev) => {
                        if ev.task_snapshot().unwrap().is_terminal() {
                            break ev.task_snapshot().unwrap().clone();
                        }
                    }
                    None => panic!("stream ended before terminal event"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(terminal.status, TaskStatus::Done);
        assert!(task_sub.recv().await.unwrap().is_none());
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn search_by_type_and_status() {
        let engine = started_engine().await;
        let release = CancellationToken::new();
        let held = engine
            .submit(gated("held", "default", release.clone()))
            .await
            .unwrap();
        let quick = engine.submit(sleeper("quick", "default", 1)).await.unwrap();

        wait_for(|| {
            let engine = Arc::clone(&engine);
            let quick = quick.clone();
            async move { engine.get(&quick).await.unwrap().status == TaskStatus::Done }
        })
        .await;

        let by_type: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({"task_type": "held"})).unwrap();
        assert_eq!(engine.search(&by_type).await, vec![held.clone()]);

        let by_both: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({"task_type": "quick", "status": "done"}))
                .unwrap();
        assert_eq!(engine.search(&by_both).await, vec![quick]);

        release.cancel();
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_rejects_new_work_and_closes_topics() {
        let engine = started_engine().await;
        let id = engine.submit(sleeper("quick", "default", 1)).await.unwrap();
        wait_for(|| {
            let engine = Arc::clone(&engine);
            let id = id.clone();
            async move { engine.get(&id).await.unwrap().status == TaskStatus::Done }
        })
        .await;

        engine.stop().await;

        let err = engine.submit(sleeper("nope", "default", 1)).await.unwrap_err();
        assert_eq!(err.as_label(), "shutdown_in_progress");
        assert!(engine.subscribe_queue().is_err());
        engine.stop().await; // idempotent
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_unwinds_running_bodies_within_grace() {
        let engine = started_engine().await;
        // Never released; only engine shutdown can unwind it.
        let release = CancellationToken::new();
        let id = engine
            .submit(gated("stuck", "default", release))
            .await
            .unwrap();
        wait_for(|| {
            let engine = Arc::clone(&engine);
            let id = id.clone();
            async move { engine.get(&id).await.unwrap().status == TaskStatus::Running }
        })
        .await;

        engine.stop().await;
        let snap = engine.get(&id).await.unwrap();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert_eq!(snap.error_type.as_deref(), Some("cancelled"));
    }
}
