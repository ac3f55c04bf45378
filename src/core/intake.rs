//! # Intake: admission of new tasks into the engine.
//!
//! [`Submitter`] is the single entry point through which records join the
//! engine, shared by the public `submit` surface and the recurring engine.
//! Admission is split in two so a caller can learn the task id (and
//! subscribe to its topic) before any event is published:
//!
//! 1. [`prepare`](Submitter::prepare) builds the record and shared state,
//! 2. [`enqueue`](Submitter::enqueue) stores it, publishes `task_added` on
//!    the queue topic, publishes the initial queued snapshot on the task
//!    topic, and pushes the record onto the FIFO intake queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::store::TaskStore;
use crate::error::EngineError;
use crate::events::{task_topic, EngineEvent, EventBus, QueueEvent, QUEUE_TOPIC};
use crate::tasks::{BodyRef, TaskRecord, TaskShared};

/// Admits tasks into the store and intake queue.
pub(crate) struct Submitter {
    pub(crate) bus: Arc<EventBus>,
    pub(crate) store: Arc<TaskStore>,
    intake_tx: mpsc::UnboundedSender<Arc<TaskShared>>,
    runtime_token: CancellationToken,
    shutdown: Arc<AtomicBool>,
}

impl Submitter {
    pub(crate) fn new(
        bus: Arc<EventBus>,
        store: Arc<TaskStore>,
        intake_tx: mpsc::UnboundedSender<Arc<TaskShared>>,
        runtime_token: CancellationToken,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            bus,
            store,
            intake_tx,
            runtime_token,
            shutdown,
        }
    }

    pub(crate) fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Builds the shared state for a fresh `queued` record. Publishes
    /// nothing; the task does not exist to the engine until enqueued.
    pub(crate) fn prepare(
        &self,
        body: BodyRef,
        parent_id: Option<String>,
    ) -> Result<Arc<TaskShared>, EngineError> {
        if self.shutting_down() {
            return Err(EngineError::ShutdownInProgress);
        }
        let mut record = TaskRecord::new(body.kind(), body.semaphore());
        record.parent_id = parent_id;
        Ok(TaskShared::new(
            record,
            body,
            self.runtime_token.child_token(),
        ))
    }

    /// Inserts a prepared record, announces it, and queues it for dispatch.
    pub(crate) async fn enqueue(&self, shared: Arc<TaskShared>) -> Result<String, EngineError> {
        if self.shutting_down() {
            return Err(EngineError::ShutdownInProgress);
        }
        let (task_id, snapshot) = {
            let rec = shared.lock();
            (rec.task_id.clone(), rec.snapshot())
        };

        self.store.insert(Arc::clone(&shared)).await;
        // task_added precedes anything observable on the task topic.
        let _ = self.bus.publish(
            QUEUE_TOPIC,
            EngineEvent::Queue(QueueEvent::TaskAdded {
                task: snapshot.clone(),
            }),
        );
        let _ = self
            .bus
            .publish(&task_topic(&task_id), EngineEvent::Task(snapshot));

        self.intake_tx
            .send(shared)
            .map_err(|_| EngineError::ShutdownInProgress)?;
        Ok(task_id)
    }

    /// `prepare` + `enqueue` in one step.
    pub(crate) async fn submit(
        &self,
        body: BodyRef,
        parent_id: Option<String>,
    ) -> Result<String, EngineError> {
        let shared = self.prepare(body, parent_id)?;
        self.enqueue(shared).await
    }
}
