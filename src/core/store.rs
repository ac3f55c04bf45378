//! # In-memory task store.
//!
//! Insertion-ordered map `task_id → task`. The store is where memory
//! hygiene lives: successful records beyond a retention cap are pruned
//! automatically after each completion, while failures persist until
//! explicitly deleted. Removal is always visible on the queue topic as a
//! `task_removed` event.
//!
//! ## Rules
//! - `list` returns snapshots in insertion order.
//! - Pruning only ever removes `done` records; `failed`, `queued` and
//!   `running` records are never pruned.
//! - `done` records with no `completed_at` are dropped first (they indicate
//!   a bug in lifecycle stamping) before capacity-based eviction.
//! - A removed task's topic is dropped only when the record is already
//!   terminal; a task deleted mid-run keeps its topic alive until the
//!   runner publishes the terminal event.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::events::{EngineEvent, EventBus, QueueEvent, QUEUE_TOPIC};
use crate::tasks::{TaskShared, TaskSnapshot, TaskStatus};

struct StoreInner {
    map: HashMap<String, Arc<TaskShared>>,
    order: Vec<String>,
}

/// Insertion-ordered collection of task records.
pub(crate) struct TaskStore {
    inner: RwLock<StoreInner>,
    bus: Arc<EventBus>,
    max_succeeded: usize,
}

impl TaskStore {
    pub(crate) fn new(bus: Arc<EventBus>, max_succeeded: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                map: HashMap::new(),
                order: Vec::new(),
            }),
            bus,
            max_succeeded,
        }
    }

    pub(crate) async fn insert(&self, shared: Arc<TaskShared>) {
        let task_id = shared.lock().task_id.clone();
        let mut inner = self.inner.write().await;
        if inner.map.insert(task_id.clone(), shared).is_none() {
            inner.order.push(task_id);
        }
    }

    pub(crate) async fn get(&self, task_id: &str) -> Option<Arc<TaskShared>> {
        self.inner.read().await.map.get(task_id).cloned()
    }

    pub(crate) async fn contains(&self, task_id: &str) -> bool {
        self.inner.read().await.map.contains_key(task_id)
    }

    /// Snapshots of every record, in insertion order.
    pub(crate) async fn list(&self) -> Vec<TaskSnapshot> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.map.get(id))
            .map(|shared| shared.snapshot())
            .collect()
    }

    /// Removes one record, publishing `task_removed`.
    ///
    /// Returns `false` when the id is unknown.
    pub(crate) async fn delete(&self, task_id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write().await;
            let removed = inner.map.remove(task_id);
            if removed.is_some() {
                inner.order.retain(|id| id != task_id);
            }
            removed
        };
        match removed {
            Some(shared) => {
                let status = shared.lock().status;
                self.announce_removed(task_id, status).await;
                true
            }
            None => false,
        }
    }

    /// Removes every terminal record. Returns `(done_count, failed_count)`.
    pub(crate) async fn delete_completed(&self) -> (usize, usize) {
        let victims: Vec<(String, TaskStatus)> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .filter_map(|id| inner.map.get(id).map(|s| (id.clone(), s.lock().status)))
                .filter(|(_, status)| status.is_terminal())
                .collect()
        };

        let mut done = 0usize;
        let mut failed = 0usize;
        for (task_id, status) in victims {
            if self.delete(&task_id).await {
                match status {
                    TaskStatus::Done => done += 1,
                    TaskStatus::Failed => failed += 1,
                    _ => {}
                }
            }
        }
        (done, failed)
    }

    /// Ids of records matching every criterion by equality.
    ///
    /// Criteria keys name record attributes (`task_type` matches the body's
    /// kind name); unknown attributes match nothing.
    pub(crate) async fn search(
        &self,
        criteria: &serde_json::Map<String, serde_json::Value>,
    ) -> Vec<String> {
        if criteria.is_empty() {
            return Vec::new();
        }
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.map.get(id))
            .filter_map(|shared| {
                let rec = shared.lock();
                let doc = rec.search_doc();
                let matches = criteria
                    .iter()
                    .all(|(attr, expected)| doc.get(attr) == Some(expected));
                if matches {
                    Some(rec.task_id.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Evicts succeeded records beyond the retention cap.
    ///
    /// Keeps the `max_succeeded` records with the latest `completed_at`;
    /// `done` records with no `completed_at` are dropped unconditionally.
    /// Idempotent: a second pass with no new completions removes nothing.
    pub(crate) async fn prune_succeeded(&self) {
        let mut victims: Vec<String> = Vec::new();
        {
            let inner = self.inner.read().await;
            let mut succeeded: Vec<(String, Option<chrono::DateTime<chrono::Utc>>)> = inner
                .map
                .iter()
                .filter_map(|(id, shared)| {
                    let rec = shared.lock();
                    (rec.status == TaskStatus::Done).then(|| (id.clone(), rec.completed_at))
                })
                .collect();

            victims.extend(
                succeeded
                    .iter()
                    .filter(|(_, at)| at.is_none())
                    .map(|(id, _)| id.clone()),
            );
            succeeded.retain(|(_, at)| at.is_some());

            if succeeded.len() > self.max_succeeded {
                succeeded.sort_by(|a, b| b.1.cmp(&a.1));
                victims.extend(
                    succeeded
                        .into_iter()
                        .skip(self.max_succeeded)
                        .map(|(id, _)| id),
                );
            }
        }

        for task_id in victims {
            self.delete(&task_id).await;
        }
    }

    /// Publishes `task_removed` and, for terminal records, drops the topic.
    /// Ignores a closed queue topic (engine shutting down).
    async fn announce_removed(&self, task_id: &str, status: TaskStatus) {
        let _ = self.bus.publish(
            QUEUE_TOPIC,
            EngineEvent::Queue(QueueEvent::TaskRemoved {
                task_id: task_id.to_string(),
            }),
        );
        if status.is_terminal() {
            self.bus.remove(&crate::events::task_topic(task_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tokio_util::sync::CancellationToken;

    use crate::tasks::{BodyFn, TaskControl, TaskRecord};

    fn store(cap: usize) -> TaskStore {
        TaskStore::new(Arc::new(EventBus::new(16)), cap)
    }

    fn task(kind: &str) -> Arc<TaskShared> {
        let body = BodyFn::arc("noop", "default", |_ctl: TaskControl, _ctx: CancellationToken| async {
            Ok(())
        });
        TaskShared::new(TaskRecord::new(kind, "default"), body, CancellationToken::new())
    }

    fn finished(kind: &str, status: TaskStatus, completed: Option<i64>) -> Arc<TaskShared> {
        let shared = task(kind);
        {
            let mut rec = shared.lock();
            rec.status = status;
            rec.completed_at = completed.map(|secs| Utc::now() + Duration::seconds(secs));
        }
        shared
    }

    #[tokio::test]
    async fn list_preserves_insertion_order() {
        let store = store(10);
        let mut ids = Vec::new();
        for i in 0..5 {
            let shared = task(&format!("Kind{i}"));
            ids.push(shared.lock().task_id.clone());
            store.insert(shared).await;
        }
        let listed: Vec<String> = store.list().await.into_iter().map(|s| s.task_id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn delete_twice_reports_missing() {
        let store = store(10);
        let shared = task("Kind");
        let id = shared.lock().task_id.clone();
        store.insert(shared).await;

        assert!(store.delete(&id).await);
        assert!(!store.delete(&id).await);
    }

    #[tokio::test]
    async fn delete_publishes_task_removed() {
        let bus = Arc::new(EventBus::new(16));
        let store = TaskStore::new(Arc::clone(&bus), 10);
        let shared = task("Kind");
        let id = shared.lock().task_id.clone();
        store.insert(shared).await;

        let mut sub = bus.subscribe(QUEUE_TOPIC);
        store.delete(&id).await;

        let ev = sub.recv().await.unwrap().unwrap();
        assert_eq!(
            ev.queue_event(),
            Some(&QueueEvent::TaskRemoved { task_id: id })
        );
    }

    #[tokio::test]
    async fn search_matches_all_criteria_and_ignores_unknown_attrs() {
        let store = store(10);
        let a = task("Alpha");
        let a_id = a.lock().task_id.clone();
        store.insert(a).await;
        store.insert(task("Beta")).await;

        let criteria: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({"task_type": "Alpha"})).unwrap();
        assert_eq!(store.search(&criteria).await, vec![a_id]);

        let unknown: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({"no_such_attr": 1})).unwrap();
        assert!(store.search(&unknown).await.is_empty());

        assert!(store.search(&serde_json::Map::new()).await.is_empty());
    }

    #[tokio::test]
    async fn prune_keeps_latest_successes_and_all_failures() {
        let store = store(2);
        let mut done_ids = Vec::new();
        for i in 0..4 {
            let shared = finished("Done", TaskStatus::Done, Some(i));
            done_ids.push(shared.lock().task_id.clone());
            store.insert(shared).await;
        }
        store.insert(finished("Bad", TaskStatus::Failed, Some(0))).await;
        store.insert(task("Waiting")).await;

        store.prune_succeeded().await;

        let snaps = store.list().await;
        let survivors: Vec<_> = snaps
            .iter()
            .filter(|s| s.status == TaskStatus::Done)
            .map(|s| s.task_id.clone())
            .collect();
        // The two most recent completions survive.
        assert_eq!(survivors, done_ids[2..].to_vec());
        assert!(snaps.iter().any(|s| s.status == TaskStatus::Failed));
        assert!(snaps.iter().any(|s| s.status == TaskStatus::Queued));

        // Idempotent with no new completions.
        store.prune_succeeded().await;
        assert_eq!(store.list().await.len(), snaps.len());
    }

    #[tokio::test]
    async fn prune_drops_done_records_missing_completed_at_first() {
        let store = store(10);
        let phantom = finished("Ghost", TaskStatus::Done, None);
        let phantom_id = phantom.lock().task_id.clone();
        store.insert(phantom).await;
        store.insert(finished("Done", TaskStatus::Done, Some(1))).await;

        store.prune_succeeded().await;
        assert!(!store.contains(&phantom_id).await);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn delete_completed_counts_by_status() {
        let store = store(10);
        store.insert(finished("D", TaskStatus::Done, Some(1))).await;
        store.insert(finished("D", TaskStatus::Done, Some(2))).await;
        store.insert(finished("F", TaskStatus::Failed, Some(3))).await;
        store.insert(task("Waiting")).await;

        let (done, failed) = store.delete_completed().await;
        assert_eq!((done, failed), (2, 1));
        assert_eq!(store.list().await.len(), 1);
    }
}
