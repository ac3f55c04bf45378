//! # Recurring engine: clock-driven spawning of template instances.
//!
//! A periodic tick walks the enabled recurrences; whenever one's `next_run`
//! has passed and it has spare capacity, the template body is cloned and
//! submitted as a fresh task with `parent_id = recurring_id`.
//!
//! ```text
//! tick (1s) ─► for each enabled entry:
//!               next_run ≤ now  &&  |active_children| < max_concurrent ?
//!                 ├─► clone template ─► submit (parent_id = recurring_id)
//!                 ├─► active_children += task_id
//!                 ├─► watcher: subscribe task topic ─► on terminal:
//!                 │      total_runs++, last_run, failure counters,
//!                 │      active_children -= task_id
//!                 └─► next_run = first fire strictly after now
//! ```
//!
//! ## Rules
//! - **No backfill**: when ticks or clock jumps skip fires, `next_run`
//!   advances past the current moment once — at most one spawn per entry
//!   per tick. A backward clock jump simply pauses spawning until
//!   `next_run` is reached again.
//! - **Cap at spawn time**: an entry at `max_concurrent` spawns nothing and
//!   keeps its `next_run`, firing as soon as capacity frees.
//! - Disabling nulls `next_run` and stops spawns; active children keep
//!   running. Repeated failures never auto-disable; counters are exposed
//!   for the host to decide.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::ClockRef;
use crate::core::Submitter;
use crate::error::EngineError;
use crate::events::{task_topic, EventBus};
use crate::recurring::info::{RecurringSnapshot, RecurringState};
use crate::recurring::schedule::RecurringSchedule;
use crate::tasks::{BodyRef, TaskStatus};

type EntryMap = Arc<RwLock<HashMap<String, RecurringState>>>;

/// Owns every recurrence and the scheduling tick.
pub(crate) struct RecurringEngine {
    entries: EntryMap,
    clock: ClockRef,
    submitter: Arc<Submitter>,
    bus: Arc<EventBus>,
    tick: Duration,
    token: CancellationToken,
}

impl RecurringEngine {
    pub(crate) fn new(
        clock: ClockRef,
        submitter: Arc<Submitter>,
        bus: Arc<EventBus>,
        tick: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
            submitter,
            bus,
            tick,
            token: CancellationToken::new(),
        })
    }

    /// Registers a recurrence and spawns its initial instance.
    pub(crate) async fn add(
        &self,
        cron_expression: &str,
        template: BodyRef,
        max_concurrent: usize,
    ) -> Result<String, EngineError> {
        if max_concurrent == 0 {
            return Err(EngineError::bad_request("max_concurrent must be positive"));
        }
        let schedule = RecurringSchedule::parse(cron_expression)?;
        let now = self.clock.now_utc();
        let recurring_id = Uuid::new_v4().to_string();

        let state = RecurringState {
            next_run: schedule.next_after(now),
            schedule,
            template,
            max_concurrent,
            enabled: true,
            last_run: None,
            consecutive_failures: 0,
            total_runs: 0,
            total_failures: 0,
            created_at: now,
            active_children: HashSet::new(),
        };
        self.entries
            .write()
            .await
            .insert(recurring_id.clone(), state);

        self.spawn_instance(&recurring_id).await?;
        Ok(recurring_id)
    }

    pub(crate) async fn remove(&self, recurring_id: &str) -> Result<(), EngineError> {
        self.entries
            .write()
            .await
            .remove(recurring_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found(recurring_id))
    }

    /// Re-enables spawning and recomputes `next_run` from now.
    pub(crate) async fn enable(&self, recurring_id: &str) -> Result<(), EngineError> {
        let now = self.clock.now_utc();
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(recurring_id)
            .ok_or_else(|| EngineError::not_found(recurring_id))?;
        entry.enabled = true;
        entry.next_run = entry.schedule.next_after(now);
        Ok(())
    }

    /// Stops future spawns; active children are untouched.
    pub(crate) async fn disable(&self, recurring_id: &str) -> Result<(), EngineError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(recurring_id)
            .ok_or_else(|| EngineError::not_found(recurring_id))?;
        entry.enabled = false;
        entry.next_run = None;
        Ok(())
    }

    pub(crate) async fn get(&self, recurring_id: &str) -> Option<RecurringSnapshot> {
        self.entries
            .read()
            .await
            .get(recurring_id)
            .map(|entry| entry.snapshot(recurring_id))
    }

    pub(crate) async fn list(&self) -> Vec<RecurringSnapshot> {
        let mut all: Vec<RecurringSnapshot> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| entry.snapshot(id))
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Spawns the scheduling tick. Runs until [`stop`](Self::stop).
    pub(crate) fn run(self: Arc<Self>) {
        let token = self.token.clone();
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => self.tick_once().await,
                }
            }
        });
    }

    /// Stops the tick; pending watchers still record terminal events.
    pub(crate) fn stop(&self) {
        self.token.cancel();
    }

    async fn tick_once(&self) {
        let now = self.clock.now_utc();
        let due: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, entry)| {
                    entry.enabled
                        && entry.next_run.is_some_and(|at| at <= now)
                        && entry.active_children.len() < entry.max_concurrent
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        for recurring_id in due {
            match self.spawn_instance(&recurring_id).await {
                Ok(Some(task_id)) => {
                    debug!(recurring_id = %recurring_id, task_id = %task_id, "recurrence fired");
                    let mut entries = self.entries.write().await;
                    if let Some(entry) = entries.get_mut(&recurring_id) {
                        // Collapse any missed fires: strictly after now, once.
                        entry.next_run = entry.schedule.next_after(now);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(recurring_id = %recurring_id, error = %e, "recurring spawn failed");
                }
            }
        }
    }

    /// Clones the template and submits one instance, respecting the cap.
    ///
    /// Returns `Ok(None)` when the entry is at `max_concurrent`.
    async fn spawn_instance(&self, recurring_id: &str) -> Result<Option<String>, EngineError> {
        let (shared, task_id) = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .get_mut(recurring_id)
                .ok_or_else(|| EngineError::not_found(recurring_id))?;
            if entry.active_children.len() >= entry.max_concurrent {
                return Ok(None);
            }
            let body = entry.template.clone_body();
            let shared = self
                .submitter
                .prepare(body, Some(recurring_id.to_string()))?;
            let task_id = shared.lock().task_id.clone();
            entry.active_children.insert(task_id.clone());
            (shared, task_id)
        };

        // Subscribe before the first event exists so the watcher can never
        // miss the terminal snapshot.
        self.watch_child(recurring_id, &task_id);

        match self.submitter.enqueue(shared).await {
            Ok(_) => Ok(Some(task_id)),
            Err(e) => {
                let mut entries = self.entries.write().await;
                if let Some(entry) = entries.get_mut(recurring_id) {
                    entry.active_children.remove(&task_id);
                }
                self.bus.remove(&task_topic(&task_id));
                Err(e)
            }
        }
    }

    /// Observes one child's topic until its terminal event, then updates
    /// counters and releases the capacity slot.
    fn watch_child(&self, recurring_id: &str, task_id: &str) {
        let entries = Arc::clone(&self.entries);
        let clock = Arc::clone(&self.clock);
        let store = Arc::clone(&self.submitter.store);
        let recurring_id = recurring_id.to_string();
        let task_id = task_id.to_string();
        let mut sub = self.bus.subscribe(&task_topic(&task_id));

        tokio::spawn(async move {
            let mut terminal: Option<TaskStatus> = None;
            loop {
                match sub.recv().await {
                    Ok(Some(ev)) => {
                        if let Some(snap) = ev.task_snapshot() {
                            if snap.is_terminal() {
                                terminal = Some(snap.status);
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(_overflow) => break,
                }
            }
            // Stream ended without a terminal frame (overflow, forced
            // shutdown): fall back to the store's view.
            if terminal.is_none() {
                if let Some(shared) = store.get(&task_id).await {
                    let status = shared.lock().status;
                    terminal = status.is_terminal().then_some(status);
                }
            }
            note_child_finished(&entries, &clock, &recurring_id, &task_id, terminal).await;
        });
    }
}

/// Removes a finished child from its recurrence and updates the counters.
async fn note_child_finished(
    entries: &EntryMap,
    clock: &ClockRef,
    recurring_id: &str,
    task_id: &str,
    terminal: Option<TaskStatus>,
) {
    let mut entries = entries.write().await;
    let Some(entry) = entries.get_mut(recurring_id) else {
        return;
    };
    entry.active_children.remove(task_id);
    match terminal {
        Some(TaskStatus::Done) => {
            entry.total_runs += 1;
            entry.last_run = Some(clock.now_utc());
            entry.consecutive_failures = 0;
        }
        Some(TaskStatus::Failed) => {
            entry.total_runs += 1;
            entry.total_failures += 1;
            entry.consecutive_failures += 1;
            entry.last_run = Some(clock.now_utc());
        }
        _ => {}
    }
}
