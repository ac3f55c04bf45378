//! # Recurrence state and its public snapshot.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::recurring::schedule::RecurringSchedule;
use crate::tasks::BodyRef;

/// Engine-internal state of one recurrence.
pub(crate) struct RecurringState {
    pub(crate) schedule: RecurringSchedule,
    pub(crate) template: BodyRef,
    pub(crate) max_concurrent: usize,
    pub(crate) enabled: bool,
    pub(crate) next_run: Option<DateTime<Utc>>,
    pub(crate) last_run: Option<DateTime<Utc>>,
    pub(crate) consecutive_failures: u64,
    pub(crate) total_runs: u64,
    pub(crate) total_failures: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) active_children: HashSet<String>,
}

impl RecurringState {
    pub(crate) fn snapshot(&self, recurring_id: &str) -> RecurringSnapshot {
        let mut active_children: Vec<String> = self.active_children.iter().cloned().collect();
        active_children.sort_unstable();
        RecurringSnapshot {
            recurring_id: recurring_id.to_string(),
            cron_expression: self.schedule.expression().to_string(),
            task_type: self.template.kind().to_string(),
            max_concurrent: self.max_concurrent,
            enabled: self.enabled,
            next_run: self.next_run,
            last_run: self.last_run,
            consecutive_failures: self.consecutive_failures,
            total_runs: self.total_runs,
            total_failures: self.total_failures,
            created_at: self.created_at,
            active_children,
        }
    }
}

/// Externally visible view of one recurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringSnapshot {
    pub recurring_id: String,
    pub cron_expression: String,
    /// Kind name of the template body.
    pub task_type: String,
    pub max_concurrent: usize,
    pub enabled: bool,
    /// Null while the recurrence is disabled.
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub consecutive_failures: u64,
    pub total_runs: u64,
    pub total_failures: u64,
    pub created_at: DateTime<Utc>,
    /// Ids of spawned instances that are still queued or running.
    pub active_children: Vec<String>,
}
