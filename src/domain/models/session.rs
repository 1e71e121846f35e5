//! Mutable run state of one execution session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use super::graph::ExecutionGraph;
use super::recovery::ErrorClass;
use super::result::TaskResult;
use super::task::TaskId;
use crate::domain::errors::{EngineError, EngineResult};

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "state", content = "layer")]
pub enum SessionState {
    Initializing,
    LayerExecuting(usize),
    LayerValidating(usize),
    Completed,
    Aborted,
}

impl SessionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Initializing, Self::LayerExecuting(0) | Self::Completed | Self::Aborted) => true,
            (Self::LayerExecuting(k), Self::LayerValidating(j)) => k == j,
            (Self::LayerExecuting(_) | Self::LayerValidating(_), Self::Aborted) => true,
            (Self::LayerValidating(k), Self::LayerExecuting(j)) => j == k + 1,
            (Self::LayerValidating(_), Self::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => f.write_str("initializing"),
            Self::LayerExecuting(k) => write!(f, "layer_executing({k})"),
            Self::LayerValidating(k) => write!(f, "layer_validating({k})"),
            Self::Completed => f.write_str("completed"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Where a task stands within the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskDisposition {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Aborted,
}

impl TaskDisposition {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TaskDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the resource manager.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceSnapshot {
    pub capacity: usize,
    pub in_use: usize,
    pub utilization: f64,
    pub target_concurrency: usize,
}

/// Everything the session knows about one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub title: String,
    pub layer: usize,
    pub disposition: TaskDisposition,
    pub attempts: u32,
    pub last_result: Option<TaskResult>,
    pub error_class: Option<ErrorClass>,
    pub reason: Option<String>,
    pub escalated: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Time spent inside worker attempts, summed over retries.
    pub busy_ms: u64,
}

/// Run state owned by the orchestrator for the lifetime of one `run`.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    state: SessionState,
    current_layer: Option<usize>,
    pending: BTreeSet<TaskId>,
    in_progress: BTreeSet<TaskId>,
    completed: BTreeSet<TaskId>,
    failed: BTreeSet<TaskId>,
    skipped: BTreeMap<TaskId, String>,
    aborted: BTreeMap<TaskId, String>,
    records: BTreeMap<TaskId, TaskRecord>,
    resources: ResourceSnapshot,
    peak_concurrency: usize,
}

impl ExecutionSession {
    pub fn new(graph: &ExecutionGraph) -> Self {
        let records = graph
            .tasks()
            .map(|task| {
                let record = TaskRecord {
                    task_id: task.id.clone(),
                    title: task.title.clone(),
                    layer: graph.layer_of(&task.id).unwrap_or_default(),
                    disposition: TaskDisposition::Pending,
                    attempts: 0,
                    last_result: None,
                    error_class: None,
                    reason: None,
                    escalated: false,
                    started_at: None,
                    finished_at: None,
                    busy_ms: 0,
                };
                (task.id.clone(), record)
            })
            .collect::<BTreeMap<_, _>>();

        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            state: SessionState::Initializing,
            current_layer: None,
            pending: records.keys().cloned().collect(),
            in_progress: BTreeSet::new(),
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            skipped: BTreeMap::new(),
            aborted: BTreeMap::new(),
            records,
            resources: ResourceSnapshot::default(),
            peak_concurrency: 0,
        }
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub const fn current_layer(&self) -> Option<usize> {
        self.current_layer
    }

    /// Move the state machine forward, rejecting illegal transitions.
    pub fn transition_to(&mut self, next: SessionState) -> EngineResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if let SessionState::LayerExecuting(k) = next {
            self.current_layer = Some(k);
        }
        self.state = next;
        Ok(())
    }

    pub fn record(&self, id: &str) -> Option<&TaskRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.values()
    }

    pub fn disposition(&self, id: &str) -> Option<TaskDisposition> {
        self.records.get(id).map(|r| r.disposition)
    }

    pub fn is_resolved(&self, id: &str) -> bool {
        self.disposition(id).is_some_and(TaskDisposition::is_terminal)
    }

    pub const fn pending(&self) -> &BTreeSet<TaskId> {
        &self.pending
    }

    pub const fn in_progress(&self) -> &BTreeSet<TaskId> {
        &self.in_progress
    }

    pub const fn completed(&self) -> &BTreeSet<TaskId> {
        &self.completed
    }

    pub const fn failed(&self) -> &BTreeSet<TaskId> {
        &self.failed
    }

    pub const fn skipped(&self) -> &BTreeMap<TaskId, String> {
        &self.skipped
    }

    pub const fn aborted(&self) -> &BTreeMap<TaskId, String> {
        &self.aborted
    }

    pub const fn resources(&self) -> ResourceSnapshot {
        self.resources
    }

    pub const fn peak_concurrency(&self) -> usize {
        self.peak_concurrency
    }

    pub fn update_resources(&mut self, snapshot: ResourceSnapshot) {
        self.resources = snapshot;
    }

    /// A new attempt for `id` has started.
    pub fn mark_running(&mut self, id: &str) {
        self.pending.remove(id);
        self.in_progress.insert(id.to_string());
        self.peak_concurrency = self.peak_concurrency.max(self.in_progress.len());
        if let Some(record) = self.records.get_mut(id) {
            record.disposition = TaskDisposition::Running;
            record.attempts += 1;
            record.started_at.get_or_insert_with(Utc::now);
        }
    }

    /// An attempt finished and the task will run again.
    pub fn mark_retrying(&mut self, id: &str, result: TaskResult, class: ErrorClass) {
        self.in_progress.remove(id);
        self.pending.insert(id.to_string());
        if let Some(record) = self.records.get_mut(id) {
            record.disposition = TaskDisposition::Pending;
            record.busy_ms += result.duration_ms;
            record.error_class = Some(class);
            record.reason = result.failure.as_ref().map(|f| f.reason());
            record.last_result = Some(result);
        }
    }

    pub fn mark_succeeded(&mut self, id: &str, result: TaskResult) {
        self.in_progress.remove(id);
        self.pending.remove(id);
        self.completed.insert(id.to_string());
        if let Some(record) = self.records.get_mut(id) {
            record.disposition = TaskDisposition::Succeeded;
            record.busy_ms += result.duration_ms;
            record.error_class = None;
            record.reason = None;
            record.finished_at = Some(result.finished_at);
            record.last_result = Some(result);
        }
    }

    pub fn mark_failed(
        &mut self,
        id: &str,
        result: TaskResult,
        class: ErrorClass,
        escalated: bool,
    ) {
        self.in_progress.remove(id);
        self.pending.remove(id);
        self.failed.insert(id.to_string());
        if let Some(record) = self.records.get_mut(id) {
            record.disposition = TaskDisposition::Failed;
            record.busy_ms += result.duration_ms;
            record.error_class = Some(class);
            record.reason = result.failure.as_ref().map(|f| f.reason());
            record.escalated = escalated;
            record.finished_at = Some(result.finished_at);
            record.last_result = Some(result);
        }
    }

    /// Skip a task that has not run. Returns false if it was already resolved.
    pub fn mark_skipped(&mut self, id: &str, reason: impl Into<String>) -> bool {
        if self.is_resolved(id) {
            return false;
        }
        let reason = reason.into();
        self.pending.remove(id);
        self.in_progress.remove(id);
        if let Some(record) = self.records.get_mut(id) {
            record.disposition = TaskDisposition::Skipped;
            record.error_class = Some(ErrorClass::Dependency);
            record.reason = Some(reason.clone());
            record.finished_at = Some(Utc::now());
        }
        self.skipped.insert(id.to_string(), reason);
        true
    }

    /// Mark a task stopped by session abort. Returns false if already resolved.
    pub fn mark_aborted(
        &mut self,
        id: &str,
        reason: impl Into<String>,
        result: Option<TaskResult>,
    ) -> bool {
        if self.is_resolved(id) {
            return false;
        }
        let reason = reason.into();
        self.pending.remove(id);
        self.in_progress.remove(id);
        if let Some(record) = self.records.get_mut(id) {
            record.disposition = TaskDisposition::Aborted;
            record.reason = Some(reason.clone());
            record.finished_at = Some(Utc::now());
            if let Some(result) = result {
                record.busy_ms += result.duration_ms;
                record.last_result = Some(result);
            }
        }
        self.aborted.insert(id.to_string(), reason);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_transitions_follow_the_barrier() {
        let s = SessionState::Initializing;
        assert!(s.can_transition_to(SessionState::LayerExecuting(0)));
        assert!(!s.can_transition_to(SessionState::LayerExecuting(1)));
        assert!(SessionState::LayerExecuting(2).can_transition_to(SessionState::LayerValidating(2)));
        assert!(!SessionState::LayerExecuting(2).can_transition_to(SessionState::LayerExecuting(3)));
        assert!(SessionState::LayerValidating(2).can_transition_to(SessionState::LayerExecuting(3)));
        assert!(SessionState::LayerValidating(2).can_transition_to(SessionState::Completed));
        assert!(!SessionState::Completed.can_transition_to(SessionState::Aborted));
    }

    #[test]
    fn terminal_dispositions() {
        assert!(!TaskDisposition::Running.is_terminal());
        assert!(TaskDisposition::Skipped.is_terminal());
        assert!(TaskDisposition::Aborted.is_terminal());
    }
}
