//! Execution report emitted when a session completes or aborts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::graph::ExecutionGraph;
use super::recovery::{ErrorClass, FailurePolicy};
use super::result::{elapsed_ms, QualityGateOutcome};
use super::session::{ExecutionSession, SessionState, TaskDisposition};
use super::task::TaskId;

/// Final state of a session as recorded in the report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    Completed,
    Aborted,
}

/// Final disposition of one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub title: String,
    pub layer: usize,
    pub disposition: TaskDisposition,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    #[serde(default)]
    pub gate_outcomes: Vec<QualityGateOutcome>,
    #[serde(default)]
    pub error_class: Option<ErrorClass>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub escalated: bool,
}

/// A task that never ran to completion, with why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedTask {
    pub task_id: TaskId,
    pub disposition: TaskDisposition,
    pub reason: String,
}

/// Aggregate numbers for the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportMetrics {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: usize,
    /// Sum of time spent in workers, i.e. the cost of running one at a time.
    pub sequential_time_estimate_ms: u64,
    pub actual_wall_time_ms: u64,
    /// `sequential_time_estimate_ms / actual_wall_time_ms`.
    pub parallel_efficiency: f64,
    /// Sum of the plan's own estimates.
    pub planned_duration_ms: u64,
    pub peak_concurrency: usize,
}

/// The engine's output document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub final_state: FinalState,
    pub failure_policy: FailurePolicy,
    pub layers: Vec<Vec<TaskId>>,
    pub tasks: Vec<TaskOutcome>,
    pub skipped: Vec<SkippedTask>,
    pub metrics: ReportMetrics,
    #[serde(default)]
    pub commit_proposals: usize,
}

impl ExecutionReport {
    /// Build the report from a finished session.
    pub fn from_session(
        session: &ExecutionSession,
        graph: &ExecutionGraph,
        policy: FailurePolicy,
        finished_at: DateTime<Utc>,
        commit_proposals: usize,
    ) -> Self {
        let mut tasks: Vec<TaskOutcome> = session
            .records()
            .map(|record| {
                let gate_outcomes = record
                    .last_result
                    .as_ref()
                    .map(|r| r.gate_outcomes.clone())
                    .unwrap_or_default();
                TaskOutcome {
                    task_id: record.task_id.clone(),
                    title: record.title.clone(),
                    layer: record.layer,
                    disposition: record.disposition,
                    attempts: record.attempts,
                    started_at: record.started_at,
                    finished_at: record.finished_at,
                    duration_ms: record.busy_ms,
                    gate_outcomes,
                    error_class: record.error_class,
                    reason: record.reason.clone(),
                    escalated: record.escalated,
                }
            })
            .collect();
        tasks.sort_by(|a, b| (a.layer, &a.task_id).cmp(&(b.layer, &b.task_id)));

        let skipped = tasks
            .iter()
            .filter(|t| {
                matches!(
                    t.disposition,
                    TaskDisposition::Skipped | TaskDisposition::Aborted
                )
            })
            .map(|t| SkippedTask {
                task_id: t.task_id.clone(),
                disposition: t.disposition,
                reason: t.reason.clone().unwrap_or_else(|| "not executed".to_string()),
            })
            .collect();

        let count = |d: TaskDisposition| tasks.iter().filter(|t| t.disposition == d).count();
        let sequential_time_estimate_ms: u64 = tasks.iter().map(|t| t.duration_ms).sum();
        let actual_wall_time_ms = elapsed_ms(session.started_at, finished_at);
        let planned_duration_ms =
            u64::try_from(graph.estimated_sequential_duration().as_millis()).unwrap_or(u64::MAX);

        let metrics = ReportMetrics {
            total: tasks.len(),
            succeeded: count(TaskDisposition::Succeeded),
            failed: count(TaskDisposition::Failed),
            skipped: count(TaskDisposition::Skipped),
            aborted: count(TaskDisposition::Aborted),
            sequential_time_estimate_ms,
            actual_wall_time_ms,
            parallel_efficiency: parallel_efficiency(sequential_time_estimate_ms, actual_wall_time_ms),
            planned_duration_ms,
            peak_concurrency: session.peak_concurrency(),
        };

        let final_state = if session.state() == SessionState::Aborted {
            FinalState::Aborted
        } else {
            FinalState::Completed
        };

        Self {
            session_id: session.id,
            started_at: session.started_at,
            finished_at,
            final_state,
            failure_policy: policy,
            layers: graph.layers().to_vec(),
            tasks,
            skipped,
            metrics,
            commit_proposals,
        }
    }

    pub fn outcome(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// True when every task succeeded and the session was not aborted.
    pub fn is_success(&self) -> bool {
        self.final_state == FinalState::Completed && self.metrics.succeeded == self.metrics.total
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Speed-up of the run compared to running the same work one at a time.
pub fn parallel_efficiency(sequential_ms: u64, wall_ms: u64) -> f64 {
    if wall_ms == 0 {
        return if sequential_ms == 0 { 1.0 } else { sequential_ms as f64 };
    }
    sequential_ms as f64 / wall_ms as f64
}
