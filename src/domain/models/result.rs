//! Worker output: task results, evidence, gate outcomes and failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::task::{FileAction, GateKind, Severity, TaskId};

/// Status of a single task attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
    /// The attempt failed and a new attempt has been scheduled.
    Retried,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Retried => "retried",
        };
        f.write_str(s)
    }
}

/// The three phases of the worker protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TddPhase {
    Red,
    Green,
    Refactor,
}

impl TddPhase {
    pub const SEQUENCE: [Self; 3] = [Self::Red, Self::Green, Self::Refactor];
}

impl fmt::Display for TddPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Red => "red",
            Self::Green => "green",
            Self::Refactor => "refactor",
        };
        f.write_str(s)
    }
}

/// A file produced or changed by a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub path: String,
    pub action: FileAction,
    /// Content after the phase that last touched it.
    pub content: String,
    /// Line diff against the content before the task started.
    pub diff: String,
}

/// Test-runner counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestReport {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    #[serde(default)]
    pub failing_tests: Vec<String>,
}

impl TestReport {
    pub const fn executed(&self) -> u32 {
        self.passed + self.failed
    }

    pub const fn all_passed(&self) -> bool {
        self.failed == 0 && self.passed > 0
    }
}

/// Linter counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LintReport {
    pub errors: u32,
    pub warnings: u32,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// A single security finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityFinding {
    pub severity: Severity,
    pub rule: String,
    pub location: Option<String>,
    pub message: String,
}

/// Measurements a worker's toolchain collected while executing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationEvidence {
    #[serde(default)]
    pub tests: Option<TestReport>,
    /// Line coverage percentage (0-100).
    #[serde(default)]
    pub coverage_percent: Option<f64>,
    #[serde(default)]
    pub lint: Option<LintReport>,
    #[serde(default)]
    pub security_findings: Vec<SecurityFinding>,
}

/// Outcome of one quality gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityGateOutcome {
    pub gate: GateKind,
    pub passed: bool,
    /// Machine-readable measurement (coverage %, finding count, ...).
    pub metric: f64,
    #[serde(default)]
    pub threshold: Option<f64>,
    /// What to fix, present when the gate failed.
    #[serde(default)]
    pub remediation: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl QualityGateOutcome {
    pub const fn pass(gate: GateKind, metric: f64, threshold: Option<f64>) -> Self {
        Self {
            gate,
            passed: true,
            metric,
            threshold,
            remediation: None,
            duration_ms: 0,
        }
    }

    pub fn fail(
        gate: GateKind,
        metric: f64,
        threshold: Option<f64>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            gate,
            passed: false,
            metric,
            threshold,
            remediation: Some(remediation.into()),
            duration_ms: 0,
        }
    }
}

/// What went wrong with an attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A tool invocation failed in a way that may succeed on retry.
    ToolTransient,
    /// A tool invocation failed permanently.
    ToolFatal,
    /// A prerequisite the task relies on is missing.
    MissingPrerequisite,
    /// An upstream task failed.
    UpstreamFailed,
    /// A phase finished but its tests contradicted the protocol.
    PhaseRejected,
    /// One or more required quality gates failed.
    QualityGate,
    /// The attempt exceeded the task's max duration.
    Timeout,
    /// Host resources ran out.
    ResourceExhausted,
    /// The attempt panicked.
    Panic,
    /// The session was aborted before the attempt finished.
    Cancelled,
    /// The task specification itself is unusable.
    InvalidTask,
}

/// Structured reason attached to a failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    #[serde(default)]
    pub phase: Option<TddPhase>,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            phase: None,
            message: message.into(),
        }
    }

    pub const fn in_phase(mut self, phase: TddPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Short reason used in reports.
    pub fn reason(&self) -> String {
        match (self.kind, self.phase) {
            (FailureKind::Timeout, _) => "timeout".to_string(),
            (_, Some(phase)) => format!("{phase} phase: {}", self.message),
            _ => self.message.clone(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

/// Timing and outcome of one worker phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseRecord {
    pub phase: TddPhase,
    pub succeeded: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub tests: Option<TestReport>,
}

/// Everything one attempt produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub attempt: u32,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub phases: Vec<PhaseRecord>,
    #[serde(default)]
    pub evidence: ValidationEvidence,
    #[serde(default)]
    pub gate_outcomes: Vec<QualityGateOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub failure: Option<TaskFailure>,
}

impl TaskResult {
    /// A failed result with no work attached.
    pub fn failed(
        task_id: impl Into<TaskId>,
        attempt: u32,
        started_at: DateTime<Utc>,
        failure: TaskFailure,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            attempt,
            artifacts: Vec::new(),
            phases: Vec::new(),
            evidence: ValidationEvidence::default(),
            gate_outcomes: Vec::new(),
            started_at,
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// Milliseconds between two timestamps, zero if they are out of order.
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

/// Milliseconds elapsed on a monotonic clock.
pub fn elapsed_ms_since(start: std::time::Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_reason_is_plain() {
        let failure = TaskFailure::new(FailureKind::Timeout, "exceeded 5s").in_phase(TddPhase::Green);
        assert_eq!(failure.reason(), "timeout");
    }

    #[test]
    fn phase_is_prefixed_to_reason() {
        let failure = TaskFailure::new(FailureKind::PhaseRejected, "no failing test").in_phase(TddPhase::Red);
        assert_eq!(failure.reason(), "red phase: no failing test");
    }

    #[test]
    fn test_report_requires_a_passing_test() {
        assert!(!TestReport::default().all_passed());
        let report = TestReport { passed: 3, ..Default::default() };
        assert!(report.all_passed());
        assert_eq!(report.executed(), 3);
    }
}
