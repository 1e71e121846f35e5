//! Stateless worker.
//!
//! A worker executes exactly one attempt of one task through the fixed
//! red/green/refactor protocol. It owns nothing but the task it was handed and
//! the shared tool bindings, and it never retries: a failed phase ends the
//! attempt with a structured reason and the recovery manager decides what
//! happens next.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::models::{
    elapsed_ms_since, Artifact, CompleteTask, FailureKind, PhaseRecord, TaskFailure, TaskResult,
    TaskStatus, TddPhase, ValidationEvidence,
};
use crate::domain::ports::{PhaseContext, PhaseOutput, ToolError, Toolchain};

/// Tool bindings shared by every worker of a session.
#[derive(Clone)]
pub struct ToolBindings {
    pub toolchain: Arc<dyn Toolchain>,
    pub sandbox_root: PathBuf,
}

impl std::fmt::Debug for ToolBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBindings")
            .field("toolchain", &self.toolchain.name())
            .field("sandbox_root", &self.sandbox_root)
            .finish()
    }
}

impl ToolBindings {
    pub fn new(toolchain: Arc<dyn Toolchain>, sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            toolchain,
            sandbox_root: sandbox_root.into(),
        }
    }
}

impl From<ToolError> for FailureKind {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Transient(_) => Self::ToolTransient,
            ToolError::MissingPrerequisite(_) => Self::MissingPrerequisite,
            ToolError::ResourceExhausted(_) => Self::ResourceExhausted,
            ToolError::Fatal(_) => Self::ToolFatal,
        }
    }
}

/// One-shot executor for a single task attempt.
#[derive(Debug)]
pub struct Worker {
    bindings: ToolBindings,
    task: Arc<CompleteTask>,
    attempt: u32,
}

/// Work collected across phases of one attempt.
#[derive(Default)]
struct Progress {
    artifacts: BTreeMap<String, Artifact>,
    phases: Vec<PhaseRecord>,
    evidence: ValidationEvidence,
}

impl Progress {
    fn absorb(&mut self, output: PhaseOutput) {
        for artifact in output.artifacts {
            match self.artifacts.get_mut(&artifact.path) {
                Some(existing) => {
                    existing.content = artifact.content;
                    if !artifact.diff.is_empty() {
                        if !existing.diff.is_empty() && !existing.diff.ends_with('\n') {
                            existing.diff.push('\n');
                        }
                        existing.diff.push_str(&artifact.diff);
                    }
                }
                None => {
                    self.artifacts.insert(artifact.path.clone(), artifact);
                }
            }
        }

        self.evidence.tests = Some(output.tests);
        if output.coverage_percent.is_some() {
            self.evidence.coverage_percent = output.coverage_percent;
        }
        if output.lint.is_some() {
            self.evidence.lint = output.lint;
        }
        self.evidence.security_findings.extend(output.security_findings);
    }
}

impl Worker {
    /// A fresh worker for `task`. Build a new one for every attempt.
    pub fn new(bindings: ToolBindings, task: Arc<CompleteTask>, attempt: u32) -> Self {
        Self {
            bindings,
            task,
            attempt,
        }
    }

    /// Run red, green and refactor in order.
    ///
    /// Cancellation is checked before each phase; a running phase is always
    /// allowed to finish so no half-written artifacts are left behind.
    #[instrument(skip_all, fields(task_id = %self.task.id, attempt = self.attempt))]
    pub async fn execute(self, cancel: CancellationToken) -> TaskResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut progress = Progress::default();

        for phase in TddPhase::SEQUENCE {
            if cancel.is_cancelled() {
                info!(%phase, "cancelled before phase");
                let failure = TaskFailure::new(
                    FailureKind::Cancelled,
                    format!("session aborted before the {phase} phase"),
                )
                .in_phase(phase);
                return self.finish(progress, started_at, clock, Some(failure));
            }

            let phase_clock = Instant::now();
            let ctx = PhaseContext {
                phase,
                task: &self.task,
                sandbox_root: &self.bindings.sandbox_root,
                attempt: self.attempt,
            };
            let outcome = self.bindings.toolchain.run_phase(ctx).await;
            let duration_ms = elapsed_ms_since(phase_clock);

            let output = match outcome {
                Ok(output) => output,
                Err(err) => {
                    warn!(%phase, error = %err, "phase failed");
                    progress.phases.push(PhaseRecord {
                        phase,
                        succeeded: false,
                        duration_ms,
                        tests: None,
                    });
                    let message = err.to_string();
                    let failure = TaskFailure::new(err.into(), message).in_phase(phase);
                    return self.finish(progress, started_at, clock, Some(failure));
                }
            };

            let rejection = check_protocol(phase, &output);
            progress.phases.push(PhaseRecord {
                phase,
                succeeded: rejection.is_none(),
                duration_ms,
                tests: Some(output.tests.clone()),
            });
            progress.absorb(output);

            if let Some(message) = rejection {
                warn!(%phase, reason = %message, "phase rejected");
                let failure = TaskFailure::new(FailureKind::PhaseRejected, message).in_phase(phase);
                return self.finish(progress, started_at, clock, Some(failure));
            }
            debug!(%phase, duration_ms, "phase complete");
        }

        self.finish(progress, started_at, clock, None)
    }

    fn finish(
        &self,
        progress: Progress,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
        failure: Option<TaskFailure>,
    ) -> TaskResult {
        let status = if failure.is_none() {
            TaskStatus::Success
        } else {
            TaskStatus::Failed
        };
        TaskResult {
            task_id: self.task.id.clone(),
            status,
            attempt: self.attempt,
            artifacts: progress.artifacts.into_values().collect(),
            phases: progress.phases,
            evidence: progress.evidence,
            gate_outcomes: Vec::new(),
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed_ms_since(clock),
            failure,
        }
    }
}

/// Test evidence each phase must show.
fn check_protocol(phase: TddPhase, output: &PhaseOutput) -> Option<String> {
    let tests = &output.tests;
    match phase {
        TddPhase::Red if tests.failed == 0 => {
            Some("no failing test was produced from the test specification".to_string())
        }
        TddPhase::Green if !tests.all_passed() => Some(format!(
            "implementation leaves {} of {} test(s) failing",
            tests.failed,
            tests.executed()
        )),
        TddPhase::Refactor if !tests.all_passed() => Some(format!(
            "refactor broke {} test(s)",
            tests.failed
        )),
        _ => None,
    }
}
