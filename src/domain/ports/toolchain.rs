//! Toolchain port - the compiler/test-runner bindings a worker drives.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::{
    Artifact, CompleteTask, LintReport, SecurityFinding, TddPhase, TestReport,
};

/// Errors a toolchain reports for a phase it could not carry out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The invocation failed but may succeed if tried again.
    #[error("transient tool failure: {0}")]
    Transient(String),

    /// Something the task needs (a file, a binary, a service) is missing.
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// The host ran out of memory, disk or process slots.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The tool cannot complete this task.
    #[error("tool failure: {0}")]
    Fatal(String),
}

/// Inputs for one phase invocation.
#[derive(Debug, Clone, Copy)]
pub struct PhaseContext<'a> {
    pub phase: TddPhase,
    pub task: &'a CompleteTask,
    pub sandbox_root: &'a Path,
    pub attempt: u32,
}

/// What a phase produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseOutput {
    /// Test run after the phase finished.
    pub tests: TestReport,
    pub artifacts: Vec<Artifact>,
    pub coverage_percent: Option<f64>,
    pub lint: Option<LintReport>,
    pub security_findings: Vec<SecurityFinding>,
}

/// Tool bindings shared by every worker.
///
/// Implementations must not keep per-task state between calls: a worker may
/// be torn down after any phase and a fresh one started for the retry.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Run one phase of the red/green/refactor protocol.
    async fn run_phase(&self, ctx: PhaseContext<'_>) -> Result<PhaseOutput, ToolError>;
}
