//! Quality gate engine.
//!
//! Every task result passes through the gates its requirements name before
//! the task can count as succeeded. Gates run concurrently and only read the
//! result.
//!
//! The fixed gate set:
//! - [`TestPassGate`]: all tests pass and enough of them ran
//! - [`CoverageGate`]: measured coverage meets the threshold
//! - [`SecurityScanGate`]: no findings at or above the severity threshold
//! - [`StaticLintGate`]: no lint errors and warnings within budget

mod coverage;
mod lint;
mod security_scan;
mod test_pass;

pub use coverage::CoverageGate;
pub use lint::StaticLintGate;
pub use security_scan::SecurityScanGate;
pub use test_pass::TestPassGate;

use futures::future::{self, BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::models::{
    elapsed_ms_since, CommandSpec, GateKind, QualityConfig, QualityGateOutcome, QualityGateRequirements, TaskResult,
};
use crate::domain::ports::QualityGate;

/// Runs the required gates against a task result.
#[derive(Clone, Default)]
pub struct QualityGateEngine {
    gates: BTreeMap<GateKind, Arc<dyn QualityGate>>,
}

impl std::fmt::Debug for QualityGateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGateEngine")
            .field("gates", &self.gates.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl QualityGateEngine {
    /// Engine with no gates registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in gate set configured from `quality`.
    pub fn with_defaults(quality: &QualityConfig, sandbox_root: impl Into<PathBuf>) -> Self {
        let sandbox_root = sandbox_root.into();
        Self::new()
            .register(Arc::new(TestPassGate))
            .register(Arc::new(CoverageGate))
            .register(Arc::new(SecurityScanGate::new(
                quality.security_command.clone(),
                sandbox_root.clone(),
            )))
            .register(Arc::new(StaticLintGate::new(
                quality.lint_command.clone(),
                sandbox_root,
            )))
    }

    /// Add or replace the gate for its kind.
    #[must_use]
    pub fn register(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.gates.insert(gate.kind(), gate);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = GateKind> + '_ {
        self.gates.keys().copied()
    }

    /// Evaluate every required gate concurrently.
    ///
    /// A required gate that is not registered yields a failed outcome.
    pub async fn validate(
        &self,
        result: &TaskResult,
        requirements: &QualityGateRequirements,
    ) -> Vec<QualityGateOutcome> {
        let checks: Vec<BoxFuture<'_, QualityGateOutcome>> = requirements
            .required()
            .into_iter()
            .map(|kind| match self.gates.get(&kind) {
                Some(gate) => timed(gate.as_ref(), result, requirements).boxed(),
                None => future::ready(QualityGateOutcome::fail(
                    kind,
                    0.0,
                    None,
                    format!("no {kind} gate is configured"),
                ))
                .boxed(),
            })
            .collect();

        let outcomes = future::join_all(checks).await;

        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.gate.as_str())
            .collect();
        if failed.is_empty() {
            debug!(task_id = %result.task_id, gates = outcomes.len(), "all quality gates passed");
        } else {
            info!(task_id = %result.task_id, failed = ?failed, "quality gates failed");
        }

        outcomes
    }
}

async fn timed(
    gate: &dyn QualityGate,
    result: &TaskResult,
    requirements: &QualityGateRequirements,
) -> QualityGateOutcome {
    let start = Instant::now();
    let mut outcome = gate.evaluate(result, requirements).await;
    outcome.duration_ms = elapsed_ms_since(start);
    outcome
}

/// True only if every required gate has an outcome and all of them passed.
pub fn all_passed(outcomes: &[QualityGateOutcome], requirements: &QualityGateRequirements) -> bool {
    requirements.required().into_iter().all(|kind| {
        outcomes
            .iter()
            .filter(|o| o.gate == kind)
            .fold(None, |acc: Option<bool>, o| Some(acc.unwrap_or(true) && o.passed))
            .unwrap_or(false)
    })
}

/// Captured output of an external checker.
#[derive(Debug)]
pub(crate) struct CheckerOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Run an external checker in `dir`. The error is remediation text.
pub(crate) async fn run_checker(command: &CommandSpec, dir: &Path) -> Result<CheckerOutput, String> {
    let output = Command::new(&command.program)
        .args(&command.args)
        .current_dir(dir)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            tracing::error!(program = %command.program, error = %e, "failed to spawn checker");
            format!("could not run `{}`: {e}", command.program)
        })?;

    Ok(CheckerOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
    })
}
