//! Scripted toolchain for tests and demos.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::diff::line_diff;
use crate::domain::models::{Artifact, CompleteTask, FileAction, LintReport, TaskId, TddPhase, TestReport};
use crate::domain::ports::{PhaseContext, PhaseOutput, ToolError, Toolchain};

/// A scripted way for a phase to go wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Red phase reports no failing test.
    NoFailingTest,
    /// This many tests keep failing after the phase.
    TestsStillFailing(u32),
    Transient(String),
    Fatal(String),
    MissingPrerequisite(String),
    ResourceExhausted(String),
    /// The phase panics.
    Panic,
}

/// How the scripted toolchain treats one task.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedBehavior {
    failure: Option<(TddPhase, ScriptedFailure)>,
    /// Fail only on attempts up to this number; `None` fails every attempt.
    failing_attempts: Option<u32>,
    phase_delay: Duration,
    coverage: Option<f64>,
    lint_warnings: u32,
    source: Option<String>,
}

impl Default for ScriptedBehavior {
    fn default() -> Self {
        Self {
            failure: None,
            failing_attempts: None,
            phase_delay: Duration::ZERO,
            coverage: Some(92.5),
            lint_warnings: 0,
            source: None,
        }
    }
}

impl ScriptedBehavior {
    /// Every phase succeeds.
    pub fn success() -> Self {
        Self::default()
    }

    /// `phase` fails with `failure` on every attempt.
    pub fn failing(phase: TddPhase, failure: ScriptedFailure) -> Self {
        Self {
            failure: Some((phase, failure)),
            ..Self::default()
        }
    }

    /// Limit the scripted failure to the first `n` attempts.
    #[must_use]
    pub const fn on_first_attempts(mut self, n: u32) -> Self {
        self.failing_attempts = Some(n);
        self
    }

    /// Sleep this long in every phase.
    #[must_use]
    pub const fn with_phase_delay(mut self, delay: Duration) -> Self {
        self.phase_delay = delay;
        self
    }

    /// Coverage reported after refactor.
    #[must_use]
    pub const fn with_coverage(mut self, coverage: Option<f64>) -> Self {
        self.coverage = coverage;
        self
    }

    #[must_use]
    pub const fn with_lint_warnings(mut self, warnings: u32) -> Self {
        self.lint_warnings = warnings;
        self
    }

    /// Implementation content written by green.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn failure_for(&self, phase: TddPhase, attempt: u32) -> Option<&ScriptedFailure> {
        let (failing_phase, failure) = self.failure.as_ref()?;
        let applies = *failing_phase == phase
            && self.failing_attempts.map_or(true, |limit| attempt <= limit);
        applies.then_some(failure)
    }
}

/// One recorded phase invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCall {
    pub task_id: TaskId,
    pub phase: TddPhase,
    pub attempt: u32,
}

/// In-process toolchain with per-task scripted outcomes.
///
/// Red writes the test file with every required case failing, green writes
/// each file target and makes the tests pass, refactor rewrites the targets
/// and reports coverage and lint.
#[derive(Debug, Default)]
pub struct ScriptedToolchain {
    default_behavior: ScriptedBehavior,
    behaviors: RwLock<HashMap<TaskId, ScriptedBehavior>>,
    calls: Mutex<Vec<PhaseCall>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct InFlight {
    counter: Arc<AtomicUsize>,
}

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toolchain where tasks without their own script use `behavior`.
    pub fn with_default_behavior(behavior: ScriptedBehavior) -> Self {
        Self {
            default_behavior: behavior,
            ..Self::default()
        }
    }

    pub async fn set_behavior(&self, task_id: impl Into<TaskId>, behavior: ScriptedBehavior) {
        self.behaviors.write().await.insert(task_id.into(), behavior);
    }

    /// Every phase invocation so far, in call order.
    pub async fn calls(&self) -> Vec<PhaseCall> {
        self.calls.lock().await.clone()
    }

    /// Attempts started for `task_id` (red phase calls).
    pub async fn attempts(&self, task_id: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.task_id == task_id && c.phase == TddPhase::Red)
            .count()
    }

    /// Most phases that were ever running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn behavior_for(&self, task_id: &str) -> ScriptedBehavior {
        self.behaviors
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| self.default_behavior.clone())
    }
}

fn test_content(task: &CompleteTask) -> String {
    let mut content = format!("// tests for {}\n", task.id);
    for case in &task.test_specification.required_cases {
        let name: String = case
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        content.push_str(&format!("#[test]\nfn {name}() {{}}\n"));
    }
    content
}

fn implementation_content(task: &CompleteTask, path: &str, behavior: &ScriptedBehavior) -> String {
    behavior
        .source
        .clone()
        .unwrap_or_else(|| format!("// {} ({path})\npub fn run() -> bool {{\n    true\n}}\n", task.title))
}

fn refactored_content(implementation: &str) -> String {
    format!("{implementation}\n#[inline]\npub fn ready() -> bool {{\n    run()\n}}\n")
}

fn artifact(path: &str, action: FileAction, before: &str, after: String) -> Artifact {
    Artifact {
        path: path.to_string(),
        action,
        diff: line_diff(path, before, &after),
        content: after,
    }
}

#[async_trait]
impl Toolchain for ScriptedToolchain {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run_phase(&self, ctx: PhaseContext<'_>) -> Result<PhaseOutput, ToolError> {
        let task = ctx.task;
        self.calls.lock().await.push(PhaseCall {
            task_id: task.id.clone(),
            phase: ctx.phase,
            attempt: ctx.attempt,
        });
        let behavior = self.behavior_for(&task.id).await;
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak);

        if !behavior.phase_delay.is_zero() {
            tokio::time::sleep(behavior.phase_delay).await;
        }

        let failure = behavior.failure_for(ctx.phase, ctx.attempt);
        match failure {
            Some(ScriptedFailure::Transient(m)) => return Err(ToolError::Transient(m.clone())),
            Some(ScriptedFailure::Fatal(m)) => return Err(ToolError::Fatal(m.clone())),
            Some(ScriptedFailure::MissingPrerequisite(m)) => {
                return Err(ToolError::MissingPrerequisite(m.clone()))
            }
            Some(ScriptedFailure::ResourceExhausted(m)) => {
                return Err(ToolError::ResourceExhausted(m.clone()))
            }
            Some(ScriptedFailure::Panic) => {
                panic!("scripted panic in {} phase of task {}", ctx.phase, task.id)
            }
            _ => {}
        }

        let cases = &task.test_specification.required_cases;
        let total = u32::try_from(cases.len().max(1)).unwrap_or(u32::MAX);
        let still_failing = match failure {
            Some(ScriptedFailure::TestsStillFailing(n)) => (*n).min(total),
            _ => 0,
        };

        let mut output = PhaseOutput::default();
        match ctx.phase {
            TddPhase::Red => {
                if failure != Some(&ScriptedFailure::NoFailingTest) {
                    output.tests = TestReport {
                        passed: 0,
                        failed: total,
                        skipped: 0,
                        failing_tests: cases.clone(),
                    };
                }
                let test_file = &task.test_specification.test_file;
                output
                    .artifacts
                    .push(artifact(test_file, FileAction::Create, "", test_content(task)));
            }
            TddPhase::Green | TddPhase::Refactor => {
                output.tests = TestReport {
                    passed: total - still_failing,
                    failed: still_failing,
                    skipped: 0,
                    failing_tests: cases.iter().take(still_failing as usize).cloned().collect(),
                };
                for target in &task.embedded_context.file_targets {
                    let implementation = implementation_content(task, &target.path, &behavior);
                    let written = if ctx.phase == TddPhase::Green {
                        artifact(&target.path, target.action, "", implementation)
                    } else {
                        let refactored = refactored_content(&implementation);
                        artifact(&target.path, target.action, &implementation, refactored)
                    };
                    output.artifacts.push(written);
                }
                if ctx.phase == TddPhase::Refactor {
                    output.coverage_percent = behavior.coverage;
                    output.lint = Some(LintReport {
                        errors: 0,
                        warnings: behavior.lint_warnings,
                        messages: Vec::new(),
                    });
                }
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EmbeddedContext, FileTarget, QualityGateRequirements, TestSpecification};
    use std::path::Path;

    fn task() -> CompleteTask {
        CompleteTask {
            id: "login".to_string(),
            title: "Add login".to_string(),
            dependencies: Default::default(),
            embedded_context: EmbeddedContext {
                file_targets: vec![FileTarget {
                    path: "src/login.rs".to_string(),
                    action: FileAction::Create,
                }],
                ..Default::default()
            },
            test_specification: TestSpecification {
                test_file: "tests/login.rs".to_string(),
                framework: None,
                required_cases: vec!["accepts valid password".into(), "rejects empty".into()],
                coverage_threshold: None,
            },
            quality_requirements: QualityGateRequirements::default(),
            acceptance_criteria: vec![],
            estimated_duration_secs: 1,
            max_duration_secs: 5,
            priority: 50,
        }
    }

    fn ctx(task: &CompleteTask, phase: TddPhase, attempt: u32) -> PhaseContext<'_> {
        PhaseContext {
            phase,
            task,
            sandbox_root: Path::new("."),
            attempt,
        }
    }

    #[tokio::test]
    async fn red_writes_failing_tests() {
        let toolchain = ScriptedToolchain::new();
        let task = task();
        let output = toolchain.run_phase(ctx(&task, TddPhase::Red, 1)).await.unwrap();
        assert_eq!(output.tests.failed, 2);
        assert_eq!(output.artifacts[0].path, "tests/login.rs");
        assert!(output.artifacts[0].content.contains("fn accepts_valid_password()"));
    }

    #[tokio::test]
    async fn refactor_diffs_against_green() {
        let toolchain = ScriptedToolchain::new();
        let task = task();
        let output = toolchain.run_phase(ctx(&task, TddPhase::Refactor, 1)).await.unwrap();
        let diff = &output.artifacts[0].diff;
        assert!(diff.starts_with("--- a/src/login.rs"));
        assert!(diff.contains("+pub fn ready() -> bool {"));
        assert_eq!(output.coverage_percent, Some(92.5));
    }

    #[tokio::test]
    async fn failure_limited_to_early_attempts() {
        let toolchain = ScriptedToolchain::new();
        toolchain
            .set_behavior(
                "login",
                ScriptedBehavior::failing(TddPhase::Green, ScriptedFailure::Fatal("no".into()))
                    .on_first_attempts(1),
            )
            .await;
        let task = task();
        assert!(toolchain.run_phase(ctx(&task, TddPhase::Green, 1)).await.is_err());
        assert!(toolchain.run_phase(ctx(&task, TddPhase::Green, 2)).await.is_ok());
        assert_eq!(toolchain.calls().await.len(), 2);
    }
}
