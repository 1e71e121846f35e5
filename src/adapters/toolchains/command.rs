//! Toolchain that drives external commands.
//!
//! Each phase runs the configured phase command in the sandbox root, then the
//! test command, and for refactor the optional coverage command. The task is
//! handed to the phase command as JSON in `PARAFLOW_TASK` and as a file whose
//! path is in `PARAFLOW_TASK_FILE`. Artifacts are whatever the phase changed
//! among the task's file targets and test file.

use async_trait::async_trait;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::process::Output;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::diff::line_diff;
use crate::domain::models::{
    Artifact, CommandSpec, CompleteTask, FileAction, TddPhase, TestReport, ToolchainConfig,
};
use crate::domain::ports::{PhaseContext, PhaseOutput, ToolError, Toolchain};

/// Exit code a phase tool uses to ask for a retry (`EX_TEMPFAIL`).
const EXIT_TEMPFAIL: i32 = 75;

static CARGO_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed; (\d+) ignored")
        .expect("valid cargo test regex")
});

static CARGO_FAILED_TEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test (\S+) \.\.\. FAILED$").expect("valid cargo test regex"));

static PYTEST_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) (passed|failed|skipped|error|errors)\b").expect("valid pytest regex")
});

static PYTEST_FAILED_TEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^FAILED (\S+)").expect("valid pytest regex"));

static COVERAGE_PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(\d+(?:\.\d+)?)% coverage|^TOTAL\s.*?(\d+(?:\.\d+)?)%\s*$")
        .expect("valid coverage regex")
});

/// Toolchain configured from [`ToolchainConfig`].
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    config: ToolchainConfig,
}

impl CommandToolchain {
    pub const fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    const fn phase_command(&self, phase: TddPhase) -> Option<&CommandSpec> {
        match phase {
            TddPhase::Red => self.config.red.as_ref(),
            TddPhase::Green => self.config.green.as_ref(),
            TddPhase::Refactor => self.config.refactor.as_ref(),
        }
    }

    /// Test counts from cargo test or pytest output.
    pub fn parse_test_output(output: &str) -> TestReport {
        let mut report = TestReport::default();
        let mut saw_summary = false;

        for caps in CARGO_RESULT.captures_iter(output) {
            saw_summary = true;
            report.passed += caps[1].parse::<u32>().unwrap_or(0);
            report.failed += caps[2].parse::<u32>().unwrap_or(0);
            report.skipped += caps[3].parse::<u32>().unwrap_or(0);
        }

        if !saw_summary {
            // pytest: "==== 2 failed, 3 passed in 0.12s ===="
            if let Some(line) = output
                .lines()
                .rev()
                .find(|l| l.starts_with('=') && l.contains(" in ") && PYTEST_COUNT.is_match(l))
            {
                for caps in PYTEST_COUNT.captures_iter(line) {
                    let count = caps[1].parse::<u32>().unwrap_or(0);
                    match &caps[2] {
                        "passed" => report.passed += count,
                        "skipped" => report.skipped += count,
                        _ => report.failed += count,
                    }
                }
            }
        }

        for line in output.lines() {
            let line = line.trim();
            let name = CARGO_FAILED_TEST
                .captures(line)
                .or_else(|| PYTEST_FAILED_TEST.captures(line))
                .map(|caps| caps[1].to_string());
            if let Some(name) = name {
                if !report.failing_tests.contains(&name) {
                    report.failing_tests.push(name);
                }
            }
        }
        report
    }

    /// Last coverage percentage in the output.
    pub fn parse_coverage(output: &str) -> Option<f64> {
        COVERAGE_PERCENT
            .captures_iter(output)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .filter_map(|m| m.as_str().parse::<f64>().ok())
            .last()
    }

    async fn run(
        &self,
        command: &CommandSpec,
        ctx: &PhaseContext<'_>,
        task_json: &str,
        task_file: &Path,
    ) -> Result<Output, ToolError> {
        debug!(program = %command.program, phase = %ctx.phase, "running tool");
        Command::new(&command.program)
            .args(&command.args)
            .current_dir(ctx.sandbox_root)
            .env("PARAFLOW_TASK", task_json)
            .env("PARAFLOW_TASK_FILE", task_file)
            .env("PARAFLOW_TASK_ID", &ctx.task.id)
            .env("PARAFLOW_PHASE", ctx.phase.to_string())
            .env("PARAFLOW_ATTEMPT", ctx.attempt.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ToolError::MissingPrerequisite(format!(
                    "`{}` not found: {e}",
                    command.program
                )),
                _ => ToolError::Transient(format!("could not start `{}`: {e}", command.program)),
            })
    }
}

/// Paths a phase may touch: the file targets and the test file.
fn tracked_paths(task: &CompleteTask) -> Result<Vec<(String, FileAction)>, ToolError> {
    let mut paths: Vec<(String, FileAction)> = task
        .embedded_context
        .file_targets
        .iter()
        .map(|t| (t.path.clone(), t.action))
        .collect();
    paths.push((task.test_specification.test_file.clone(), FileAction::Create));

    for (path, _) in &paths {
        let escapes = Path::new(path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ToolError::Fatal(format!("file target `{path}` escapes the sandbox")));
        }
    }
    Ok(paths)
}

async fn snapshot(root: &Path, paths: &[(String, FileAction)]) -> Vec<String> {
    let mut contents = Vec::with_capacity(paths.len());
    for (path, _) in paths {
        contents.push(tokio::fs::read_to_string(root.join(path)).await.unwrap_or_default());
    }
    contents
}

fn classify_exit(program: &str, output: &Output) -> ToolError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(5)..].join("\n");
    let lower = stderr.to_lowercase();
    let message = format!("`{program}` exited with {}: {tail}", output.status);

    if lower.contains("out of memory") || lower.contains("no space left") || lower.contains("too many open files") {
        ToolError::ResourceExhausted(message)
    } else if output.status.code() == Some(EXIT_TEMPFAIL) || output.status.code().is_none() {
        ToolError::Transient(message)
    } else {
        ToolError::Fatal(message)
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    fn name(&self) -> &str {
        "command"
    }

    async fn run_phase(&self, ctx: PhaseContext<'_>) -> Result<PhaseOutput, ToolError> {
        let task = ctx.task;
        let command = self.phase_command(ctx.phase).ok_or_else(|| {
            ToolError::MissingPrerequisite(format!("no {} command is configured", ctx.phase))
        })?;
        let paths = tracked_paths(task)?;
        let before = snapshot(ctx.sandbox_root, &paths).await;

        let task_json = serde_json::to_string(task)
            .map_err(|e| ToolError::Fatal(format!("task does not serialize: {e}")))?;
        let task_dir: PathBuf = ctx.sandbox_root.join(".paraflow").join("tasks");
        let task_file = task_dir.join(format!("{}-{}.json", task.id, ctx.attempt));
        tokio::fs::create_dir_all(&task_dir)
            .await
            .map_err(|e| ToolError::ResourceExhausted(format!("cannot create {}: {e}", task_dir.display())))?;
        tokio::fs::write(&task_file, &task_json)
            .await
            .map_err(|e| ToolError::ResourceExhausted(format!("cannot write {}: {e}", task_file.display())))?;

        info!(task_id = %task.id, phase = %ctx.phase, program = %command.program, "phase started");
        let phase_output = self.run(command, &ctx, &task_json, &task_file).await?;
        if !phase_output.status.success() {
            return Err(classify_exit(&command.program, &phase_output));
        }

        let test_output = self.run(&self.config.test, &ctx, &task_json, &task_file).await?;
        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&test_output.stdout),
            String::from_utf8_lossy(&test_output.stderr)
        );
        let tests = Self::parse_test_output(&text);
        if tests.executed() == 0 && !test_output.status.success() {
            return Err(classify_exit(&self.config.test.program, &test_output));
        }

        let mut coverage_percent = None;
        if ctx.phase == TddPhase::Refactor {
            if let Some(coverage) = &self.config.coverage {
                let output = self.run(coverage, &ctx, &task_json, &task_file).await?;
                let text = format!(
                    "{}\n{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                coverage_percent = Self::parse_coverage(&text);
                if coverage_percent.is_none() {
                    warn!(task_id = %task.id, program = %coverage.program, "no coverage figure in output");
                }
            }
        }

        let after = snapshot(ctx.sandbox_root, &paths).await;
        let artifacts = paths
            .iter()
            .zip(before.iter().zip(after))
            .filter(|(_, (old, new))| *old != new)
            .map(|((path, action), (old, new))| Artifact {
                path: path.clone(),
                action: *action,
                diff: line_diff(path, old, &new),
                content: new,
            })
            .collect();

        if let Err(e) = tokio::fs::remove_file(&task_file).await {
            debug!(error = %e, "task file already gone");
        }

        Ok(PhaseOutput {
            tests,
            artifacts,
            coverage_percent,
            lint: None,
            security_findings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EmbeddedContext, FileTarget, QualityGateRequirements, TestSpecification};

    #[test]
    fn parses_cargo_test_summaries() {
        let output = "\
running 3 tests
test auth::tests::accepts ... ok
test auth::tests::rejects_empty ... FAILED
test result: FAILED. 2 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out

running 1 test
test result: ok. 1 passed; 0 failed; 1 ignored; 0 measured; 0 filtered out
";
        let report = CommandToolchain::parse_test_output(output);
        assert_eq!(report.passed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failing_tests, vec!["auth::tests::rejects_empty".to_string()]);
    }

    #[test]
    fn parses_pytest_summary() {
        let output = "FAILED tests/test_auth.py::test_empty - AssertionError\n\
                      ========= 1 failed, 4 passed, 2 skipped in 0.31s =========";
        let report = CommandToolchain::parse_test_output(output);
        assert_eq!((report.passed, report.failed, report.skipped), (4, 1, 2));
        assert_eq!(report.failing_tests, vec!["tests/test_auth.py::test_empty".to_string()]);
    }

    #[test]
    fn parses_coverage_formats() {
        assert_eq!(CommandToolchain::parse_coverage("87.5% coverage, 70/80 lines covered"), Some(87.5));
        assert_eq!(
            CommandToolchain::parse_coverage("Name    Stmts   Miss  Cover\nTOTAL     120     18    85%\n"),
            Some(85.0)
        );
        assert_eq!(CommandToolchain::parse_coverage("no numbers here"), None);
    }

    fn task(path: &str) -> CompleteTask {
        CompleteTask {
            id: "t".into(),
            title: "t".into(),
            dependencies: Default::default(),
            embedded_context: EmbeddedContext {
                file_targets: vec![FileTarget {
                    path: path.into(),
                    action: FileAction::Modify,
                }],
                ..Default::default()
            },
            test_specification: TestSpecification {
                test_file: "tests/t.rs".into(),
                framework: None,
                required_cases: vec!["case".into()],
                coverage_threshold: None,
            },
            quality_requirements: QualityGateRequirements::default(),
            acceptance_criteria: vec!["ok".into()],
            estimated_duration_secs: 1,
            max_duration_secs: 1,
            priority: 0,
        }
    }

    #[test]
    fn rejects_targets_outside_sandbox() {
        assert!(tracked_paths(&task("../etc/passwd")).is_err());
        assert!(tracked_paths(&task("/etc/passwd")).is_err());
        assert_eq!(tracked_paths(&task("./src/lib.rs")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_phase_command_is_a_missing_prerequisite() {
        let toolchain = CommandToolchain::new(ToolchainConfig::default());
        let task = task("src/lib.rs");
        let dir = tempfile::tempdir().unwrap();
        let err = toolchain
            .run_phase(PhaseContext {
                phase: TddPhase::Red,
                task: &task,
                sandbox_root: dir.path(),
                attempt: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingPrerequisite(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn collects_changed_files_as_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "old\n").unwrap();

        let config = ToolchainConfig {
            sandbox_root: dir.path().to_path_buf(),
            green: Some(CommandSpec::new("sh", &["-c", "printf 'new\\n' > src/lib.rs"])),
            test: CommandSpec::new(
                "sh",
                &["-c", "echo 'test result: ok. 1 passed; 0 failed; 0 ignored'"],
            ),
            ..Default::default()
        };
        let task = task("src/lib.rs");
        let output = CommandToolchain::new(config)
            .run_phase(PhaseContext {
                phase: TddPhase::Green,
                task: &task,
                sandbox_root: dir.path(),
                attempt: 1,
            })
            .await
            .unwrap();

        assert_eq!(output.tests.passed, 1);
        assert_eq!(output.artifacts.len(), 1);
        assert_eq!(output.artifacts[0].content, "new\n");
        assert!(output.artifacts[0].diff.contains("-old\n+new\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tempfail_exit_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolchainConfig {
            red: Some(CommandSpec::new("sh", &["-c", "exit 75"])),
            ..Default::default()
        };
        let task = task("src/lib.rs");
        let err = CommandToolchain::new(config)
            .run_phase(PhaseContext {
                phase: TddPhase::Red,
                task: &task,
                sandbox_root: dir.path(),
                attempt: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Transient(_)));
    }
}
