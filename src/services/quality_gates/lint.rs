use async_trait::async_trait;
use std::path::PathBuf;

use super::run_checker;
use crate::domain::models::{
    CommandSpec, GateKind, LintReport, QualityGateOutcome, QualityGateRequirements, TaskResult,
};
use crate::domain::ports::QualityGate;

/// Gate over linter results.
///
/// Runs the configured lint command (e.g. `cargo clippy`, `eslint`) when
/// there is one, otherwise reads the lint report the toolchain collected.
/// Metric is the error count.
#[derive(Debug, Clone)]
pub struct StaticLintGate {
    command: Option<CommandSpec>,
    sandbox_root: PathBuf,
}

impl StaticLintGate {
    pub fn new(command: Option<CommandSpec>, sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            command,
            sandbox_root: sandbox_root.into(),
        }
    }

    /// Gate running `cargo clippy`.
    pub fn cargo_clippy(sandbox_root: impl Into<PathBuf>) -> Self {
        Self::new(
            Some(CommandSpec::new("cargo", &["clippy", "--", "-D", "warnings"])),
            sandbox_root,
        )
    }

    /// Parse linter output into a report.
    fn parse_output(stderr: &str, stdout: &str) -> LintReport {
        let mut messages = Vec::new();
        let mut errors: u32 = 0;
        let mut warnings: u32 = 0;

        // clippy writes to stderr, eslint to stdout.
        for line in stderr.lines().chain(stdout.lines()) {
            let trimmed = line.trim();
            if trimmed.starts_with("error") {
                messages.push(trimmed.to_string());
                errors += 1;
            } else if trimmed.starts_with("warning") {
                warnings += 1;
            }
        }

        // Rust summary lines carry the real totals.
        for line in stderr.lines().rev() {
            if let Some(count) = line
                .trim()
                .strip_prefix("error: aborting due to ")
                .and_then(leading_count)
            {
                errors = count;
                messages.retain(|m| !m.starts_with("error: aborting due to"));
                break;
            }
        }

        for line in stderr.lines().rev() {
            let Some(rest) = line.trim().strip_prefix("warning: ") else {
                continue;
            };
            // "N warnings emitted" or "N warning emitted"
            if rest.contains("warning") && rest.contains("emitted") {
                if let Some(count) = leading_count(rest) {
                    warnings = count;
                    break;
                }
            }
        }

        LintReport {
            errors,
            warnings,
            messages,
        }
    }

    fn judge(report: &LintReport, max_warnings: u32) -> QualityGateOutcome {
        let metric = f64::from(report.errors);
        let threshold = Some(0.0);

        if report.errors > 0 {
            let first = report.messages.first().map_or(String::new(), |m| format!(" (first: {m})"));
            return QualityGateOutcome::fail(
                GateKind::StaticLint,
                metric,
                threshold,
                format!("{} lint error(s){first}", report.errors),
            );
        }
        if report.warnings > max_warnings {
            return QualityGateOutcome::fail(
                GateKind::StaticLint,
                metric,
                threshold,
                format!(
                    "{} lint warning(s), at most {max_warnings} allowed",
                    report.warnings
                ),
            );
        }
        QualityGateOutcome::pass(GateKind::StaticLint, metric, threshold)
    }
}

fn leading_count(text: &str) -> Option<u32> {
    text.split_whitespace().next()?.parse().ok()
}

#[async_trait]
impl QualityGate for StaticLintGate {
    fn kind(&self) -> GateKind {
        GateKind::StaticLint
    }

    async fn evaluate(
        &self,
        result: &TaskResult,
        requirements: &QualityGateRequirements,
    ) -> QualityGateOutcome {
        let report = match &self.command {
            Some(command) => {
                tracing::info!(task_id = %result.task_id, program = %command.program, "running linter");
                match run_checker(command, &self.sandbox_root).await {
                    Ok(output) => {
                        let mut report = Self::parse_output(&output.stderr, &output.stdout);
                        if !output.success && report.errors == 0 {
                            report.errors = 1;
                            report.messages.push(format!("`{}` exited unsuccessfully", command.program));
                        }
                        report
                    }
                    Err(remediation) => {
                        return QualityGateOutcome::fail(GateKind::StaticLint, 0.0, Some(0.0), remediation);
                    }
                }
            }
            None => match &result.evidence.lint {
                Some(report) => report.clone(),
                None => {
                    return QualityGateOutcome::fail(
                        GateKind::StaticLint,
                        0.0,
                        Some(0.0),
                        "no lint report was produced; configure a lint command",
                    );
                }
            },
        };

        tracing::debug!(
            task_id = %result.task_id,
            errors = report.errors,
            warnings = report.warnings,
            "lint check complete"
        );
        Self::judge(&report, requirements.max_lint_warnings)
    }
}
