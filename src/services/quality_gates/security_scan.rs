//! Security scan gate.
//!
//! Three sources feed the finding list: a pattern scan over the content of
//! every artifact the worker produced, findings the toolchain reported, and
//! an optional external scanner (e.g. `cargo audit`, `npm audit`). The gate
//! fails when any finding reaches the configured severity threshold.

use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

use super::run_checker;
use crate::domain::models::{
    Artifact, CommandSpec, GateKind, QualityGateOutcome, QualityGateRequirements, SecurityFinding,
    Severity, TaskResult,
};
use crate::domain::ports::QualityGate;

struct Rule {
    name: &'static str,
    severity: Severity,
    pattern: Regex,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let rule = |name, severity, pattern: &str| Rule {
        name,
        severity,
        pattern: Regex::new(pattern).expect("valid security rule regex"),
    };
    vec![
        rule(
            "private-key",
            Severity::Critical,
            r"-----BEGIN (?:RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----",
        ),
        rule("aws-access-key", Severity::Critical, r"\bAKIA[0-9A-Z]{16}\b"),
        rule(
            "hardcoded-secret",
            Severity::High,
            r#"(?i)\b(?:password|passwd|secret|api[_-]?key|access[_-]?token)\b\s*[:=]\s*["'][^"']{4,}["']"#,
        ),
        rule("shell-injection", Severity::Medium, r"(?i)\bshell\s*=\s*true\b"),
        rule("dynamic-eval", Severity::Medium, r"\beval\s*\("),
        rule("unsafe-block", Severity::Low, r"\bunsafe\s*\{"),
    ]
});

/// Gate that fails on security findings at or above the task's threshold.
#[derive(Debug, Clone)]
pub struct SecurityScanGate {
    command: Option<CommandSpec>,
    sandbox_root: PathBuf,
}

impl SecurityScanGate {
    pub fn new(command: Option<CommandSpec>, sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            command,
            sandbox_root: sandbox_root.into(),
        }
    }

    /// Pattern scan over artifact contents, one finding per matching line.
    pub fn scan_artifacts(artifacts: &[Artifact]) -> Vec<SecurityFinding> {
        let mut findings = Vec::new();
        for artifact in artifacts {
            for (idx, line) in artifact.content.lines().enumerate() {
                for rule in RULES.iter().filter(|r| r.pattern.is_match(line)) {
                    findings.push(SecurityFinding {
                        severity: rule.severity,
                        rule: rule.name.to_string(),
                        location: Some(format!("{}:{}", artifact.path, idx + 1)),
                        message: line.trim().to_string(),
                    });
                }
            }
        }
        findings
    }

    /// Parse scanner output into findings.
    ///
    /// Recognises per-advisory lines that mention a severity and summary
    /// lines such as `2 high` or `1 critical`. When a summary reports more
    /// findings than were itemised, the difference is added as unnamed
    /// findings.
    fn parse_output(stdout: &str, stderr: &str) -> Vec<SecurityFinding> {
        let mut findings = Vec::new();
        let mut summary: Vec<(Severity, usize)> = Vec::new();

        for line in stdout.lines().chain(stderr.lines()) {
            let lower = line.trim().to_lowercase();
            let parts: Vec<&str> = lower.split_whitespace().collect();

            if parts.len() >= 2 {
                if let (Ok(count), Some(severity)) = (parts[0].parse::<usize>(), severity_word(parts[1])) {
                    summary.push((severity, count));
                    continue;
                }
            }

            let mentions_advisory = lower.contains("severity") || lower.contains("vulnerability");
            let severity = if lower.contains("critical") {
                Some(Severity::Critical)
            } else if mentions_advisory && lower.contains("high") {
                Some(Severity::High)
            } else if mentions_advisory && (lower.contains("medium") || lower.contains("moderate")) {
                Some(Severity::Medium)
            } else if mentions_advisory && lower.contains("low") {
                Some(Severity::Low)
            } else {
                None
            };

            if let Some(severity) = severity {
                findings.push(SecurityFinding {
                    severity,
                    rule: "scanner".to_string(),
                    location: None,
                    message: line.trim().to_string(),
                });
            }
        }

        for (severity, count) in summary {
            let itemised = findings.iter().filter(|f| f.severity == severity).count();
            for _ in itemised..count {
                findings.push(SecurityFinding {
                    severity,
                    rule: "scanner".to_string(),
                    location: None,
                    message: format!("{severity} advisory reported by scanner summary"),
                });
            }
        }

        findings
    }
}

fn severity_word(word: &str) -> Option<Severity> {
    match word.trim_end_matches(|c: char| !c.is_alphabetic()) {
        "critical" => Some(Severity::Critical),
        "high" => Some(Severity::High),
        "moderate" | "medium" => Some(Severity::Medium),
        "low" => Some(Severity::Low),
        _ => None,
    }
}

#[async_trait]
impl QualityGate for SecurityScanGate {
    fn kind(&self) -> GateKind {
        GateKind::SecurityScan
    }

    async fn evaluate(
        &self,
        result: &TaskResult,
        requirements: &QualityGateRequirements,
    ) -> QualityGateOutcome {
        let mut findings = Self::scan_artifacts(&result.artifacts);
        findings.extend(result.evidence.security_findings.iter().cloned());

        if let Some(command) = &self.command {
            tracing::info!(task_id = %result.task_id, program = %command.program, "running security scanner");
            match run_checker(command, &self.sandbox_root).await {
                Ok(output) => {
                    let reported = Self::parse_output(&output.stdout, &output.stderr);
                    if reported.is_empty() && !output.success {
                        findings.push(SecurityFinding {
                            severity: Severity::Medium,
                            rule: "scanner".to_string(),
                            location: None,
                            message: format!("`{}` exited unsuccessfully without itemised findings", command.program),
                        });
                    }
                    findings.extend(reported);
                }
                Err(remediation) => {
                    return QualityGateOutcome::fail(GateKind::SecurityScan, 0.0, Some(0.0), remediation);
                }
            }
        }

        let threshold = requirements.security_severity_threshold;
        let blocking: Vec<&SecurityFinding> =
            findings.iter().filter(|f| f.severity >= threshold).collect();
        let metric = blocking.len() as f64;

        if blocking.is_empty() {
            return QualityGateOutcome::pass(GateKind::SecurityScan, metric, Some(0.0));
        }

        let detail = blocking
            .iter()
            .take(5)
            .map(|f| match &f.location {
                Some(location) => format!("[{}] {} at {location}", f.severity, f.rule),
                None => format!("[{}] {}: {}", f.severity, f.rule, f.message),
            })
            .collect::<Vec<_>>()
            .join("; ");
        QualityGateOutcome::fail(
            GateKind::SecurityScan,
            metric,
            Some(0.0),
            format!("{} finding(s) at or above {threshold}: {detail}", blocking.len()),
        )
    }
}
