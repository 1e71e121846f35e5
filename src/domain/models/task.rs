//! Complete, self-contained task specifications.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Task identifiers are the plan's own string ids.
pub type TaskId = String;

/// What the task does to a file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    #[default]
    Create,
    Modify,
}

/// A file a task creates or modifies, relative to the sandbox root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FileTarget {
    pub path: String,
    #[serde(default)]
    pub action: FileAction,
}

/// Tests a task must write before implementing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestSpecification {
    pub test_file: String,

    #[serde(default)]
    pub framework: Option<String>,

    /// Required test cases, one line each.
    pub required_cases: Vec<String>,

    /// Coverage percentage (0-100) required for this task's code.
    #[serde(default)]
    pub coverage_threshold: Option<f64>,
}

/// The fixed set of quality gates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    TestPass,
    Coverage,
    SecurityScan,
    StaticLint,
}

impl GateKind {
    pub const ALL: [Self; 4] = [
        Self::TestPass,
        Self::Coverage,
        Self::SecurityScan,
        Self::StaticLint,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TestPass => "test_pass",
            Self::Coverage => "coverage",
            Self::SecurityScan => "security_scan",
            Self::StaticLint => "static_lint",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "test_pass" | "tests" => Ok(Self::TestPass),
            "coverage" => Ok(Self::Coverage),
            "security_scan" | "security" => Ok(Self::SecurityScan),
            "static_lint" | "lint" => Ok(Self::StaticLint),
            other => Err(format!("unknown quality gate: {other}")),
        }
    }
}

/// Severity of a security finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Gates a task's output must pass, with their thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityGateRequirements {
    #[serde(default = "default_gates")]
    pub gates: Vec<GateKind>,

    /// Minimum coverage percentage (0-100).
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,

    #[serde(default)]
    pub max_lint_warnings: u32,

    #[serde(default = "default_severity_threshold")]
    pub security_severity_threshold: Severity,

    /// Tests that must have run for the test gate to pass.
    #[serde(default)]
    pub min_tests: u32,
}

fn default_gates() -> Vec<GateKind> {
    GateKind::ALL.to_vec()
}

const fn default_coverage_threshold() -> f64 {
    80.0
}

const fn default_severity_threshold() -> Severity {
    Severity::Medium
}

impl Default for QualityGateRequirements {
    fn default() -> Self {
        Self {
            gates: default_gates(),
            coverage_threshold: default_coverage_threshold(),
            max_lint_warnings: 0,
            security_severity_threshold: default_severity_threshold(),
            min_tests: 0,
        }
    }
}

impl QualityGateRequirements {
    /// Required gates, deduplicated and in a stable order.
    pub fn required(&self) -> BTreeSet<GateKind> {
        self.gates.iter().copied().collect()
    }
}

/// A cross-reference that was resolved into inlined text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedReference {
    /// The marker as it appeared in the plan.
    pub marker: String,
    /// What it pointed at (task id or definition name).
    pub source: String,
    /// The text that now stands in its place.
    pub text: String,
}

/// Context inlined into a task so a worker never has to look anything up.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddedContext {
    pub project_name: String,
    pub project_background: String,
    pub description: String,
    #[serde(default)]
    pub architecture_excerpts: BTreeMap<String, String>,
    pub file_targets: Vec<FileTarget>,
    #[serde(default)]
    pub implementation_guidance: Vec<String>,
    /// Task notes with every cross-reference replaced by its text.
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub resolved_references: Vec<ResolvedReference>,
}

/// A task specification complete enough for any fresh worker to execute.
///
/// Immutable once built; handed to workers as `Arc<CompleteTask>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompleteTask {
    pub id: TaskId,
    pub title: String,
    pub dependencies: BTreeSet<TaskId>,
    pub embedded_context: EmbeddedContext,
    pub test_specification: TestSpecification,
    pub quality_requirements: QualityGateRequirements,
    pub acceptance_criteria: Vec<String>,
    pub estimated_duration_secs: u64,
    pub max_duration_secs: u64,
    pub priority: u8,
}

impl CompleteTask {
    pub const fn estimated_duration(&self) -> Duration {
        Duration::from_secs(self.estimated_duration_secs)
    }

    pub const fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// All free text carried by the task, for scanning.
    pub fn text_fields(&self) -> impl Iterator<Item = &str> {
        let ctx = &self.embedded_context;
        [
            self.title.as_str(),
            ctx.project_background.as_str(),
            ctx.description.as_str(),
            ctx.notes.as_str(),
        ]
        .into_iter()
        .chain(ctx.architecture_excerpts.values().map(String::as_str))
        .chain(ctx.implementation_guidance.iter().map(String::as_str))
        .chain(self.acceptance_criteria.iter().map(String::as_str))
        .chain(self.test_specification.required_cases.iter().map(String::as_str))
    }
}
