use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::recovery::FailurePolicy;
use super::task::Severity;

/// Main configuration structure for paraflow
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Retry, timeout and failure policy
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Concurrency limits and pressure detection
    #[serde(default)]
    pub resources: ResourceConfig,

    /// Quality gate defaults and external checkers
    #[serde(default)]
    pub quality: QualityConfig,

    /// Commands the worker runs for each phase
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// Task-tracking and source-control sinks
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Requeues for timeouts and resource exhaustion
    #[serde(default = "default_max_requeues")]
    pub max_requeues: u32,

    /// Max duration for tasks that do not declare one
    #[serde(default = "default_task_timeout_secs")]
    pub default_task_timeout_secs: u64,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_max_requeues() -> u32 {
    1
}

const fn default_task_timeout_secs() -> u64 {
    30 * 60
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            max_retries: default_max_retries(),
            max_requeues: default_max_requeues(),
            default_task_timeout_secs: default_task_timeout_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ResourceConfig {
    #[serde(default = "default_workers_per_core")]
    pub workers_per_core: usize,

    /// Estimated memory footprint of one worker
    #[serde(default = "default_worker_memory_mb")]
    pub worker_memory_mb: u64,

    /// Memory available to workers; host total memory when unset
    #[serde(default)]
    pub memory_budget_mb: Option<u64>,

    /// CPU cores to plan for; detected when unset
    #[serde(default)]
    pub cpu_cores: Option<usize>,

    /// Hard cap on concurrent workers
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Utilisation above which the host counts as under pressure (0-1)
    #[serde(default = "default_pressure_threshold")]
    pub pressure_threshold: f64,

    /// How long pressure must last before concurrency is degraded
    #[serde(default = "default_pressure_window_secs")]
    pub pressure_window_secs: u64,
}

const fn default_workers_per_core() -> usize {
    2
}

const fn default_worker_memory_mb() -> u64 {
    512
}

const fn default_pressure_threshold() -> f64 {
    0.9
}

const fn default_pressure_window_secs() -> u64 {
    30
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            workers_per_core: default_workers_per_core(),
            worker_memory_mb: default_worker_memory_mb(),
            memory_budget_mb: None,
            cpu_cores: None,
            max_workers: None,
            pressure_threshold: default_pressure_threshold(),
            pressure_window_secs: default_pressure_window_secs(),
        }
    }
}

/// An external command: program plus arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

/// Quality gate defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct QualityConfig {
    /// Coverage percentage required when a task does not set one
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,

    #[serde(default)]
    pub max_lint_warnings: u32,

    #[serde(default = "default_security_severity")]
    pub security_severity_threshold: Severity,

    /// External linter run by the static-lint gate
    #[serde(default)]
    pub lint_command: Option<CommandSpec>,

    /// External scanner run by the security-scan gate
    #[serde(default)]
    pub security_command: Option<CommandSpec>,
}

const fn default_coverage_threshold() -> f64 {
    80.0
}

const fn default_security_severity() -> Severity {
    Severity::Medium
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            coverage_threshold: default_coverage_threshold(),
            max_lint_warnings: 0,
            security_severity_threshold: default_security_severity(),
            lint_command: None,
            security_command: None,
        }
    }
}

/// Worker tool bindings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolchainConfig {
    /// Directory every tool runs in
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: PathBuf,

    /// Writes failing tests from the test specification
    #[serde(default)]
    pub red: Option<CommandSpec>,

    /// Writes the implementation
    #[serde(default)]
    pub green: Option<CommandSpec>,

    /// Cleans up without changing behaviour
    #[serde(default)]
    pub refactor: Option<CommandSpec>,

    /// Runs the test suite after every phase
    #[serde(default = "default_test_command")]
    pub test: CommandSpec,

    /// Reports coverage after the refactor phase
    #[serde(default)]
    pub coverage: Option<CommandSpec>,
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_test_command() -> CommandSpec {
    CommandSpec::new("cargo", &["test"])
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            sandbox_root: default_sandbox_root(),
            red: None,
            green: None,
            refactor: None,
            test: default_test_command(),
            coverage: None,
        }
    }
}

/// Notification sinks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NotificationConfig {
    /// Log every task transition through tracing
    #[serde(default = "default_true")]
    pub log_transitions: bool,

    /// Append transitions as JSON lines to this file
    #[serde(default)]
    pub transitions_file: Option<PathBuf>,

    /// Write commit proposals into this directory
    #[serde(default = "default_proposals_dir")]
    pub commit_proposals_dir: Option<PathBuf>,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_sink_timeout_ms")]
    pub sink_timeout_ms: u64,
}

const fn default_true() -> bool {
    true
}

#[allow(clippy::unnecessary_wraps)]
fn default_proposals_dir() -> Option<PathBuf> {
    Some(PathBuf::from(".paraflow/proposals"))
}

const fn default_queue_capacity() -> usize {
    256
}

const fn default_sink_timeout_ms() -> u64 {
    2_000
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            log_transitions: true,
            transitions_file: None,
            commit_proposals_dir: default_proposals_dir(),
            queue_capacity: default_queue_capacity(),
            sink_timeout_ms: default_sink_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_execution_policy() {
        let config = Config::default();
        assert_eq!(config.execution.max_retries, 2);
        assert_eq!(config.execution.max_requeues, 1);
        assert_eq!(config.execution.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.resources.workers_per_core, 2);
        assert_eq!(config.resources.worker_memory_mb, 512);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r"
execution:
  failure_policy: fail_fast
resources:
  max_workers: 3
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.execution.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.execution.max_retries, 2);
        assert_eq!(config.resources.max_workers, Some(3));
        assert!((config.resources.pressure_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.toolchain.test.program, "cargo");
    }
}
