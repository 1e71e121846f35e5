use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::{CommandSpec, Config};

/// Commented default configuration written by `paraflow init`.
pub const DEFAULT_CONFIG_YAML: &str = r#"# paraflow configuration
# Values here override built-in defaults. .paraflow/local.yaml overrides
# this file, and PARAFLOW_* environment variables override both
# (nested keys use "__", e.g. PARAFLOW_EXECUTION__MAX_RETRIES=3).

execution:
  failure_policy: continue        # continue | fail_fast
  max_retries: 2                  # retries for transient failures
  max_requeues: 1                 # requeues for timeouts and resource exhaustion
  default_task_timeout_secs: 1800
  initial_backoff_ms: 200
  max_backoff_ms: 5000

resources:
  workers_per_core: 2
  worker_memory_mb: 512
  # memory_budget_mb: 8192        # defaults to host total memory
  # cpu_cores: 8                  # defaults to detected cores
  # max_workers: 16
  pressure_threshold: 0.9
  pressure_window_secs: 30

quality:
  coverage_threshold: 80.0
  max_lint_warnings: 0
  security_severity_threshold: medium   # low | medium | high | critical
  # lint_command: { program: cargo, args: [clippy, --, -D, warnings] }
  # security_command: { program: cargo, args: [audit] }

toolchain:
  sandbox_root: "."
  # red: { program: ./tools/write-tests, args: [] }
  # green: { program: ./tools/implement, args: [] }
  # refactor: { program: ./tools/refactor, args: [] }
  test: { program: cargo, args: [test] }
  # coverage: { program: cargo, args: [tarpaulin] }

notifications:
  log_transitions: true
  # transitions_file: .paraflow/transitions.jsonl
  commit_proposals_dir: .paraflow/proposals
  queue_capacity: 256
  sink_timeout_ms: 2000

logging:
  level: info                     # trace | debug | info | warn | error
  format: pretty                  # json | pretty
  # log_dir: .paraflow/logs
  rotation: daily                 # daily | hourly | never
"#;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid workers_per_core: {0}. Must be at least 1")]
    InvalidWorkersPerCore(usize),

    #[error("Invalid worker_memory_mb: {0}. Must be at least 1")]
    InvalidWorkerMemory(u64),

    #[error("Invalid pressure_threshold: {0}. Must be in (0, 1]")]
    InvalidPressureThreshold(f64),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid coverage_threshold: {0}. Must be between 0 and 100")]
    InvalidCoverageThreshold(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Command for {0} has an empty program name")]
    EmptyProgram(&'static str),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .paraflow/config.yaml (project config, created by init)
    /// 3. .paraflow/local.yaml (local overrides, optional)
    /// 4. Environment variables (PARAFLOW_* prefix)
    pub fn load() -> Result<Config> {
        Self::load_in(".")
    }

    /// Load configuration for the project rooted at `root`.
    pub fn load_in(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(".paraflow");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("PARAFLOW_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("PARAFLOW_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let resources = &config.resources;
        if resources.workers_per_core == 0 {
            return Err(ConfigError::InvalidWorkersPerCore(resources.workers_per_core));
        }
        if resources.worker_memory_mb == 0 {
            return Err(ConfigError::InvalidWorkerMemory(resources.worker_memory_mb));
        }
        if !(resources.pressure_threshold > 0.0 && resources.pressure_threshold <= 1.0) {
            return Err(ConfigError::InvalidPressureThreshold(resources.pressure_threshold));
        }
        if resources.max_workers == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_workers must be at least 1 when set".to_string(),
            ));
        }

        let execution = &config.execution;
        if execution.initial_backoff_ms >= execution.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                execution.initial_backoff_ms,
                execution.max_backoff_ms,
            ));
        }
        if execution.default_task_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "default_task_timeout_secs must be at least 1".to_string(),
            ));
        }

        let coverage = config.quality.coverage_threshold;
        if !(0.0..=100.0).contains(&coverage) {
            return Err(ConfigError::InvalidCoverageThreshold(coverage));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        let toolchain = &config.toolchain;
        let commands: [(&'static str, Option<&CommandSpec>); 7] = [
            ("toolchain.red", toolchain.red.as_ref()),
            ("toolchain.green", toolchain.green.as_ref()),
            ("toolchain.refactor", toolchain.refactor.as_ref()),
            ("toolchain.test", Some(&toolchain.test)),
            ("toolchain.coverage", toolchain.coverage.as_ref()),
            ("quality.lint_command", config.quality.lint_command.as_ref()),
            ("quality.security_command", config.quality.security_command.as_ref()),
        ];
        for (name, command) in commands {
            if command.is_some_and(|c| c.program.trim().is_empty()) {
                return Err(ConfigError::EmptyProgram(name));
            }
        }

        if config.notifications.queue_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "notifications.queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
