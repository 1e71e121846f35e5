//! Command-line interface for paraflow.

pub mod commands;
pub mod output;
pub mod types;

use anyhow::Result;
use std::path::Path;
use std::process::ExitCode;

use crate::domain::errors::EngineError;
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

pub use output::{create_progress_bar, create_spinner, ProgressBarExt};
pub use types::{Cli, Commands};

/// How a command ended, mapped onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Exit 0.
    Success,
    /// Exit 1: tasks failed, the session was aborted or the command could not finish.
    Failed,
    /// Exit 2: the plan cannot be scheduled.
    Invalid,
}

impl CommandStatus {
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
            Self::Invalid => 2,
        }
    }
}

impl From<CommandStatus> for ExitCode {
    fn from(status: CommandStatus) -> Self {
        Self::from(status.code())
    }
}

/// Configuration from `--config` or the working directory's `.paraflow/`.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Status for an error that escaped a command.
pub fn error_status(err: &anyhow::Error) -> CommandStatus {
    let scheduling = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<EngineError>())
        .any(EngineError::is_scheduling_error);
    if scheduling {
        CommandStatus::Invalid
    } else {
        CommandStatus::Failed
    }
}

/// Print an error that escaped a command and return its status.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> CommandStatus {
    let status = error_status(err);
    if json_mode {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": causes,
            "exit_code": status.code(),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err:#}", console::style("Error:").red().bold());
    }
    status
}
