//! Implementation of the `paraflow init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::cli::output::{output, CommandOutput};
use crate::cli::CommandStatus;
use crate::infrastructure::config::DEFAULT_CONFIG_YAML;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub directories_created: Vec<String>,
    pub config_written: bool,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if self.config_written {
            lines.push("\nConfiguration written to .paraflow/config.yaml".to_string());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<CommandStatus> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir().context("Failed to get current directory")?.join(&args.path)
    };

    let paraflow_dir = target_path.join(".paraflow");
    let config_path = paraflow_dir.join("config.yaml");

    if config_path.exists() && !args.force {
        let output_data = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to overwrite the configuration.".to_string(),
            initialized_path: target_path,
            directories_created: vec![],
            config_written: false,
        };
        output(&output_data, json_mode);
        return Ok(CommandStatus::Failed);
    }

    let mut directories_created = vec![];
    for dir in [paraflow_dir.clone(), paraflow_dir.join("proposals")] {
        if !dir.exists() {
            fs::create_dir_all(&dir).await.with_context(|| format!("Failed to create {}", dir.display()))?;
            let relative = dir.strip_prefix(&target_path).unwrap_or(&dir).to_string_lossy().to_string();
            directories_created.push(relative);
        }
    }

    fs::write(&config_path, DEFAULT_CONFIG_YAML)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let output_data = InitOutput {
        success: true,
        message: if args.force {
            "Project reinitialized successfully.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        initialized_path: target_path,
        directories_created,
        config_written: true,
    };
    output(&output_data, json_mode);
    Ok(CommandStatus::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ConfigLoader;

    #[tokio::test]
    async fn creates_layout_and_loadable_config() {
        let temp = tempfile::tempdir().unwrap();
        let args = InitArgs {
            force: false,
            path: temp.path().to_path_buf(),
        };

        let code = execute(args, true).await.unwrap();
        assert_eq!(code, CommandStatus::Success);
        assert!(temp.path().join(".paraflow/proposals").is_dir());

        let config = ConfigLoader::load_from_file(temp.path().join(".paraflow/config.yaml")).unwrap();
        assert_eq!(config.execution.max_retries, 2);
    }

    #[tokio::test]
    async fn refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().unwrap();
        let config_path = temp.path().join(".paraflow/config.yaml");
        std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        std::fs::write(&config_path, "execution: { max_retries: 5 }\n").unwrap();

        let code = execute(
            InitArgs {
                force: false,
                path: temp.path().to_path_buf(),
            },
            true,
        )
        .await
        .unwrap();
        assert_eq!(code, CommandStatus::Failed);
        assert!(std::fs::read_to_string(&config_path).unwrap().contains("max_retries: 5"));

        execute(
            InitArgs {
                force: true,
                path: temp.path().to_path_buf(),
            },
            true,
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), DEFAULT_CONFIG_YAML);
    }
}
