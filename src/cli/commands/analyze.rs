//! Implementation of the `paraflow analyze` command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use super::prepare;
use crate::adapters::toolchains::CommandToolchain;
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::cli::CommandStatus;
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::services::{ExecutionPreview, Orchestrator, Sinks};

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Implementation plan (JSON or YAML)
    pub plan: PathBuf,

    /// Upper bound on concurrent workers used for the estimate
    #[arg(long)]
    pub max_workers: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeOutput {
    pub plan: PathBuf,
    #[serde(flatten)]
    pub preview: ExecutionPreview,
}

impl CommandOutput for AnalyzeOutput {
    fn to_human(&self) -> String {
        let preview = &self.preview;
        let formatter = TableFormatter::new();

        let mut out = format!(
            "{}: {} tasks in {} layers\n",
            self.plan.display(),
            preview.summary.task_count,
            preview.summary.layers.len()
        );
        if !preview.summary.layers.is_empty() {
            out.push_str(&formatter.format_layers(preview));
            out.push('\n');
        }

        if !preview.critical_path.tasks.is_empty() {
            let _ = writeln!(
                out,
                "\nCritical path ({}s): {}",
                preview.critical_path.estimated_secs,
                preview.critical_path.tasks.join(" -> ")
            );
        }
        let _ = writeln!(
            out,
            "Recommended parallelism: {}",
            preview.recommended_parallelism
        );
        let _ = writeln!(
            out,
            "Estimated time: {}s sequential, {}s with layering",
            preview.summary.estimated_sequential_secs, preview.estimated_wall_secs
        );

        if !preview.file_conflicts.is_empty() {
            let _ = writeln!(
                out,
                "\n{} file conflict(s) within a layer:",
                preview.file_conflicts.len()
            );
            out.push_str(&formatter.format_conflicts(preview));
        }
        out.trim_end().to_string()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: AnalyzeArgs, mut config: Config, json_mode: bool) -> Result<CommandStatus> {
    if let Some(max_workers) = args.max_workers {
        config.resources.max_workers = Some(max_workers);
    }
    ConfigLoader::validate(&config).context("Invalid command-line overrides")?;

    let prepared = prepare(&args.plan, &config).await?;
    let toolchain = Arc::new(CommandToolchain::new(config.toolchain.clone()));
    let orchestrator = Orchestrator::from_config(&config, toolchain, Sinks::default());
    let preview = orchestrator.preview(&prepared.graph);

    output(
        &AnalyzeOutput {
            plan: args.plan,
            preview,
        },
        json_mode,
    );
    Ok(CommandStatus::Success)
}
