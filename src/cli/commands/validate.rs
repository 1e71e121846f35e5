//! Implementation of the `paraflow validate` command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

use super::context_builder;
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::cli::CommandStatus;
use crate::domain::models::Config;
use crate::infrastructure::plan::PlanLoader;
use crate::services::{ContextSize, DependencyAnalyzer, ReadinessReport, TaskContextBuilder};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Implementation plan (JSON or YAML)
    pub plan: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ValidateOutput {
    pub plan: PathBuf,
    pub valid: bool,
    pub tasks: Vec<ReadinessReport>,
    /// Cycle or dependency problem across tasks, if any.
    pub graph_error: Option<String>,
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        let mut out = String::new();
        if !self.tasks.is_empty() {
            out.push_str(&TableFormatter::new().format_readiness(&self.tasks));
            out.push('\n');
        }

        let recommendations: Vec<_> = self
            .tasks
            .iter()
            .flat_map(|r| r.recommendations.iter().map(move |rec| (&r.task_id, rec)))
            .collect();
        if !recommendations.is_empty() {
            out.push_str("\nRecommendations:\n");
            for (task_id, rec) in recommendations {
                let _ = writeln!(out, "  - {task_id}: {rec}");
            }
        }
        if let Some(error) = &self.graph_error {
            let _ = writeln!(out, "\n{}", console::style(error).red());
        }

        let ready = self.tasks.iter().filter(|r| r.is_valid).count();
        let verdict = if self.valid {
            console::style("ready for parallel execution").green().bold()
        } else {
            console::style("not ready").red().bold()
        };
        let _ = write!(
            out,
            "\n{}: {ready}/{} tasks ready, {verdict}",
            self.plan.display(),
            self.tasks.len()
        );
        out
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: ValidateArgs, config: Config, json_mode: bool) -> Result<CommandStatus> {
    let plan = PlanLoader::load(&args.plan)
        .await
        .with_context(|| format!("Failed to load plan {}", args.plan.display()))?;
    let builder = context_builder(&config);

    let mut tasks = Vec::with_capacity(plan.tasks.len());
    let mut all_built = true;
    for entry in &plan.tasks {
        match builder.build(entry, &plan) {
            Ok(task) => {
                tasks.push(TaskContextBuilder::validate_for_parallel_execution(&task));
            }
            Err(e) => {
                all_built = false;
                tasks.push(ReadinessReport {
                    task_id: entry.id.clone(),
                    is_valid: false,
                    completeness: 0.0,
                    context_size: ContextSize::default(),
                    issues: vec![e.to_string()],
                    recommendations: Vec::new(),
                });
            }
        }
    }

    let graph_error = if all_built {
        builder
            .build_all(&plan)
            .and_then(|tasks| DependencyAnalyzer::new().analyze(tasks))
            .err()
            .map(|e| e.to_string())
    } else {
        None
    };

    let valid = graph_error.is_none() && tasks.iter().all(|r| r.is_valid);
    output(
        &ValidateOutput {
            plan: args.plan,
            valid,
            tasks,
            graph_error,
        },
        json_mode,
    );
    Ok(if valid { CommandStatus::Success } else { CommandStatus::Invalid })
}
