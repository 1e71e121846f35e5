//! CLI command implementations.

pub mod analyze;
pub mod init;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::domain::models::{Config, ExecutionGraph, ImplementationPlan};
use crate::infrastructure::plan::PlanLoader;
use crate::services::{DependencyAnalyzer, TaskContextBuilder};

/// A plan loaded, built into complete tasks and layered.
pub(crate) struct PreparedPlan {
    pub plan: Arc<ImplementationPlan>,
    pub builder: TaskContextBuilder,
    pub graph: ExecutionGraph,
}

pub(crate) fn context_builder(config: &Config) -> TaskContextBuilder {
    TaskContextBuilder::new(config.quality.clone(), config.execution.default_task_timeout_secs)
}

pub(crate) async fn prepare(path: &Path, config: &Config) -> Result<PreparedPlan> {
    let plan = PlanLoader::load(path)
        .await
        .with_context(|| format!("Failed to load plan {}", path.display()))?;
    let builder = context_builder(config);
    let tasks = builder.build_all(&plan).context("Failed to build task specifications")?;
    let graph = DependencyAnalyzer::new()
        .analyze(tasks)
        .context("Failed to analyze task dependencies")?;

    Ok(PreparedPlan {
        plan: Arc::new(plan),
        builder,
        graph,
    })
}
