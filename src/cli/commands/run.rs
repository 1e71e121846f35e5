//! Implementation of the `paraflow run` command.

use anyhow::{Context, Result};
use clap::Args;
use indicatif::ProgressBar;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::prepare;
use crate::adapters::sinks;
use crate::adapters::toolchains::CommandToolchain;
use crate::cli::output::table::format_ms;
use crate::cli::output::{
    create_progress_bar, create_spinner, disposition_style, hidden_progress_bar, output,
    CommandOutput, ProgressBarExt, TableFormatter,
};
use crate::cli::CommandStatus;
use crate::domain::models::{Config, ExecutionReport, FailurePolicy, FinalState, TaskDisposition};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{ExecutionEvent, Orchestrator};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Implementation plan (JSON or YAML)
    pub plan: PathBuf,

    /// Reaction to a task that fails for good: continue or fail-fast
    #[arg(long)]
    pub policy: Option<FailurePolicy>,

    /// Upper bound on concurrent workers
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Also write the JSON report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub report: ExecutionReport,
    pub report_path: Option<PathBuf>,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let report = &self.report;
        let metrics = &report.metrics;
        let state = match report.final_state {
            FinalState::Completed => console::style("completed").green().bold(),
            FinalState::Aborted => console::style("aborted").red().bold(),
        };

        let mut out = format!(
            "Session {} {state} (policy: {})\n",
            report.session_id, report.failure_policy
        );
        if !report.tasks.is_empty() {
            out.push_str(&TableFormatter::new().format_outcomes(report));
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "\n{} tasks: {} succeeded, {} failed, {} skipped, {} aborted",
            metrics.total, metrics.succeeded, metrics.failed, metrics.skipped, metrics.aborted
        );
        let _ = writeln!(
            out,
            "Wall time {} vs {} sequential ({:.2}x), peak concurrency {}",
            format_ms(metrics.actual_wall_time_ms),
            format_ms(metrics.sequential_time_estimate_ms),
            metrics.parallel_efficiency,
            metrics.peak_concurrency
        );
        if report.commit_proposals > 0 {
            let _ = writeln!(out, "Commit proposals: {}", report.commit_proposals);
        }
        if let Some(path) = &self.report_path {
            let _ = writeln!(out, "Report written to {}", path.display());
        }
        out.trim_end().to_string()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.report).unwrap_or_default()
    }
}

pub async fn execute(args: RunArgs, mut config: Config, json_mode: bool) -> Result<CommandStatus> {
    if let Some(policy) = args.policy {
        config.execution.failure_policy = policy;
    }
    if let Some(max_workers) = args.max_workers {
        config.resources.max_workers = Some(max_workers);
    }
    ConfigLoader::validate(&config).context("Invalid command-line overrides")?;

    let spinner = (!json_mode && !args.no_progress).then(|| {
        let spinner = create_spinner();
        spinner.set_message(format!("analyzing {}", args.plan.display()));
        spinner
    });
    let prepared = prepare(&args.plan, &config).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let prepared = prepared?;
    let toolchain = Arc::new(CommandToolchain::new(config.toolchain.clone()));
    let orchestrator = Arc::new(
        Orchestrator::from_config(&config, toolchain, sinks::from_config(&config.notifications))
            .with_plan_context(prepared.builder.clone(), Arc::clone(&prepared.plan)),
    );
    info!(
        plan = %args.plan.display(),
        tasks = prepared.graph.task_count(),
        layers = prepared.graph.layer_count(),
        policy = %orchestrator.failure_policy(),
        "starting execution"
    );

    let total = prepared.graph.task_count() as u64;
    let progress = if json_mode || args.no_progress {
        hidden_progress_bar(total)
    } else {
        create_progress_bar(total)
    };

    let (events, receiver) = mpsc::channel(256);
    let tracker = tokio::spawn(track_progress(receiver, progress.clone()));
    let interrupt = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, aborting session");
                orchestrator.cancel();
            }
        })
    };

    let result = orchestrator.run_with_events(&prepared.graph, events).await;
    interrupt.abort();
    if let Err(e) = tracker.await {
        warn!(error = %e, "progress tracker ended abnormally");
    }
    let report = result.context("Execution failed")?;

    match (report.final_state, report.is_success()) {
        (FinalState::Aborted, _) => progress.finish_error("aborted"),
        (_, true) => progress.finish_success("all tasks succeeded"),
        (_, false) => progress.finish_warning("completed with failures"),
    }

    if let Some(path) = &args.report {
        let json = report.to_json().context("Failed to serialize report")?;
        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    let code = report_status(&report);
    output(
        &RunOutput {
            report,
            report_path: args.report,
        },
        json_mode,
    );
    Ok(code)
}

/// Exit status for a session that ran to a report.
fn report_status(report: &ExecutionReport) -> CommandStatus {
    if report.is_success() {
        CommandStatus::Success
    } else {
        CommandStatus::Failed
    }
}

async fn track_progress(mut events: mpsc::Receiver<ExecutionEvent>, progress: ProgressBar) {
    let mut layer_count = 0;
    while let Some(event) = events.recv().await {
        match event {
            ExecutionEvent::Started { layer_count: n, .. } => layer_count = n,
            ExecutionEvent::LayerStarted {
                layer,
                task_count,
                concurrency,
            } => progress.set_message(format!(
                "layer {}/{layer_count}: {task_count} tasks on {concurrency} workers",
                layer + 1
            )),
            ExecutionEvent::TaskRetrying {
                task_id,
                class,
                action,
            } => progress.note(format!("  ↻ {task_id}: {class} failure, {action}")),
            ExecutionEvent::TaskFinished {
                task_id,
                disposition,
            } => {
                progress.inc(1);
                if disposition != TaskDisposition::Succeeded {
                    progress.note(format!("  {} {task_id}", disposition_style(disposition)));
                }
            }
            ExecutionEvent::Degraded { target } => {
                progress.note(format!("  ! resource pressure, concurrency lowered to {target}"));
            }
            ExecutionEvent::TaskStarted { .. }
            | ExecutionEvent::LayerCompleted { .. }
            | ExecutionEvent::Completed { .. } => {}
        }
    }
}
