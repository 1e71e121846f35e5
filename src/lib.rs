//! Paraflow - stateless parallel task execution
//!
//! Paraflow takes an implementation plan, turns every entry into a
//! self-contained task specification, layers the tasks by their
//! dependencies and runs each layer concurrently. Every task goes through a
//! red/green/refactor cycle and a set of quality gates before it counts as
//! done. Failures stay inside their branch of the graph.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the ports adapters implement
//! - **Service Layer** (`services`): context building, dependency analysis,
//!   resource management, workers, gates, recovery and orchestration
//! - **Adapters** (`adapters`): toolchains and notification sinks
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging, plan loading
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use paraflow::adapters::toolchains::ScriptedToolchain;
//! use paraflow::infrastructure::plan::PlanLoader;
//! use paraflow::services::{
//!     DependencyAnalyzer, Orchestrator, ResourceManager, TaskContextBuilder, ToolBindings,
//! };
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let plan = PlanLoader::load("plan.yaml").await?;
//! let tasks = TaskContextBuilder::default().build_all(&plan)?;
//! let graph = DependencyAnalyzer::new().analyze(tasks)?;
//!
//! let bindings = ToolBindings::new(Arc::new(ScriptedToolchain::new()), ".");
//! let resources = ResourceManager::new(4, 0.9, Duration::from_secs(30));
//! let report = Orchestrator::new(bindings, resources).run(&graph).await?;
//! println!("{} of {} tasks succeeded", report.metrics.succeeded, report.metrics.total);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    CompleteTask, Config, ExecutionGraph, ExecutionReport, FailurePolicy, ImplementationPlan,
    TaskDisposition, TaskResult,
};
pub use domain::ports::{SourceControlSink, TaskTracker, Toolchain};
pub use domain::{EngineError, EngineResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{DependencyAnalyzer, Orchestrator, TaskContextBuilder};
