//! Domain errors for the paraflow execution engine.
//!
//! Only scheduling-time problems are errors. Anything that goes wrong while a
//! task is running is captured as data on its result (see
//! [`TaskFailure`](crate::domain::models::TaskFailure)) so it can never escape
//! that task's branch of the graph.

use thiserror::Error;

use crate::domain::models::TaskId;

/// Format a cycle path as a human-readable string: `a -> b -> c -> a`.
fn format_cycle_path(path: &[TaskId]) -> String {
    path.join(" -> ")
}

/// Errors raised by the engine before or around execution.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Incomplete specification for task '{task_id}': missing {}", missing.join(", "))]
    IncompleteSpecification { task_id: TaskId, missing: Vec<String> },

    #[error("Task dependency cycle detected: {}", format_cycle_path(.0))]
    CyclicDependency(Vec<TaskId>),

    #[error("Task '{task_id}' depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: TaskId, dependency: TaskId },

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("Task '{0}' is not ready for stateless execution: {1}")]
    NotStatelessReady(TaskId, String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Plan format error: {0}")]
    PlanFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True for errors raised while building or validating the schedule.
    pub const fn is_scheduling_error(&self) -> bool {
        matches!(
            self,
            Self::IncompleteSpecification { .. }
                | Self::CyclicDependency(_)
                | Self::UnknownDependency { .. }
                | Self::DuplicateTask(_)
                | Self::NotStatelessReady(..)
                | Self::PlanFormat(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::PlanFormat(err.to_string())
    }
}
