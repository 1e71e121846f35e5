pub mod config;
pub mod graph;
pub mod plan;
pub mod recovery;
pub mod report;
pub mod result;
pub mod session;
pub mod task;

pub use config::{
    CommandSpec, Config, ExecutionConfig, LoggingConfig, NotificationConfig, QualityConfig,
    ResourceConfig, ToolchainConfig,
};
pub use graph::{CriticalPath, ExecutionGraph, FileConflict, GraphSummary};
pub use plan::{ImplementationPlan, PlanDefaults, PlanEntry, ProjectContext};
pub use recovery::{ErrorClass, FailurePolicy, RecoveryAction};
pub use report::{ExecutionReport, FinalState, ReportMetrics, SkippedTask, TaskOutcome};
pub use result::{
    elapsed_ms, elapsed_ms_since, Artifact, FailureKind, LintReport, PhaseRecord, QualityGateOutcome, SecurityFinding,
    TaskFailure, TaskResult, TaskStatus, TddPhase, TestReport, ValidationEvidence,
};
pub use session::{
    ExecutionSession, ResourceSnapshot, SessionState, TaskDisposition, TaskRecord,
};
pub use task::{
    CompleteTask, EmbeddedContext, FileAction, FileTarget, GateKind, QualityGateRequirements,
    ResolvedReference, Severity, TaskId, TestSpecification,
};
