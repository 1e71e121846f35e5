//! Engine services: context building, analysis, resources, execution.

pub mod context_builder;
pub mod dependency_analyzer;
pub mod notifier;
pub mod orchestrator;
pub mod quality_gates;
pub mod recovery;
pub mod resource_manager;
pub mod worker;

pub use context_builder::{ContextSize, ReadinessReport, TaskContextBuilder};
pub use dependency_analyzer::DependencyAnalyzer;
pub use notifier::{commit_proposal, NotificationHub, Sinks};
pub use orchestrator::{ExecutionEvent, ExecutionPreview, Orchestrator, PlanContext};
pub use quality_gates::{all_passed, QualityGateEngine};
pub use recovery::RecoveryManager;
pub use resource_manager::{HostCapacity, PartialGrant, PermitSet, QueuedAcquire, ResourceManager};
pub use worker::{ToolBindings, Worker};
