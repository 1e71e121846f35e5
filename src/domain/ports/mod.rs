//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - Toolchain: compiler/test-runner bindings driven by workers
//! - QualityGate: independent output checks
//! - TaskTracker / SourceControlSink: notification sinks

pub mod quality_gate;
pub mod sinks;
pub mod toolchain;

pub use quality_gate::QualityGate;
pub use sinks::{
    CommitProposal, SinkError, SourceControlSink, TaskTracker, TaskTransition, TrackedStatus,
};
pub use toolchain::{PhaseContext, PhaseOutput, ToolError, Toolchain};
