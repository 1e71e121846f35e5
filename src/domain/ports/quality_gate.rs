//! Quality gate port.

use async_trait::async_trait;

use crate::domain::models::{GateKind, QualityGateOutcome, QualityGateRequirements, TaskResult};

/// A named, independent check a task's output must pass.
///
/// Gates only read the result; they never touch the worker's artifacts.
#[async_trait]
pub trait QualityGate: Send + Sync {
    fn kind(&self) -> GateKind;

    async fn evaluate(
        &self,
        result: &TaskResult,
        requirements: &QualityGateRequirements,
    ) -> QualityGateOutcome;
}
