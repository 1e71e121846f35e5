use async_trait::async_trait;

use crate::domain::models::{GateKind, QualityGateOutcome, QualityGateRequirements, TaskResult};
use crate::domain::ports::QualityGate;

/// Passes when measured line coverage meets the task's threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoverageGate;

#[async_trait]
impl QualityGate for CoverageGate {
    fn kind(&self) -> GateKind {
        GateKind::Coverage
    }

    async fn evaluate(
        &self,
        result: &TaskResult,
        requirements: &QualityGateRequirements,
    ) -> QualityGateOutcome {
        let threshold = requirements.coverage_threshold;

        match result.evidence.coverage_percent {
            None => QualityGateOutcome::fail(
                GateKind::Coverage,
                0.0,
                Some(threshold),
                "no coverage measurement was produced; configure a coverage command",
            ),
            // Recorded as 0.0 so the report stays valid JSON.
            Some(measured) if !measured.is_finite() => QualityGateOutcome::fail(
                GateKind::Coverage,
                0.0,
                Some(threshold),
                format!("coverage tool reported {measured}, not a percentage; check its output format"),
            ),
            Some(measured) if measured + f64::EPSILON < threshold => QualityGateOutcome::fail(
                GateKind::Coverage,
                measured,
                Some(threshold),
                format!(
                    "coverage {measured:.1}% is below the required {threshold:.1}%; add tests for the uncovered paths"
                ),
            ),
            Some(measured) => QualityGateOutcome::pass(GateKind::Coverage, measured, Some(threshold)),
        }
    }
}
