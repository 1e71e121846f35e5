use async_trait::async_trait;

use crate::domain::models::{GateKind, QualityGateOutcome, QualityGateRequirements, TaskResult};
use crate::domain::ports::QualityGate;

/// Passes when the final test run was green and covered the required cases.
///
/// Metric is the pass ratio (0-1).
#[derive(Debug, Clone, Copy, Default)]
pub struct TestPassGate;

#[async_trait]
impl QualityGate for TestPassGate {
    fn kind(&self) -> GateKind {
        GateKind::TestPass
    }

    async fn evaluate(
        &self,
        result: &TaskResult,
        requirements: &QualityGateRequirements,
    ) -> QualityGateOutcome {
        let Some(tests) = result.evidence.tests.as_ref() else {
            return QualityGateOutcome::fail(
                GateKind::TestPass,
                0.0,
                Some(1.0),
                "no test report was produced; make sure the test command runs after refactor",
            );
        };

        let executed = tests.executed();
        let ratio = if executed == 0 {
            0.0
        } else {
            f64::from(tests.passed) / f64::from(executed)
        };

        if executed < requirements.min_tests.max(1) {
            return QualityGateOutcome::fail(
                GateKind::TestPass,
                ratio,
                Some(1.0),
                format!(
                    "only {executed} test(s) ran but {} required case(s) are specified; write the missing tests",
                    requirements.min_tests
                ),
            );
        }

        if tests.failed > 0 {
            let names = if tests.failing_tests.is_empty() {
                String::new()
            } else {
                format!(": {}", tests.failing_tests.join(", "))
            };
            return QualityGateOutcome::fail(
                GateKind::TestPass,
                ratio,
                Some(1.0),
                format!("{} failing test(s){names}", tests.failed),
            );
        }

        QualityGateOutcome::pass(GateKind::TestPass, ratio, Some(1.0))
    }
}
