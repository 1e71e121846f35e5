//! Error classification and recovery decisions.

use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::models::{
    ErrorClass, ExecutionConfig, FailureKind, RecoveryAction, TaskFailure,
};

/// Maps task failures to error classes and picks what happens next.
///
/// Holds only limits, no per-task state: the caller passes the number of
/// reruns already spent so the same manager serves every task in a session.
#[derive(Debug, Clone)]
pub struct RecoveryManager {
    max_retries: u32,
    max_requeues: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

impl RecoveryManager {
    pub const fn new(
        max_retries: u32,
        max_requeues: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            max_retries,
            max_requeues,
            initial_backoff,
            max_backoff,
        }
    }

    pub const fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(
            config.max_retries,
            config.max_requeues,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub const fn max_requeues(&self) -> u32 {
        self.max_requeues
    }

    /// Class of a failure. Cancellation is not a failure and has no class.
    pub const fn classify(failure: &TaskFailure) -> Option<ErrorClass> {
        let class = match failure.kind {
            FailureKind::ToolTransient => ErrorClass::Retryable,
            FailureKind::MissingPrerequisite | FailureKind::UpstreamFailed => ErrorClass::Dependency,
            FailureKind::Timeout | FailureKind::ResourceExhausted => ErrorClass::Resource,
            FailureKind::PhaseRejected | FailureKind::QualityGate => ErrorClass::Quality,
            FailureKind::ToolFatal | FailureKind::Panic | FailureKind::InvalidTask => ErrorClass::Fatal,
            FailureKind::Cancelled => return None,
        };
        Some(class)
    }

    /// Next step for a task that just failed.
    ///
    /// `retries` and `requeues` count reruns already spent on this task.
    pub fn recover(
        &self,
        task_id: &str,
        class: ErrorClass,
        retries: u32,
        requeues: u32,
    ) -> RecoveryAction {
        let action = match class {
            ErrorClass::Retryable if retries < self.max_retries => {
                RecoveryAction::RetryWithFreshContext(retries + 1)
            }
            ErrorClass::Resource if requeues < self.max_requeues => {
                RecoveryAction::Requeue(requeues + 1)
            }
            ErrorClass::Retryable
            | ErrorClass::Resource
            | ErrorClass::Dependency
            | ErrorClass::Quality => RecoveryAction::SkipDependents,
            ErrorClass::Fatal => RecoveryAction::Escalate,
        };

        match action {
            RecoveryAction::Escalate => warn!(task_id, %class, "escalating fatal failure"),
            _ => debug!(task_id, %class, ?action, "recovery decided"),
        }
        action
    }

    /// Delay before rerun number `n` (1-based), doubling up to the cap.
    pub fn backoff(&self, n: u32) -> Duration {
        let shift = n.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << shift)
            .min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(kind: FailureKind) -> TaskFailure {
        TaskFailure::new(kind, "boom")
    }

    #[test]
    fn test_classification_table() {
        let cases = [
            (FailureKind::ToolTransient, Some(ErrorClass::Retryable)),
            (FailureKind::MissingPrerequisite, Some(ErrorClass::Dependency)),
            (FailureKind::UpstreamFailed, Some(ErrorClass::Dependency)),
            (FailureKind::Timeout, Some(ErrorClass::Resource)),
            (FailureKind::ResourceExhausted, Some(ErrorClass::Resource)),
            (FailureKind::PhaseRejected, Some(ErrorClass::Quality)),
            (FailureKind::QualityGate, Some(ErrorClass::Quality)),
            (FailureKind::ToolFatal, Some(ErrorClass::Fatal)),
            (FailureKind::Panic, Some(ErrorClass::Fatal)),
            (FailureKind::InvalidTask, Some(ErrorClass::Fatal)),
            (FailureKind::Cancelled, None),
        ];
        for (kind, expected) in cases {
            assert_eq!(RecoveryManager::classify(&failure(kind)), expected, "{kind:?}");
        }
    }

    #[test]
    fn test_retryable_until_budget_spent() {
        let manager = RecoveryManager::default();
        assert_eq!(
            manager.recover("t", ErrorClass::Retryable, 0, 0),
            RecoveryAction::RetryWithFreshContext(1)
        );
        assert_eq!(
            manager.recover("t", ErrorClass::Retryable, 1, 0),
            RecoveryAction::RetryWithFreshContext(2)
        );
        assert_eq!(
            manager.recover("t", ErrorClass::Retryable, 2, 0),
            RecoveryAction::SkipDependents
        );
    }

    #[test]
    fn test_resource_requeued_once() {
        let manager = RecoveryManager::default();
        assert_eq!(manager.recover("t", ErrorClass::Resource, 0, 0), RecoveryAction::Requeue(1));
        assert_eq!(
            manager.recover("t", ErrorClass::Resource, 0, 1),
            RecoveryAction::SkipDependents
        );
    }

    #[test]
    fn test_quality_and_dependency_are_not_retried() {
        let manager = RecoveryManager::default();
        assert_eq!(manager.recover("t", ErrorClass::Quality, 0, 0), RecoveryAction::SkipDependents);
        assert_eq!(
            manager.recover("t", ErrorClass::Dependency, 0, 0),
            RecoveryAction::SkipDependents
        );
        assert_eq!(manager.recover("t", ErrorClass::Fatal, 0, 0), RecoveryAction::Escalate);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let manager = RecoveryManager::new(2, 1, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(manager.backoff(1), Duration::from_millis(100));
        assert_eq!(manager.backoff(2), Duration::from_millis(200));
        assert_eq!(manager.backoff(3), Duration::from_millis(350));
        assert_eq!(manager.backoff(40), Duration::from_millis(350));
    }
}
