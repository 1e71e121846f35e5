//! Error classes and recovery decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a task failure is treated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient tool or environment issue.
    Retryable,
    /// Something the task relies on is missing or failed.
    Dependency,
    /// Timeout or host overload.
    Resource,
    /// Output produced but rejected by the protocol or a gate.
    Quality,
    /// Unrecoverable.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Retryable => "retryable",
            Self::Dependency => "dependency",
            Self::Resource => "resource",
            Self::Quality => "quality",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// What to do with a failed task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "action", content = "attempt")]
pub enum RecoveryAction {
    /// Run again from a freshly rebuilt context; carries the retry number.
    RetryWithFreshContext(u32),
    /// Put the task back in the layer's queue; carries the requeue number.
    Requeue(u32),
    /// Give up on the task and skip everything downstream of it.
    SkipDependents,
    /// Give up, skip downstream and raise the failure to the session.
    Escalate,
}

impl RecoveryAction {
    /// True when the task gets another attempt.
    pub const fn reruns(self) -> bool {
        matches!(self, Self::RetryWithFreshContext(_) | Self::Requeue(_))
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryWithFreshContext(n) => write!(f, "retry #{n} with fresh context"),
            Self::Requeue(n) => write!(f, "requeue #{n}"),
            Self::SkipDependents => f.write_str("skip dependents"),
            Self::Escalate => f.write_str("escalate"),
        }
    }
}

/// Session-wide reaction to a task that failed for good.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip the failed branch and keep running independent work.
    #[default]
    Continue,
    /// Abort the whole session on the first final failure.
    FailFast,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("continue"),
            Self::FailFast => f.write_str("fail_fast"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "continue" => Ok(Self::Continue),
            "fail_fast" => Ok(Self::FailFast),
            other => Err(format!("unknown failure policy: {other}")),
        }
    }
}
