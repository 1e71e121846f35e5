//! Notification ports for external task-tracking and source-control systems.
//!
//! Both sinks are fire-and-forget from the engine's point of view: a sink that
//! is slow or unavailable costs a warning in the log, never a stalled run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::{Artifact, TaskId};

/// Errors reported by sink adapters.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Task states as seen by a tracker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackedStatus {
    Queued,
    Running,
    Retrying,
    Done,
    Failed,
    Skipped,
    Aborted,
}

/// One status change of one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskTransition {
    pub session_id: Uuid,
    pub task_id: TaskId,
    pub from: Option<TrackedStatus>,
    pub to: TrackedStatus,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Material for an external committer to apply after a task succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitProposal {
    pub session_id: Uuid,
    pub task_id: TaskId,
    pub summary: String,
    /// Structured commit message: subject, body and quality metrics.
    pub message: String,
    /// Unified diff of every artifact.
    pub diff: String,
    pub artifacts: Vec<Artifact>,
    /// Gate name to metric.
    pub metrics: BTreeMap<String, f64>,
}

/// Receives task status transitions.
#[async_trait]
pub trait TaskTracker: Send + Sync {
    fn name(&self) -> &str;

    async fn on_transition(&self, transition: &TaskTransition) -> Result<(), SinkError>;
}

/// Receives commit proposals for successful tasks.
#[async_trait]
pub trait SourceControlSink: Send + Sync {
    fn name(&self) -> &str;

    async fn propose_commit(&self, proposal: &CommitProposal) -> Result<(), SinkError>;
}
