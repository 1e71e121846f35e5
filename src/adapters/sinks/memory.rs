//! In-memory sinks that keep everything they receive.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::ports::{
    CommitProposal, SinkError, SourceControlSink, TaskTracker, TaskTransition,
};

/// Tracker that stores every transition.
#[derive(Debug, Default)]
pub struct RecordingTaskTracker {
    transitions: RwLock<Vec<TaskTransition>>,
}

impl RecordingTaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn transitions(&self) -> Vec<TaskTransition> {
        self.transitions.read().await.clone()
    }

    /// Transitions of one task, in delivery order.
    pub async fn transitions_for(&self, task_id: &str) -> Vec<TaskTransition> {
        self.transitions
            .read()
            .await
            .iter()
            .filter(|t| t.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskTracker for RecordingTaskTracker {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_transition(&self, transition: &TaskTransition) -> Result<(), SinkError> {
        self.transitions.write().await.push(transition.clone());
        Ok(())
    }
}

/// Committer that stores every proposal.
#[derive(Debug, Default)]
pub struct RecordingCommitSink {
    proposals: RwLock<Vec<CommitProposal>>,
}

impl RecordingCommitSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn proposals(&self) -> Vec<CommitProposal> {
        self.proposals.read().await.clone()
    }
}

#[async_trait]
impl SourceControlSink for RecordingCommitSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn propose_commit(&self, proposal: &CommitProposal) -> Result<(), SinkError> {
        self.proposals.write().await.push(proposal.clone());
        Ok(())
    }
}
