use async_trait::async_trait;
use tracing::info;

use crate::domain::ports::{SinkError, TaskTracker, TaskTransition};

/// Tracker that records every transition in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTaskTracker;

#[async_trait]
impl TaskTracker for LogTaskTracker {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_transition(&self, transition: &TaskTransition) -> Result<(), SinkError> {
        info!(
            target: "paraflow::tracker",
            session_id = %transition.session_id,
            task_id = %transition.task_id,
            from = ?transition.from,
            to = ?transition.to,
            detail = transition.detail.as_deref().unwrap_or(""),
            "task transition"
        );
        Ok(())
    }
}
