//! Task-tracking and source-control sink adapters.

mod directory;
mod jsonl;
mod log;
mod memory;

pub use directory::DirectoryCommitSink;
pub use jsonl::JsonlTaskTracker;
pub use log::LogTaskTracker;
pub use memory::{RecordingCommitSink, RecordingTaskTracker};

use crate::domain::models::NotificationConfig;
use crate::services::notifier::Sinks;
use std::sync::Arc;

/// Sinks enabled by `config`.
pub fn from_config(config: &NotificationConfig) -> Sinks {
    let mut sinks = Sinks::default();
    if config.log_transitions {
        sinks = sinks.with_tracker(Arc::new(LogTaskTracker));
    }
    if let Some(path) = &config.transitions_file {
        sinks = sinks.with_tracker(Arc::new(JsonlTaskTracker::new(path)));
    }
    if let Some(dir) = &config.commit_proposals_dir {
        sinks = sinks.with_committer(Arc::new(DirectoryCommitSink::new(dir)));
    }
    sinks
}
