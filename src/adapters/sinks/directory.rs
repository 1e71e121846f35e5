use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::ports::{CommitProposal, SinkError, SourceControlSink};

/// Writes each proposal as `<task_id>.json` plus `<task_id>.diff`.
///
/// An external committer picks the files up; nothing here touches version
/// control.
#[derive(Debug, Clone)]
pub struct DirectoryCommitSink {
    dir: PathBuf,
}

impl DirectoryCommitSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_stem(task_id: &str) -> String {
        task_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect()
    }
}

#[async_trait]
impl SourceControlSink for DirectoryCommitSink {
    fn name(&self) -> &str {
        "directory"
    }

    async fn propose_commit(&self, proposal: &CommitProposal) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let stem = Self::file_stem(&proposal.task_id);
        let json = serde_json::to_vec_pretty(proposal)?;
        tokio::fs::write(self.dir.join(format!("{stem}.json")), json).await?;
        tokio::fs::write(self.dir.join(format!("{stem}.diff")), &proposal.diff).await?;
        debug!(task_id = %proposal.task_id, dir = %self.dir.display(), "commit proposal written");
        Ok(())
    }
}
