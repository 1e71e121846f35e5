use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::ports::{SinkError, TaskTracker, TaskTransition};

/// Tracker appending one JSON object per transition to a file.
#[derive(Debug)]
pub struct JsonlTaskTracker {
    path: PathBuf,
    // Serializes appends so lines never interleave.
    write_lock: Mutex<()>,
}

impl JsonlTaskTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TaskTracker for JsonlTaskTracker {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn on_transition(&self, transition: &TaskTransition) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(transition)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
