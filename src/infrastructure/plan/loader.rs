use std::path::Path;
use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::ImplementationPlan;

/// Plan document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    Json,
    Yaml,
}

impl PlanFormat {
    /// Format from a file extension, if it names one.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    /// Guess from content: a document starting with `{` is JSON.
    pub fn sniff(content: &str) -> Self {
        if content.trim_start().starts_with('{') {
            Self::Json
        } else {
            Self::Yaml
        }
    }
}

/// Reads implementation plans from JSON or YAML.
pub struct PlanLoader;

impl PlanLoader {
    /// Load a plan, choosing the format by extension and then by content.
    pub async fn load(path: impl AsRef<Path>) -> EngineResult<ImplementationPlan> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let format = PlanFormat::from_path(path).unwrap_or_else(|| PlanFormat::sniff(&content));
        debug!(path = %path.display(), ?format, "loading plan");
        Self::parse(&content, format)
            .map_err(|e| EngineError::PlanFormat(format!("{}: {e}", path.display())))
    }

    /// Parse plan text in the given format.
    pub fn parse(content: &str, format: PlanFormat) -> Result<ImplementationPlan, String> {
        match format {
            PlanFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            PlanFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        }
    }
}
