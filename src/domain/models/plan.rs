//! Implementation plan: the engine's sole input document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::task::{FileTarget, QualityGateRequirements, TaskId, TestSpecification};

/// A structured plan produced by the upstream planning steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImplementationPlan {
    /// Project-wide context shared by every task.
    pub project: ProjectContext,

    /// Defaults applied to entries that do not override them.
    #[serde(default)]
    pub defaults: PlanDefaults,

    /// Task entries in document order.
    pub tasks: Vec<PlanEntry>,
}

/// Project background inlined into every task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectContext {
    pub name: String,

    #[serde(default)]
    pub background: String,

    /// Named architecture excerpts (e.g. "data-model", "api-layer").
    #[serde(default)]
    pub architecture: BTreeMap<String, String>,

    /// Named definitions that entries may reference with `{{def:name}}`.
    #[serde(default)]
    pub definitions: BTreeMap<String, String>,
}

/// Plan-level defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanDefaults {
    #[serde(default)]
    pub test_framework: Option<String>,

    #[serde(default)]
    pub quality_requirements: Option<QualityGateRequirements>,

    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

/// One raw task entry as written in the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanEntry {
    pub id: TaskId,
    pub title: String,

    #[serde(default)]
    pub dependencies: Vec<TaskId>,

    #[serde(default)]
    pub description: String,

    /// Free-form context; may contain cross-references to other tasks.
    #[serde(default)]
    pub context: String,

    #[serde(default)]
    pub file_targets: Vec<FileTarget>,

    #[serde(default)]
    pub implementation_guidance: Vec<String>,

    #[serde(default)]
    pub test_specification: Option<TestSpecification>,

    #[serde(default)]
    pub quality_requirements: Option<QualityGateRequirements>,

    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    #[serde(default)]
    pub estimated_minutes: Option<u64>,

    #[serde(default)]
    pub max_duration_secs: Option<u64>,

    #[serde(default = "default_priority")]
    pub priority: u8,
}

const fn default_priority() -> u8 {
    50
}

impl ImplementationPlan {
    /// Look up an entry by id.
    pub fn entry(&self, id: &str) -> Option<&PlanEntry> {
        self.tasks.iter().find(|e| e.id == id)
    }
}
