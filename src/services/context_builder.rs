//! Task context builder.
//!
//! Turns raw plan entries into [`CompleteTask`]s: every cross-reference in
//! the plan is replaced by the text it points at, required fields are
//! checked, and plan/config defaults are applied. A task that comes out of
//! here needs nothing but its own fields to execute.

use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;
use tracing::{debug, instrument};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{
    CompleteTask, EmbeddedContext, ImplementationPlan, PlanEntry, QualityConfig,
    QualityGateRequirements, ResolvedReference, TestSpecification,
};

/// Cross-references: `{{task:id}}`, `{{def:name}}`, "see Storage (architecture)",
/// or prose such as "the User model from task 3" and "see task #auth-api".
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\{\{\s*(task|def)\s*:\s*([A-Za-z0-9_. -]+?)\s*\}\}|(?i:\btask\s+#?([A-Za-z0-9][A-Za-z0-9_-]*))|(?i:\bsee\s+([A-Za-z0-9_.-]+(?:\s+[A-Za-z0-9_.-]+)*?)\s+\(architecture\))",
    )
    .expect("static regex")
});

/// Anything that still points outside the task once building is done.
static LEFTOVER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(?:task|def)\s*:|\$\{|<ref:|@task\(|\bTBD\b").expect("static regex")
});

/// Embedded context above this size draws a recommendation.
const CONTEXT_SIZE_WARN_BYTES: usize = 10 * 1024 * 1024;

/// Completeness below this draws a recommendation.
const COMPLETENESS_RECOMMENDATION: f64 = 0.9;

/// Serialized sizes of a task's embedded material.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ContextSize {
    pub context_bytes: usize,
    pub test_spec_bytes: usize,
    pub quality_bytes: usize,
    pub total_bytes: usize,
}

/// Result of [`TaskContextBuilder::validate_for_parallel_execution`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReadinessReport {
    pub task_id: String,
    pub is_valid: bool,
    pub completeness: f64,
    pub context_size: ContextSize,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Builds self-contained task specifications from plan entries.
#[derive(Debug, Clone)]
pub struct TaskContextBuilder {
    quality: QualityConfig,
    default_timeout_secs: u64,
}

impl Default for TaskContextBuilder {
    fn default() -> Self {
        Self::new(QualityConfig::default(), 30 * 60)
    }
}

impl TaskContextBuilder {
    pub const fn new(quality: QualityConfig, default_timeout_secs: u64) -> Self {
        Self {
            quality,
            default_timeout_secs,
        }
    }

    /// Build every entry of the plan.
    ///
    /// Rejects duplicate ids and dependencies on tasks the plan does not
    /// contain before building anything.
    #[instrument(skip_all, fields(plan = %plan.project.name, tasks = plan.tasks.len()))]
    pub fn build_all(&self, plan: &ImplementationPlan) -> EngineResult<Vec<CompleteTask>> {
        let mut ids = HashSet::with_capacity(plan.tasks.len());
        for entry in &plan.tasks {
            if !ids.insert(entry.id.as_str()) {
                return Err(EngineError::DuplicateTask(entry.id.clone()));
            }
        }
        for entry in &plan.tasks {
            if let Some(dep) = entry.dependencies.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(EngineError::UnknownDependency {
                    task_id: entry.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        plan.tasks.iter().map(|entry| self.build(entry, plan)).collect()
    }

    /// Build one entry into a [`CompleteTask`].
    pub fn build(&self, entry: &PlanEntry, plan: &ImplementationPlan) -> EngineResult<CompleteTask> {
        let missing = missing_fields(entry, plan);
        if !missing.is_empty() {
            return Err(EngineError::IncompleteSpecification {
                task_id: entry.id.clone(),
                missing,
            });
        }
        let Some(test_spec) = entry.test_specification.clone() else {
            return Err(EngineError::IncompleteSpecification {
                task_id: entry.id.clone(),
                missing: vec!["test_specification".to_string()],
            });
        };

        let mut resolver = ReferenceResolver::new(entry, plan);
        let description = resolver.resolve(&entry.description);
        let notes = resolver.resolve(&entry.context);
        let implementation_guidance: Vec<String> = entry
            .implementation_guidance
            .iter()
            .map(|g| resolver.resolve(g))
            .collect();
        let acceptance_criteria: Vec<String> = entry
            .acceptance_criteria
            .iter()
            .map(|c| resolver.resolve(c))
            .collect();

        if !resolver.unresolved.is_empty() {
            return Err(EngineError::IncompleteSpecification {
                task_id: entry.id.clone(),
                missing: resolver
                    .unresolved
                    .iter()
                    .map(|r| format!("unresolved reference {r}"))
                    .collect(),
            });
        }

        let test_specification = TestSpecification {
            framework: test_spec
                .framework
                .or_else(|| plan.defaults.test_framework.clone()),
            ..test_spec
        };
        let quality_requirements = self.quality_requirements(entry, plan, &test_specification);

        let task = CompleteTask {
            id: entry.id.clone(),
            title: entry.title.trim().to_string(),
            dependencies: entry.dependencies.iter().cloned().collect::<BTreeSet<_>>(),
            embedded_context: EmbeddedContext {
                project_name: plan.project.name.clone(),
                project_background: plan.project.background.clone(),
                description,
                architecture_excerpts: plan.project.architecture.clone(),
                file_targets: entry.file_targets.clone(),
                implementation_guidance,
                notes,
                resolved_references: resolver.resolved,
            },
            test_specification,
            quality_requirements,
            acceptance_criteria,
            estimated_duration_secs: entry.estimated_minutes.unwrap_or(0) * 60,
            max_duration_secs: entry
                .max_duration_secs
                .or(plan.defaults.max_duration_secs)
                .unwrap_or(self.default_timeout_secs),
            priority: entry.priority.min(100),
        };

        if let Some(marker) = find_leftover_marker(&task) {
            return Err(EngineError::NotStatelessReady(
                task.id,
                format!("unresolved marker '{marker}'"),
            ));
        }

        debug!(
            task_id = %task.id,
            references = task.embedded_context.resolved_references.len(),
            "built complete task"
        );
        Ok(task)
    }

    fn quality_requirements(
        &self,
        entry: &PlanEntry,
        plan: &ImplementationPlan,
        test_spec: &TestSpecification,
    ) -> QualityGateRequirements {
        let mut requirements = entry
            .quality_requirements
            .clone()
            .or_else(|| plan.defaults.quality_requirements.clone())
            .unwrap_or_else(|| QualityGateRequirements {
                coverage_threshold: self.quality.coverage_threshold,
                max_lint_warnings: self.quality.max_lint_warnings,
                security_severity_threshold: self.quality.security_severity_threshold,
                ..QualityGateRequirements::default()
            });
        if let Some(threshold) = test_spec.coverage_threshold {
            requirements.coverage_threshold = threshold;
        }
        let cases = u32::try_from(test_spec.required_cases.len()).unwrap_or(u32::MAX);
        requirements.min_tests = requirements.min_tests.max(cases);
        requirements
    }

    /// True when the task carries everything a fresh worker needs and no
    /// reference markers remain.
    pub fn is_stateless_ready(task: &CompleteTask) -> bool {
        readiness_issues(task).is_empty()
    }

    /// Fraction (0-1) of the eight context components the task carries.
    pub fn completeness_score(task: &CompleteTask) -> f64 {
        let ctx = &task.embedded_context;
        let checks = [
            !ctx.project_background.trim().is_empty(),
            !ctx.architecture_excerpts.is_empty(),
            !ctx.description.trim().is_empty() || !ctx.notes.trim().is_empty(),
            !ctx.implementation_guidance.is_empty(),
            !ctx.file_targets.is_empty(),
            !task.test_specification.required_cases.is_empty(),
            !task.acceptance_criteria.is_empty(),
            !task.quality_requirements.gates.is_empty(),
        ];
        checks.iter().filter(|c| **c).count() as f64 / checks.len() as f64
    }

    pub fn context_size(task: &CompleteTask) -> ContextSize {
        let size_of = |v: Result<String, serde_json::Error>| v.map_or(0, |s| s.len());
        let context_bytes = size_of(serde_json::to_string(&task.embedded_context));
        let test_spec_bytes = size_of(serde_json::to_string(&task.test_specification));
        let quality_bytes = size_of(serde_json::to_string(&task.quality_requirements));
        ContextSize {
            context_bytes,
            test_spec_bytes,
            quality_bytes,
            total_bytes: context_bytes + test_spec_bytes + quality_bytes,
        }
    }

    pub fn validate_for_parallel_execution(task: &CompleteTask) -> ReadinessReport {
        let issues = readiness_issues(task);
        let completeness = Self::completeness_score(task);
        let context_size = Self::context_size(task);

        let mut recommendations = Vec::new();
        if !issues.is_empty() {
            recommendations.push("Embed all required context in the plan entry".to_string());
        }
        if completeness < COMPLETENESS_RECOMMENDATION {
            recommendations.push(format!(
                "Context completeness is {completeness:.2}, consider adding more detail"
            ));
        }
        if context_size.total_bytes > CONTEXT_SIZE_WARN_BYTES {
            recommendations.push(format!(
                "Embedded context is {} bytes, consider trimming architecture excerpts",
                context_size.total_bytes
            ));
        }

        ReadinessReport {
            task_id: task.id.clone(),
            is_valid: issues.is_empty(),
            completeness,
            context_size,
            issues,
            recommendations,
        }
    }
}

fn missing_fields(entry: &PlanEntry, plan: &ImplementationPlan) -> Vec<String> {
    let mut missing = Vec::new();
    if entry.title.trim().is_empty() {
        missing.push("title".to_string());
    }
    if plan.project.background.trim().is_empty() {
        missing.push("project.background".to_string());
    }
    if entry.file_targets.is_empty() {
        missing.push("file_targets".to_string());
    }
    if entry.acceptance_criteria.iter().all(|c| c.trim().is_empty()) {
        missing.push("acceptance_criteria".to_string());
    }
    match &entry.test_specification {
        None => missing.push("test_specification".to_string()),
        Some(spec) => {
            if spec.test_file.trim().is_empty() {
                missing.push("test_specification.test_file".to_string());
            }
            if spec.required_cases.is_empty() {
                missing.push("test_specification.required_cases".to_string());
            }
        }
    }
    missing
}

fn find_leftover_marker(task: &CompleteTask) -> Option<String> {
    task.text_fields()
        .find_map(|text| LEFTOVER_MARKER.find(text).map(|m| m.as_str().to_string()))
}

fn readiness_issues(task: &CompleteTask) -> Vec<String> {
    let mut issues = Vec::new();
    if let Some(marker) = find_leftover_marker(task) {
        issues.push(format!("unresolved reference marker '{marker}'"));
    }
    if task.embedded_context.project_background.trim().is_empty() {
        issues.push("missing project background".to_string());
    }
    if task.embedded_context.file_targets.is_empty() {
        issues.push("missing file targets".to_string());
    }
    if task.acceptance_criteria.iter().all(|c| c.trim().is_empty()) {
        issues.push("missing acceptance criteria".to_string());
    }
    if task.test_specification.required_cases.is_empty() {
        issues.push("missing required test cases".to_string());
    }
    issues
}

/// Resolves references within one entry against the whole plan.
struct ReferenceResolver<'a> {
    entry: &'a PlanEntry,
    plan: &'a ImplementationPlan,
    resolved: Vec<ResolvedReference>,
    unresolved: Vec<String>,
}

impl<'a> ReferenceResolver<'a> {
    const fn new(entry: &'a PlanEntry, plan: &'a ImplementationPlan) -> Self {
        Self {
            entry,
            plan,
            resolved: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    fn resolve(&mut self, text: &str) -> String {
        REFERENCE
            .replace_all(text, |caps: &Captures| {
                let marker = caps[0].to_string();
                if let (Some(kind), Some(target)) = (caps.get(1), caps.get(2)) {
                    let target = target.as_str().trim();
                    let inlined = if kind.as_str() == "task" {
                        self.inline_task(target)
                    } else {
                        self.inline_definition(target)
                    };
                    return self.record(marker, target, inlined);
                }

                if let Some(name) = caps.get(4) {
                    let name = name.as_str();
                    return match self.inline_definition(name) {
                        Some(text) => self.record(marker, name, Some(text)),
                        // Not a known excerpt; the name may still hold a task reference.
                        None => format!("see {} (architecture)", self.resolve(name)),
                    };
                }

                let target = caps.get(3).map_or("", |m| m.as_str());
                if self.plan.entry(target).is_some() {
                    let inlined = self.inline_task(target);
                    self.record(marker, target, inlined)
                } else {
                    if target.chars().any(|c| c.is_ascii_digit()) {
                        // Looks like an id but the plan has no such task.
                        self.unresolved.push(marker.clone());
                    }
                    marker
                }
            })
            .into_owned()
    }

    fn record(&mut self, marker: String, target: &str, inlined: Option<String>) -> String {
        if let Some(text) = inlined {
            self.resolved.push(ResolvedReference {
                marker,
                source: target.to_string(),
                text: text.clone(),
            });
            text
        } else {
            self.unresolved.push(marker.clone());
            marker
        }
    }

    fn inline_task(&self, id: &str) -> Option<String> {
        if id == self.entry.id {
            return Some(format!("[this task: {}]", self.entry.title));
        }
        let target = self.plan.entry(id)?;
        let files = target
            .file_targets
            .iter()
            .map(|f| f.path.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let mut text = format!("[task {}: {}", target.id, target.title);
        let description = self.inline_nested(target.description.trim());
        if !description.is_empty() {
            text.push_str(" - ");
            text.push_str(&description);
        }
        if !files.is_empty() {
            text.push_str(&format!(" (files: {files})"));
        }
        text.push(']');
        Some(text)
    }

    /// Markers inside an inlined task's description. Definitions are inlined
    /// in full, task markers become a title stub so inlining never recurses.
    fn inline_nested(&self, text: &str) -> String {
        REFERENCE
            .replace_all(text, |caps: &Captures| {
                let inlined = match (caps.get(1), caps.get(2), caps.get(4)) {
                    (Some(kind), Some(name), _) if kind.as_str() == "def" => {
                        self.inline_definition(name.as_str().trim())
                    }
                    (Some(_), Some(id), _) => self.task_stub(id.as_str().trim()),
                    (_, _, Some(name)) => self.inline_definition(name.as_str()),
                    _ => None,
                };
                inlined.unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn task_stub(&self, id: &str) -> Option<String> {
        self.plan
            .entry(id)
            .map(|target| format!("[task {}: {}]", target.id, target.title.trim()))
    }

    fn inline_definition(&self, name: &str) -> Option<String> {
        let project = &self.plan.project;
        project
            .definitions
            .get(name)
            .or_else(|| project.architecture.get(name))
            .map(|text| format!("[{name}: {}]", text.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{FileTarget, ProjectContext};
    use std::collections::BTreeMap;

    fn entry(id: &str) -> PlanEntry {
        PlanEntry {
            id: id.to_string(),
            title: format!("Implement {id}"),
            dependencies: vec![],
            description: format!("Build the {id} component"),
            context: String::new(),
            file_targets: vec![FileTarget {
                path: format!("src/{id}.rs"),
                action: Default::default(),
            }],
            implementation_guidance: vec!["Keep it small".to_string()],
            test_specification: Some(TestSpecification {
                test_file: format!("tests/{id}.rs"),
                framework: None,
                required_cases: vec![format!("{id} works")],
                coverage_threshold: None,
            }),
            quality_requirements: None,
            acceptance_criteria: vec![format!("{id} is implemented")],
            estimated_minutes: Some(10),
            max_duration_secs: None,
            priority: 50,
        }
    }

    fn plan(entries: Vec<PlanEntry>) -> ImplementationPlan {
        ImplementationPlan {
            project: ProjectContext {
                name: "demo".to_string(),
                background: "A demo project used to exercise the builder.".to_string(),
                architecture: BTreeMap::from([("storage".to_string(), "SQLite via sqlx".to_string())]),
                definitions: BTreeMap::from([("User".to_string(), "struct User { id, email }".to_string())]),
            },
            defaults: Default::default(),
            tasks: entries,
        }
    }

    #[test]
    fn build_inlines_task_and_definition_references() {
        let mut b = entry("2");
        b.context = "Use the User model from task 1 and {{def:User}}".to_string();
        b.dependencies = vec!["1".to_string()];
        let p = plan(vec![entry("1"), b.clone()]);

        let task = TaskContextBuilder::default().build(&b, &p).unwrap();
        let notes = &task.embedded_context.notes;
        assert!(notes.contains("[task 1: Implement 1"));
        assert!(notes.contains("[User: struct User { id, email }]"));
        assert_eq!(task.embedded_context.resolved_references.len(), 2);
        assert!(TaskContextBuilder::is_stateless_ready(&task));
    }

    #[test]
    fn chained_task_references_inline_one_level() {
        let mut parser = entry("t2");
        parser.description = "Extend the parser from {{task:t1}} using {{def:User}}".to_string();
        let mut consumer = entry("t3");
        consumer.context = "Reuse the output of {{task:t2}}".to_string();
        let p = plan(vec![entry("t1"), parser, consumer.clone()]);

        let task = TaskContextBuilder::default().build(&consumer, &p).unwrap();
        let notes = &task.embedded_context.notes;
        assert!(notes.contains("[task t2: Implement t2 - Extend the parser from [task t1: Implement t1]"));
        assert!(notes.contains("[User: struct User { id, email }]"));
        assert!(!notes.contains("{{"));
        assert_eq!(task.embedded_context.resolved_references.len(), 1);
        assert!(TaskContextBuilder::is_stateless_ready(&task));

        let all = TaskContextBuilder::default().build_all(&p).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn architecture_see_reference_is_inlined() {
        let mut e = entry("a");
        e.context = "Follow the layering, see storage (architecture)".to_string();
        let p = plan(vec![e.clone()]);

        let task = TaskContextBuilder::default().build(&e, &p).unwrap();
        assert_eq!(
            task.embedded_context.notes,
            "Follow the layering, [storage: SQLite via sqlx]"
        );
        let refs = &task.embedded_context.resolved_references;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].source, "storage");
        assert_eq!(refs[0].marker, "see storage (architecture)");
    }

    #[test]
    fn unknown_architecture_name_is_left_as_prose() {
        let mut e = entry("a");
        e.context = "see the big picture (architecture)".to_string();
        let p = plan(vec![e.clone()]);

        let task = TaskContextBuilder::default().build(&e, &p).unwrap();
        assert_eq!(task.embedded_context.notes, "see the big picture (architecture)");
        assert!(task.embedded_context.resolved_references.is_empty());
    }

    #[test]
    fn build_rejects_missing_required_fields() {
        let mut e = entry("a");
        e.file_targets.clear();
        e.acceptance_criteria.clear();
        e.test_specification = None;
        let p = plan(vec![e.clone()]);

        match TaskContextBuilder::default().build(&e, &p) {
            Err(EngineError::IncompleteSpecification { task_id, missing }) => {
                assert_eq!(task_id, "a");
                assert!(missing.contains(&"file_targets".to_string()));
                assert!(missing.contains(&"acceptance_criteria".to_string()));
                assert!(missing.contains(&"test_specification".to_string()));
            }
            other => panic!("expected incomplete specification, got {other:?}"),
        }
    }

    #[test]
    fn build_rejects_reference_to_unknown_task() {
        let mut e = entry("a");
        e.context = "Reuse the parser from {{task:zzz}}".to_string();
        let p = plan(vec![e.clone()]);
        let err = TaskContextBuilder::default().build(&e, &p).unwrap_err();
        assert!(err.to_string().contains("unresolved reference"));
    }

    #[test]
    fn prose_reference_with_unknown_numeric_id_is_unresolved() {
        let mut e = entry("a");
        e.context = "Extend what task 42 produced".to_string();
        let p = plan(vec![e.clone()]);
        assert!(TaskContextBuilder::default().build(&e, &p).is_err());
    }

    #[test]
    fn prose_without_an_id_is_left_alone() {
        let mut e = entry("a");
        e.context = "This task should stay small".to_string();
        let p = plan(vec![e.clone()]);
        let task = TaskContextBuilder::default().build(&e, &p).unwrap();
        assert_eq!(task.embedded_context.notes, "This task should stay small");
    }

    #[test]
    fn build_all_rejects_unknown_dependency() {
        let mut e = entry("a");
        e.dependencies = vec!["ghost".to_string()];
        let err = TaskContextBuilder::default().build_all(&plan(vec![e])).unwrap_err();
        assert!(matches!(err, EngineError::UnknownDependency { .. }));
    }

    #[test]
    fn build_all_rejects_duplicates() {
        let err = TaskContextBuilder::default()
            .build_all(&plan(vec![entry("a"), entry("a")]))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTask(id) if id == "a"));
    }

    #[test]
    fn leftover_marker_fails_readiness() {
        let p = plan(vec![entry("a")]);
        let mut task = TaskContextBuilder::default().build(&p.tasks[0], &p).unwrap();
        assert!(TaskContextBuilder::is_stateless_ready(&task));
        task.embedded_context.notes = "Port number is TBD".to_string();
        assert!(!TaskContextBuilder::is_stateless_ready(&task));
        let report = TaskContextBuilder::validate_for_parallel_execution(&task);
        assert!(!report.is_valid);
        assert!(!report.issues.is_empty());
    }

    #[test]
    fn test_spec_threshold_overrides_default() {
        let mut e = entry("a");
        if let Some(spec) = e.test_specification.as_mut() {
            spec.coverage_threshold = Some(95.0);
        }
        let p = plan(vec![e.clone()]);
        let task = TaskContextBuilder::default().build(&e, &p).unwrap();
        assert!((task.quality_requirements.coverage_threshold - 95.0).abs() < f64::EPSILON);
        assert_eq!(task.max_duration_secs, 1800);
        assert_eq!(task.estimated_duration_secs, 600);
    }

    #[test]
    fn completeness_counts_components() {
        let p = plan(vec![entry("a")]);
        let task = TaskContextBuilder::default().build(&p.tasks[0], &p).unwrap();
        assert!((TaskContextBuilder::completeness_score(&task) - 1.0).abs() < f64::EPSILON);
        let size = TaskContextBuilder::context_size(&task);
        assert_eq!(
            size.total_bytes,
            size.context_bytes + size.test_spec_bytes + size.quality_bytes
        );
    }
}
