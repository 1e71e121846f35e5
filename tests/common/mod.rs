//! Common test utilities for integration tests
//!
//! Plan and task builders, orchestrator wiring over the scripted toolchain,
//! and log setup shared across the integration test files.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use paraflow::adapters::toolchains::ScriptedToolchain;
use paraflow::domain::models::{
    CompleteTask, EmbeddedContext, ExecutionConfig, ExecutionGraph, FileTarget,
    ImplementationPlan, PlanDefaults, PlanEntry, ProjectContext, QualityGateRequirements,
    TestSpecification,
};
use paraflow::services::{DependencyAnalyzer, Orchestrator, ResourceManager, ToolBindings};

/// A complete task writing `src/<id>.rs`, estimated at one minute.
pub fn task(id: &str, deps: &[&str]) -> CompleteTask {
    CompleteTask {
        id: id.to_string(),
        title: format!("Task {id}"),
        dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
        embedded_context: EmbeddedContext {
            project_name: "fixture".to_string(),
            project_background: "Integration fixture project".to_string(),
            description: format!("Implement {id}"),
            file_targets: vec![FileTarget {
                path: format!("src/{id}.rs"),
                action: Default::default(),
            }],
            ..Default::default()
        },
        test_specification: TestSpecification {
            test_file: format!("tests/{id}.rs"),
            framework: None,
            required_cases: vec![format!("{id} works")],
            coverage_threshold: None,
        },
        quality_requirements: QualityGateRequirements::default(),
        acceptance_criteria: vec![format!("{id} is implemented")],
        estimated_duration_secs: 60,
        max_duration_secs: 30,
        priority: 50,
    }
}

/// A plan entry with every required field filled in.
pub fn entry(id: &str, deps: &[&str]) -> PlanEntry {
    PlanEntry {
        id: id.to_string(),
        title: format!("Task {id}"),
        dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
        description: format!("Implement {id}"),
        context: String::new(),
        file_targets: vec![FileTarget {
            path: format!("src/{id}.rs"),
            action: Default::default(),
        }],
        implementation_guidance: Vec::new(),
        test_specification: Some(TestSpecification {
            test_file: format!("tests/{id}.rs"),
            framework: None,
            required_cases: vec![format!("{id} works")],
            coverage_threshold: None,
        }),
        quality_requirements: None,
        acceptance_criteria: vec![format!("{id} is implemented")],
        estimated_minutes: Some(1),
        max_duration_secs: None,
        priority: 50,
    }
}

pub fn plan(entries: Vec<PlanEntry>) -> ImplementationPlan {
    ImplementationPlan {
        project: ProjectContext {
            name: "fixture".to_string(),
            background: "Integration fixture project".to_string(),
            architecture: BTreeMap::new(),
            definitions: BTreeMap::new(),
        },
        defaults: PlanDefaults::default(),
        tasks: entries,
    }
}

pub fn graph(tasks: Vec<CompleteTask>) -> ExecutionGraph {
    DependencyAnalyzer::new()
        .analyze(tasks)
        .expect("fixture graph should be valid")
}

/// Orchestrator over `toolchain` with `capacity` permits and near-zero backoff.
pub fn orchestrator(toolchain: Arc<ScriptedToolchain>, capacity: usize) -> Orchestrator {
    let resources = ResourceManager::new(capacity, 0.99, Duration::from_secs(300));
    Orchestrator::new(ToolBindings::new(toolchain, "."), resources).with_execution_config(ExecutionConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        ..Default::default()
    })
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
