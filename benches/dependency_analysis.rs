//! Benchmarks for dependency layering and context building.
#![allow(missing_docs, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use paraflow::domain::models::{
    CompleteTask, EmbeddedContext, FileTarget, ImplementationPlan, PlanDefaults, PlanEntry,
    ProjectContext, QualityGateRequirements, TestSpecification,
};
use paraflow::services::{DependencyAnalyzer, TaskContextBuilder};

fn task(id: String, dependencies: Vec<String>) -> CompleteTask {
    CompleteTask {
        title: format!("Task {id}"),
        dependencies: dependencies.into_iter().collect(),
        embedded_context: EmbeddedContext {
            project_name: "bench".to_string(),
            project_background: "Benchmark project".to_string(),
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
        max_duration_secs: 600,
        priority: 50,
        id,
    }
}

/// `width` independent chains of `depth` tasks each.
fn chains(width: usize, depth: usize) -> Vec<CompleteTask> {
    (0..width)
        .flat_map(|w| {
            (0..depth).map(move |d| {
                let deps = if d == 0 {
                    Vec::new()
                } else {
                    vec![format!("c{w}-{}", d - 1)]
                };
                task(format!("c{w}-{d}"), deps)
            })
        })
        .collect()
}

/// Layer `n` depends on every task of layer `n - 1`.
fn dense_layers(layers: usize, per_layer: usize) -> Vec<CompleteTask> {
    (0..layers)
        .flat_map(|l| {
            (0..per_layer).map(move |i| {
                let deps = if l == 0 {
                    Vec::new()
                } else {
                    (0..per_layer).map(|p| format!("l{}-{p}", l - 1)).collect()
                };
                task(format!("l{l}-{i}"), deps)
            })
        })
        .collect()
}

fn bench_layering(c: &mut Criterion) {
    let mut group = c.benchmark_group("layering");
    let analyzer = DependencyAnalyzer::new();

    for (name, tasks) in [
        ("chains_10x20", chains(10, 20)),
        ("chains_50x20", chains(50, 20)),
        ("dense_10x10", dense_layers(10, 10)),
        ("dense_20x25", dense_layers(20, 25)),
    ] {
        group.throughput(Throughput::Elements(tasks.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &tasks, |b, tasks| {
            b.iter(|| analyzer.analyze(black_box(tasks.clone())).unwrap());
        });
    }

    group.finish();
}

fn bench_cycle_detection(c: &mut Criterion) {
    let analyzer = DependencyAnalyzer::new();
    let mut tasks = chains(10, 20);
    // Close the last chain into a loop.
    tasks[180].dependencies.insert("c9-19".to_string());

    c.bench_function("cycle_detection_200", |b| {
        b.iter(|| analyzer.analyze(black_box(tasks.clone())).unwrap_err());
    });
}

fn bench_context_building(c: &mut Criterion) {
    let mut definitions = BTreeMap::new();
    definitions.insert("Schema".to_string(), "id, name, created_at".to_string());
    let plan = ImplementationPlan {
        project: ProjectContext {
            name: "bench".to_string(),
            background: "Benchmark project".to_string(),
            architecture: BTreeMap::new(),
            definitions,
        },
        defaults: PlanDefaults::default(),
        tasks: (0..200)
            .map(|i| PlanEntry {
                id: format!("t{i}"),
                title: format!("Task {i}"),
                dependencies: if i == 0 { Vec::new() } else { vec![format!("t{}", i - 1)] },
                description: if i == 0 {
                    "Store rows as {{def:Schema}}".to_string()
                } else {
                    format!("Extends {{{{task:t{}}}}} using {{{{def:Schema}}}}", i - 1)
                },
                context: String::new(),
                file_targets: vec![FileTarget {
                    path: format!("src/t{i}.rs"),
                    action: Default::default(),
                }],
                implementation_guidance: Vec::new(),
                test_specification: Some(TestSpecification {
                    test_file: format!("tests/t{i}.rs"),
                    framework: None,
                    required_cases: vec!["works".to_string()],
                    coverage_threshold: None,
                }),
                quality_requirements: None,
                acceptance_criteria: vec!["done".to_string()],
                estimated_minutes: Some(5),
                max_duration_secs: None,
                priority: 50,
            })
            .collect(),
    };
    let builder = TaskContextBuilder::default();

    c.bench_function("build_all_200", |b| {
        b.iter(|| builder.build_all(black_box(&plan)).unwrap());
    });
}

criterion_group!(benches, bench_layering, bench_cycle_detection, bench_context_building);
criterion_main!(benches);
