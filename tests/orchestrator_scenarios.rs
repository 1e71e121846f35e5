//! End-to-end execution scenarios over the scripted toolchain.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use paraflow::adapters::sinks::{RecordingCommitSink, RecordingTaskTracker};
use paraflow::adapters::toolchains::{ScriptedBehavior, ScriptedFailure, ScriptedToolchain};
use paraflow::domain::models::{
    ErrorClass, FailurePolicy, FinalState, TaskDisposition, TddPhase,
};
use async_trait::async_trait;
use paraflow::domain::ports::{SinkError, TaskTracker, TaskTransition, TrackedStatus};
use paraflow::services::{
    ExecutionEvent, Orchestrator, ResourceManager, Sinks, TaskContextBuilder, ToolBindings,
};
use tokio::sync::mpsc;

use common::{graph, orchestrator, task};

/// Accepts transitions and never returns.
struct HangingTracker;

#[async_trait]
impl TaskTracker for HangingTracker {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn on_transition(&self, _transition: &TaskTransition) -> Result<(), SinkError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

fn phases_of(calls: &[paraflow::adapters::toolchains::PhaseCall], task_id: &str) -> Vec<TddPhase> {
    calls.iter().filter(|c| c.task_id == task_id).map(|c| c.phase).collect()
}

#[tokio::test]
async fn fatal_failure_skips_dependent_but_not_siblings() {
    common::setup_test_logging();
    let toolchain = Arc::new(ScriptedToolchain::new());
    toolchain
        .set_behavior(
            "a",
            ScriptedBehavior::failing(TddPhase::Green, ScriptedFailure::Fatal("compiler crashed".into())),
        )
        .await;
    let graph = graph(vec![task("a", &[]), task("b", &[]), task("c", &["a", "b"])]);
    assert_eq!(graph.layers(), &[vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]);

    let report = orchestrator(toolchain.clone(), 4)
        .with_policy(FailurePolicy::Continue)
        .run(&graph)
        .await
        .unwrap();

    assert_eq!(report.final_state, FinalState::Completed);
    let a = report.outcome("a").unwrap();
    assert_eq!(a.disposition, TaskDisposition::Failed);
    assert_eq!(a.error_class, Some(ErrorClass::Fatal));
    assert!(a.escalated);
    assert_eq!(report.outcome("b").unwrap().disposition, TaskDisposition::Succeeded);

    let c = report.outcome("c").unwrap();
    assert_eq!(c.disposition, TaskDisposition::Skipped);
    assert!(c.reason.as_deref().unwrap().contains("'a'"));
    assert_eq!(toolchain.attempts("c").await, 0);

    let skipped: Vec<_> = report.skipped.iter().map(|s| s.task_id.as_str()).collect();
    assert_eq!(skipped, vec!["c"]);
    assert!(!report.is_success());
}

#[tokio::test]
async fn timeout_is_requeued_once_then_fails_with_timeout_reason() {
    let toolchain = Arc::new(ScriptedToolchain::new());
    toolchain
        .set_behavior("d", ScriptedBehavior::success().with_phase_delay(Duration::from_secs(5)))
        .await;
    let mut slow = task("d", &[]);
    slow.max_duration_secs = 1;
    let graph = graph(vec![slow, task("e", &["d"])]);

    let report = orchestrator(toolchain.clone(), 2).run(&graph).await.unwrap();

    let d = report.outcome("d").unwrap();
    assert_eq!(d.disposition, TaskDisposition::Failed);
    assert_eq!(d.error_class, Some(ErrorClass::Resource));
    assert_eq!(d.attempts, 2);
    assert_eq!(d.reason.as_deref(), Some("timeout"));
    assert_eq!(report.outcome("e").unwrap().disposition, TaskDisposition::Skipped);
}

#[tokio::test]
async fn fail_fast_aborts_remaining_work() {
    let toolchain = Arc::new(ScriptedToolchain::new());
    toolchain
        .set_behavior(
            "a",
            ScriptedBehavior::failing(TddPhase::Red, ScriptedFailure::Fatal("broken fixture".into())),
        )
        .await;
    let graph = graph(vec![task("a", &[]), task("b", &["a"]), task("c", &[]), task("d", &["c"])]);

    let report = orchestrator(toolchain.clone(), 1)
        .with_policy(FailurePolicy::FailFast)
        .run(&graph)
        .await
        .unwrap();

    assert_eq!(report.final_state, FinalState::Aborted);
    assert_eq!(report.outcome("a").unwrap().disposition, TaskDisposition::Failed);
    assert_eq!(report.outcome("b").unwrap().disposition, TaskDisposition::Skipped);
    assert_eq!(report.outcome("d").unwrap().disposition, TaskDisposition::Aborted);
    // Every task is accounted for.
    assert_eq!(report.tasks.len(), 4);
    assert!(report
        .tasks
        .iter()
        .all(|t| t.disposition.is_terminal() && (t.disposition == TaskDisposition::Succeeded || t.reason.is_some())));
    assert_eq!(toolchain.attempts("d").await, 0);
}

#[tokio::test]
async fn independent_tasks_run_concurrently_up_to_capacity() {
    let delay = Duration::from_millis(100);
    let toolchain = Arc::new(ScriptedToolchain::with_default_behavior(
        ScriptedBehavior::success().with_phase_delay(delay),
    ));
    let tasks = (0..8).map(|i| task(&format!("t{i}"), &[])).collect();
    let graph = graph(tasks);

    let started = Instant::now();
    let report = orchestrator(toolchain.clone(), 3).run(&graph).await.unwrap();
    let elapsed = started.elapsed();

    assert!(report.is_success());
    assert_eq!(toolchain.peak_concurrency(), 3);
    assert!(report.metrics.peak_concurrency <= 3);
    // Three phases per task; eight tasks one after another would take 2.4s.
    let sequential = delay * 3 * 8;
    assert!(elapsed < sequential * 3 / 4, "took {elapsed:?}");
    assert!(report.metrics.parallel_efficiency > 1.0);
}

#[tokio::test]
async fn layers_never_overlap() {
    let toolchain = Arc::new(ScriptedToolchain::with_default_behavior(
        ScriptedBehavior::success().with_phase_delay(Duration::from_millis(10)),
    ));
    let graph = graph(vec![
        task("a", &[]),
        task("b", &[]),
        task("c", &["a"]),
        task("d", &["b", "c"]),
    ]);

    let report = orchestrator(toolchain, 4).run(&graph).await.unwrap();
    assert!(report.is_success());

    for outcome in &report.tasks {
        let graph_task = graph.task(&outcome.task_id).unwrap();
        for dep in &graph_task.dependencies {
            let dep_outcome = report.outcome(dep).unwrap();
            assert!(
                dep_outcome.finished_at.unwrap() <= outcome.started_at.unwrap(),
                "{} started before {dep} finished",
                outcome.task_id
            );
        }
    }
}

#[tokio::test]
async fn sinks_see_ordered_transitions_and_proposals() {
    let tracker = Arc::new(RecordingTaskTracker::new());
    let committer = Arc::new(RecordingCommitSink::new());
    let toolchain = Arc::new(ScriptedToolchain::new());
    toolchain
        .set_behavior(
            "flaky",
            ScriptedBehavior::failing(TddPhase::Refactor, ScriptedFailure::Transient("network".into()))
                .on_first_attempts(1),
        )
        .await;
    let graph = graph(vec![task("flaky", &[]), task("after", &["flaky"])]);

    let report = orchestrator(toolchain, 2)
        .with_sinks(
            Sinks::default()
                .with_tracker(tracker.clone())
                .with_committer(committer.clone()),
        )
        .run(&graph)
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.commit_proposals, 2);

    let flaky: Vec<TrackedStatus> = tracker.transitions_for("flaky").await.iter().map(|t| t.to).collect();
    assert_eq!(
        flaky,
        vec![
            TrackedStatus::Queued,
            TrackedStatus::Running,
            TrackedStatus::Retrying,
            TrackedStatus::Running,
            TrackedStatus::Done,
        ]
    );

    let proposals = committer.proposals().await;
    assert_eq!(proposals.len(), 2);
    let first = proposals.iter().find(|p| p.task_id == "flaky").unwrap();
    assert!(first.message.contains("Task: flaky"));
    assert!(first.diff.contains("+++ b/src/flaky.rs"));
    assert!(first.metrics.contains_key("coverage"));
}

#[tokio::test]
async fn retry_rebuilds_context_from_plan() {
    let plan = Arc::new(common::plan(vec![common::entry("a", &[])]));
    let builder = TaskContextBuilder::default();
    let tasks = builder.build_all(&plan).unwrap();
    let graph = graph(tasks);

    let toolchain = Arc::new(ScriptedToolchain::new());
    toolchain
        .set_behavior(
            "a",
            ScriptedBehavior::failing(TddPhase::Red, ScriptedFailure::Transient("lock held".into()))
                .on_first_attempts(1),
        )
        .await;

    let report = orchestrator(toolchain.clone(), 1)
        .with_plan_context(builder, plan)
        .run(&graph)
        .await
        .unwrap();

    assert_eq!(report.outcome("a").unwrap().attempts, 2);
    let attempts: Vec<u32> = toolchain
        .calls()
        .await
        .iter()
        .filter(|c| c.phase == TddPhase::Red)
        .map(|c| c.attempt)
        .collect();
    assert_eq!(attempts, vec![1, 2]);
}

#[tokio::test]
async fn cancel_aborts_in_flight_session() {
    let toolchain = Arc::new(ScriptedToolchain::with_default_behavior(
        ScriptedBehavior::success().with_phase_delay(Duration::from_millis(200)),
    ));
    let graph = graph(vec![task("a", &[]), task("b", &["a"])]);
    let orchestrator = Arc::new(orchestrator(toolchain.clone(), 2));

    let canceller = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            orchestrator.cancel();
        })
    };
    let report = orchestrator.run(&graph).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(report.final_state, FinalState::Aborted);
    assert_eq!(report.outcome("b").unwrap().disposition, TaskDisposition::Aborted);
    assert!(report.outcome("b").unwrap().reason.is_some());

    // The red phase already running is finished, green never starts.
    assert_eq!(phases_of(&toolchain.calls().await, "a"), vec![TddPhase::Red]);
    let a = report.outcome("a").unwrap();
    assert_eq!(a.disposition, TaskDisposition::Aborted);
    assert!(
        a.reason.as_deref().unwrap().contains("before the green phase"),
        "{:?}",
        a.reason
    );
    assert_eq!(toolchain.attempts("b").await, 0);
}

#[tokio::test]
async fn fail_fast_lets_running_phase_finish_then_aborts() {
    let toolchain = Arc::new(ScriptedToolchain::with_default_behavior(
        ScriptedBehavior::success().with_phase_delay(Duration::from_millis(150)),
    ));
    toolchain
        .set_behavior(
            "a",
            ScriptedBehavior::failing(TddPhase::Red, ScriptedFailure::Fatal("broken fixture".into()))
                .with_phase_delay(Duration::from_millis(20)),
        )
        .await;
    let graph = graph(vec![task("a", &[]), task("c", &[]), task("d", &["c"])]);

    let report = orchestrator(toolchain.clone(), 2)
        .with_policy(FailurePolicy::FailFast)
        .run(&graph)
        .await
        .unwrap();

    assert_eq!(report.final_state, FinalState::Aborted);
    assert_eq!(report.outcome("a").unwrap().disposition, TaskDisposition::Failed);

    // c was mid-red when a failed.
    let calls = toolchain.calls().await;
    assert_eq!(phases_of(&calls, "c"), vec![TddPhase::Red]);
    let c = report.outcome("c").unwrap();
    assert_eq!(c.disposition, TaskDisposition::Aborted);
    assert!(c.reason.as_deref().unwrap().contains("before the green phase"), "{:?}", c.reason);

    assert_eq!(report.outcome("d").unwrap().disposition, TaskDisposition::Aborted);
    assert!(phases_of(&calls, "d").is_empty());
}

#[tokio::test]
async fn sustained_pressure_halves_later_layers() {
    let toolchain = Arc::new(ScriptedToolchain::with_default_behavior(
        ScriptedBehavior::success().with_phase_delay(Duration::from_millis(30)),
    ));
    let graph = graph(vec![
        task("a0", &[]),
        task("a1", &[]),
        task("b0", &["a0", "a1"]),
        task("b1", &["a0", "a1"]),
        task("c0", &["b0", "b1"]),
        task("c1", &["b0", "b1"]),
    ]);
    // Two permits held for a whole layer is 100% utilisation, well past one window.
    let resources = ResourceManager::new(2, 0.9, Duration::from_millis(10));
    let orchestrator = Orchestrator::new(ToolBindings::new(toolchain, "."), resources);

    let (tx, mut rx) = mpsc::channel(256);
    let report = orchestrator.run_with_events(&graph, tx).await.unwrap();
    assert!(report.is_success(), "{report:#?}");

    let mut degraded = Vec::new();
    let mut concurrency = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            ExecutionEvent::Degraded { target } => degraded.push(target),
            ExecutionEvent::LayerStarted { concurrency: width, .. } => concurrency.push(width),
            _ => {}
        }
    }
    assert_eq!(degraded, vec![1]);
    assert_eq!(concurrency, vec![2, 1, 1]);
    assert!(report.metrics.peak_concurrency <= 2);
}

#[tokio::test]
async fn hanging_tracker_does_not_hold_the_run_open() {
    let toolchain = Arc::new(ScriptedToolchain::new());
    let graph = graph(vec![task("a", &[]), task("b", &[]), task("c", &["a"]), task("d", &["b"])]);

    // Draining the backlog one sink timeout at a time would take seconds.
    let started = Instant::now();
    let report = orchestrator(toolchain, 2)
        .with_sinks(Sinks::default().with_tracker(Arc::new(HangingTracker)))
        .with_notification_limits(256, Duration::from_millis(300))
        .run(&graph)
        .await
        .unwrap();

    assert!(report.is_success());
    assert!(started.elapsed() < Duration::from_millis(1500), "took {:?}", started.elapsed());
}
