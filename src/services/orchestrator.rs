//! Execution orchestrator.
//!
//! Walks the layers of an [`ExecutionGraph`] in order. Each layer fans out to
//! one fresh worker per task, bounded by permits from the resource manager,
//! and fans back in at a barrier before the next layer starts. Every attempt
//! runs on its own tokio task so a panic or timeout stays inside that task's
//! branch of the graph.

use chrono::Utc;
use std::any::Any;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::domain::errors::EngineResult;
use crate::domain::models::{
    CompleteTask, Config, CriticalPath, ErrorClass, ExecutionConfig, ExecutionGraph,
    ExecutionReport, ExecutionSession, FailureKind, FailurePolicy, FileConflict, FinalState,
    GraphSummary, ImplementationPlan, RecoveryAction, SessionState, TaskDisposition, TaskFailure,
    TaskId, TaskResult, TaskStatus,
};
use crate::domain::ports::{TaskTransition, Toolchain, TrackedStatus};
use crate::services::context_builder::TaskContextBuilder;
use crate::services::dependency_analyzer::DependencyAnalyzer;
use crate::services::notifier::{commit_proposal, NotificationHub, Sinks};
use crate::services::quality_gates::{all_passed, QualityGateEngine};
use crate::services::recovery::RecoveryManager;
use crate::services::resource_manager::ResourceManager;
use crate::services::worker::{ToolBindings, Worker};

/// Event emitted during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// Execution started.
    Started {
        session_id: Uuid,
        total_tasks: usize,
        layer_count: usize,
    },
    /// Layer started with the given concurrency.
    LayerStarted {
        layer: usize,
        task_count: usize,
        concurrency: usize,
    },
    /// Attempt started.
    TaskStarted { task_id: TaskId, attempt: u32 },
    /// Attempt failed and the task will run again.
    TaskRetrying {
        task_id: TaskId,
        class: ErrorClass,
        action: RecoveryAction,
    },
    /// Task reached its final disposition.
    TaskFinished {
        task_id: TaskId,
        disposition: TaskDisposition,
    },
    /// Concurrency target halved under sustained pressure.
    Degraded { target: usize },
    /// Layer barrier reached.
    LayerCompleted {
        layer: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
    /// Execution finished.
    Completed { final_state: FinalState },
}

/// Dry-run view of a graph.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionPreview {
    pub summary: GraphSummary,
    pub critical_path: CriticalPath,
    pub file_conflicts: Vec<FileConflict>,
    pub recommended_parallelism: usize,
    /// Workers each layer would start with.
    pub layer_concurrency: Vec<usize>,
    /// Layered estimate at the recommended parallelism.
    pub estimated_wall_secs: u64,
}

/// Rebuilds task specifications from the plan for retries.
#[derive(Debug, Clone)]
pub struct PlanContext {
    builder: TaskContextBuilder,
    plan: Arc<ImplementationPlan>,
}

impl PlanContext {
    pub fn new(builder: TaskContextBuilder, plan: Arc<ImplementationPlan>) -> Self {
        Self { builder, plan }
    }

    fn rebuild(&self, task_id: &str) -> Option<CompleteTask> {
        let entry = self.plan.entry(task_id)?;
        match self.builder.build(entry, &self.plan) {
            Ok(task) => Some(task),
            Err(e) => {
                warn!(task_id, error = %e, "could not rebuild task context, reusing original");
                None
            }
        }
    }
}

/// Runs an execution graph layer by layer.
pub struct Orchestrator {
    execution: ExecutionConfig,
    bindings: ToolBindings,
    gates: Arc<QualityGateEngine>,
    recovery: RecoveryManager,
    resources: ResourceManager,
    analyzer: DependencyAnalyzer,
    sinks: Sinks,
    queue_capacity: usize,
    sink_timeout: Duration,
    plan_context: Option<PlanContext>,
    active: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("execution", &self.execution)
            .field("bindings", &self.bindings)
            .field("gates", &self.gates)
            .field("capacity", &self.resources.recommended_parallelism())
            .field("sinks", &self.sinks)
            .finish_non_exhaustive()
    }
}

/// State shared by the task drivers of one run.
struct Run<'a> {
    graph: &'a ExecutionGraph,
    session: Mutex<ExecutionSession>,
    session_id: Uuid,
    hub: NotificationHub,
    cancel: CancellationToken,
    events: mpsc::Sender<ExecutionEvent>,
    proposals: AtomicUsize,
}

impl Run<'_> {
    fn session(&self) -> MutexGuard<'_, ExecutionSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(
        &self,
        task_id: &str,
        from: Option<TrackedStatus>,
        to: TrackedStatus,
        detail: Option<String>,
    ) {
        self.hub.transition(TaskTransition {
            session_id: self.session_id,
            task_id: task_id.to_string(),
            from,
            to,
            at: Utc::now(),
            detail,
        });
    }

    async fn emit(&self, event: ExecutionEvent) {
        let _ = self.events.send(event).await;
    }

    async fn finish(&self, task_id: &str, disposition: TaskDisposition) {
        self.emit(ExecutionEvent::TaskFinished {
            task_id: task_id.to_string(),
            disposition,
        })
        .await;
    }

    /// Abort a task that never got to start.
    async fn abort_unstarted(&self, task_id: &str, from: TrackedStatus, reason: &str) {
        if self.session().mark_aborted(task_id, reason, None) {
            self.notify(task_id, Some(from), TrackedStatus::Aborted, Some(reason.to_string()));
            self.finish(task_id, TaskDisposition::Aborted).await;
        }
    }
}

impl Orchestrator {
    /// Orchestrator with default policy, the built-in gates and no sinks.
    pub fn new(bindings: ToolBindings, resources: ResourceManager) -> Self {
        let gates = QualityGateEngine::with_defaults(&Default::default(), bindings.sandbox_root.clone());
        let execution = ExecutionConfig::default();
        Self {
            recovery: RecoveryManager::from_config(&execution),
            execution,
            bindings,
            gates: Arc::new(gates),
            resources,
            analyzer: DependencyAnalyzer::new(),
            sinks: Sinks::default(),
            queue_capacity: 256,
            sink_timeout: Duration::from_secs(2),
            plan_context: None,
            active: Mutex::new(None),
        }
    }

    /// Orchestrator wired from configuration.
    pub fn from_config(config: &Config, toolchain: Arc<dyn Toolchain>, sinks: Sinks) -> Self {
        let bindings = ToolBindings::new(toolchain, config.toolchain.sandbox_root.clone());
        let gates = QualityGateEngine::with_defaults(&config.quality, config.toolchain.sandbox_root.clone());
        Self::new(bindings, ResourceManager::from_config(&config.resources))
            .with_execution_config(config.execution.clone())
            .with_gates(gates)
            .with_sinks(sinks)
            .with_notification_limits(
                config.notifications.queue_capacity,
                Duration::from_millis(config.notifications.sink_timeout_ms),
            )
    }

    #[must_use]
    pub fn with_execution_config(mut self, execution: ExecutionConfig) -> Self {
        self.recovery = RecoveryManager::from_config(&execution);
        self.execution = execution;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.execution.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_gates(mut self, gates: QualityGateEngine) -> Self {
        self.gates = Arc::new(gates);
        self
    }

    #[must_use]
    pub fn with_sinks(mut self, sinks: Sinks) -> Self {
        self.sinks = sinks;
        self
    }

    #[must_use]
    pub fn with_notification_limits(mut self, queue_capacity: usize, sink_timeout: Duration) -> Self {
        self.queue_capacity = queue_capacity;
        self.sink_timeout = sink_timeout;
        self
    }

    /// Rebuild retried tasks from the plan instead of reusing the original.
    #[must_use]
    pub fn with_plan_context(mut self, builder: TaskContextBuilder, plan: Arc<ImplementationPlan>) -> Self {
        self.plan_context = Some(PlanContext::new(builder, plan));
        self
    }

    pub const fn failure_policy(&self) -> FailurePolicy {
        self.execution.failure_policy
    }

    pub const fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Abort the running session, if any.
    pub fn cancel(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = active.as_ref() {
            info!("cancelling active session");
            token.cancel();
        }
    }

    /// Layers, critical path and concurrency without running anything.
    pub fn preview(&self, graph: &ExecutionGraph) -> ExecutionPreview {
        let parallelism = self.resources.recommended_parallelism();
        let layer_concurrency: Vec<usize> = graph
            .layers()
            .iter()
            .map(|layer| layer.len().min(parallelism))
            .collect();

        let estimated_wall_secs = graph
            .layers()
            .iter()
            .map(|layer| {
                let estimates: Vec<u64> = layer
                    .iter()
                    .filter_map(|id| graph.task(id))
                    .map(|t| t.estimated_duration_secs)
                    .collect();
                let longest = estimates.iter().copied().max().unwrap_or(0);
                let total: u64 = estimates.iter().sum();
                longest.max(total.div_ceil(parallelism as u64))
            })
            .sum();

        ExecutionPreview {
            summary: graph.summary(),
            critical_path: self.analyzer.critical_path(graph),
            file_conflicts: self.analyzer.file_conflicts(graph),
            recommended_parallelism: parallelism,
            layer_concurrency,
            estimated_wall_secs,
        }
    }

    /// Execute the graph and report every task's disposition.
    pub async fn run(&self, graph: &ExecutionGraph) -> EngineResult<ExecutionReport> {
        // Nobody listens, so sends fail fast instead of filling a buffer.
        let (tx, _) = mpsc::channel(1);
        self.run_with_events(graph, tx).await
    }

    /// Execute the graph with event streaming.
    #[instrument(skip_all, fields(tasks = graph.task_count(), layers = graph.layer_count()))]
    pub async fn run_with_events(
        &self,
        graph: &ExecutionGraph,
        events: mpsc::Sender<ExecutionEvent>,
    ) -> EngineResult<ExecutionReport> {
        let cancel = CancellationToken::new();
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());

        let session = ExecutionSession::new(graph);
        let session_id = session.id;
        let run = Run {
            graph,
            session: Mutex::new(session),
            session_id,
            hub: NotificationHub::start(self.sinks.clone(), self.queue_capacity, self.sink_timeout),
            cancel,
            events,
            proposals: AtomicUsize::new(0),
        };
        let policy = self.execution.failure_policy;

        info!(%session_id, %policy, "session started");
        run.emit(ExecutionEvent::Started {
            session_id,
            total_tasks: graph.task_count(),
            layer_count: graph.layer_count(),
        })
        .await;
        for task in graph.tasks() {
            run.notify(&task.id, None, TrackedStatus::Queued, None);
        }

        let outcome = self
            .drive_layers(&run)
            .instrument(info_span!("session", %session_id))
            .await;

        let final_state = {
            let mut session = run.session();
            if outcome.is_err() || run.cancel.is_cancelled() {
                let unresolved: Vec<TaskId> = session
                    .records()
                    .filter(|r| !r.disposition.is_terminal())
                    .map(|r| r.task_id.clone())
                    .collect();
                for id in unresolved {
                    if session.mark_aborted(&id, "session aborted", None) {
                        run.notify(&id, Some(TrackedStatus::Queued), TrackedStatus::Aborted, None);
                    }
                }
                if !session.state().is_terminal() {
                    session.transition_to(SessionState::Aborted)?;
                }
                FinalState::Aborted
            } else {
                session.transition_to(SessionState::Completed)?;
                FinalState::Completed
            }
        };
        outcome?;

        let report = {
            let session = run.session();
            ExecutionReport::from_session(
                &session,
                graph,
                policy,
                Utc::now(),
                run.proposals.load(Ordering::SeqCst),
            )
        };

        run.emit(ExecutionEvent::Completed { final_state }).await;
        self.active.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Run { hub, .. } = run;
        hub.close().await;

        info!(
            %session_id,
            final_state = ?report.final_state,
            succeeded = report.metrics.succeeded,
            failed = report.metrics.failed,
            skipped = report.metrics.skipped,
            aborted = report.metrics.aborted,
            wall_ms = report.metrics.actual_wall_time_ms,
            "session finished"
        );
        Ok(report)
    }

    async fn drive_layers(&self, run: &Run<'_>) -> EngineResult<()> {
        let mut target = self.resources.recommended_parallelism();

        for (k, layer) in run.graph.layers().iter().enumerate() {
            if run.cancel.is_cancelled() {
                break;
            }
            run.session().transition_to(SessionState::LayerExecuting(k))?;

            if self.resources.take_degrade_signal() {
                target = (target / 2).max(1);
                run.emit(ExecutionEvent::Degraded { target }).await;
            }

            let mut runnable: Vec<Arc<CompleteTask>> = {
                let session = run.session();
                layer
                    .iter()
                    .filter(|id| !session.is_resolved(id))
                    .filter_map(|id| run.graph.task(id).cloned())
                    .collect()
            };
            runnable.sort_by_key(|t| (Reverse(t.priority), t.id.clone()));

            if !runnable.is_empty() {
                let wanted = runnable.len().min(target);
                let grant = self.resources.try_acquire(wanted);
                let mut permits = grant.granted;
                if permits.is_empty() {
                    if let Some(continuation) = grant.continuation {
                        debug!(layer = k, wanted, "no permits free, waiting");
                        tokio::select! {
                            more = continuation.wait() => permits = more,
                            () = run.cancel.cancelled() => break,
                        }
                    }
                } else if grant.shortfall > 0 {
                    info!(layer = k, granted = permits.len(), wanted, "partial grant, reducing layer concurrency");
                }
                let width = permits.len().max(1);
                run.session().update_resources(self.resources.snapshot(target));

                info!(layer = k, tasks = runnable.len(), concurrency = width, "layer started");
                run.emit(ExecutionEvent::LayerStarted {
                    layer: k,
                    task_count: runnable.len(),
                    concurrency: width,
                })
                .await;

                let limiter = Semaphore::new(width);
                let drivers = runnable.into_iter().map(|task| {
                    let span = info_span!("task", task_id = %task.id, layer = k);
                    self.drive_task(run, task, &limiter).instrument(span)
                });
                futures::future::join_all(drivers).await;
                self.resources.release(permits);
            }

            if run.cancel.is_cancelled() {
                break;
            }

            let (succeeded, failed, skipped) = {
                let mut session = run.session();
                session.transition_to(SessionState::LayerValidating(k))?;
                layer.iter().fold((0, 0, 0), |(ok, failed, skipped), id| {
                    match session.disposition(id) {
                        Some(TaskDisposition::Succeeded) => (ok + 1, failed, skipped),
                        Some(TaskDisposition::Failed) => (ok, failed + 1, skipped),
                        Some(TaskDisposition::Skipped | TaskDisposition::Aborted) => {
                            (ok, failed, skipped + 1)
                        }
                        _ => (ok, failed, skipped),
                    }
                })
            };
            info!(layer = k, succeeded, failed, skipped, "layer complete");
            run.emit(ExecutionEvent::LayerCompleted {
                layer: k,
                succeeded,
                failed,
                skipped,
            })
            .await;
        }

        Ok(())
    }

    /// Drive one task through attempts until it reaches a final disposition.
    async fn drive_task(&self, run: &Run<'_>, original: Arc<CompleteTask>, limiter: &Semaphore) {
        let task_id = original.id.clone();
        let mut task = original;
        let mut status = TrackedStatus::Queued;
        let (mut retries, mut requeues, mut attempt) = (0u32, 0u32, 0u32);

        loop {
            let permit = tokio::select! {
                permit = limiter.acquire() => permit.ok(),
                () = run.cancel.cancelled() => None,
            };
            let Some(permit) = permit.filter(|_| !run.cancel.is_cancelled()) else {
                run.abort_unstarted(&task_id, status, "session aborted before the task started")
                    .await;
                return;
            };

            attempt += 1;
            run.session().mark_running(&task_id);
            run.notify(&task_id, Some(status), TrackedStatus::Running, None);
            status = TrackedStatus::Running;
            run.emit(ExecutionEvent::TaskStarted {
                task_id: task_id.clone(),
                attempt,
            })
            .await;

            let mut result = self.attempt(Arc::clone(&task), attempt, run.cancel.clone()).await;
            drop(permit);

            if result.is_success() {
                self.complete(run, &task, result).await;
                return;
            }

            let failure = result
                .failure
                .clone()
                .unwrap_or_else(|| TaskFailure::new(FailureKind::ToolFatal, "attempt failed without a reason"));

            if failure.kind == FailureKind::Cancelled {
                let reason = failure.reason();
                if run.session().mark_aborted(&task_id, reason.clone(), Some(result)) {
                    run.notify(&task_id, Some(status), TrackedStatus::Aborted, Some(reason));
                    run.finish(&task_id, TaskDisposition::Aborted).await;
                }
                return;
            }

            let class = RecoveryManager::classify(&failure).unwrap_or(ErrorClass::Fatal);
            let action = self.recovery.recover(&task_id, class, retries, requeues);

            match action {
                RecoveryAction::RetryWithFreshContext(n) | RecoveryAction::Requeue(n) => {
                    info!(attempt, %class, reason = %failure, ?action, "attempt failed, rerunning");
                    result.status = TaskStatus::Retried;
                    run.session().mark_retrying(&task_id, result, class);
                    run.notify(&task_id, Some(status), TrackedStatus::Retrying, Some(failure.reason()));
                    status = TrackedStatus::Retrying;
                    run.emit(ExecutionEvent::TaskRetrying {
                        task_id: task_id.clone(),
                        class,
                        action,
                    })
                    .await;

                    if let RecoveryAction::RetryWithFreshContext(_) = action {
                        retries = n;
                        tokio::select! {
                            () = tokio::time::sleep(self.recovery.backoff(n)) => {}
                            () = run.cancel.cancelled() => {}
                        }
                        task = self.fresh_task(&task);
                    } else {
                        requeues = n;
                    }
                }
                RecoveryAction::SkipDependents | RecoveryAction::Escalate => {
                    let escalated = action == RecoveryAction::Escalate;
                    if escalated {
                        error!(attempt, %class, reason = %failure, "task failed fatally");
                    } else {
                        warn!(attempt, %class, reason = %failure, "task failed");
                    }
                    run.session().mark_failed(&task_id, result, class, escalated);
                    run.notify(&task_id, Some(status), TrackedStatus::Failed, Some(failure.reason()));
                    run.finish(&task_id, TaskDisposition::Failed).await;
                    self.skip_dependents(run, &task_id).await;

                    if self.execution.failure_policy == FailurePolicy::FailFast {
                        warn!("fail-fast policy, aborting session");
                        run.cancel.cancel();
                    }
                    return;
                }
            }
        }
    }

    async fn complete(&self, run: &Run<'_>, task: &CompleteTask, result: TaskResult) {
        let proposal = commit_proposal(run.session_id, task, &result);
        info!(attempt = result.attempt, duration_ms = result.duration_ms, "task succeeded");
        run.session().mark_succeeded(&task.id, result);
        run.notify(&task.id, Some(TrackedStatus::Running), TrackedStatus::Done, None);
        if run.hub.propose(proposal) {
            run.proposals.fetch_add(1, Ordering::SeqCst);
        }
        run.finish(&task.id, TaskDisposition::Succeeded).await;
    }

    async fn skip_dependents(&self, run: &Run<'_>, failed_id: &str) {
        let reason = format!("dependency '{failed_id}' failed");
        for dependent in run.graph.dependents_closure(failed_id) {
            let skipped = run.session().mark_skipped(&dependent, reason.clone());
            if skipped {
                debug!(task_id = %dependent, %reason, "skipping dependent");
                run.notify(&dependent, Some(TrackedStatus::Queued), TrackedStatus::Skipped, Some(reason.clone()));
                run.finish(&dependent, TaskDisposition::Skipped).await;
            }
        }
    }

    fn fresh_task(&self, task: &Arc<CompleteTask>) -> Arc<CompleteTask> {
        let rebuilt = self
            .plan_context
            .as_ref()
            .and_then(|ctx| ctx.rebuild(&task.id))
            .unwrap_or_else(|| CompleteTask::clone(task));
        Arc::new(rebuilt)
    }

    /// One isolated attempt: worker under timeout, then the quality gates.
    async fn attempt(&self, task: Arc<CompleteTask>, attempt: u32, cancel: CancellationToken) -> TaskResult {
        let started_at = Utc::now();
        let task_id = task.id.clone();
        let limit = task.max_duration();
        let worker = Worker::new(self.bindings.clone(), Arc::clone(&task), attempt);
        let gates = Arc::clone(&self.gates);

        let handle = tokio::spawn(
            async move {
                let mut result = timeout(limit, worker.execute(cancel)).await.ok()?;
                if result.is_success() {
                    let requirements = &task.quality_requirements;
                    result.gate_outcomes = gates.validate(&result, requirements).await;
                    if !all_passed(&result.gate_outcomes, requirements) {
                        result.status = TaskStatus::Failed;
                        result.failure = Some(gate_failure(&result));
                    }
                }
                Some(result)
            }
            .in_current_span(),
        );

        match handle.await {
            Ok(Some(result)) => result,
            Ok(None) => {
                warn!(attempt, limit_secs = limit.as_secs(), "attempt timed out");
                TaskResult::failed(
                    task_id,
                    attempt,
                    started_at,
                    TaskFailure::new(
                        FailureKind::Timeout,
                        format!("exceeded max duration of {}s", limit.as_secs()),
                    ),
                )
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(attempt, panic = %message, "worker panicked");
                TaskResult::failed(
                    task_id,
                    attempt,
                    started_at,
                    TaskFailure::new(FailureKind::Panic, format!("worker panicked: {message}")),
                )
            }
            Err(e) => TaskResult::failed(
                task_id,
                attempt,
                started_at,
                TaskFailure::new(FailureKind::ToolFatal, format!("worker task ended: {e}")),
            ),
        }
    }
}

fn gate_failure(result: &TaskResult) -> TaskFailure {
    let failed: Vec<String> = result
        .gate_outcomes
        .iter()
        .filter(|o| !o.passed)
        .map(|o| match &o.remediation {
            Some(remediation) => format!("{} ({remediation})", o.gate),
            None => o.gate.to_string(),
        })
        .collect();
    TaskFailure::new(
        FailureKind::QualityGate,
        format!("quality gates failed: {}", failed.join("; ")),
    )
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "unknown panic".to_string(), |s| (*s).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::toolchains::{ScriptedBehavior, ScriptedFailure, ScriptedToolchain};
    use crate::domain::models::{
        EmbeddedContext, FileTarget, QualityGateRequirements, TddPhase, TestSpecification,
    };

    fn task(id: &str, deps: &[&str]) -> CompleteTask {
        CompleteTask {
            id: id.to_string(),
            title: format!("Task {id}"),
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
            embedded_context: EmbeddedContext {
                file_targets: vec![FileTarget {
                    path: format!("src/{id}.rs"),
                    action: Default::default(),
                }],
                ..Default::default()
            },
            test_specification: TestSpecification {
                test_file: format!("tests/{id}.rs"),
                framework: None,
                required_cases: vec!["works".to_string()],
                coverage_threshold: None,
            },
            quality_requirements: QualityGateRequirements::default(),
            acceptance_criteria: vec!["done".to_string()],
            estimated_duration_secs: 60,
            max_duration_secs: 30,
            priority: 50,
        }
    }

    fn orchestrator(toolchain: Arc<ScriptedToolchain>, capacity: usize) -> Orchestrator {
        let resources = ResourceManager::new(capacity, 0.9, Duration::from_secs(30));
        Orchestrator::new(ToolBindings::new(toolchain, "."), resources).with_execution_config(
            ExecutionConfig {
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                ..Default::default()
            },
        )
    }

    fn graph(tasks: Vec<CompleteTask>) -> ExecutionGraph {
        DependencyAnalyzer::new().analyze(tasks).unwrap()
    }

    #[tokio::test]
    async fn test_all_tasks_succeed() {
        let toolchain = Arc::new(ScriptedToolchain::new());
        let graph = graph(vec![task("a", &[]), task("b", &["a"]), task("c", &["a"])]);
        let report = orchestrator(toolchain, 4).run(&graph).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.final_state, FinalState::Completed);
        assert_eq!(report.metrics.succeeded, 3);
        assert!(report.tasks.iter().all(|t| t.gate_outcomes.len() == 4));
    }

    #[tokio::test]
    async fn test_transient_failure_retried_with_fresh_context() {
        let toolchain = Arc::new(ScriptedToolchain::new());
        toolchain
            .set_behavior(
                "a",
                ScriptedBehavior::failing(TddPhase::Green, ScriptedFailure::Transient("flaky".into()))
                    .on_first_attempts(2),
            )
            .await;
        let report = orchestrator(toolchain, 2).run(&graph(vec![task("a", &[])])).await.unwrap();

        let outcome = report.outcome("a").unwrap();
        assert_eq!(outcome.disposition, TaskDisposition::Succeeded);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fail_task() {
        let toolchain = Arc::new(ScriptedToolchain::new());
        toolchain
            .set_behavior(
                "a",
                ScriptedBehavior::failing(TddPhase::Red, ScriptedFailure::Transient("flaky".into())),
            )
            .await;
        let report = orchestrator(toolchain, 2)
            .run(&graph(vec![task("a", &[]), task("b", &["a"])]))
            .await
            .unwrap();

        let a = report.outcome("a").unwrap();
        assert_eq!(a.disposition, TaskDisposition::Failed);
        assert_eq!(a.attempts, 3);
        assert_eq!(a.error_class, Some(ErrorClass::Retryable));
        let b = report.outcome("b").unwrap();
        assert_eq!(b.disposition, TaskDisposition::Skipped);
        assert_eq!(b.reason.as_deref(), Some("dependency 'a' failed"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let toolchain = Arc::new(ScriptedToolchain::new());
        toolchain
            .set_behavior("a", ScriptedBehavior::failing(TddPhase::Green, ScriptedFailure::Panic))
            .await;
        let report = orchestrator(toolchain, 4)
            .run(&graph(vec![task("a", &[]), task("b", &[])]))
            .await
            .unwrap();

        let a = report.outcome("a").unwrap();
        assert_eq!(a.disposition, TaskDisposition::Failed);
        assert_eq!(a.error_class, Some(ErrorClass::Fatal));
        assert!(a.escalated);
        assert!(a.reason.as_deref().unwrap().contains("panicked"));
        assert_eq!(report.outcome("b").unwrap().disposition, TaskDisposition::Succeeded);
    }

    #[tokio::test]
    async fn test_gate_failure_is_not_retried() {
        let toolchain = Arc::new(ScriptedToolchain::new());
        toolchain
            .set_behavior("a", ScriptedBehavior::success().with_coverage(Some(42.0)))
            .await;
        let report = orchestrator(toolchain, 1).run(&graph(vec![task("a", &[])])).await.unwrap();

        let a = report.outcome("a").unwrap();
        assert_eq!(a.disposition, TaskDisposition::Failed);
        assert_eq!(a.attempts, 1);
        assert_eq!(a.error_class, Some(ErrorClass::Quality));
        assert!(a.reason.as_deref().unwrap().contains("coverage"));
        let coverage = a.gate_outcomes.iter().find(|o| o.gate == crate::domain::models::GateKind::Coverage);
        assert!(!coverage.unwrap().passed);
    }

    #[tokio::test]
    async fn test_empty_graph_completes() {
        let report = orchestrator(Arc::new(ScriptedToolchain::new()), 2)
            .run(&graph(vec![]))
            .await
            .unwrap();
        assert_eq!(report.final_state, FinalState::Completed);
        assert_eq!(report.metrics.total, 0);
    }

    #[tokio::test]
    async fn test_events_follow_layers() {
        let toolchain = Arc::new(ScriptedToolchain::new());
        let graph = graph(vec![task("a", &[]), task("b", &["a"])]);
        let (tx, mut rx) = mpsc::channel(64);
        let report = orchestrator(toolchain, 2).run_with_events(&graph, tx).await.unwrap();
        assert!(report.is_success());

        let mut layers_started = Vec::new();
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                ExecutionEvent::LayerStarted { layer, .. } => layers_started.push(layer),
                ExecutionEvent::Completed { final_state } => {
                    completed = final_state == FinalState::Completed;
                }
                _ => {}
            }
        }
        assert_eq!(layers_started, vec![0, 1]);
        assert!(completed);
    }

    #[tokio::test]
    async fn test_preview_does_not_execute() {
        let toolchain = Arc::new(ScriptedToolchain::new());
        let graph = graph(vec![task("a", &[]), task("b", &[]), task("c", &["a", "b"])]);
        let orchestrator = orchestrator(toolchain.clone(), 1);
        let preview = orchestrator.preview(&graph);

        assert_eq!(preview.layer_concurrency, vec![1, 1]);
        assert_eq!(preview.estimated_wall_secs, 180);
        assert_eq!(preview.critical_path.tasks.len(), 2);
        assert!(toolchain.calls().await.is_empty());
    }

    #[test]
    fn test_preview_layer_estimate_is_bounded_by_slowest_task() {
        let mut slow = task("slow", &[]);
        slow.estimated_duration_secs = 100;
        let mut quick = task("quick", &[]);
        quick.estimated_duration_secs = 10;
        let mut brief = task("brief", &[]);
        brief.estimated_duration_secs = 10;
        let mut bulk: Vec<CompleteTask> = (0..4)
            .map(|i| {
                let mut t = task(&format!("bulk{i}"), &["slow"]);
                t.estimated_duration_secs = 30;
                t
            })
            .collect();
        bulk.extend([slow, quick, brief]);
        let preview = orchestrator(Arc::new(ScriptedToolchain::new()), 2).preview(&graph(bulk));

        // Layer 0: the 100s task dominates the 120s of work over two workers.
        // Layer 1: 120s of work over two workers outlasts any single task.
        assert_eq!(preview.layer_concurrency, vec![2, 2]);
        assert_eq!(preview.estimated_wall_secs, 100 + 60);
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("boom".to_string())), "boom");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }
}
