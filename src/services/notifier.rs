//! Fire-and-forget delivery of task transitions and commit proposals.
//!
//! The orchestrator pushes notifications into a bounded channel and moves on.
//! A background dispatcher drains the channel and calls each sink with a
//! timeout. A slow, failing or saturated sink only ever produces a warning,
//! and closing the hub waits at most one grace period for the backlog.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::{CompleteTask, TaskResult};
use crate::domain::ports::{
    CommitProposal, SinkError, SourceControlSink, TaskTracker, TaskTransition,
};

/// Sinks a session notifies.
#[derive(Clone, Default)]
pub struct Sinks {
    pub trackers: Vec<Arc<dyn TaskTracker>>,
    pub committers: Vec<Arc<dyn SourceControlSink>>,
}

impl std::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sinks")
            .field("trackers", &self.trackers.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("committers", &self.committers.iter().map(|c| c.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Sinks {
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty() && self.committers.is_empty()
    }

    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<dyn TaskTracker>) -> Self {
        self.trackers.push(tracker);
        self
    }

    #[must_use]
    pub fn with_committer(mut self, committer: Arc<dyn SourceControlSink>) -> Self {
        self.committers.push(committer);
        self
    }
}

#[derive(Debug)]
enum Notification {
    Transition(TaskTransition),
    Commit(Box<CommitProposal>),
}

/// Handle to a running dispatcher.
#[derive(Debug)]
pub struct NotificationHub {
    sender: Option<mpsc::Sender<Notification>>,
    dispatcher: Option<JoinHandle<()>>,
    /// Queued but not yet handed to every sink.
    pending: Arc<AtomicUsize>,
    drain_grace: Duration,
}

impl NotificationHub {
    /// Start a dispatcher for `sinks`. Must be called inside a tokio runtime.
    pub fn start(sinks: Sinks, capacity: usize, sink_timeout: Duration) -> Self {
        if sinks.is_empty() {
            return Self::disabled();
        }
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let dispatcher = tokio::spawn(dispatch(receiver, sinks, sink_timeout, Arc::clone(&pending)));
        Self {
            sender: Some(sender),
            dispatcher: Some(dispatcher),
            pending,
            drain_grace: sink_timeout,
        }
    }

    /// A hub that drops everything.
    pub fn disabled() -> Self {
        Self {
            sender: None,
            dispatcher: None,
            pending: Arc::new(AtomicUsize::new(0)),
            drain_grace: Duration::ZERO,
        }
    }

    /// How long [`close`](Self::close) waits for the backlog. Defaults to the
    /// sink timeout.
    #[must_use]
    pub const fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Notifications queued but not yet delivered.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue a transition. Never waits.
    pub fn transition(&self, transition: TaskTransition) {
        self.enqueue(Notification::Transition(transition));
    }

    /// Queue a commit proposal. Never waits; false if it was dropped.
    pub fn propose(&self, proposal: CommitProposal) -> bool {
        self.enqueue(Notification::Commit(Box::new(proposal)))
    }

    fn enqueue(&self, notification: Notification) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        let sent = sender.try_send(notification);
        if sent.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        match sent {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(?dropped, "notification queue full, dropping notification");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("notification dispatcher stopped, dropping notification");
                false
            }
        }
    }

    /// Deliver what is already queued within the drain grace, then stop the
    /// dispatcher. Whatever is still undelivered is dropped with a warning.
    pub async fn close(mut self) {
        self.sender.take();
        let Some(mut dispatcher) = self.dispatcher.take() else {
            return;
        };
        match timeout(self.drain_grace, &mut dispatcher).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "notification dispatcher ended abnormally"),
            Err(_) => {
                dispatcher.abort();
                warn!(
                    undelivered = self.pending(),
                    grace_ms = u64::try_from(self.drain_grace.as_millis()).unwrap_or(u64::MAX),
                    "sinks did not drain in time, dropping remaining notifications"
                );
            }
        }
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<Notification>,
    sinks: Sinks,
    sink_timeout: Duration,
    pending: Arc<AtomicUsize>,
) {
    while let Some(notification) = receiver.recv().await {
        match notification {
            Notification::Transition(transition) => {
                for tracker in &sinks.trackers {
                    let outcome = timeout(sink_timeout, tracker.on_transition(&transition)).await;
                    report(tracker.name(), &transition.task_id, outcome);
                }
            }
            Notification::Commit(proposal) => {
                for committer in &sinks.committers {
                    let outcome = timeout(sink_timeout, committer.propose_commit(&proposal)).await;
                    report(committer.name(), &proposal.task_id, outcome);
                }
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }
    debug!("notification dispatcher drained");
}

fn report(
    sink: &str,
    task_id: &str,
    outcome: Result<Result<(), SinkError>, tokio::time::error::Elapsed>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(sink, task_id, error = %e, "sink rejected notification"),
        Err(_) => warn!(sink, task_id, "sink timed out"),
    }
}

/// Build the proposal an external committer applies for a successful task.
pub fn commit_proposal(session_id: Uuid, task: &CompleteTask, result: &TaskResult) -> CommitProposal {
    let metrics: BTreeMap<String, f64> = result
        .gate_outcomes
        .iter()
        .map(|o| (o.gate.to_string(), o.metric))
        .collect();

    let mut message = format!("{}\n\nTask: {}\n", task.title, task.id);
    if !task.acceptance_criteria.is_empty() {
        message.push_str("\nAcceptance criteria:\n");
        for criterion in &task.acceptance_criteria {
            let _ = writeln!(message, "- {criterion}");
        }
    }
    if !result.gate_outcomes.is_empty() {
        message.push_str("\nQuality gates:\n");
        for outcome in &result.gate_outcomes {
            let _ = match outcome.threshold {
                Some(threshold) => writeln!(
                    message,
                    "- {}: {:.2} (threshold {threshold:.2})",
                    outcome.gate, outcome.metric
                ),
                None => writeln!(message, "- {}: {:.2}", outcome.gate, outcome.metric),
            };
        }
    }

    let mut diff = String::new();
    for artifact in &result.artifacts {
        diff.push_str(&artifact.diff);
        if !diff.is_empty() && !diff.ends_with('\n') {
            diff.push('\n');
        }
    }

    CommitProposal {
        session_id,
        task_id: task.id.clone(),
        summary: task.title.clone(),
        message,
        diff,
        artifacts: result.artifacts.clone(),
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sinks::{RecordingCommitSink, RecordingTaskTracker};
    use crate::domain::ports::TrackedStatus;
    use async_trait::async_trait;
    use chrono::Utc;

    fn transition(task_id: &str, to: TrackedStatus) -> TaskTransition {
        TaskTransition {
            session_id: Uuid::nil(),
            task_id: task_id.to_string(),
            from: None,
            to,
            at: Utc::now(),
            detail: None,
        }
    }

    struct StuckTracker;

    #[async_trait]
    impl TaskTracker for StuckTracker {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn on_transition(&self, _transition: &TaskTransition) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    struct BrokenTracker;

    #[async_trait]
    impl TaskTracker for BrokenTracker {
        fn name(&self) -> &str {
            "broken"
        }

        async fn on_transition(&self, _transition: &TaskTransition) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("tracker offline".into()))
        }
    }

    #[tokio::test]
    async fn delivers_in_order_to_every_tracker() {
        let recorder = Arc::new(RecordingTaskTracker::new());
        let sinks = Sinks::default()
            .with_tracker(Arc::new(BrokenTracker))
            .with_tracker(recorder.clone());
        let hub = NotificationHub::start(sinks, 16, Duration::from_millis(100));

        hub.transition(transition("a", TrackedStatus::Queued));
        hub.transition(transition("a", TrackedStatus::Running));
        hub.transition(transition("a", TrackedStatus::Done));
        hub.close().await;

        let seen: Vec<TrackedStatus> = recorder.transitions().await.iter().map(|t| t.to).collect();
        assert_eq!(
            seen,
            vec![TrackedStatus::Queued, TrackedStatus::Running, TrackedStatus::Done]
        );
    }

    #[tokio::test]
    async fn stuck_sink_never_blocks_the_caller() {
        let sinks = Sinks::default().with_tracker(Arc::new(StuckTracker));
        let hub = NotificationHub::start(sinks, 2, Duration::from_millis(20));

        let started = std::time::Instant::now();
        for _ in 0..50 {
            hub.transition(transition("a", TrackedStatus::Running));
        }
        assert!(started.elapsed() < Duration::from_millis(50));

        tokio::time::timeout(Duration::from_secs(5), hub.close())
            .await
            .expect("close should finish once timeouts fire");
    }

    #[tokio::test]
    async fn close_gives_up_on_a_stuck_backlog() {
        let sinks = Sinks::default().with_tracker(Arc::new(StuckTracker));
        let hub = NotificationHub::start(sinks, 64, Duration::from_millis(200))
            .with_drain_grace(Duration::from_millis(50));
        for _ in 0..20 {
            hub.transition(transition("a", TrackedStatus::Running));
        }
        assert!(hub.pending() > 0);

        // Draining would take 20 sink timeouts.
        let started = std::time::Instant::now();
        hub.close().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn proposals_reach_committers() {
        let committer = Arc::new(RecordingCommitSink::new());
        let hub = NotificationHub::start(
            Sinks::default().with_committer(committer.clone()),
            4,
            Duration::from_millis(100),
        );
        let proposal = CommitProposal {
            session_id: Uuid::nil(),
            task_id: "a".into(),
            summary: "Add login".into(),
            message: "Add login".into(),
            diff: String::new(),
            artifacts: Vec::new(),
            metrics: BTreeMap::new(),
        };
        assert!(hub.propose(proposal));
        hub.close().await;
        assert_eq!(committer.proposals().await.len(), 1);
    }

    #[test]
    fn disabled_hub_drops_quietly() {
        let hub = NotificationHub::disabled();
        hub.transition(transition("a", TrackedStatus::Queued));
    }
}
