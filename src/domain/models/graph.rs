//! Layered execution graph produced by the dependency analyzer.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::task::{CompleteTask, TaskId};

/// Tasks partitioned into dependency layers.
///
/// Every dependency of a task in layer `k` lives in a layer `< k`, and a
/// task's layer is the length of the longest dependency chain leading to it.
/// The graph is read-only once built.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    layers: Vec<Vec<TaskId>>,
    tasks: BTreeMap<TaskId, Arc<CompleteTask>>,
    dependents: BTreeMap<TaskId, Vec<TaskId>>,
    layer_of: BTreeMap<TaskId, usize>,
}

impl ExecutionGraph {
    pub(crate) fn new(
        layers: Vec<Vec<TaskId>>,
        tasks: BTreeMap<TaskId, Arc<CompleteTask>>,
        dependents: BTreeMap<TaskId, Vec<TaskId>>,
    ) -> Self {
        let layer_of = layers
            .iter()
            .enumerate()
            .flat_map(|(idx, layer)| layer.iter().map(move |id| (id.clone(), idx)))
            .collect();
        Self {
            layers,
            tasks,
            dependents,
            layer_of,
        }
    }

    pub fn layers(&self) -> &[Vec<TaskId>] {
        &self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: &str) -> Option<&Arc<CompleteTask>> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Arc<CompleteTask>> {
        self.tasks.values()
    }

    pub fn layer_of(&self, id: &str) -> Option<usize> {
        self.layer_of.get(id).copied()
    }

    /// Tasks that list `id` as a direct dependency.
    pub fn direct_dependents(&self, id: &str) -> &[TaskId] {
        self.dependents.get(id).map_or(&[], Vec::as_slice)
    }

    /// Every task that transitively depends on `id`, ordered by layer then id.
    pub fn dependents_closure(&self, id: &str) -> Vec<TaskId> {
        let mut seen: BTreeSet<TaskId> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([id]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.direct_dependents(current) {
                if seen.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
        }

        let mut closure: Vec<TaskId> = seen.into_iter().collect();
        closure.sort_by_key(|t| (self.layer_of(t).unwrap_or(usize::MAX), t.clone()));
        closure
    }

    /// Estimated duration of each layer: the longest task it contains.
    pub fn estimated_layer_durations(&self) -> Vec<Duration> {
        self.layers
            .iter()
            .map(|layer| {
                layer
                    .iter()
                    .filter_map(|id| self.tasks.get(id))
                    .map(|t| t.estimated_duration())
                    .max()
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Sum of every task's estimate, i.e. a one-at-a-time run.
    pub fn estimated_sequential_duration(&self) -> Duration {
        self.tasks.values().map(|t| t.estimated_duration()).sum()
    }

    /// Layered estimate with unbounded concurrency.
    pub fn estimated_parallel_duration(&self) -> Duration {
        self.estimated_layer_durations().into_iter().sum()
    }

    /// Serializable summary of the layering.
    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            task_count: self.task_count(),
            layers: self.layers.clone(),
            estimated_sequential_secs: self.estimated_sequential_duration().as_secs(),
            estimated_parallel_secs: self.estimated_parallel_duration().as_secs(),
        }
    }
}

/// Layer summary used by the preview output.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GraphSummary {
    pub task_count: usize,
    pub layers: Vec<Vec<TaskId>>,
    pub estimated_sequential_secs: u64,
    pub estimated_parallel_secs: u64,
}

/// Two tasks in the same layer that touch the same file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileConflict {
    pub path: String,
    pub layer: usize,
    pub tasks: Vec<TaskId>,
}

/// Longest chain through the graph weighted by estimated duration.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CriticalPath {
    pub tasks: Vec<TaskId>,
    pub estimated_secs: u64,
}
