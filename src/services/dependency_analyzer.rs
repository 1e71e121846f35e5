use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{CompleteTask, CriticalPath, ExecutionGraph, FileConflict, TaskId};

/// Service for layering tasks by their dependencies and detecting cycles
#[derive(Debug, Clone, Default)]
pub struct DependencyAnalyzer;

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(node) {
        for &neighbor in neighbors {
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                // Cycle detected: keep only the looping part and close it
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

impl DependencyAnalyzer {
    pub const fn new() -> Self {
        Self
    }

    /// Partition tasks into dependency layers.
    ///
    /// Kahn's algorithm over the dependency edges; a task's layer is one more
    /// than the deepest of its dependencies, so it runs as early as its
    /// dependencies allow. Tasks within a layer are ordered by id.
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub fn analyze(&self, tasks: Vec<CompleteTask>) -> EngineResult<ExecutionGraph> {
        let mut by_id: BTreeMap<TaskId, Arc<CompleteTask>> = BTreeMap::new();
        for task in tasks {
            let id = task.id.clone();
            if by_id.insert(id.clone(), Arc::new(task)).is_some() {
                return Err(EngineError::DuplicateTask(id));
            }
        }

        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(by_id.len());
        let mut dependents: BTreeMap<TaskId, Vec<TaskId>> = BTreeMap::new();

        for (id, task) in &by_id {
            in_degree.entry(id.as_str()).or_insert(0);
            for dep in &task.dependencies {
                if !by_id.contains_key(dep) {
                    return Err(EngineError::UnknownDependency {
                        task_id: id.clone(),
                        dependency: dep.clone(),
                    });
                }
                dependents.entry(dep.clone()).or_default().push(id.clone());
                *in_degree.entry(id.as_str()).or_insert(0) += 1;
            }
        }
        for list in dependents.values_mut() {
            list.sort();
        }

        // Roots in id order keep the traversal deterministic.
        let mut queue: VecDeque<&str> = by_id
            .keys()
            .filter(|id| in_degree.get(id.as_str()) == Some(&0))
            .map(String::as_str)
            .collect();
        let mut layer_of: HashMap<&str, usize> = HashMap::with_capacity(by_id.len());
        let mut processed = 0usize;

        while let Some(node) = queue.pop_front() {
            processed += 1;
            let node_layer = *layer_of.entry(node).or_insert(0);

            if let Some(children) = dependents.get(node) {
                for child in children {
                    let child_layer = layer_of.entry(child.as_str()).or_insert(0);
                    *child_layer = (*child_layer).max(node_layer + 1);

                    if let Some(degree) = in_degree.get_mut(child.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(child.as_str());
                        }
                    }
                }
            }
        }

        if processed != by_id.len() {
            let remaining: HashSet<&str> = in_degree
                .iter()
                .filter(|&(_, &degree)| degree > 0)
                .map(|(&id, _)| id)
                .collect();
            let cycle = find_cycle(&by_id, &remaining);
            return Err(EngineError::CyclicDependency(cycle));
        }

        let layer_count = layer_of.values().copied().max().map_or(0, |max| max + 1);
        let mut layers: Vec<Vec<TaskId>> = vec![Vec::new(); layer_count];
        for (id, layer) in &layer_of {
            layers[*layer].push((*id).to_string());
        }
        for layer in &mut layers {
            layer.sort();
        }

        debug!(
            layers = layers.len(),
            widest = layers.iter().map(Vec::len).max().unwrap_or(0),
            "dependency analysis complete"
        );

        Ok(ExecutionGraph::new(layers, by_id, dependents))
    }

    /// Detect a dependency cycle without building a graph.
    pub fn detect_cycle(&self, tasks: &[CompleteTask]) -> Option<Vec<TaskId>> {
        let by_id: BTreeMap<TaskId, Arc<CompleteTask>> = tasks
            .iter()
            .map(|t| (t.id.clone(), Arc::new(t.clone())))
            .collect();
        let all: HashSet<&str> = by_id.keys().map(String::as_str).collect();
        let cycle = find_cycle(&by_id, &all);
        (!cycle.is_empty()).then_some(cycle)
    }

    /// Tasks in the same layer that write the same file.
    pub fn file_conflicts(&self, graph: &ExecutionGraph) -> Vec<FileConflict> {
        let mut conflicts = Vec::new();

        for (layer_idx, layer) in graph.layers().iter().enumerate() {
            let mut writers: BTreeMap<&str, Vec<TaskId>> = BTreeMap::new();
            for task in layer.iter().filter_map(|id| graph.task(id)) {
                for target in &task.embedded_context.file_targets {
                    writers.entry(target.path.as_str()).or_default().push(task.id.clone());
                }
            }
            conflicts.extend(
                writers
                    .into_iter()
                    .filter(|(_, tasks)| tasks.len() > 1)
                    .map(|(path, tasks)| FileConflict {
                        path: path.to_string(),
                        layer: layer_idx,
                        tasks,
                    }),
            );
        }

        conflicts
    }

    /// Longest chain through the graph, weighted by estimated duration.
    pub fn critical_path(&self, graph: &ExecutionGraph) -> CriticalPath {
        let mut best: HashMap<&str, (u64, Option<&str>)> = HashMap::with_capacity(graph.task_count());

        // Layers are a valid topological order.
        for id in graph.layers().iter().flatten() {
            let Some(task) = graph.task(id) else { continue };
            let upstream = task
                .dependencies
                .iter()
                .filter_map(|dep| best.get(dep.as_str()).map(|(cost, _)| (*cost, dep.as_str())))
                .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)));
            let (base, prev) = upstream.map_or((0, None), |(cost, dep)| (cost, Some(dep)));
            best.insert(id.as_str(), (base + task.estimated_duration_secs, prev));
        }

        let end = best
            .iter()
            .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.0.cmp(a.0)))
            .map(|(id, (cost, _))| (*id, *cost));

        let Some((end, estimated_secs)) = end else {
            return CriticalPath {
                tasks: Vec::new(),
                estimated_secs: 0,
            };
        };

        let mut tasks = vec![end.to_string()];
        let mut cursor = best.get(end).and_then(|(_, prev)| *prev);
        while let Some(id) = cursor {
            tasks.push(id.to_string());
            cursor = best.get(id).and_then(|(_, prev)| *prev);
        }
        tasks.reverse();

        CriticalPath {
            tasks,
            estimated_secs,
        }
    }
}

/// DFS over dependency edges restricted to `nodes`; returns `[a, .., a]`.
fn find_cycle(by_id: &BTreeMap<TaskId, Arc<CompleteTask>>, nodes: &HashSet<&str>) -> Vec<TaskId> {
    let graph: HashMap<&str, Vec<&str>> = by_id
        .iter()
        .filter(|(id, _)| nodes.contains(id.as_str()))
        .map(|(id, task)| {
            let deps = task
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|dep| nodes.contains(dep))
                .collect();
            (id.as_str(), deps)
        })
        .collect();

    let mut starts: Vec<&str> = graph.keys().copied().collect();
    starts.sort_unstable();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for start in starts {
        if !visited.contains(start)
            && detect_cycle_util(start, &graph, &mut visited, &mut rec_stack, &mut path)
        {
            // Dependency edges point backwards; flip to read in execution order.
            path.reverse();
            return path.into_iter().map(str::to_string).collect();
        }
    }

    Vec::new()
}
