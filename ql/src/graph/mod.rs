//! Task graph construction and validation
//!
//! The graph is an arena of task nodes plus adjacency lists over dense
//! integer indices; string task ids are indirected through a lookup
//! table. Built once by [`GraphBuilder::build`], immutable afterwards -
//! during execution only task *statuses* change, and those live in the
//! executor's own table.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::domain::Task;

/// Dense node index into the graph arena
pub type NodeIdx = usize;

/// Graph construction failures; fatal to the run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A dependency cycle, reported as the closed path that was found
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("task '{id}' depends on unknown task '{dependency}'")]
    UnknownDependency { id: String, dependency: String },

    #[error("duplicate task id '{id}'")]
    DuplicateId { id: String },

    #[error("graph has no tasks")]
    Empty,
}

/// An immutable DAG of tasks with a precomputed deterministic order
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<String, NodeIdx>,
    /// idx → indices of tasks that depend on it
    dependents: Vec<Vec<NodeIdx>>,
    /// idx → indices of its dependencies
    dependencies: Vec<Vec<NodeIdx>>,
    /// Execution order (dependencies first)
    topo_order: Vec<NodeIdx>,
    /// idx → its position in `topo_order`
    topo_pos: Vec<usize>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, idx: NodeIdx) -> &Task {
        &self.tasks[idx]
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn node(&self, id: &str) -> Option<NodeIdx> {
        self.index.get(id).copied()
    }

    pub fn dependencies_of(&self, idx: NodeIdx) -> &[NodeIdx] {
        &self.dependencies[idx]
    }

    pub fn dependents_of(&self, idx: NodeIdx) -> &[NodeIdx] {
        &self.dependents[idx]
    }

    /// Deterministic execution order (dependencies first)
    pub fn topo_order(&self) -> &[NodeIdx] {
        &self.topo_order
    }

    /// Position of a node in the execution order
    pub fn topo_position(&self, idx: NodeIdx) -> usize {
        self.topo_pos[idx]
    }

    /// All (dependency, dependent) edges
    pub fn edges(&self) -> impl Iterator<Item = (NodeIdx, NodeIdx)> + '_ {
        self.dependents
            .iter()
            .enumerate()
            .flat_map(|(from, tos)| tos.iter().map(move |&to| (from, to)))
    }
}

/// Compiles a task list into a validated [`TaskGraph`]
pub struct GraphBuilder;

impl GraphBuilder {
    /// Build the graph, rejecting unknown dependencies and cycles
    pub fn build(tasks: Vec<Task>) -> Result<TaskGraph, GraphError> {
        debug!(task_count = tasks.len(), "GraphBuilder::build: called");
        if tasks.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index: HashMap<String, NodeIdx> = HashMap::with_capacity(tasks.len());
        for (idx, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), idx).is_some() {
                return Err(GraphError::DuplicateId { id: task.id.clone() });
            }
        }

        let mut dependencies: Vec<Vec<NodeIdx>> = vec![Vec::new(); tasks.len()];
        let mut dependents: Vec<Vec<NodeIdx>> = vec![Vec::new(); tasks.len()];
        for (idx, task) in tasks.iter().enumerate() {
            for dep_id in &task.dependencies {
                let dep_idx = *index.get(dep_id).ok_or_else(|| GraphError::UnknownDependency {
                    id: task.id.clone(),
                    dependency: dep_id.clone(),
                })?;
                dependencies[idx].push(dep_idx);
                dependents[dep_idx].push(idx);
            }
        }

        detect_cycle(&tasks, &dependencies)?;
        let topo_order = topological_order(&tasks, &dependencies, &dependents);

        let mut topo_pos = vec![0usize; tasks.len()];
        for (pos, &idx) in topo_order.iter().enumerate() {
            topo_pos[idx] = pos;
        }

        info!(task_count = tasks.len(), "Built task graph");
        Ok(TaskGraph {
            tasks,
            index,
            dependents,
            dependencies,
            topo_order,
            topo_pos,
        })
    }
}

/// DFS node coloring
#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Depth-first cycle detection with white/grey/black coloring
///
/// A grey→grey edge is a back edge; the reported path is the closed walk
/// from the first occurrence of the re-visited node.
fn detect_cycle(tasks: &[Task], dependencies: &[Vec<NodeIdx>]) -> Result<(), GraphError> {
    let mut colors = vec![Color::White; tasks.len()];
    let mut stack: Vec<NodeIdx> = Vec::new();

    for start in 0..tasks.len() {
        if colors[start] == Color::White
            && let Some(path) = visit(start, tasks, dependencies, &mut colors, &mut stack)
        {
            debug!(?path, "detect_cycle: cycle found");
            return Err(GraphError::Cycle { path });
        }
    }
    Ok(())
}

fn visit(
    node: NodeIdx,
    tasks: &[Task],
    dependencies: &[Vec<NodeIdx>],
    colors: &mut [Color],
    stack: &mut Vec<NodeIdx>,
) -> Option<Vec<String>> {
    colors[node] = Color::Grey;
    stack.push(node);

    for &dep in &dependencies[node] {
        match colors[dep] {
            Color::Grey => {
                // Close the walk at the first occurrence of `dep`
                let from = stack.iter().position(|&n| n == dep).unwrap_or(0);
                let mut path: Vec<String> = stack[from..].iter().map(|&n| tasks[n].id.clone()).collect();
                path.push(tasks[dep].id.clone());
                return Some(path);
            }
            Color::White => {
                if let Some(path) = visit(dep, tasks, dependencies, colors, stack) {
                    return Some(path);
                }
            }
            Color::Black => {}
        }
    }

    stack.pop();
    colors[node] = Color::Black;
    None
}

/// Kahn's algorithm with a deterministic ready ordering:
/// priority desc, then creation timestamp asc, then id asc.
fn topological_order(tasks: &[Task], dependencies: &[Vec<NodeIdx>], dependents: &[Vec<NodeIdx>]) -> Vec<NodeIdx> {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    #[derive(PartialEq, Eq)]
    struct ReadyKey {
        priority: crate::domain::Priority,
        created_at: Reverse<chrono::DateTime<chrono::Utc>>,
        id: Reverse<String>,
        idx: NodeIdx,
    }

    impl Ord for ReadyKey {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            (self.priority, &self.created_at, &self.id)
                .cmp(&(other.priority, &other.created_at, &other.id))
        }
    }

    impl PartialOrd for ReadyKey {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }

    let key = |idx: NodeIdx| ReadyKey {
        priority: tasks[idx].priority,
        created_at: Reverse(tasks[idx].created_at),
        id: Reverse(tasks[idx].id.clone()),
        idx,
    };

    let mut remaining: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut heap: BinaryHeap<ReadyKey> = (0..tasks.len()).filter(|&i| remaining[i] == 0).map(&key).collect();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(ReadyKey { idx, .. }) = heap.pop() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                heap.push(key(dependent));
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TaskType};

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::with_id(id, TaskType::Codegen, format!("task {}", id))
            .with_dependencies(deps.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_build_chain() {
        let graph = GraphBuilder::build(vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t2"])]).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependents_of(graph.node("t1").unwrap()), &[1]);
        let order: Vec<&str> = graph.topo_order().iter().map(|&i| graph.task(i).id.as_str()).collect();
        assert_eq!(order, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_cycle_reports_path() {
        let err = GraphBuilder::build(vec![task("t1", &["t2"]), task("t2", &["t1"])]).unwrap_err();
        match err {
            GraphError::Cycle { path } => {
                assert_eq!(path, vec!["t1", "t2", "t1"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_cycle() {
        let err = GraphBuilder::build(vec![task("t1", &["t1"])]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { path } if path == vec!["t1", "t1"]));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = GraphBuilder::build(vec![task("t1", &["ghost"])]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { dependency, .. } if dependency == "ghost"));
    }

    #[test]
    fn test_duplicate_id() {
        let err = GraphBuilder::build(vec![task("t1", &[]), task("t1", &[])]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateId { id } if id == "t1"));
    }

    #[test]
    fn test_empty() {
        assert!(matches!(GraphBuilder::build(vec![]).unwrap_err(), GraphError::Empty));
    }

    #[test]
    fn test_diamond_order_respects_edges() {
        let graph = GraphBuilder::build(vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ])
        .unwrap();

        let pos = |id: &str| graph.topo_position(graph.node(id).unwrap());
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn test_priority_breaks_ties() {
        let low = task("zzz", &[]).with_priority(Priority::Low);
        let high = task("aaa", &[]).with_priority(Priority::High);
        let medium = task("mmm", &[]).with_priority(Priority::Medium);

        let graph = GraphBuilder::build(vec![low, high, medium]).unwrap();
        let order: Vec<&str> = graph.topo_order().iter().map(|&i| graph.task(i).id.as_str()).collect();
        assert_eq!(order, vec!["aaa", "mmm", "zzz"]);
    }

    #[test]
    fn test_id_breaks_final_ties() {
        let mut t_b = task("bbb", &[]);
        let mut t_a = task("aaa", &[]);
        // Equal priority and creation time force the id tiebreak
        let now = chrono::Utc::now();
        t_b.created_at = now;
        t_a.created_at = now;

        let graph = GraphBuilder::build(vec![t_b, t_a]).unwrap();
        let order: Vec<&str> = graph.topo_order().iter().map(|&i| graph.task(i).id.as_str()).collect();
        assert_eq!(order, vec!["aaa", "bbb"]);
    }

    #[test]
    fn test_edges_iterator() {
        let graph = GraphBuilder::build(vec![task("t1", &[]), task("t2", &["t1"])]).unwrap();
        let edges: Vec<(usize, usize)> = graph.edges().collect();
        assert_eq!(edges, vec![(0, 1)]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Random DAGs: each task may depend on any earlier task
        fn arb_tasks() -> impl Strategy<Value = Vec<Task>> {
            proptest::collection::vec(proptest::collection::vec(any::<bool>(), 0..8), 1..12).prop_map(|rows| {
                rows.iter()
                    .enumerate()
                    .map(|(i, row)| {
                        let deps: Vec<String> = row
                            .iter()
                            .enumerate()
                            .filter(|&(j, &on)| on && j < i)
                            .map(|(j, _)| format!("t{}", j))
                            .collect();
                        task(&format!("t{}", i), &deps.iter().map(String::as_str).collect::<Vec<_>>())
                    })
                    .collect()
            })
        }

        proptest! {
            /// Every built graph is acyclic and its order respects all edges
            #[test]
            fn prop_topo_order_respects_edges(tasks in arb_tasks()) {
                let graph = GraphBuilder::build(tasks).unwrap();
                for (dep, dependent) in graph.edges() {
                    prop_assert!(graph.topo_position(dep) < graph.topo_position(dependent));
                }
            }

            /// DFS from the built graph finds no back edge
            #[test]
            fn prop_no_back_edges(tasks in arb_tasks()) {
                let graph = GraphBuilder::build(tasks).unwrap();
                // A topological order existing for all nodes is equivalent
                // to acyclicity; verify the order covers every node.
                prop_assert_eq!(graph.topo_order().len(), graph.len());
            }
        }
    }
}
