//! Task registry and dependency graph validation.
//!
//! Tasks may reference dependencies that are registered later; references
//! are checked by [`TaskRegistry::validate`] and whenever a plan is built.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use assetforge_shared::{ForgeError, Result};

use crate::task::{Task, TaskAction};

/// Holds every task known to a build, keyed by id.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, Arc<Task>>,
}

/// Tasks selected for one run, in dependency order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Topological order: every task appears after its in-plan dependencies.
    pub order: Vec<String>,
    /// In-plan dependencies of each task.
    pub deps: BTreeMap<String, Vec<String>>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.deps.contains_key(id)
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task from its parts.
    pub fn register<I, S>(
        &mut self,
        id: impl Into<String>,
        depends_on: I,
        action: impl TaskAction + 'static,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(Task::new(id, action).depends_on(depends_on))
    }

    /// Register a fully built task. Fails with `DuplicateTask` on id reuse.
    pub fn insert(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(task.id()) {
            return Err(ForgeError::DuplicateTask {
                id: task.id().to_string(),
            });
        }
        debug!(task = task.id(), deps = ?task.dependencies(), "registered task");
        self.tasks.insert(task.id().to_string(), Arc::new(task));
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<Task>> {
        self.tasks
            .get(id)
            .cloned()
            .ok_or_else(|| ForgeError::TaskNotFound { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.values()
    }

    /// Check every dependency reference and reject cycles anywhere in the registry.
    pub fn validate(&self) -> Result<()> {
        let all: BTreeSet<String> = self.tasks.keys().cloned().collect();
        self.order(&all).map(|_| ())
    }

    /// The transitive dependency closure of `targets`, in execution order.
    pub fn plan(&self, targets: &[&str]) -> Result<Plan> {
        let mut selected = BTreeSet::new();
        let mut stack: Vec<String> = Vec::new();

        for target in targets {
            self.resolve(target)?;
            stack.push((*target).to_string());
        }

        while let Some(id) = stack.pop() {
            if !selected.insert(id.clone()) {
                continue;
            }
            let task = self.resolve(&id)?;
            for dep in task.dependencies() {
                if !self.tasks.contains_key(dep) {
                    return Err(ForgeError::UnknownDependency {
                        task: id.clone(),
                        dependency: dep.clone(),
                    });
                }
                stack.push(dep.clone());
            }
        }

        self.order(&selected)
    }

    /// Exactly `ids`, ordered by the dependencies among them.
    ///
    /// Dependencies outside the set are treated as already satisfied.
    pub fn plan_subset(&self, ids: &BTreeSet<String>) -> Result<Plan> {
        for id in ids {
            self.resolve(id)?;
        }
        self.order(ids)
    }

    /// `seeds` plus every task that transitively depends on one of them.
    pub fn dependents_closure<'a, I>(&self, seeds: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in self.tasks.values() {
            for dep in task.dependencies() {
                dependents.entry(dep.as_str()).or_default().push(task.id());
            }
        }

        let mut closure = BTreeSet::new();
        let mut queue: VecDeque<&str> = seeds
            .into_iter()
            .filter(|id| self.tasks.contains_key(*id))
            .collect();

        while let Some(id) = queue.pop_front() {
            if closure.insert(id.to_string()) {
                if let Some(next) = dependents.get(id) {
                    queue.extend(next.iter().copied());
                }
            }
        }

        closure
    }

    /// Topologically order `selected`, considering only edges inside it.
    fn order(&self, selected: &BTreeSet<String>) -> Result<Plan> {
        // Edges point from a task to its dependency, so a cycle reads in
        // declaration order: a -> b -> a means "a depends on b depends on a".
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

        for id in selected {
            nodes.insert(id.as_str(), graph.add_node(id.clone()));
        }

        let mut deps: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for id in selected {
            let task = self.resolve(id)?;
            let mut in_plan = Vec::new();
            for dep in task.dependencies() {
                if !self.tasks.contains_key(dep) {
                    return Err(ForgeError::UnknownDependency {
                        task: id.clone(),
                        dependency: dep.clone(),
                    });
                }
                if let Some(&dep_idx) = nodes.get(dep.as_str()) {
                    graph.add_edge(nodes[id.as_str()], dep_idx, ());
                    in_plan.push(dep.clone());
                }
            }
            deps.insert(id.clone(), in_plan);
        }

        let sorted = toposort(&graph, None).map_err(|cycle| ForgeError::CyclicDependency {
            cycle: cycle_through(&graph, cycle.node_id()),
        })?;

        // toposort yields dependents first; execution wants dependencies first.
        let order = sorted.into_iter().rev().map(|idx| graph[idx].clone()).collect();

        Ok(Plan { order, deps })
    }
}

/// Shortest cycle through `start`, as ids, starting and ending at `start`.
fn cycle_through(graph: &DiGraph<String, ()>, start: NodeIndex) -> Vec<String> {
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut seen: HashSet<NodeIndex> = HashSet::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            if next == start {
                let mut path = vec![node];
                let mut cur = node;
                while cur != start {
                    cur = parent[&cur];
                    path.push(cur);
                }
                path.reverse();
                path.push(start);
                return path.into_iter().map(|idx| graph[idx].clone()).collect();
            }
            if seen.insert(next) {
                parent.insert(next, node);
                queue.push_back(next);
            }
        }
    }

    vec![graph[start].clone()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskContext, TaskReport};

    async fn noop(_cx: TaskContext) -> Result<TaskReport> {
        Ok(TaskReport::default())
    }

    fn registry(edges: &[(&str, &[&str])]) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for (id, deps) in edges {
            registry.register(*id, deps.iter().copied(), noop).unwrap();
        }
        registry
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = registry(&[("a", &[])]);
        let err = registry.register("a", Vec::<String>::new(), noop).unwrap_err();
        assert!(matches!(err, ForgeError::DuplicateTask { id } if id == "a"));
    }

    #[test]
    fn forward_references_resolve_at_validation() {
        let mut registry = TaskRegistry::new();
        registry.register("b", ["a"], noop).unwrap();
        assert!(matches!(
            registry.validate(),
            Err(ForgeError::UnknownDependency { .. })
        ));

        registry.register("a", Vec::<String>::new(), noop).unwrap();
        registry.validate().unwrap();
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let registry = registry(&[("b", &["ghost"])]);
        match registry.plan(&["b"]) {
            Err(ForgeError::UnknownDependency { task, dependency }) => {
                assert_eq!(task, "b");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn resolve_missing_task() {
        let registry = registry(&[("a", &[])]);
        assert!(matches!(
            registry.resolve("zzz"),
            Err(ForgeError::TaskNotFound { id }) if id == "zzz"
        ));
        assert!(registry.plan(&["zzz"]).is_err());
    }

    #[test]
    fn plan_is_transitive_closure_in_order() {
        let registry = registry(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ]);

        let plan = registry.plan(&["b"]).unwrap();
        assert_eq!(plan.order, vec!["a", "b"]);
        assert!(!plan.contains("c"));

        let plan = registry.plan(&["d"]).unwrap();
        assert_eq!(plan.len(), 4);
        let pos = |id: &str| plan.order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let registry = registry(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"]), ("d", &[])]);
        match registry.plan(&["a"]) {
            Err(ForgeError::CyclicDependency { cycle }) => {
                assert_eq!(cycle.len(), 4);
                assert_eq!(cycle.first(), cycle.last());
                for id in ["a", "b", "c"] {
                    assert!(cycle.iter().any(|x| x == id));
                }
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(registry.validate().is_err());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let registry = registry(&[("a", &["a"])]);
        match registry.validate() {
            Err(ForgeError::CyclicDependency { cycle }) => assert_eq!(cycle, vec!["a", "a"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn subset_ignores_outside_dependencies() {
        let registry = registry(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let subset: BTreeSet<String> = ["b".to_string(), "c".to_string()].into();
        let plan = registry.plan_subset(&subset).unwrap();
        assert_eq!(plan.order, vec!["b", "c"]);
        assert!(plan.deps["b"].is_empty());
    }

    #[test]
    fn dependents_closure_walks_reverse_edges() {
        let registry = registry(&[
            ("scripts", &[]),
            ("styles", &[]),
            ("index", &["scripts", "styles"]),
            ("build", &["index", "scripts", "styles"]),
        ]);
        let affected = registry.dependents_closure(["styles"]);
        let expected: BTreeSet<String> =
            ["styles", "index", "build"].iter().map(|s| s.to_string()).collect();
        assert_eq!(affected, expected);

        assert!(registry.dependents_closure(["ghost"]).is_empty());
    }
}
