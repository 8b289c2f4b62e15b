//! Dependency graph management using `petgraph`.
//!
//! Builds a directed acyclic graph from resolved resource dependencies
//! and derives topological orders and levels from it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::dot::{Config, Dot};
use petgraph::graph::NodeIndex;
use rigging_common::error::{Result, RiggingError};

/// A dependency graph of resources.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Internal petgraph representation.
    graph: petgraph::Graph<String, ()>,
    /// Node lookup by resource name.
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: petgraph::Graph::new(),
            index: HashMap::new(),
        }
    }

    /// Builds and checks a graph from resolved dependency sets.
    ///
    /// Nodes are added in `order`, which fixes the order of resources
    /// that have no dependency path between them.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::Cycle` naming a cycle if one exists.
    pub fn build<'a>(
        order: impl IntoIterator<Item = &'a str>,
        dependencies: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<Self> {
        let mut graph = Self::new();
        for name in order {
            let _ = graph.add_resource(name);
        }
        for (dependent, deps) in dependencies {
            let dependent = graph.add_resource(dependent);
            for dependency in deps {
                let dependency = graph.add_resource(dependency);
                graph.add_dependency(dependent, dependency);
            }
        }
        let _ = graph.resolve_order()?;
        Ok(graph)
    }

    /// Adds a resource node, returning the existing node if already present.
    pub fn add_resource(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        let _ = self.index.insert(name.to_string(), idx);
        idx
    }

    /// Adds a dependency edge: `dependent` depends on `dependency`.
    ///
    /// The graph edge points from `dependency` to `dependent`
    /// so that topological sort yields dependencies first.
    pub fn add_dependency(&mut self, dependent: NodeIndex, dependency: NodeIndex) {
        let _ = self.graph.update_edge(dependency, dependent, ());
    }

    /// Number of resources in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns whether the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns whether `name` is a node of the graph.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns a topological ordering of resources for creation.
    ///
    /// Dependencies appear before the resources that depend on them.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::Cycle` naming a cycle if one exists.
    pub fn resolve_order(&self) -> Result<Vec<String>> {
        match petgraph::algo::toposort(&self.graph, None) {
            Ok(indices) => Ok(indices
                .iter()
                .filter_map(|&idx| self.graph.node_weight(idx).cloned())
                .collect()),
            Err(_cycle) => Err(RiggingError::Cycle {
                cycle: self.find_cycle(),
            }),
        }
    }

    /// Groups resources into levels: each resource sits one level after
    /// its deepest dependency. Resources within a level share no
    /// dependency path and keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::Cycle` naming a cycle if one exists.
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        let order = petgraph::algo::toposort(&self.graph, None).map_err(|_| {
            RiggingError::Cycle {
                cycle: self.find_cycle(),
            }
        })?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for &idx in &order {
            let level = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep).map(|d| d + 1))
                .max()
                .unwrap_or(0);
            let _ = depth.insert(idx, level);
        }

        let mut nodes: Vec<(usize, NodeIndex)> = depth.into_iter().map(|(i, d)| (d, i)).collect();
        nodes.sort();

        let mut levels: Vec<Vec<String>> = Vec::new();
        for (level, idx) in nodes {
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(self.graph[idx].clone());
        }
        Ok(levels)
    }

    /// Direct dependencies of `name`, in insertion order.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct dependents of `name`, in insertion order.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Every resource that depends on `name`, directly or transitively.
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let Some(&start) = self.index.get(name) else {
            return BTreeSet::new();
        };
        let mut bfs = petgraph::visit::Bfs::new(&self.graph, start);
        let mut found = BTreeSet::new();
        while let Some(idx) = bfs.next(&self.graph) {
            if idx != start {
                let _ = found.insert(self.graph[idx].clone());
            }
        }
        found
    }

    /// Renders the graph in Graphviz DOT format, edges pointing from
    /// dependency to dependent.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let labelled = self.graph.map(|_, name| name.clone(), |_, _| "");
        format!("{}", Dot::with_config(&labelled, &[Config::EdgeNoLabel]))
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort();
        found.into_iter().map(|i| self.graph[i].clone()).collect()
    }

    /// Names one cycle as `a -> b -> ... -> a`, where each resource
    /// depends on the next.
    fn find_cycle(&self) -> Vec<String> {
        let scc = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .find(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .unwrap_or_default();
        let Some(&start) = scc.iter().min() else {
            return Vec::new();
        };
        let members: HashSet<NodeIndex> = scc.iter().copied().collect();
        let mut visited = HashSet::from([start]);
        let mut path = vec![start];
        let _ = self.walk_back_to(start, start, &members, &mut visited, &mut path);
        path.push(start);
        path.into_iter().map(|i| self.graph[i].clone()).collect()
    }

    fn walk_back_to(
        &self,
        current: NodeIndex,
        start: NodeIndex,
        members: &HashSet<NodeIndex>,
        visited: &mut HashSet<NodeIndex>,
        path: &mut Vec<NodeIndex>,
    ) -> bool {
        for next in self.graph.neighbors_directed(current, Direction::Incoming) {
            if next == start {
                return true;
            }
            if members.contains(&next) && visited.insert(next) {
                path.push(next);
                if self.walk_back_to(next, start, members, visited, path) {
                    return true;
                }
                let _ = path.pop();
            }
        }
        false
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(pairs: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
        pairs
            .iter()
            .map(|(name, d)| {
                (
                    (*name).to_string(),
                    d.iter().map(|s| (*s).to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn empty_graph_resolves_to_empty() {
        let graph = DependencyGraph::new();
        assert!(graph.resolve_order().expect("should resolve").is_empty());
        assert!(graph.levels().expect("levels").is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn linear_dependency_chain() {
        let graph = DependencyGraph::build(
            ["release", "secret", "namespace"],
            &deps(&[
                ("namespace", &[]),
                ("secret", &["namespace"]),
                ("release", &["secret"]),
            ]),
        )
        .expect("acyclic");
        assert_eq!(
            graph.resolve_order().expect("order"),
            vec!["namespace", "secret", "release"]
        );
        assert_eq!(
            graph.levels().expect("levels"),
            vec![vec!["namespace"], vec!["secret"], vec!["release"]]
        );
    }

    #[test]
    fn diamond_levels_group_independent_branches() {
        let graph = DependencyGraph::build(
            ["d", "b", "c", "a"],
            &deps(&[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"]), ("d", &[])]),
        )
        .expect("acyclic");
        assert_eq!(
            graph.levels().expect("levels"),
            vec![vec!["d"], vec!["b", "c"], vec!["a"]]
        );
        assert_eq!(graph.dependencies_of("a"), vec!["b", "c"]);
        assert_eq!(graph.dependents_of("d"), vec!["b", "c"]);
    }

    #[test]
    fn level_is_one_past_deepest_dependency() {
        let graph = DependencyGraph::build(
            ["a", "b", "c"],
            &deps(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]),
        )
        .expect("acyclic");
        assert_eq!(
            graph.levels().expect("levels"),
            vec![vec!["a"], vec!["b"], vec!["c"]]
        );
    }

    #[test]
    fn two_node_cycle_is_named() {
        let err = DependencyGraph::build(["a", "b"], &deps(&[("a", &["b"]), ("b", &["a"])]))
            .unwrap_err();
        match err {
            RiggingError::Cycle { cycle } => {
                assert_eq!(cycle.len(), 3);
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn three_node_cycle_follows_dependencies() {
        let err = DependencyGraph::build(
            ["a", "b", "c", "free"],
            &deps(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"]), ("free", &[])]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> c -> a");
    }

    #[test]
    fn transitive_dependents_cover_the_subtree() {
        let graph = DependencyGraph::build(
            ["cluster", "ns", "secret", "release", "other"],
            &deps(&[
                ("ns", &["cluster"]),
                ("secret", &["ns"]),
                ("release", &["secret"]),
                ("other", &[]),
            ]),
        )
        .expect("acyclic");
        let dependents = graph.transitive_dependents("ns");
        assert_eq!(
            dependents,
            BTreeSet::from(["secret".to_string(), "release".to_string()])
        );
        assert!(graph.transitive_dependents("other").is_empty());
    }

    #[test]
    fn dot_output_names_nodes() {
        let graph =
            DependencyGraph::build(["ns", "secret"], &deps(&[("secret", &["ns"])])).expect("dag");
        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph"), "got: {dot}");
        assert!(dot.contains("ns"));
        assert!(dot.contains("->"));
    }
}
