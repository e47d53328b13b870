//! The controller's dependency graph.
//!
//! Nodes are keyed by [`NodeId`]; an edge `A → B` means A reads one of B's
//! exports. The graph must stay acyclic: topological order drives
//! evaluation, and Kahn's algorithm doubles as the cycle detector. Ready
//! nodes are popped in lexical NodeId order so evaluation order (and every
//! diagnostic derived from it) is reproducible.

use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeSet;

/// Unique identifier of a node within one controller: the dotted block id
/// (`prometheus.scrape.default`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when the reference graph contains a cycle.
///
/// Carries one concrete cycle path (first node repeated at the end) so the
/// user can see exactly which references close the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub path: Vec<NodeId>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path: Vec<&str> = self.path.iter().map(|id| id.as_str()).collect();
        write!(f, "cycle: {}", path.join(" -> "))
    }
}

/// Directed acyclic graph over node ids.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    nodes: IndexSet<NodeId>,
    /// referrer → referenced
    edges: IndexMap<NodeId, IndexSet<NodeId>>,
    /// referenced → referrers
    reverse: IndexMap<NodeId, IndexSet<NodeId>>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: NodeId) {
        self.nodes.insert(id);
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Remove a node and every edge touching it.
    pub fn remove(&mut self, id: &NodeId) {
        self.nodes.shift_remove(id);
        if let Some(deps) = self.edges.shift_remove(id) {
            for dep in deps {
                if let Some(referrers) = self.reverse.get_mut(&dep) {
                    referrers.shift_remove(id);
                }
            }
        }
        if let Some(referrers) = self.reverse.shift_remove(id) {
            for referrer in referrers {
                if let Some(deps) = self.edges.get_mut(&referrer) {
                    deps.shift_remove(id);
                }
            }
        }
    }

    /// Atomically replace all outgoing edges of `id`.
    ///
    /// Edges to ids not present in the graph are ignored.
    pub fn replace_edges(&mut self, id: &NodeId, deps: IndexSet<NodeId>) {
        if let Some(old) = self.edges.shift_remove(id) {
            for dep in old {
                if let Some(referrers) = self.reverse.get_mut(&dep) {
                    referrers.shift_remove(id);
                }
            }
        }
        let deps: IndexSet<NodeId> = deps
            .into_iter()
            .filter(|dep| self.nodes.contains(dep) && dep != id)
            .collect();
        for dep in &deps {
            self.reverse.entry(dep.clone()).or_default().insert(id.clone());
        }
        self.edges.insert(id.clone(), deps);
    }

    /// Nodes `id` reads from.
    pub fn dependencies(&self, id: &NodeId) -> IndexSet<NodeId> {
        self.edges.get(id).cloned().unwrap_or_default()
    }

    /// Nodes that directly read from `id`.
    pub fn dependents(&self, id: &NodeId) -> IndexSet<NodeId> {
        self.reverse.get(id).cloned().unwrap_or_default()
    }

    /// All transitive dependents of the given roots, excluding the roots
    /// themselves.
    pub fn descendants(&self, roots: &IndexSet<NodeId>) -> IndexSet<NodeId> {
        let mut result = IndexSet::new();
        let mut stack: Vec<NodeId> = roots.iter().cloned().collect();
        while let Some(id) = stack.pop() {
            for dependent in self.dependents(&id) {
                if !roots.contains(&dependent) && result.insert(dependent.clone()) {
                    stack.push(dependent);
                }
            }
        }
        result
    }

    /// All edges as `(referrer, referenced)` pairs, in deterministic order.
    pub fn edge_list(&self) -> Vec<(NodeId, NodeId)> {
        let mut list = Vec::new();
        for (from, deps) in &self.edges {
            for to in deps {
                list.push((from.clone(), to.clone()));
            }
        }
        list.sort();
        list
    }

    /// Topologically sort the whole graph using Kahn's algorithm.
    ///
    /// Dependencies come before their dependents. Ties break by lexical
    /// NodeId order. A cycle yields a [`CycleError`] with the cycle path.
    pub fn topo_sort(&self) -> Result<Vec<NodeId>, CycleError> {
        let mut in_degree: IndexMap<&NodeId, usize> = IndexMap::new();
        for id in &self.nodes {
            let degree = self
                .edges
                .get(id)
                .map(|deps| deps.len())
                .unwrap_or(0);
            in_degree.insert(id, degree);
        }

        let mut ready: BTreeSet<&NodeId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            for dependent in self.dependents(id) {
                let dependent = self.nodes.get(&dependent).expect("edge to known node");
                let degree = in_degree.get_mut(dependent).expect("degree tracked");
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(CycleError {
                path: self.find_cycle(&in_degree),
            });
        }
        Ok(order)
    }

    /// Walk the residual subgraph of a failed Kahn pass to produce one
    /// concrete cycle path.
    fn find_cycle(&self, in_degree: &IndexMap<&NodeId, usize>) -> Vec<NodeId> {
        let residual: IndexSet<&NodeId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| *id)
            .collect();

        let Some(&start) = residual.first() else {
            return Vec::new();
        };

        // Every residual node has an in-graph dependency, so following
        // dependencies must revisit a node.
        let mut path: Vec<&NodeId> = vec![start];
        let mut seen: IndexMap<&NodeId, usize> = IndexMap::new();
        seen.insert(start, 0);
        let mut current = start;
        loop {
            let next_dep = self
                .dependencies(current)
                .into_iter()
                .find(|dep| residual.contains(dep))
                .expect("residual node keeps a residual dependency");
            let next = *residual.get(&next_dep).expect("dependency in residual set");
            if let Some(&pos) = seen.get(next) {
                let mut cycle: Vec<NodeId> = path[pos..].iter().map(|id| (*id).clone()).collect();
                cycle.push(next.clone());
                return cycle;
            }
            seen.insert(next, path.len());
            path.push(next);
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    fn deps(ids: &[&str]) -> IndexSet<NodeId> {
        ids.iter().map(|s| id(s)).collect()
    }

    fn diamond() -> Dag {
        // d -> b -> a, d -> c -> a
        let mut dag = Dag::new();
        for name in ["a", "b", "c", "d"] {
            dag.insert(id(name));
        }
        dag.replace_edges(&id("b"), deps(&["a"]));
        dag.replace_edges(&id("c"), deps(&["a"]));
        dag.replace_edges(&id("d"), deps(&["b", "c"]));
        dag
    }

    #[test]
    fn test_topo_order_dependencies_first() {
        let order = diamond().topo_sort().unwrap();
        let pos = |name: &str| order.iter().position(|n| n.as_str() == name).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn test_topo_order_is_deterministic() {
        // Independent nodes come out in lexical order, every time.
        let mut dag = Dag::new();
        for name in ["zeta", "alpha", "mid"] {
            dag.insert(id(name));
        }
        let order = dag.topo_sort().unwrap();
        assert_eq!(order, vec![id("alpha"), id("mid"), id("zeta")]);
    }

    #[test]
    fn test_cycle_detection_reports_path() {
        let mut dag = Dag::new();
        for name in ["a", "b", "c"] {
            dag.insert(id(name));
        }
        dag.replace_edges(&id("a"), deps(&["b"]));
        dag.replace_edges(&id("b"), deps(&["c"]));
        dag.replace_edges(&id("c"), deps(&["a"]));

        let err = dag.topo_sort().unwrap_err();
        // The path closes on itself and visits all three nodes.
        assert_eq!(err.path.first(), err.path.last());
        assert_eq!(err.path.len(), 4);
    }

    #[test]
    fn test_self_reference_is_ignored() {
        let mut dag = Dag::new();
        dag.insert(id("a"));
        dag.replace_edges(&id("a"), deps(&["a"]));
        assert!(dag.topo_sort().is_ok());
    }

    #[test]
    fn test_descendants_transitive() {
        let dag = diamond();
        let descendants = dag.descendants(&deps(&["a"]));
        assert_eq!(descendants, deps(&["b", "c", "d"]));

        let descendants = dag.descendants(&deps(&["b"]));
        assert_eq!(descendants, deps(&["d"]));
    }

    #[test]
    fn test_remove_clears_edges() {
        let mut dag = diamond();
        dag.remove(&id("b"));
        assert!(!dag.contains(&id("b")));
        assert_eq!(dag.dependents(&id("a")), deps(&["c"]));
        assert_eq!(dag.dependencies(&id("d")), deps(&["c"]));
    }

    #[test]
    fn test_replace_edges_is_atomic() {
        let mut dag = diamond();
        dag.replace_edges(&id("d"), deps(&["a"]));
        assert_eq!(dag.dependencies(&id("d")), deps(&["a"]));
        assert!(!dag.dependents(&id("b")).contains(&id("d")));
    }

    #[test]
    fn test_edges_to_unknown_nodes_dropped() {
        let mut dag = Dag::new();
        dag.insert(id("a"));
        dag.replace_edges(&id("a"), deps(&["ghost"]));
        assert!(dag.dependencies(&id("a")).is_empty());
    }
}
