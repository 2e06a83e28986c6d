// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A small directed-acyclic-graph helper used for dependency ordering.
//!
//! `corepack` leans on this in two places: the manifest resolver orders
//! `base` chains before merging, and the puller (`corepack::pull`) uses it to
//! walk an application's transitive package/app dependencies while refusing
//! to add an edge that would close a cycle, per the "defend against cycles at
//! pull time" design note — a malformed manifest graph must fail with a typed
//! error rather than recurse forever.

use petgraph::{
    prelude::DiGraph,
    visit::{Dfs, Topo, Walker},
};

use self::subgraph::subgraph;

mod subgraph;

/// NodeIndex as employed throughout corepack
pub type NodeIndex = petgraph::prelude::NodeIndex<u32>;

/// Returned by [`Dag::try_add_edge`] when the edge would introduce a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("adding edge would introduce a cycle")]
pub struct WouldCycle;

/// Thin wrapper over [`petgraph`] exposing only the operations corepack needs:
/// insert-or-get nodes, cycle-rejecting edges, DFS, and topological order.
#[derive(Debug, Clone)]
pub struct Dag<N>(DiGraph<N, (), u32>);

impl<N> Default for Dag<N> {
    fn default() -> Self {
        Self(DiGraph::default())
    }
}

impl<N> Dag<N>
where
    N: Clone + PartialEq,
{
    /// Construct a new, empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds node `N` to the graph and returns its index. If `N` already
    /// exists, returns the index of the existing node instead of duplicating.
    pub fn add_node_or_get_index(&mut self, node: N) -> NodeIndex {
        if let Some(index) = self.get_index(&node) {
            index
        } else {
            self.0.add_node(node)
        }
    }

    /// Returns true if the node exists in the graph.
    pub fn node_exists(&self, node: &N) -> bool {
        self.get_index(node).is_some()
    }

    /// Remove a node, returning its value if it was present.
    pub fn remove_node(&mut self, node: &N) -> Option<N> {
        let index = self.get_index(node)?;
        self.0.remove_node(index)
    }

    /// Add an edge from `a` to `b`, silently refusing to do so if it would
    /// close a cycle or duplicate an existing edge. Prefer
    /// [`Dag::try_add_edge`] at call sites that must surface the cycle as an
    /// error rather than silently drop it.
    pub fn add_edge(&mut self, a: NodeIndex, b: NodeIndex) -> bool {
        let a_node = &self.0[a];

        // Would `b` already reach back to `a`? Adding a->b would then cycle.
        if self.dfs(b).any(|n| n == a_node) {
            return false;
        }

        if self.0.find_edge(a, b).is_some() {
            return false;
        }

        self.0.add_edge(a, b, ());
        true
    }

    /// Same as [`Dag::add_edge`] but reports the cycle as an error instead of
    /// a bare `false`, for call sites (e.g. dependency traversal) that must
    /// fail the surrounding operation rather than silently drop the edge.
    pub fn try_add_edge(&mut self, a: NodeIndex, b: NodeIndex) -> Result<(), WouldCycle> {
        if self.add_edge(a, b) {
            Ok(())
        } else if self.0.find_edge(a, b).is_some() {
            Ok(())
        } else {
            Err(WouldCycle)
        }
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &'_ N> {
        self.0.node_indices().map(|i| &self.0[i])
    }

    /// Depth-first traversal starting at `start`.
    pub fn dfs(&self, start: NodeIndex) -> impl Iterator<Item = &'_ N> {
        let dfs = Dfs::new(&self.0, start);
        dfs.iter(&self.0).map(|i| &self.0[i])
    }

    /// Topological order over the whole graph: a node with an edge to
    /// another always appears before it. Callers that add edges from a
    /// dependent to its dependency (as `Puller` does) get dependents first
    /// and walk the iterator to decide what to act on before what it needs.
    pub fn topo(&self) -> impl Iterator<Item = &'_ N> {
        let topo = Topo::new(&self.0);
        topo.iter(&self.0).map(|i| &self.0[i])
    }

    /// Transpose the graph (reverse every edge), returning a clone.
    pub fn transpose(&self) -> Self {
        let mut transposed = self.0.clone();
        transposed.reverse();
        Self(transposed)
    }

    /// Extract the subgraph reachable from `starting_nodes`.
    pub fn subgraph(&self, starting_nodes: &[N]) -> Self {
        Self(subgraph(&self.0, starting_nodes))
    }

    /// Index for a node, if present.
    pub fn get_index(&self, node: &N) -> Option<NodeIndex> {
        self.0.node_indices().find(|i| self.0[*i] == *node)
    }

    pub fn is_empty(&self) -> bool {
        self.0.node_count() == 0
    }

    pub fn len(&self) -> usize {
        self.0.node_count()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_cycle() {
        let mut dag: Dag<&str> = Dag::new();
        let a = dag.add_node_or_get_index("a");
        let b = dag.add_node_or_get_index("b");

        assert!(dag.try_add_edge(a, b).is_ok());
        assert_eq!(dag.try_add_edge(b, a), Err(WouldCycle));
    }

    #[test]
    fn topo_orders_dependencies_first() {
        let mut dag: Dag<&str> = Dag::new();
        let runtime = dag.add_node_or_get_index("runtime");
        let app = dag.add_node_or_get_index("app");
        let base = dag.add_node_or_get_index("base");

        dag.add_edge(app, base);
        dag.add_edge(base, runtime);

        let order: Vec<&str> = dag.topo().copied().collect();
        assert_eq!(order, vec!["app", "base", "runtime"]);
    }

    #[test]
    fn idempotent_node_insertion() {
        let mut dag: Dag<&str> = Dag::new();
        let first = dag.add_node_or_get_index("x");
        let second = dag.add_node_or_get_index("x");
        assert_eq!(first, second);
        assert_eq!(dag.len(), 1);
    }
}
