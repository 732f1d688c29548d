//! Dependency graph over stores
//!
//! Edges point from a child store to each store that contains it. A topological
//! sort therefore yields children before their parents, which is the order change
//! propagation and notification walk the graph in.
//!
//! The graph is generic over [`GraphNode`] so it can be exercised without real
//! stores; the dispatcher instantiates it with [`StoreRef`](crate::store::StoreRef).

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

use crate::error::{FluxError, Result};

/// A node that knows its identity and its children.
pub trait GraphNode: Clone {
    type Id: Copy + Eq + Hash + fmt::Debug;

    fn node_id(&self) -> Self::Id;

    /// Direct children, in the order they were added.
    fn child_nodes(&self) -> Vec<Self>;
}

/// Directed graph of stores, child -> parents.
///
/// Nodes and edges keep insertion order so sorts are deterministic.
#[derive(Debug, Clone)]
pub struct StoreGraph<N: GraphNode> {
    nodes: IndexMap<N::Id, N>,
    edges: IndexMap<N::Id, IndexSet<N::Id>>,
}

impl<N: GraphNode> Default for StoreGraph<N> {
    fn default() -> Self {
        Self {
            nodes: IndexMap::new(),
            edges: IndexMap::new(),
        }
    }
}

impl<N: GraphNode> StoreGraph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `node` and, recursively, all of its children.
    ///
    /// Adding a node that is already present keeps its existing edges and adds
    /// any new ones.
    pub fn add_store(&mut self, node: &N) {
        let mut visited = HashSet::new();
        self.add_visited(node, &mut visited);
    }

    fn add_visited(&mut self, node: &N, visited: &mut HashSet<N::Id>) {
        let id = node.node_id();
        if !visited.insert(id) {
            return;
        }

        self.nodes.insert(id, node.clone());
        self.edges.entry(id).or_default();

        for child in node.child_nodes() {
            self.add_visited(&child, visited);
            self.edges.entry(child.node_id()).or_default().insert(id);
        }
    }

    /// Remove `node`, its children, and every edge pointing at them.
    pub fn remove_store(&mut self, node: &N) {
        let mut visited = HashSet::new();
        self.remove_visited(node, &mut visited);
    }

    fn remove_visited(&mut self, node: &N, visited: &mut HashSet<N::Id>) {
        let id = node.node_id();
        if !visited.insert(id) {
            return;
        }

        self.nodes.shift_remove(&id);
        self.edges.shift_remove(&id);

        for child in node.child_nodes() {
            self.remove_visited(&child, visited);
        }
        for parents in self.edges.values_mut() {
            parents.shift_remove(&id);
        }
    }

    /// Remove a single node and every edge touching it. Children stay.
    pub fn remove_node(&mut self, id: N::Id) -> Option<N> {
        let node = self.nodes.shift_remove(&id);
        self.edges.shift_remove(&id);
        for parents in self.edges.values_mut() {
            parents.shift_remove(&id);
        }
        node
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &N> + '_ {
        self.nodes.values()
    }

    /// Kahn's algorithm over a copy of the edges.
    ///
    /// Fails with [`FluxError::CycleDetected`] when edges remain after the sort.
    pub fn sorted_nodes(&self) -> Result<Vec<N>> {
        let mut edges = self.edges.clone();

        let mut in_degree: IndexMap<N::Id, usize> =
            self.nodes.keys().map(|id| (*id, 0)).collect();
        for parents in edges.values() {
            for parent in parents {
                if let Some(degree) = in_degree.get_mut(parent) {
                    *degree += 1;
                }
            }
        }

        let mut ready: VecDeque<N::Id> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            if let Some(node) = self.nodes.get(&id) {
                sorted.push(node.clone());
            }

            let Some(parents) = edges.get_mut(&id) else {
                continue;
            };
            for parent in std::mem::take(parents) {
                if let Some(degree) = in_degree.get_mut(&parent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(parent);
                    }
                }
            }
        }

        let remaining_edges: usize = edges.values().map(IndexSet::len).sum();
        if remaining_edges > 0 {
            tracing::warn!(remaining_edges, "Store graph contains a cycle");
            return Err(FluxError::CycleDetected { remaining_edges });
        }

        Ok(sorted)
    }

    /// Nodes in dependency order, children first.
    pub fn iter(&self) -> Result<std::vec::IntoIter<N>> {
        Ok(self.sorted_nodes()?.into_iter())
    }

    /// Direct parents of `id`
    pub fn parents_of(&self, id: N::Id) -> impl Iterator<Item = N::Id> + '_ {
        self.edges.get(&id).into_iter().flatten().copied()
    }

    pub fn node(&self, id: N::Id) -> Option<&N> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: N::Id) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total number of child -> parent edges
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(IndexSet::len).sum()
    }
}
