//! # Dependency Graph
//!
//! Directed graph over cell identities for the dataflow CORE.
//!
//! An edge `parent -> child` means "child reads parent's output". Edges are
//! recorded incrementally, at the moment a cell reads another, so the graph
//! carries no acyclicity invariant: a cycle is a detectable condition that
//! the controller rejects before executing anything.
//!
//! All data structures use `BTreeMap`/`BTreeSet` for deterministic ordering.

use crate::CellId;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

type Adjacency = BTreeMap<CellId, BTreeSet<CellId>>;

// =============================================================================
// GRAPH IMPLEMENTATION
// =============================================================================

/// The dependency graph between cells.
///
/// Both directions are stored and kept symmetric: `b` is in `children[a]`
/// iff `a` is in `parents[b]`. Empty entries are pruned so that the key sets
/// only ever name nodes with at least one edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// child -> parents
    parents: Adjacency,

    /// parent -> children
    children: Adjacency,
}

impl DependencyGraph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every edge.
    pub fn clear(&mut self) {
        self.parents.clear();
        self.children.clear();
    }

    /// Record that `child` reads `parent`. Returns `true` if the edge is new.
    pub fn add_edge(&mut self, parent: CellId, child: CellId) -> bool {
        let inserted = self.children.entry(parent).or_default().insert(child);
        self.parents.entry(child).or_default().insert(parent);
        inserted
    }

    /// Remove a single edge. Returns `true` if it was present.
    pub fn remove_edge(&mut self, parent: CellId, child: CellId) -> bool {
        let removed = detach(&mut self.children, parent, child);
        detach(&mut self.parents, child, parent);
        removed
    }

    /// Remove every edge into `node`, returning the former parents.
    pub fn remove_all_parents(&mut self, node: CellId) -> BTreeSet<CellId> {
        let parents = self.parents.remove(&node).unwrap_or_default();
        for parent in &parents {
            detach(&mut self.children, *parent, node);
        }
        parents
    }

    /// Remove every edge out of `node`, returning the former children.
    pub fn remove_all_children(&mut self, node: CellId) -> BTreeSet<CellId> {
        let children = self.children.remove(&node).unwrap_or_default();
        for child in &children {
            detach(&mut self.parents, *child, node);
        }
        children
    }

    /// Remove every edge touching `node`.
    pub fn remove_node(&mut self, node: CellId) {
        self.remove_all_parents(node);
        self.remove_all_children(node);
    }

    #[must_use]
    pub fn contains_edge(&self, parent: CellId, child: CellId) -> bool {
        self.children
            .get(&parent)
            .is_some_and(|children| children.contains(&child))
    }

    /// Direct parents of `node`, in ascending order.
    pub fn parents_of(&self, node: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.parents.get(&node).into_iter().flatten().copied()
    }

    /// Direct children of `node`, in ascending order.
    pub fn children_of(&self, node: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.children.get(&node).into_iter().flatten().copied()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.children.values().map(BTreeSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Every edge as `(parent, child)`, sorted by parent then child.
    #[must_use]
    pub fn edge_list(&self) -> Vec<(CellId, CellId)> {
        self.children
            .iter()
            .flat_map(|(parent, children)| children.iter().map(move |child| (*parent, *child)))
            .collect()
    }

    // =========================================================================
    // REACHABILITY
    // =========================================================================

    /// All transitive ancestors of `node`. Excludes `node` unless it lies on a cycle.
    #[must_use]
    pub fn upstream(&self, node: CellId) -> BTreeSet<CellId> {
        walk(&self.parents, node).into_iter().collect()
    }

    /// All transitive descendants of `node`. Excludes `node` unless it lies on a cycle.
    #[must_use]
    pub fn downstream(&self, node: CellId) -> BTreeSet<CellId> {
        walk(&self.children, node).into_iter().collect()
    }

    /// Transitive descendants of `node` in breadth-first discovery order.
    ///
    /// Each descendant appears exactly once.
    #[must_use]
    pub fn downstream_order(&self, node: CellId) -> Vec<CellId> {
        walk(&self.children, node)
    }

    /// Check whether the graph contains a directed cycle.
    ///
    /// Kahn-style: every node with at least one parent gets an in-degree.
    /// Nodes with children but no parents seed the frontier. Retiring a
    /// frontier node decrements its children; a child reaching zero joins the
    /// frontier. The graph is acyclic iff every in-degree entry is retired.
    /// A self loop never retires, so it counts as a cycle.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        let mut in_degree: BTreeMap<CellId, usize> = self
            .parents
            .iter()
            .map(|(child, parents)| (*child, parents.len()))
            .collect();

        let mut frontier: VecDeque<CellId> = self
            .children
            .keys()
            .filter(|node| !in_degree.contains_key(node))
            .copied()
            .collect();

        let mut retired = 0usize;
        while let Some(node) = frontier.pop_front() {
            for child in self.children_of(node) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        retired += 1;
                        frontier.push_back(child);
                    }
                }
            }
        }

        retired != in_degree.len()
    }
}

/// Breadth-first walk from `start` (exclusive) with a visited set.
fn walk(adjacency: &Adjacency, start: CellId) -> Vec<CellId> {
    let mut visited = BTreeSet::new();
    let mut order = Vec::new();
    let mut frontier: VecDeque<CellId> = adjacency.get(&start).into_iter().flatten().copied().collect();

    while let Some(node) = frontier.pop_front() {
        if !visited.insert(node) {
            continue;
        }
        order.push(node);
        if let Some(next) = adjacency.get(&node) {
            frontier.extend(next.iter().filter(|n| !visited.contains(n)).copied());
        }
    }

    order
}

/// Remove `member` from `map[key]`, pruning the entry when it empties.
fn detach(map: &mut Adjacency, key: CellId, member: CellId) -> bool {
    let Some(set) = map.get_mut(&key) else {
        return false;
    };
    let removed = set.remove(&member);
    if set.is_empty() {
        map.remove(&key);
    }
    removed
}

// =============================================================================
// TESTS
// =============================================================================
