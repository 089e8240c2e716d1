// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graph functions for ordering and relating changes.
//!
//! Edges point from parent to child, so walking the graph forwards visits descendants and
//! walking the reversed graph visits ancestors.
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use petgraph::Direction;
use petgraph::graphmap::{DiGraphMap, NodeTrait};
use petgraph::visit::{Dfs, Reversed};

/// Deterministic total order over all nodes of the graph.
///
/// Nodes are sorted topologically, a node never precedes any of its ancestors. Ties between nodes
/// which are ready at the same time are broken by picking the smallest one first. Two graphs with
/// the same nodes and edges are always linearised the same way, no matter in which order they were
/// built.
pub fn linearize<N>(graph: &DiGraphMap<N, ()>) -> Vec<N>
where
    N: NodeTrait,
{
    let nodes: HashSet<N> = graph.nodes().collect();
    linearize_subset(graph, &nodes)
}

/// Deterministic total order over a subset of nodes, only edges between nodes of the subset are
/// taken into account.
pub fn linearize_subset<N>(graph: &DiGraphMap<N, ()>, nodes: &HashSet<N>) -> Vec<N>
where
    N: NodeTrait,
{
    let mut in_degree: HashMap<N, usize> = HashMap::with_capacity(nodes.len());
    let mut ready = BinaryHeap::new();

    for node in nodes {
        let degree = graph
            .neighbors_directed(*node, Direction::Incoming)
            .filter(|parent| nodes.contains(parent))
            .count();
        if degree == 0 {
            ready.push(Reverse(*node));
        }
        in_degree.insert(*node, degree);
    }

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);

        for child in graph.neighbors_directed(node, Direction::Outgoing) {
            let Some(degree) = in_degree.get_mut(&child) else {
                continue;
            };
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(child));
            }
        }
    }

    order
}

/// All ancestors of the given nodes, including the nodes themselves.
pub fn ancestors<N>(graph: &DiGraphMap<N, ()>, targets: &[N]) -> HashSet<N>
where
    N: NodeTrait,
{
    let reversed = Reversed(graph);
    let mut ancestors = HashSet::new();

    for target in targets {
        if !graph.contains_node(*target) || ancestors.contains(target) {
            continue;
        }

        let mut dfs = Dfs::new(&reversed, *target);
        while let Some(node) = dfs.next(&reversed) {
            ancestors.insert(node);
        }
    }

    ancestors
}

/// Return `true` if a linear path exists in the graph between `from` and `to`.
///
/// This indicates whether or not the given changes occurred concurrently.
pub fn has_path<N>(graph: &DiGraphMap<N, ()>, from: N, to: N) -> bool
where
    N: NodeTrait,
{
    if !graph.contains_node(from) {
        return false;
    }

    let mut dfs = Dfs::new(graph, from);
    while let Some(node) = dfs.next(graph) {
        if node == to {
            return true;
        }
    }
    false
}

/// Nodes without any children.
pub fn heads<N>(graph: &DiGraphMap<N, ()>) -> BTreeSet<N>
where
    N: NodeTrait,
{
    graph
        .nodes()
        .filter(|node| {
            graph
                .neighbors_directed(*node, Direction::Outgoing)
                .next()
                .is_none()
        })
        .collect()
}
