//! Optional `petgraph` interop: conversion, DOT export, cycle detection
//! (spec component D, feature-gated since most callers never need a
//! petgraph dependency).
//!
//! Grounded on the teacher's `graphs::petgraph_compat` — entirely generic
//! over `NodeKind`/edge maps, ported close to verbatim.

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;

use super::iteration::topological_sort;
use crate::types::NodeKind;

pub type WeaveDiGraph = DiGraph<NodeKind, ()>;
pub type NodeIndexMap = FxHashMap<NodeKind, NodeIndex>;

/// A compiled graph converted into a `petgraph` digraph, plus the index
/// mapping needed to translate back and forth.
pub struct PetgraphConversion {
    pub graph: WeaveDiGraph,
    pub index_map: NodeIndexMap,
}

impl PetgraphConversion {
    #[must_use]
    pub fn index_of(&self, node: &NodeKind) -> Option<NodeIndex> {
        self.index_map.get(node).copied()
    }

    #[must_use]
    pub fn node_at(&self, index: NodeIndex) -> Option<&NodeKind> {
        self.graph.node_weight(index)
    }
}

/// Deterministic node ordering: `Start` first, `End` last, `Custom` names
/// sorted lexicographically in between — matches `iteration::topological_sort`'s
/// tie-break so repeated conversions are stable.
fn ordered_nodes(edges: &FxHashMap<NodeKind, Vec<NodeKind>>) -> Vec<NodeKind> {
    topological_sort(edges)
}

pub(super) fn to_petgraph(edges: &FxHashMap<NodeKind, Vec<NodeKind>>) -> PetgraphConversion {
    let mut graph = WeaveDiGraph::new();
    let mut index_map = NodeIndexMap::default();

    for node in ordered_nodes(edges) {
        let idx = graph.add_node(node.clone());
        index_map.insert(node, idx);
    }

    for (from, targets) in edges {
        let Some(&from_idx) = index_map.get(from) else {
            continue;
        };
        for to in targets {
            let Some(&to_idx) = index_map.get(to) else {
                continue;
            };
            graph.add_edge(from_idx, to_idx, ());
        }
    }

    PetgraphConversion { graph, index_map }
}

pub(super) fn to_dot(edges: &FxHashMap<NodeKind, Vec<NodeKind>>) -> String {
    let mut out = String::from("digraph bspgraph {\n");
    for node in ordered_nodes(edges) {
        let style = match node {
            NodeKind::Start => "shape=doublecircle,style=filled,fillcolor=lightgreen",
            NodeKind::End => "shape=doublecircle,style=filled,fillcolor=lightcoral",
            NodeKind::Custom(_) => "shape=box",
        };
        out.push_str(&format!("  \"{}\" [{}];\n", node, style));
    }
    for (from, targets) in edges {
        for to in targets {
            out.push_str(&format!("  \"{}\" -> \"{}\";\n", from, to));
        }
    }
    out.push_str("}\n");
    out
}

/// True if the static edge map contains a cycle.
#[must_use]
pub fn is_cyclic(edges: &FxHashMap<NodeKind, Vec<NodeKind>>) -> bool {
    let conversion = to_petgraph(edges);
    petgraph::algo::is_cyclic_directed(&conversion.graph)
}
