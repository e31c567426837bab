//! Post-compile validation and edge-install side effects (spec §4.D).
//!
//! Grounded on the teacher's `graphs::compilation`, which only ever called
//! `App::from_parts` with no validation at all — its own doc comment
//! admitted as much ("Currently none. Reserved for future structural
//! validation errors"). Spec §4.D requires real invariants (unique
//! non-empty node ids, every edge referencing an existing node, an
//! entry-point node) and real edge-install side effects (a static edge A→B
//! installs channel `branch:to:B`, subscribes B to it, and appends a writer
//! entry on A), neither of which the teacher ever built — both are
//! implemented fresh here.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::builder::GraphBuilder;
use super::{CompiledGraph, WriterEntry};
use crate::types::{ChannelName, NodeKind};

/// Channel name a static or conditional edge into `target` installs (spec
/// §4.D: "installs channel `branch:to:B`").
#[must_use]
pub fn branch_channel(target: &NodeKind) -> ChannelName {
    format!("branch:to:{}", target.encode())
}

/// Marker value a writer entry carries; the executor only cares that the
/// channel was written, not the payload (spec §4.D literal: `{Channel:
/// branch:to:B, Value: "update"}`).
pub const WRITER_MARKER: &str = "update";

#[derive(Debug, Error, Diagnostic)]
pub enum GraphCompileError {
    #[error("graph has no nodes")]
    #[diagnostic(code(bspgraph::graph::no_nodes))]
    NoNodes,

    #[error("node id must not be empty")]
    #[diagnostic(code(bspgraph::graph::empty_node_id))]
    EmptyNodeId,

    #[error("edge {from} -> {to} references a node that was never registered")]
    #[diagnostic(code(bspgraph::graph::unknown_edge_target))]
    UnknownEdgeTarget { from: String, to: String },

    #[error("edge source {from} was never registered")]
    #[diagnostic(code(bspgraph::graph::unknown_edge_source))]
    UnknownEdgeSource { from: String },

    #[error("conditional edge from {from} may resolve to unregistered node {target}")]
    #[diagnostic(code(bspgraph::graph::unknown_conditional_target))]
    UnknownConditionalTarget { from: String, target: String },

    #[error("graph has no entry point: call with_entry_point or add an edge from Start")]
    #[diagnostic(code(bspgraph::graph::missing_entry_point))]
    MissingEntryPoint,
}

/// Returns true for the two virtual sentinels, which are valid edge
/// endpoints without being registered in the node map.
fn is_sentinel(kind: &NodeKind) -> bool {
    kind.is_start() || kind.is_end()
}

pub(super) fn compile(builder: GraphBuilder) -> Result<CompiledGraph, GraphCompileError> {
    let GraphBuilder {
        nodes,
        edges,
        conditional_edges,
        entry_point,
        schema,
    } = builder;

    if nodes.is_empty() {
        return Err(GraphCompileError::NoNodes);
    }
    for id in nodes.keys() {
        if let NodeKind::Custom(name) = id {
            if name.trim().is_empty() {
                return Err(GraphCompileError::EmptyNodeId);
            }
        }
    }

    let known = |kind: &NodeKind| is_sentinel(kind) || nodes.contains_key(kind);

    for (from, targets) in &edges {
        if !known(from) {
            return Err(GraphCompileError::UnknownEdgeSource {
                from: from.encode(),
            });
        }
        for to in targets {
            if !known(to) {
                return Err(GraphCompileError::UnknownEdgeTarget {
                    from: from.encode(),
                    to: to.encode(),
                });
            }
        }
    }

    for edge in &conditional_edges {
        if !known(&edge.from) {
            return Err(GraphCompileError::UnknownEdgeSource {
                from: edge.from.encode(),
            });
        }
    }

    let entry_point = entry_point.ok_or(GraphCompileError::MissingEntryPoint)?;
    if !known(&entry_point) {
        return Err(GraphCompileError::UnknownEdgeTarget {
            from: NodeKind::Start.encode(),
            to: entry_point.encode(),
        });
    }

    let mut triggers: FxHashMap<NodeKind, Vec<ChannelName>> = FxHashMap::default();
    let mut writers: FxHashMap<NodeKind, Vec<WriterEntry>> = FxHashMap::default();

    let mut install_edge = |from: NodeKind, to: NodeKind| {
        let channel = branch_channel(&to);
        let node_triggers = triggers.entry(to).or_default();
        if !node_triggers.contains(&channel) {
            node_triggers.push(channel.clone());
        }
        writers.entry(from).or_default().push(WriterEntry {
            channel,
            value: WRITER_MARKER.to_string(),
        });
    };

    // Entry-point initialization: implicit Start -> entryPoint edge (spec
    // §4.D: "makes the entry point subscribed to branch:to:<entryPoint> and
    // writeable by Start").
    install_edge(NodeKind::Start, entry_point.clone());

    for (from, targets) in &edges {
        for to in targets {
            install_edge(from.clone(), to.clone());
        }
    }

    Ok(CompiledGraph {
        nodes,
        entry_point,
        edges,
        conditional_edges,
        triggers,
        writers,
        schema,
    })
}
