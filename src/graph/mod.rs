//! Graph model: node/edge registration, compile-time validation, and the
//! static-edge channel wiring the scheduler triggers on (spec component D).
//!
//! A [`GraphBuilder`] registers nodes and edges; [`GraphBuilder::compile`]
//! validates the result (unique non-empty node ids, every edge resolves to
//! a registered node, an entry point exists) and installs the `branch:to:*`
//! channel/trigger/writer wiring spec §4.D describes, producing an
//! immutable [`CompiledGraph`] the executor plans super-steps against.

mod builder;
mod compilation;
mod edges;
mod iteration;

#[cfg(feature = "petgraph-compat")]
mod petgraph_compat;

pub use builder::GraphBuilder;
pub use compilation::{GraphCompileError, branch_channel};
pub use edges::{ConditionalEdge, ConditionFn, EdgePredicate, PathMap};
pub use iteration::{EdgesIter, NodesIter};

#[cfg(feature = "petgraph-compat")]
pub use petgraph_compat::{NodeIndexMap, PetgraphConversion, WeaveDiGraph, is_cyclic};

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::node::Node;
use crate::state::Schema;
use crate::types::{ChannelName, NodeKind};

/// One static-edge channel write a node's completion performs (spec §4.D
/// literal: `{Channel: branch:to:B, Value: "update"}`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriterEntry {
    pub channel: ChannelName,
    pub value: String,
}

/// A validated, immutable graph ready for execution.
///
/// Carries both the raw node/edge maps (for topology queries,
/// `petgraph`/DOT export) and the derived `triggers`/`writers` tables the
/// scheduler actually plans super-steps from.
pub struct CompiledGraph {
    nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    entry_point: NodeKind,
    edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    conditional_edges: Vec<ConditionalEdge>,
    triggers: FxHashMap<NodeKind, Vec<ChannelName>>,
    writers: FxHashMap<NodeKind, Vec<WriterEntry>>,
    schema: Schema,
}

impl CompiledGraph {
    #[must_use]
    pub fn entry_point(&self) -> &NodeKind {
        &self.entry_point
    }

    #[must_use]
    pub fn node(&self, id: &NodeKind) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn nodes(&self) -> NodesIter<'_> {
        NodesIter::new(&self.nodes)
    }

    #[must_use]
    pub fn edges(&self) -> EdgesIter<'_> {
        EdgesIter::new(&self.edges)
    }

    #[must_use]
    pub fn conditional_edges_from(&self, id: &NodeKind) -> Vec<&ConditionalEdge> {
        self.conditional_edges
            .iter()
            .filter(|edge| &edge.from == id)
            .collect()
    }

    /// Channels whose availability wakes `id` (spec §4.F `planStep`,
    /// availability-/version-based triggering).
    #[must_use]
    pub fn triggers_for(&self, id: &NodeKind) -> &[ChannelName] {
        self.triggers.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Static-edge channel writes `id`'s completion performs (spec §4.F
    /// `handleNodeResult`: "Still process static-edge writes").
    #[must_use]
    pub fn writers_for(&self, id: &NodeKind) -> &[WriterEntry] {
        self.writers.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every channel name any node triggers on, de-duplicated — the set of
    /// channels the executor must instantiate alongside the `input:<key>`
    /// channels at startup (spec §4.F startup step 3).
    #[must_use]
    pub fn all_trigger_channels(&self) -> Vec<ChannelName> {
        let mut seen: Vec<ChannelName> = Vec::new();
        for channels in self.triggers.values() {
            for channel in channels {
                if !seen.contains(channel) {
                    seen.push(channel.clone());
                }
            }
        }
        seen
    }

    #[must_use]
    pub fn topological_sort(&self) -> Vec<NodeKind> {
        iteration::topological_sort(&self.edges)
    }
}
