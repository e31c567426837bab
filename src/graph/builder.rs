//! Fluent graph construction (spec component D).
//!
//! Grounded on the teacher's `graphs::builder::GraphBuilder`, generalized
//! from the teacher's `ReducerRegistry`/`RuntimeConfig`-threading shape to
//! a plain [`crate::state::Schema`] the compiled graph carries for
//! `apply_update` calls — the executor owns run configuration
//! ([`crate::config::ExecutorConfig`]) separately from the graph shape.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::edges::{ConditionalEdge, EdgePredicate};
use super::iteration::{EdgesIter, NodesIter, topological_sort};
use super::{CompiledGraph, compilation};
use crate::node::Node;
use crate::state::Schema;
use crate::types::NodeKind;
use compilation::GraphCompileError;

#[cfg(feature = "petgraph-compat")]
use super::petgraph_compat::{self, PetgraphConversion};

/// Builds a [`CompiledGraph`] by registering nodes, static edges, and
/// conditional edges, then compiling once every invariant holds.
#[derive(Default)]
pub struct GraphBuilder {
    pub(super) nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    pub(super) edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    pub(super) conditional_edges: Vec<ConditionalEdge>,
    pub(super) entry_point: Option<NodeKind>,
    pub(super) schema: Schema,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the field schema driving `apply_update` for this graph's
    /// state merges (spec §3).
    #[must_use]
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Registers a node under `id`. Registration of the virtual
    /// `Start`/`End` sentinels is rejected with a warning (they are never
    /// implemented, only referenced as edge endpoints).
    #[must_use]
    pub fn add_node(mut self, id: NodeKind, node: impl Node + 'static) -> Self {
        if id.is_start() || id.is_end() {
            tracing::warn!(?id, "ignoring registration of virtual node kind");
            return self;
        }
        self.nodes.insert(id, Arc::new(node));
        self
    }

    /// Declares this node as the graph's entry point (spec §4.D: "the
    /// graph has an entry-point node"). The implicit `Start -> entryPoint`
    /// edge is installed at compile time, not here.
    #[must_use]
    pub fn with_entry_point(mut self, id: NodeKind) -> Self {
        self.entry_point = Some(id);
        self
    }

    /// Adds a static edge `from -> to`.
    #[must_use]
    pub fn add_edge(mut self, from: NodeKind, to: NodeKind) -> Self {
        self.edges.entry(from).or_default().push(to);
        self
    }

    /// Adds a conditional edge resolved at runtime by `predicate` (spec
    /// §4.D: "ConditionalEdge — from, condition function, path map
    /// result→nodeID").
    #[must_use]
    pub fn add_conditional_edge(mut self, from: NodeKind, predicate: EdgePredicate) -> Self {
        self.conditional_edges
            .push(ConditionalEdge::new(from, predicate));
        self
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
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn topological_sort(&self) -> Vec<NodeKind> {
        topological_sort(&self.edges)
    }

    #[cfg(feature = "petgraph-compat")]
    #[must_use]
    pub fn to_petgraph(&self) -> PetgraphConversion {
        petgraph_compat::to_petgraph(&self.edges)
    }

    #[cfg(feature = "petgraph-compat")]
    #[must_use]
    pub fn to_dot(&self) -> String {
        petgraph_compat::to_dot(&self.edges)
    }

    #[cfg(feature = "petgraph-compat")]
    #[must_use]
    pub fn is_cyclic(&self) -> bool {
        petgraph_compat::is_cyclic(&self.edges)
    }

    /// Validates post-compile invariants and installs static-edge channel
    /// wiring, producing a [`CompiledGraph`] (spec §4.D).
    pub fn compile(self) -> Result<CompiledGraph, GraphCompileError> {
        compilation::compile(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeContext, NodeError, NodeOutput};
    use crate::state::State;
    use async_trait::async_trait;

    struct NoopNode;

    #[async_trait]
    impl Node for NoopNode {
        async fn run(&self, _ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::None)
        }
    }

    #[test]
    fn add_node_rejects_start_and_end() {
        let builder = GraphBuilder::new()
            .add_node(NodeKind::Start, NoopNode)
            .add_node(NodeKind::End, NoopNode);
        assert_eq!(builder.node_count(), 0);
    }

    #[test]
    fn add_node_registers_custom_nodes() {
        let builder = GraphBuilder::new().add_node(NodeKind::Custom("a".into()), NoopNode);
        assert_eq!(builder.node_count(), 1);
    }

    #[test]
    fn edge_count_sums_all_targets() {
        let builder = GraphBuilder::new()
            .add_edge(NodeKind::Custom("a".into()), NodeKind::Custom("b".into()))
            .add_edge(NodeKind::Custom("a".into()), NodeKind::Custom("c".into()));
        assert_eq!(builder.edge_count(), 2);
    }
}
