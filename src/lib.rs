//! # bspgraph: Pregel-style BSP runtime for agent-orchestration graphs
//!
//! A super-step (bulk-synchronous-parallel) executor for graphs of async
//! node functions: versioned single-value channels drive triggering,
//! schema-declared reducers drive state merges, and an optional checkpoint
//! saver drives resume/fork/replay.
//!
//! ## Core Concepts
//!
//! - [`channel`] — versioned, single-valued mailboxes
//! - [`state`] — schema-driven state and reducer dispatch
//! - [`reducer`] — built-in per-field merge functions
//! - [`node`] — the `Node` trait, `Command`/fan-out, interrupts
//! - [`graph`] — node/edge registration and compile-time validation
//! - [`canonical`] / [`cache`] — stable cache-key derivation and result cache
//! - [`event_bus`] — Pregel lifecycle events, sinks, broadcast fan-out
//! - [`config`] — executor run configuration
//! - [`checkpoint`] — checkpoint model, `Saver` contract, lineage/fork
//! - [`executor`] — the BSP super-step loop, retry, interrupt, `Fork`
//!
//! ## Quick Start
//!
//! ### Declaring a schema and running a node body
//!
//! ```
//! use bspgraph::node::{Node, NodeContext, NodeError, NodeOutput};
//! use bspgraph::reducer::AppendReducer;
//! use bspgraph::state::{Schema, State};
//! use bspgraph::event_bus::EventBus;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct GreetingNode;
//!
//! #[async_trait]
//! impl Node for GreetingNode {
//!     async fn run(&self, ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
//!         ctx.emit("greeting", "saying hello");
//!         let mut update = State::default();
//!         update.insert("messages".into(), serde_json::json!(["hello"]));
//!         Ok(NodeOutput::State(update))
//!     }
//! }
//!
//! let schema = Schema::new().with_field("messages", Arc::new(AppendReducer), serde_json::json!([]));
//! let _ = schema.initial_state();
//! let _bus = EventBus::default();
//! ```
//!
//! ### Building a graph
//!
//! ```
//! use bspgraph::graph::GraphBuilder;
//! use bspgraph::node::{Node, NodeContext, NodeError, NodeOutput};
//! use bspgraph::state::State;
//! use bspgraph::types::NodeKind;
//! use async_trait::async_trait;
//!
//! struct NoopNode;
//!
//! #[async_trait]
//! impl Node for NoopNode {
//!     async fn run(&self, _ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
//!         Ok(NodeOutput::None)
//!     }
//! }
//!
//! let compiled = GraphBuilder::new()
//!     .add_node(NodeKind::Custom("greet".into()), NoopNode)
//!     .with_entry_point(NodeKind::Custom("greet".into()))
//!     .compile()
//!     .expect("valid graph");
//! assert_eq!(compiled.entry_point(), &NodeKind::Custom("greet".into()));
//! ```

pub mod cache;
pub mod canonical;
pub mod channel;
pub mod checkpoint;
pub mod config;
pub mod event_bus;
pub mod executor;
pub mod graph;
pub mod message;
pub mod node;
pub mod reducer;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod utils;
