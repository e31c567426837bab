//! Node contract and `Command`/fan-out types (spec component D/F, Node +
//! Command).
//!
//! Grounded on the teacher's `Node` trait and `NodeContext`
//! (`weavegraph::node`), generalized in two ways: the return type is the
//! spec's closed `{nil, State, *Command, []*Command}` set instead of the
//! teacher's fixed `NodePartial{messages, extra, errors, frontier}`, and
//! `NodeContext` carries the event emitter and retry/cache/timeout metadata
//! the executor threads through rather than LLM-streaming-specific helpers
//! (the teacher's agent/LLM emit-* methods are plugin-node concerns spec.md
//! §1 explicitly scopes out — see component G).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::event_bus::EventEmitter;
use crate::state::State;
use crate::types::NodeKind;

/// A routing/update instruction a node body may return instead of (or
/// alongside) a plain `State` (spec §3: "Command").
///
/// A single `Command` updates state and/or redirects control flow; a
/// `Vec<Command>` fans out into one successor task per command (spec §4.F,
/// `handleNodeResult`, `[]*Command` row).
#[derive(Clone, Debug, Default)]
pub struct Command {
    /// Partial state update, merged via the schema's reducers.
    pub update: Option<State>,
    /// Explicit successor node. Suppresses static-edge writes from this
    /// node (spec §4.F: "GoTo suppression").
    pub goto: Option<NodeKind>,
    /// Value to seed the resume channel with, consumed only at run start
    /// (spec §6).
    pub resume: Option<Value>,
    /// Map of per-channel resume values, consumed only at run start.
    pub resume_map: Option<HashMap<String, Value>>,
}

impl Command {
    #[must_use]
    pub fn goto(target: NodeKind) -> Self {
        Self {
            goto: Some(target),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_update(mut self, update: State) -> Self {
        self.update = Some(update);
        self
    }
}

/// The permissible result of a node function (spec §3: "permissible return
/// types are State, *Command, []*Command, or nil").
#[derive(Clone, Debug)]
pub enum NodeOutput {
    /// No result; static-edge writes still fire (spec §4.F, `nil` row).
    None,
    /// Direct state merge, plus static-edge writes.
    State(State),
    /// A single routing command. Suppresses static-edge writes if `goto` is set.
    Command(Command),
    /// Fan-out: one task per command. Suppresses static-edge writes.
    Commands(Vec<Command>),
}

impl From<State> for NodeOutput {
    fn from(state: State) -> Self {
        NodeOutput::State(state)
    }
}

impl From<Command> for NodeOutput {
    fn from(command: Command) -> Self {
        NodeOutput::Command(command)
    }
}

impl From<Vec<Command>> for NodeOutput {
    fn from(commands: Vec<Command>) -> Self {
        NodeOutput::Commands(commands)
    }
}

/// A controlled, resumable pause raised by a node body (spec §7:
/// "Interrupt — NOT an error event; triggers the interrupt path").
///
/// A node only supplies `value` and `path`; the executor attaches
/// `node_id`/`task_id`/`step` before the signal leaves `executeSingleTask`
/// (spec §4.F: "attach node id/task id/step; propagate without wrapping"),
/// modeled as a tagged enum variant rather than unwinding (spec §9).
#[derive(Clone, Debug, Default)]
pub struct InterruptSignal {
    pub value: Value,
    pub path: Option<String>,
    pub node_id: Option<NodeKind>,
    pub task_id: Option<String>,
    pub step: Option<u64>,
}

impl InterruptSignal {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub(crate) fn attach_context(&mut self, node_id: NodeKind, task_id: String, step: u64) {
        self.node_id = Some(node_id);
        self.task_id = Some(task_id);
        self.step = Some(step);
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    #[error("node failed: {message}")]
    #[diagnostic(code(bspgraph::node::failed))]
    Failed { message: String },

    #[error("node timed out after {0:?}")]
    #[diagnostic(code(bspgraph::node::timeout))]
    Timeout(Duration),

    /// Not a failure: the scheduler detects this variant and diverts to the
    /// interrupt-checkpoint path instead of the generic error path (spec §9).
    #[error("node interrupted")]
    #[diagnostic(code(bspgraph::node::interrupt))]
    Interrupt(InterruptSignal),
}

impl NodeError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::Failed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, NodeError::Interrupt(_))
    }
}

/// Per-task execution context handed to a node body (spec §6: node bodies
/// "may find `_exec_context_`, `_current_node_id_`... in the input state";
/// the emitter is the typed counterpart of that convention).
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeKind,
    pub task_id: String,
    pub step: u64,
    emitter: Arc<dyn EventEmitter>,
}

impl NodeContext {
    #[must_use]
    pub fn new(
        node_id: NodeKind,
        task_id: String,
        step: u64,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            node_id,
            task_id,
            step,
            emitter,
        }
    }

    /// Emits a diagnostic/log-style event scoped to this node's execution.
    /// Non-blocking: high-frequency node events drop-on-full rather than
    /// back-pressure the scheduler (spec §5, open question resolved in
    /// DESIGN.md). Errors (closed bus, lagged receiver) are swallowed; a
    /// dropped diagnostic event is not a run failure.
    pub fn emit(&self, scope: impl Into<String>, message: impl Into<String>) {
        let event = crate::event_bus::Event::node_message_with_meta(
            self.node_id.encode(),
            self.step,
            scope,
            message,
        );
        let _ = self.emitter.emit(event);
    }

    /// Convenience for raising an interrupt from node code.
    #[must_use]
    pub fn interrupt(&self, value: Value) -> NodeError {
        NodeError::Interrupt(InterruptSignal::new(value))
    }
}

/// A node's function body (spec §3: "Functions are `(ctx, State) -> (any,
/// error)`").
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, ctx: NodeContext, input: State) -> Result<NodeOutput, NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_goto_builder_sets_target_only() {
        let cmd = Command::goto(NodeKind::Custom("next".into()));
        assert_eq!(cmd.goto, Some(NodeKind::Custom("next".into())));
        assert!(cmd.update.is_none());
    }

    #[test]
    fn interrupt_signal_attach_context_fills_fields() {
        let mut signal = InterruptSignal::new(serde_json::json!("stop"));
        signal.attach_context(NodeKind::Custom("n".into()), "task-1".into(), 2);
        assert_eq!(signal.node_id, Some(NodeKind::Custom("n".into())));
        assert_eq!(signal.task_id, Some("task-1".into()));
        assert_eq!(signal.step, Some(2));
    }

    #[test]
    fn node_error_is_interrupt_detects_variant() {
        let err = NodeError::Interrupt(InterruptSignal::new(serde_json::json!(null)));
        assert!(err.is_interrupt());
        assert!(!NodeError::failed("x").is_interrupt());
    }
}
