//! Event kinds the executor and node bodies emit onto the event bus (spec
//! §6: "Required event kinds (envelope details out of scope)").
//!
//! Grounded on the teacher's `Event`/`NodeEvent`/`DiagnosticEvent` shape,
//! kept verbatim for the generic free-form diagnostic channel
//! (`NodeContext::emit`, `Event::diagnostic`). The teacher's
//! `LLMStreamingEvent`/`LLMStreamingEventScope` are dropped: component G
//! (LLM/tool/agent node bodies) is explicitly out of scope for this crate,
//! so there is no streaming-chunk concept left to carry an event kind for.
//! In their place: one variant per spec §6 row.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which phase of a super-step a [`Event::PregelStep`] event reports
/// (spec §4.F: plan / execute / update).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Planning,
    Execution,
    Update,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Event {
    Node(NodeEvent),
    Diagnostic(DiagnosticEvent),

    /// Each super-step phase (spec §6: `pregel.step`).
    PregelStep {
        phase: StepPhase,
        step: u64,
        task_count: usize,
        active_nodes: Option<Vec<String>>,
        updated_channels: Option<Vec<String>>,
    },
    /// Top-level run failure (spec §6: `pregel.error`).
    PregelError { step: u64, message: String },
    /// A node raised an interrupt. Not a failure (spec §6: `pregel.interrupt`).
    PregelInterrupt {
        step: u64,
        node_id: String,
        task_id: String,
        value: Value,
    },
    /// A task's lifecycle (spec §6: `node.start` / `node.complete` / `node.error`).
    NodeStart {
        node_id: String,
        task_id: String,
        step: u64,
    },
    NodeComplete {
        node_id: String,
        task_id: String,
        step: u64,
        cache_hit: bool,
    },
    NodeError {
        node_id: String,
        task_id: String,
        step: u64,
        message: String,
    },
    /// A channel write (spec §6: `channel.update`).
    ChannelUpdate {
        channel: String,
        step: i64,
        version: u64,
    },
    /// Fires after each super-step's merge completes (spec §6: `state.update`).
    StateUpdate { step: u64 },
    /// Terminal event; carries the serialized final-state snapshot with
    /// internal keys stripped (spec §6: `graph.completion`).
    GraphCompletion { final_state: Value },
}

impl Event {
    #[must_use]
    pub fn node_message(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Node(NodeEvent::new(None, None, scope.into(), message.into()))
    }

    #[must_use]
    pub fn node_message_with_meta(
        node_id: impl Into<String>,
        step: u64,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Event::Node(NodeEvent::new(
            Some(node_id.into()),
            Some(step),
            scope.into(),
            message.into(),
        ))
    }

    #[must_use]
    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    /// Whether this event kind is sent with blocking-and-cancel semantics
    /// rather than best-effort drop-on-full (spec §5, resolved in DESIGN.md:
    /// terminal completion/error events block, high-frequency step/node/
    /// channel events drop).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::GraphCompletion { .. } | Event::PregelError { .. }
        )
    }

    pub fn to_json_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert(
                "observed_at".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        value
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_json_value())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Node(node) => match (node.node_id(), node.step()) {
                (Some(id), Some(step)) => write!(f, "[{id}@{step}] {}", node.message()),
                (Some(id), None) => write!(f, "[{id}] {}", node.message()),
                (None, Some(step)) => write!(f, "[step {step}] {}", node.message()),
                (None, None) => write!(f, "{}", node.message()),
            },
            Event::Diagnostic(diag) => write!(f, "{}", diag.message()),
            Event::PregelStep { phase, step, .. } => write!(f, "[step {step}] {phase:?}"),
            Event::PregelError { step, message } => write!(f, "[step {step}] error: {message}"),
            Event::PregelInterrupt { step, node_id, .. } => {
                write!(f, "[step {step}] interrupt at {node_id}")
            }
            Event::NodeStart {
                node_id, task_id, ..
            } => write!(f, "start {node_id} ({task_id})"),
            Event::NodeComplete {
                node_id, cache_hit, ..
            } => write!(f, "complete {node_id} (cache_hit={cache_hit})"),
            Event::NodeError {
                node_id, message, ..
            } => write!(f, "error {node_id}: {message}"),
            Event::ChannelUpdate {
                channel, version, ..
            } => write!(f, "channel {channel} -> v{version}"),
            Event::StateUpdate { step } => write!(f, "[step {step}] state updated"),
            Event::GraphCompletion { .. } => write!(f, "graph completed"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEvent {
    node_id: Option<String>,
    step: Option<u64>,
    scope: String,
    message: String,
}

impl NodeEvent {
    #[must_use]
    pub fn new(node_id: Option<String>, step: Option<u64>, scope: String, message: String) -> Self {
        Self {
            node_id,
            step,
            scope,
            message,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    #[must_use]
    pub fn step(&self) -> Option<u64> {
        self.step
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    scope: String,
    message: String,
}

impl DiagnosticEvent {
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_and_pregel_error_are_terminal() {
        assert!(Event::GraphCompletion {
            final_state: Value::Null
        }
        .is_terminal());
        assert!(Event::PregelError {
            step: 0,
            message: "x".into()
        }
        .is_terminal());
    }

    #[test]
    fn node_start_is_not_terminal() {
        assert!(!Event::NodeStart {
            node_id: "n".into(),
            task_id: "t".into(),
            step: 0
        }
        .is_terminal());
    }

    #[test]
    fn display_formats_node_event_with_id_and_step() {
        let event = Event::node_message_with_meta("router", 5, "routing", "hi");
        assert_eq!(format!("{event}"), "[router@5] hi");
    }

    #[test]
    fn to_json_value_round_trips_pregel_step() {
        let event = Event::PregelStep {
            phase: StepPhase::Planning,
            step: 1,
            task_count: 3,
            active_nodes: Some(vec!["a".into()]),
            updated_channels: None,
        };
        let json = event.to_json_value();
        assert_eq!(json["PregelStep"]["step"], 1);
        assert_eq!(json["PregelStep"]["task_count"], 3);
    }
}
