//! Checkpoint/resume/fork behavior as observed through the executor: a
//! saver-backed run leaves a step history behind, and a checkpoint taken
//! from that history can be forked into an independent continuation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use bspgraph::checkpoint::{CheckpointConfig, CheckpointManager, CheckpointSource, InMemorySaver};
use bspgraph::config::ExecutorConfig;
use bspgraph::event_bus::{Event, EventStream};
use bspgraph::executor::{Executor, Invocation};
use bspgraph::graph::GraphBuilder;
use bspgraph::node::{Node, NodeContext, NodeError, NodeOutput};
use bspgraph::reducer::DefaultReducer;
use bspgraph::state::{Schema, State};
use bspgraph::types::NodeKind;

fn memory_config() -> ExecutorConfig {
    ExecutorConfig::new().with_memory_event_bus()
}

async fn drain_to_completion(stream: &mut EventStream) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        match stream.recv().await {
            Ok(event) => {
                let done = event.is_terminal();
                events.push(event);
                if done {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    events
}

fn final_state_of(events: &[Event]) -> State {
    for event in events {
        if let Event::GraphCompletion { final_state } = event {
            let serde_json::Value::Object(map) = final_state else {
                return State::default();
            };
            return map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
    }
    State::default()
}

struct SetNode {
    value: i64,
}

#[async_trait]
impl Node for SetNode {
    async fn run(&self, _ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
        let mut update = State::default();
        update.insert("value".into(), json!(self.value));
        Ok(NodeOutput::State(update))
    }
}

struct IncrementNode;

#[async_trait]
impl Node for IncrementNode {
    async fn run(&self, _ctx: NodeContext, input: State) -> Result<NodeOutput, NodeError> {
        let counter = input.get("counter").and_then(|v| v.as_i64()).unwrap_or(0);
        let mut update = State::default();
        update.insert("counter".into(), json!(counter + 1));
        Ok(NodeOutput::State(update))
    }
}

struct DoubleNode;

#[async_trait]
impl Node for DoubleNode {
    async fn run(&self, _ctx: NodeContext, input: State) -> Result<NodeOutput, NodeError> {
        let counter = input.get("counter").and_then(|v| v.as_i64()).unwrap_or(0);
        let mut update = State::default();
        update.insert("counter".into(), json!(counter * 2));
        Ok(NodeOutput::State(update))
    }
}

#[tokio::test]
async fn saver_backed_run_leaves_an_input_and_loop_checkpoint_per_step() {
    let increment = NodeKind::Custom("increment".into());
    let double = NodeKind::Custom("double".into());
    let schema = Schema::new().with_field("counter", Arc::new(DefaultReducer), json!(0));

    let compiled = GraphBuilder::new()
        .with_schema(schema)
        .add_node(increment.clone(), IncrementNode)
        .add_node(double.clone(), DoubleNode)
        .with_entry_point(increment.clone())
        .add_edge(increment, double)
        .compile()
        .unwrap();

    let saver = Arc::new(InMemorySaver::new());
    let executor = Arc::new(Executor::new(Arc::new(compiled), memory_config()).with_saver(saver.clone()));

    let mut stream = executor
        .execute(State::default(), Some(Invocation::new("lineage-steps")), None)
        .await
        .unwrap();
    drain_to_completion(&mut stream).await;

    let manager = CheckpointManager::new(saver);
    let history = manager
        .list(&CheckpointConfig::new("lineage-steps"), Default::default())
        .await
        .unwrap();

    assert!(history.len() >= 2, "expected an input checkpoint plus at least one loop checkpoint");
    assert!(
        history
            .iter()
            .any(|t| t.metadata.source == Some(CheckpointSource::Input))
    );
    assert!(
        history
            .iter()
            .any(|t| t.metadata.source == Some(CheckpointSource::Loop))
    );
}

#[tokio::test]
async fn fork_within_lineage_continues_from_the_same_state_under_a_new_checkpoint() {
    let node_id = NodeKind::Custom("set".into());
    let schema = Schema::new().with_field("value", Arc::new(DefaultReducer), json!(0));

    let compiled = GraphBuilder::new()
        .with_schema(schema)
        .add_node(node_id.clone(), SetNode { value: 42 })
        .with_entry_point(node_id)
        .compile()
        .unwrap();

    let saver = Arc::new(InMemorySaver::new());
    let executor = Arc::new(Executor::new(Arc::new(compiled), memory_config()).with_saver(saver.clone()));

    let mut first = executor
        .execute(State::default(), Some(Invocation::new("lineage-fork")), None)
        .await
        .unwrap();
    let first_events = drain_to_completion(&mut first).await;
    let first_state = final_state_of(&first_events);
    assert_eq!(first_state.get("value"), Some(&json!(42)));

    let manager = CheckpointManager::new(saver);
    let latest = manager
        .latest("lineage-fork", "")
        .await
        .unwrap()
        .expect("a checkpoint was saved");
    let source_config = latest.config.clone();

    let (forked_config, mut forked_stream) = executor.fork(&source_config, None).await.unwrap();
    assert_eq!(forked_config.lineage_id, "lineage-fork");
    assert_ne!(forked_config.checkpoint_id, source_config.checkpoint_id);

    let forked_events = drain_to_completion(&mut forked_stream).await;
    let forked_state = final_state_of(&forked_events);
    assert_eq!(forked_state.get("value"), Some(&json!(42)));
}

#[tokio::test]
async fn fork_to_new_lineage_is_independent_of_the_source_lineage() {
    let node_id = NodeKind::Custom("set".into());
    let schema = Schema::new().with_field("value", Arc::new(DefaultReducer), json!(0));

    let compiled = GraphBuilder::new()
        .with_schema(schema)
        .add_node(node_id.clone(), SetNode { value: 7 })
        .with_entry_point(node_id)
        .compile()
        .unwrap();

    let saver = Arc::new(InMemorySaver::new());
    let executor = Arc::new(Executor::new(Arc::new(compiled), memory_config()).with_saver(saver.clone()));

    let mut first = executor
        .execute(State::default(), Some(Invocation::new("lineage-origin")), None)
        .await
        .unwrap();
    drain_to_completion(&mut first).await;

    let manager = CheckpointManager::new(saver);
    let latest = manager
        .latest("lineage-origin", "")
        .await
        .unwrap()
        .expect("a checkpoint was saved");

    let (forked_config, mut forked_stream) = executor
        .fork(&latest.config, Some("lineage-branch".to_string()))
        .await
        .unwrap();
    assert_eq!(forked_config.lineage_id, "lineage-branch");

    let forked_events = drain_to_completion(&mut forked_stream).await;
    let forked_state = final_state_of(&forked_events);
    assert_eq!(forked_state.get("value"), Some(&json!(7)));

    let tree = manager.build_tree("lineage-branch", "").await.unwrap();
    assert_eq!(tree.root, forked_config.checkpoint_id);

    // the source lineage is untouched by the fork.
    let origin_history = manager
        .list(&CheckpointConfig::new("lineage-origin"), Default::default())
        .await
        .unwrap();
    assert!(origin_history.iter().all(|t| t.checkpoint.id != forked_config.checkpoint_id.clone().unwrap()));
}
