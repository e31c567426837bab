//! End-to-end super-step scenarios: linear/conditional routing, retry,
//! interrupt/resume, fan-out, and result-cache hits driven through the
//! public `Executor` API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;

use bspgraph::cache::InMemoryCache;
use bspgraph::checkpoint::InMemorySaver;
use bspgraph::config::ExecutorConfig;
use bspgraph::event_bus::{Event, EventStream};
use bspgraph::executor::{CachePolicy, Executor, Invocation, RetryCondition, RetryPolicy};
use bspgraph::graph::{EdgePredicate, GraphBuilder};
use bspgraph::node::{Command, Node, NodeContext, NodeError, NodeOutput};
use bspgraph::reducer::{AppendReducer, DefaultReducer};
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

fn counter_schema() -> Schema {
    Schema::new().with_field("counter", Arc::new(DefaultReducer), json!(0))
}

#[tokio::test]
async fn linear_graph_runs_to_completion_in_order() {
    let increment = NodeKind::Custom("increment".into());
    let double = NodeKind::Custom("double".into());

    let compiled = GraphBuilder::new()
        .with_schema(counter_schema())
        .add_node(increment.clone(), IncrementNode)
        .add_node(double.clone(), DoubleNode)
        .with_entry_point(increment.clone())
        .add_edge(increment, double)
        .compile()
        .expect("valid graph");

    let executor = Arc::new(Executor::new(Arc::new(compiled), memory_config()));
    let mut stream = executor
        .execute(State::default(), Some(Invocation::new("run-1")), None)
        .await
        .expect("execute starts");

    let events = drain_to_completion(&mut stream).await;
    let state = final_state_of(&events);
    // (0 + 1) * 2
    assert_eq!(state.get("counter"), Some(&json!(2)));
}

struct RouterNode;

#[async_trait]
impl Node for RouterNode {
    async fn run(&self, _ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::None)
    }
}

struct MarkNode {
    label: &'static str,
}

#[async_trait]
impl Node for MarkNode {
    async fn run(&self, _ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
        let mut update = State::default();
        update.insert("visited".into(), json!(self.label));
        Ok(NodeOutput::State(update))
    }
}

#[tokio::test]
async fn conditional_edge_routes_to_mapped_target() {
    let router = NodeKind::Custom("router".into());
    let left = NodeKind::Custom("left".into());
    let right = NodeKind::Custom("right".into());

    let predicate: EdgePredicate = Arc::new(|state: &State| {
        let branch = state.get("branch").and_then(|v| v.as_str()).unwrap_or("left");
        NodeKind::Custom(branch.to_string()).encode()
    });

    let schema = Schema::new()
        .with_field("branch", Arc::new(DefaultReducer), json!("left"))
        .with_field("visited", Arc::new(DefaultReducer), json!(null));

    let compiled = GraphBuilder::new()
        .with_schema(schema)
        .add_node(router.clone(), RouterNode)
        .add_node(left, MarkNode { label: "left" })
        .add_node(right, MarkNode { label: "right" })
        .with_entry_point(router.clone())
        .add_conditional_edge(router, predicate)
        .compile()
        .unwrap();

    let executor = Arc::new(Executor::new(Arc::new(compiled), memory_config()));
    let mut initial = State::default();
    initial.insert("branch".into(), json!("right"));
    let mut stream = executor
        .execute(initial, Some(Invocation::new("run-router")), None)
        .await
        .unwrap();

    let events = drain_to_completion(&mut stream).await;
    let state = final_state_of(&events);
    assert_eq!(state.get("visited"), Some(&json!("right")));
}

struct FlakyFailNode {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for FlakyFailNode {
    async fn run(&self, _ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            return Err(NodeError::failed(format!("attempt {attempt} failed")));
        }
        let mut update = State::default();
        update.insert("done".into(), json!(true));
        Ok(NodeOutput::State(update))
    }
}

#[tokio::test]
async fn retry_policy_recovers_from_transient_failures() {
    let node_id = NodeKind::Custom("flaky".into());
    let attempts = Arc::new(AtomicUsize::new(0));

    let schema = Schema::new().with_field("done", Arc::new(DefaultReducer), json!(false));
    let compiled = GraphBuilder::new()
        .with_schema(schema)
        .add_node(
            node_id.clone(),
            FlakyFailNode {
                attempts: attempts.clone(),
            },
        )
        .with_entry_point(node_id.clone())
        .compile()
        .unwrap();

    let policy = RetryPolicy::new()
        .with_max_attempts(5)
        .with_initial_delay(std::time::Duration::from_millis(1))
        .with_max_delay(std::time::Duration::from_millis(5))
        .with_condition(RetryCondition::FailedOnly);

    let executor = Arc::new(
        Executor::new(Arc::new(compiled), memory_config()).with_retry_policy(node_id, policy),
    );
    let mut stream = executor
        .execute(State::default(), Some(Invocation::new("run-retry")), None)
        .await
        .unwrap();

    let events = drain_to_completion(&mut stream).await;
    let state = final_state_of(&events);
    assert_eq!(state.get("done"), Some(&json!(true)));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

struct InterruptOnceNode {
    interrupted: Arc<AtomicBool>,
}

#[async_trait]
impl Node for InterruptOnceNode {
    async fn run(&self, ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
        if !self.interrupted.swap(true, Ordering::SeqCst) {
            return Err(ctx.interrupt(json!("waiting for approval")));
        }
        let mut update = State::default();
        update.insert("approved".into(), json!(true));
        Ok(NodeOutput::State(update))
    }
}

#[tokio::test]
async fn interrupted_run_resumes_from_checkpoint_on_second_invocation() {
    let node_id = NodeKind::Custom("gate".into());
    let interrupted = Arc::new(AtomicBool::new(false));

    let schema = Schema::new().with_field("approved", Arc::new(DefaultReducer), json!(false));
    let compiled = GraphBuilder::new()
        .with_schema(schema)
        .add_node(
            node_id.clone(),
            InterruptOnceNode {
                interrupted: interrupted.clone(),
            },
        )
        .with_entry_point(node_id)
        .compile()
        .unwrap();

    let saver = Arc::new(InMemorySaver::new());
    let executor = Arc::new(Executor::new(Arc::new(compiled), memory_config()).with_saver(saver));

    let mut first = executor
        .execute(State::default(), Some(Invocation::new("lineage-gate")), None)
        .await
        .unwrap();
    let first_events = drain_to_completion(&mut first).await;
    assert!(
        first_events
            .iter()
            .any(|e| matches!(e, Event::PregelInterrupt { .. }))
    );

    let mut second = executor
        .execute(State::default(), Some(Invocation::new("lineage-gate")), None)
        .await
        .unwrap();
    let second_events = drain_to_completion(&mut second).await;
    let state = final_state_of(&second_events);
    assert_eq!(state.get("approved"), Some(&json!(true)));
}

struct FanOutNode;

#[async_trait]
impl Node for FanOutNode {
    async fn run(&self, _ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::Commands(vec![
            Command::goto(NodeKind::Custom("left".into())),
            Command::goto(NodeKind::Custom("right".into())),
        ]))
    }
}

struct VisitNode {
    label: &'static str,
}

#[async_trait]
impl Node for VisitNode {
    async fn run(&self, _ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
        let mut update = State::default();
        update.insert("visits".into(), json!(self.label));
        Ok(NodeOutput::State(update))
    }
}

#[tokio::test]
async fn fan_out_commands_schedule_both_successors_directly() {
    let fan = NodeKind::Custom("fan".into());
    let left = NodeKind::Custom("left".into());
    let right = NodeKind::Custom("right".into());

    let schema = Schema::new().with_field("visits", Arc::new(AppendReducer), json!([]));
    let compiled = GraphBuilder::new()
        .with_schema(schema)
        .add_node(fan.clone(), FanOutNode)
        .add_node(left, VisitNode { label: "left" })
        .add_node(right, VisitNode { label: "right" })
        .with_entry_point(fan)
        .compile()
        .unwrap();

    let executor = Arc::new(Executor::new(Arc::new(compiled), memory_config()));
    let mut stream = executor
        .execute(State::default(), Some(Invocation::new("run-fanout")), None)
        .await
        .unwrap();

    let events = drain_to_completion(&mut stream).await;
    let state = final_state_of(&events);
    let visits = state
        .get("visits")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(visits.len(), 2);
    assert!(visits.contains(&json!("left")));
    assert!(visits.contains(&json!("right")));
}

struct CountingNode {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for CountingNode {
    async fn run(&self, _ctx: NodeContext, _input: State) -> Result<NodeOutput, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut update = State::default();
        update.insert("ran".into(), json!(true));
        Ok(NodeOutput::State(update))
    }
}

#[tokio::test]
async fn cached_node_skips_second_execution() {
    let node_id = NodeKind::Custom("cached".into());
    let calls = Arc::new(AtomicUsize::new(0));

    let schema = Schema::new().with_field("ran", Arc::new(DefaultReducer), json!(false));
    let compiled = GraphBuilder::new()
        .with_schema(schema)
        .add_node(
            node_id.clone(),
            CountingNode {
                calls: calls.clone(),
            },
        )
        .with_entry_point(node_id.clone())
        .compile()
        .unwrap();

    let cache = Arc::new(InMemoryCache::new());
    let executor = Arc::new(
        Executor::new(Arc::new(compiled), memory_config())
            .with_cache(cache)
            .with_cache_policy(node_id, CachePolicy::new()),
    );

    let mut first = executor
        .execute(State::default(), Some(Invocation::new("run-cache-1")), None)
        .await
        .unwrap();
    drain_to_completion(&mut first).await;

    let mut second = executor
        .execute(State::default(), Some(Invocation::new("run-cache-2")), None)
        .await
        .unwrap();
    let second_events = drain_to_completion(&mut second).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(
        second_events
            .iter()
            .any(|e| matches!(e, Event::NodeComplete { cache_hit: true, .. }))
    );
}

#[tokio::test]
async fn execute_without_invocation_fails_fast() {
    let node_id = NodeKind::Custom("solo".into());
    let compiled = GraphBuilder::new()
        .add_node(node_id.clone(), IncrementNode)
        .with_entry_point(node_id)
        .compile()
        .unwrap();
    let executor = Arc::new(Executor::new(Arc::new(compiled), memory_config()));
    let result = executor.execute(State::default(), None, None).await;
    assert!(result.is_err());
}
