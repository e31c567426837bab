//! The BSP executor core: `Execute`, the plan/execute/update super-step
//! loop, retry, interrupt handling, and `Fork` (spec §4.F).
//!
//! Grounded on the teacher's `runtimes::runner::AppRunner` for the overall
//! shape (an immutable runner spawning an instrumented async loop that
//! streams events, `thiserror`+`miette` error enum, `#[instrument]`-style
//! tracing at phase boundaries) generalized from the teacher's flat
//! "one session, no retries, no interrupts, no fan-out" run loop into the
//! full plan/execute/update super-step model spec §4.F describes: version-
//! triggered `planStep`, concurrent `executeStep` over a `JoinSet`, per-node
//! retry policies, the interrupt pause/resume path, and lineage `Fork`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::Cache;
use crate::channel::Channel;
use crate::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointManager, CheckpointMetadata, CheckpointSource,
    InterruptState, PutFullRequest, Saver, SaverError,
};
use crate::event_bus::{Event, EventBus, EventEmitter, EventStream, StepPhase};
use crate::graph::CompiledGraph;
use crate::node::{Command, InterruptSignal, NodeContext, NodeError, NodeOutput};
use crate::state::{self, State};
use crate::types::NodeKind;

use super::context::{ExecutionContext, Task};
use super::retry::{self, RetryPolicy};
use crate::config::{ExecutorConfig, SinkConfig};

#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    #[error("invocation required to start a run")]
    #[diagnostic(code(bspgraph::executor::invocation_required))]
    InvocationRequired,

    #[error("no checkpoint saver configured")]
    #[diagnostic(code(bspgraph::executor::no_saver))]
    NoSaver,

    #[error("step {step} exceeded its timeout")]
    #[diagnostic(code(bspgraph::executor::step_timeout))]
    StepTimeout { step: u64 },

    #[error("checkpoint save exceeded its timeout")]
    #[diagnostic(code(bspgraph::executor::checkpoint_timeout))]
    CheckpointTimeout,

    #[error("node {node_id} failed: {source}")]
    #[diagnostic(code(bspgraph::executor::node_failed))]
    Node {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("task join failed: {message}")]
    #[diagnostic(code(bspgraph::executor::task_join))]
    TaskJoin { message: String },

    #[error("checkpoint saver error: {0}")]
    #[diagnostic(code(bspgraph::executor::saver))]
    Saver(#[from] SaverError),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Caller-supplied run identity (spec §4.F: "`Execute` fails fast with
/// 'invocation required' if absent"). Doubles as the checkpoint lineage id.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub id: String,
}

impl Invocation {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Per-node opt-in to the result cache (spec §4.C: "if node has cache
/// policy AND graph-level cache set").
#[derive(Clone, Debug, Default)]
pub struct CachePolicy {
    pub key_fields: Vec<String>,
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_key_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

enum ExecuteOutcome {
    Completed,
    Interrupted,
}

enum TaskResult {
    Output { task: Task, output: NodeOutput },
    Interrupted { task: Task, signal: InterruptSignal },
}

/// A compiled graph plus run configuration: immutable after construction,
/// safe for concurrent invocations (spec §5/§9: "executor instance has no
/// per-run mutable fields"). All mutable run state lives in
/// [`ExecutionContext`], created fresh per `execute` call.
pub struct Executor {
    graph: Arc<CompiledGraph>,
    config: ExecutorConfig,
    saver: Option<Arc<dyn Saver>>,
    cache: Option<Arc<dyn Cache>>,
    retry_policies: FxHashMap<NodeKind, Vec<RetryPolicy>>,
    cache_policies: FxHashMap<NodeKind, CachePolicy>,
    graph_version: Option<String>,
    event_bus: EventBus,
}

impl Executor {
    #[must_use]
    pub fn new(graph: Arc<CompiledGraph>, config: ExecutorConfig) -> Self {
        let event_bus = build_event_bus(&config);
        Self {
            graph,
            config,
            saver: None,
            cache: None,
            retry_policies: FxHashMap::default(),
            cache_policies: FxHashMap::default(),
            graph_version: None,
            event_bus,
        }
    }

    #[must_use]
    pub fn with_saver(mut self, saver: Arc<dyn Saver>) -> Self {
        self.saver = Some(saver);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_graph_version(mut self, version: impl Into<String>) -> Self {
        self.graph_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, node: NodeKind, policy: RetryPolicy) -> Self {
        self.retry_policies.entry(node).or_default().push(policy);
        self
    }

    #[must_use]
    pub fn with_cache_policy(mut self, node: NodeKind, policy: CachePolicy) -> Self {
        self.cache_policies.insert(node, policy);
        self
    }

    /// A fresh subscriber to this executor's event bus, independent of any
    /// particular run.
    pub fn subscribe(&self) -> EventStream {
        self.event_bus.subscribe()
    }

    /// Starts a run: fails fast if `invocation` is absent, otherwise spawns
    /// the BSP loop and returns a stream of its events (spec §4.F
    /// `Execute`). `resume` seeds `_command_` for node bodies that consume a
    /// resume value only at run start.
    pub async fn execute(
        self: &Arc<Self>,
        initial_state: State,
        invocation: Option<Invocation>,
        resume: Option<Command>,
    ) -> Result<EventStream> {
        let invocation = invocation.ok_or(ExecutorError::InvocationRequired)?;
        let mut seeded_state = initial_state;
        if let Some(command) = resume {
            seeded_state.insert(state::COMMAND_KEY.to_string(), command_to_value(&command));
        }

        self.event_bus.listen_for_events();
        let stream = self.event_bus.subscribe();
        let emitter = self.event_bus.get_emitter();
        let executor = Arc::clone(self);

        tokio::spawn(async move {
            if let Err(err) = executor.run(seeded_state, invocation, emitter).await {
                tracing::warn!(error = %err, "run ended in error");
            }
        });

        Ok(stream)
    }

    /// Forks `source` — within its lineage, or into `new_lineage_id` — and
    /// launches a fresh run resuming from the forked checkpoint (spec §4.F
    /// `Fork`).
    pub async fn fork(
        self: &Arc<Self>,
        source: &CheckpointConfig,
        new_lineage_id: Option<String>,
    ) -> Result<(CheckpointConfig, EventStream)> {
        let saver = self.saver.clone().ok_or(ExecutorError::NoSaver)?;
        let manager = CheckpointManager::new(saver);
        let forked_config = match new_lineage_id {
            Some(lineage) => manager.branch_to_new_lineage(source, lineage).await?,
            None => manager.branch_within_lineage(source).await?,
        };

        let invocation = Invocation::new(forked_config.lineage_id.clone());
        self.event_bus.listen_for_events();
        let stream = self.event_bus.subscribe();
        let emitter = self.event_bus.get_emitter();
        let executor = Arc::clone(self);

        tokio::spawn(async move {
            if let Err(err) = executor.run(State::default(), invocation, emitter).await {
                tracing::warn!(error = %err, "forked run ended in error");
            }
        });

        Ok((forked_config, stream))
    }

    async fn run(
        self: Arc<Self>,
        initial_state: State,
        invocation: Invocation,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<()> {
        let built = self.startup(initial_state, &invocation, emitter.clone()).await?;
        let resumed = built.resumed;
        let ctx = Arc::new(built);

        let mut checkpoint_config = ctx.last_checkpoint.lock().clone();
        if !resumed {
            if let Some(saver) = self.saver.clone() {
                checkpoint_config = Some(
                    self.create_checkpoint_and_save(&ctx, None, CheckpointSource::Input, -1, &saver)
                        .await?,
                );
            }
        }

        let mut step = ctx.resumed_step.map(|s| s + 1).unwrap_or(0);
        while step < self.config.max_steps {
            let outcome = match self.config.step_timeout {
                Some(limit) => {
                    match tokio::time::timeout(
                        limit,
                        self.run_super_step(&ctx, step, &mut checkpoint_config),
                    )
                    .await
                    {
                        Ok(result) => result?,
                        Err(_) => {
                            let message = format!("step {step} exceeded its timeout");
                            ctx.emit_terminal(Event::PregelError {
                                step,
                                message: message.clone(),
                            });
                            return Err(ExecutorError::StepTimeout { step });
                        }
                    }
                }
                None => self.run_super_step(&ctx, step, &mut checkpoint_config).await?,
            };

            match outcome {
                StepOutcome::Continue => step += 1,
                StepOutcome::Done => break,
            }
        }

        let final_state = state::visible(&ctx.state.read());
        ctx.emit_terminal(Event::GraphCompletion {
            final_state: Value::Object(final_state.into_iter().collect()),
        });
        Ok(())
    }

    async fn run_super_step(
        &self,
        ctx: &Arc<ExecutionContext>,
        step: u64,
        checkpoint_config: &mut Option<CheckpointConfig>,
    ) -> Result<StepOutcome> {
        let tasks = self.plan_step(ctx, step);
        if tasks.is_empty() {
            return Ok(StepOutcome::Done);
        }
        ctx.emit(Event::PregelStep {
            phase: StepPhase::Planning,
            step,
            task_count: tasks.len(),
            active_nodes: Some(tasks.iter().map(|t| t.node_id.encode()).collect()),
            updated_channels: None,
        });

        match self.execute_step(ctx, tasks, step).await? {
            ExecuteOutcome::Interrupted => {
                if let Some(saver) = self.saver.clone() {
                    let cfg = self
                        .create_checkpoint_and_save(
                            ctx,
                            checkpoint_config.clone(),
                            CheckpointSource::Interrupt,
                            step as i64,
                            &saver,
                        )
                        .await?;
                    *checkpoint_config = Some(cfg);
                }
                return Ok(StepOutcome::Done);
            }
            ExecuteOutcome::Completed => {}
        }

        self.stage_explicit_next_nodes(ctx);
        ctx.emit(Event::StateUpdate { step });

        if let Some(saver) = self.saver.clone() {
            let cfg = self
                .create_checkpoint_and_save(
                    ctx,
                    checkpoint_config.clone(),
                    CheckpointSource::Loop,
                    step as i64,
                    &saver,
                )
                .await?;
            *checkpoint_config = Some(cfg);
        } else {
            self.clear_step_marks(ctx);
        }

        Ok(StepOutcome::Continue)
    }

    /// Determines the frontier for `step` (spec §4.F `planStep`): staged
    /// overrides (resume-time `next_nodes`, fan-out successors, explicit
    /// `_next_nodes_` writes) take priority; otherwise every node whose
    /// trigger channels advanced past what it last saw.
    fn plan_step(&self, ctx: &Arc<ExecutionContext>, step: u64) -> Vec<Task> {
        {
            let mut pending = ctx.pending_tasks.lock();
            if !pending.is_empty() {
                return pending.drain(..).collect();
            }
        }

        let channels = ctx.channels.read();
        let mut versions_seen = ctx.versions_seen.write();
        let mut tasks = Vec::new();

        for node in self.graph.nodes() {
            let triggers = self.graph.triggers_for(node);
            if triggers.is_empty() {
                continue;
            }
            let seen = versions_seen.entry(node.encode()).or_default();
            let triggered = triggers.iter().any(|channel_name| {
                channels
                    .get(channel_name)
                    .is_some_and(|c| c.version() > seen.get(channel_name).copied().unwrap_or(0))
            });
            if !triggered {
                continue;
            }
            for channel_name in triggers {
                if let Some(channel) = channels.get(channel_name) {
                    seen.insert(channel_name.clone(), channel.version());
                }
            }
            tasks.push(Task::new(format!("{}-{step}", node.encode()), node.clone()));
        }
        tasks
    }

    async fn execute_step(
        &self,
        ctx: &Arc<ExecutionContext>,
        tasks: Vec<Task>,
        step: u64,
    ) -> Result<ExecuteOutcome> {
        ctx.emit(Event::PregelStep {
            phase: StepPhase::Execution,
            step,
            task_count: tasks.len(),
            active_nodes: Some(tasks.iter().map(|t| t.node_id.encode()).collect()),
            updated_channels: None,
        });

        let mut join_set = tokio::task::JoinSet::new();
        for task in tasks {
            let Some(node) = self.graph.node(&task.node_id).cloned() else {
                tracing::warn!(node_id = %task.node_id, "planned task has no registered node body");
                continue;
            };
            let ctx = Arc::clone(ctx);
            let retry_policies = self
                .retry_policies
                .get(&task.node_id)
                .cloned()
                .unwrap_or_default();
            let cache = self.cache.clone();
            let cache_policy = self.cache_policies.get(&task.node_id).cloned();
            let node_timeout = self.config.node_timeout;
            let graph_version = self.graph_version.clone();
            join_set.spawn(async move {
                execute_single_task(
                    ctx,
                    node,
                    task,
                    step,
                    node_timeout,
                    retry_policies,
                    cache,
                    cache_policy,
                    graph_version,
                )
                .await
            });
        }

        let mut outputs = Vec::new();
        let mut interrupted: Option<(Task, InterruptSignal)> = None;
        let mut also_interrupted: Vec<NodeKind> = Vec::new();

        while let Some(joined) = join_set.join_next().await {
            let result = joined.map_err(|err| ExecutorError::TaskJoin {
                message: err.to_string(),
            })?;
            match result {
                Ok(TaskResult::Output { task, output }) => outputs.push((task, output)),
                Ok(TaskResult::Interrupted { task, signal }) => {
                    if interrupted.is_none() {
                        interrupted = Some((task, signal));
                    } else {
                        also_interrupted.push(task.node_id);
                    }
                }
                Err((task, error)) => {
                    return Err(ExecutorError::Node {
                        node_id: task.node_id.encode(),
                        source: error,
                    });
                }
            }
        }

        self.apply_outputs(ctx, outputs, step);

        if let Some((task, signal)) = interrupted {
            let mut next_nodes = vec![task.node_id.encode()];
            next_nodes.extend(also_interrupted.iter().map(NodeKind::encode));
            {
                let mut pending = ctx.pending_tasks.lock();
                for (i, id) in next_nodes.into_iter().enumerate() {
                    pending.push_back(Task::new(format!("resume-{id}-{i}"), NodeKind::decode(&id)));
                }
            }
            *ctx.interrupt_state.lock() = Some(InterruptState {
                node_id: task.node_id.encode(),
                task_id: task.id.clone(),
                value: signal.value.clone(),
                step,
                path: signal.path.clone(),
            });
            return Ok(ExecuteOutcome::Interrupted);
        }

        Ok(ExecuteOutcome::Completed)
    }

    /// Applies the update/routing side effects of every task's output
    /// (spec §4.F `handleNodeResult`): merges `State`/`Command.update` via
    /// the schema, writes static-edge/goto/conditional-edge branch
    /// channels, and fans `Commands` out into directly-scheduled successor
    /// tasks with isolated input overlays.
    fn apply_outputs(&self, ctx: &Arc<ExecutionContext>, outputs: Vec<(Task, NodeOutput)>, step: u64) {
        for (task, output) in outputs {
            match output {
                NodeOutput::None => {
                    self.apply_static_writes(ctx, &task.node_id, step);
                    self.apply_conditional_edges(ctx, &task.node_id, step);
                }
                NodeOutput::State(update) => {
                    self.merge_update(ctx, &task, &update);
                    self.apply_static_writes(ctx, &task.node_id, step);
                    self.apply_conditional_edges(ctx, &task.node_id, step);
                }
                NodeOutput::Command(command) => {
                    if let Some(update) = &command.update {
                        self.merge_update(ctx, &task, update);
                    }
                    match &command.goto {
                        Some(target) => self.write_branch_channel(ctx, target, step),
                        None => self.apply_static_writes(ctx, &task.node_id, step),
                    }
                    self.apply_conditional_edges(ctx, &task.node_id, step);
                }
                NodeOutput::Commands(commands) => {
                    for (i, command) in commands.into_iter().enumerate() {
                        if let Some(update) = &command.update {
                            self.merge_update(ctx, &task, update);
                        }
                        match &command.goto {
                            Some(target) => {
                                let overlay = ctx.state.read().clone();
                                let mut pending = ctx.pending_tasks.lock();
                                pending.push_back(
                                    Task::new(format!("{}-fanout-{i}", task.id), target.clone())
                                        .with_overlay(overlay),
                                );
                            }
                            None => self.apply_static_writes(ctx, &task.node_id, step),
                        }
                    }
                    self.apply_conditional_edges(ctx, &task.node_id, step);
                }
            }
        }
    }

    fn merge_update(&self, ctx: &Arc<ExecutionContext>, task: &Task, update: &State) {
        {
            let mut state = ctx.state.write();
            *state = self.graph.schema().apply_update(&state, update);
        }
        let mut pending = ctx.pending_writes.lock();
        for (channel, value) in update {
            pending.push(crate::checkpoint::PendingWrite {
                task_id: task.id.clone(),
                channel: channel.clone(),
                value: value.clone(),
                sequence: ctx.next_sequence(),
            });
        }
    }

    fn write_branch_channel(&self, ctx: &Arc<ExecutionContext>, target: &NodeKind, step: u64) {
        let channel_name = crate::graph::branch_channel(target);
        let version = {
            let mut channels = ctx.channels.write();
            let channel = channels.entry(channel_name.clone()).or_default();
            channel.update(&[Value::String("update".to_string())], step as i64);
            channel.version()
        };
        ctx.emit(Event::ChannelUpdate {
            channel: channel_name,
            step: step as i64,
            version,
        });
    }

    fn apply_static_writes(&self, ctx: &Arc<ExecutionContext>, node_id: &NodeKind, step: u64) {
        let writers = self.graph.writers_for(node_id).to_vec();
        for writer in writers {
            let version = {
                let mut channels = ctx.channels.write();
                let channel = channels.entry(writer.channel.clone()).or_default();
                channel.update(&[Value::String(writer.value.clone())], step as i64);
                channel.version()
            };
            ctx.emit(Event::ChannelUpdate {
                channel: writer.channel,
                step: step as i64,
                version,
            });
        }
    }

    /// Evaluates `node_id`'s conditional edges over the post-merge state
    /// snapshot, writing the resolved target's branch channel. An unmapped
    /// result resolves back to `node_id` itself and is a no-op (spec §4.F
    /// `processConditionalEdges`).
    fn apply_conditional_edges(&self, ctx: &Arc<ExecutionContext>, node_id: &NodeKind, step: u64) {
        let edges = self.graph.conditional_edges_from(node_id);
        if edges.is_empty() {
            return;
        }
        let snapshot = ctx.state.read().clone();
        for edge in edges {
            let target = edge.resolve(&snapshot);
            if &target == node_id {
                tracing::warn!(from = %node_id, "conditional edge resolved to an unmapped target, skipping");
                continue;
            }
            self.write_branch_channel(ctx, &target, step);
        }
    }

    /// Honors an explicit `_next_nodes_` override left in state by a node
    /// body, staging it as the forced frontier for the next `planStep`
    /// (spec §4.F `planStep` step 1, §3 `NEXT_NODES_KEY`).
    fn stage_explicit_next_nodes(&self, ctx: &Arc<ExecutionContext>) {
        let next_value = ctx.state.write().remove(state::NEXT_NODES_KEY);
        let Some(Value::Array(ids)) = next_value else {
            return;
        };
        let mut pending = ctx.pending_tasks.lock();
        for (i, id) in ids.iter().enumerate() {
            if let Some(id) = id.as_str() {
                pending.push_back(Task::new(format!("next-{id}-{i}"), NodeKind::decode(id)));
            }
        }
    }

    fn clear_step_marks(&self, ctx: &Arc<ExecutionContext>) {
        let mut channels = ctx.channels.write();
        for channel in channels.values_mut() {
            channel.clear_step_mark();
        }
    }

    /// Assembles a snapshot of current run state into a [`Checkpoint`] and
    /// stores it atomically with pending writes via `put_full` — "the
    /// executor always uses `put_full` for step and interrupt checkpoints"
    /// (spec §4.E). Clears channel step-marks once the save lands.
    async fn create_checkpoint_and_save(
        &self,
        ctx: &Arc<ExecutionContext>,
        parent_config: Option<CheckpointConfig>,
        source: CheckpointSource,
        step: i64,
        saver: &Arc<dyn Saver>,
    ) -> Result<CheckpointConfig> {
        let (channel_values, channel_versions, updated_channels) = {
            let channels = ctx.channels.read();
            let mut values = FxHashMap::default();
            let mut versions = FxHashMap::default();
            let mut updated = Vec::new();
            for (name, channel) in channels.iter() {
                values.insert(name.clone(), channel.value().clone());
                versions.insert(name.clone(), channel.version());
                if channel.is_updated_in_step(step) {
                    updated.push(name.clone());
                }
            }
            (values, versions, updated)
        };
        let versions_seen = ctx.versions_seen.read().clone();
        let interrupt_state = ctx.interrupt_state.lock().clone();
        let next_nodes: Vec<String> = ctx
            .pending_tasks
            .lock()
            .iter()
            .map(|t| t.node_id.encode())
            .collect();

        let mut checkpoint = Checkpoint::new(Uuid::new_v4().to_string());
        checkpoint.channel_values = channel_values;
        checkpoint.channel_versions = channel_versions;
        checkpoint.versions_seen = versions_seen;
        checkpoint.updated_channels = updated_channels;
        checkpoint.interrupt_state = interrupt_state;
        checkpoint.next_nodes = next_nodes;
        checkpoint.parent_checkpoint_id = parent_config.as_ref().and_then(|c| c.checkpoint_id.clone());

        let pending_writes = std::mem::take(&mut *ctx.pending_writes.lock());
        let config = CheckpointConfig::new(ctx.invocation_id.clone())
            .with_checkpoint_id(checkpoint.id.clone());
        let metadata = CheckpointMetadata {
            source: Some(source),
            step,
            ..Default::default()
        };

        let request = PutFullRequest {
            config: config.clone(),
            checkpoint,
            metadata,
            new_versions: FxHashMap::default(),
            pending_writes,
        };

        let stored = tokio::time::timeout(self.config.checkpoint_save_timeout, saver.put_full(request))
            .await
            .map_err(|_| ExecutorError::CheckpointTimeout)??;

        *ctx.last_checkpoint.lock() = Some(stored.clone());
        self.clear_step_marks(ctx);
        Ok(stored)
    }

    /// Seeds an [`ExecutionContext`] for a fresh or resumed run (spec §4.F
    /// "startup path"): initializes state/channels from the schema, resumes
    /// from the latest checkpoint in `invocation`'s lineage when a saver is
    /// configured and one exists, and otherwise seeds the implicit
    /// `Start -> entryPoint` branch channel so the first `planStep` fires.
    async fn startup(
        &self,
        initial_state: State,
        invocation: &Invocation,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<ExecutionContext> {
        let mut ctx = ExecutionContext::new(Arc::clone(&self.graph), invocation.id.clone(), emitter);

        let schema = self.graph.schema();
        let mut state = schema.apply_update(&schema.initial_state(), &initial_state);

        let mut channels: FxHashMap<String, Channel> = FxHashMap::default();
        for name in schema.field_names() {
            channels.insert(
                name.to_string(),
                Channel::new(state.get(name).cloned().unwrap_or(Value::Null)),
            );
        }
        for name in self.graph.all_trigger_channels() {
            channels.entry(name).or_insert_with(Channel::default);
        }

        let mut resumed = false;
        let mut resumed_step = None;

        if let Some(saver) = &self.saver {
            let config = CheckpointConfig::new(invocation.id.clone());
            if let Some(tuple) = saver.get_tuple(&config).await? {
                let checkpoint = tuple.checkpoint;
                for (name, value) in &checkpoint.channel_values {
                    let channel = channels.entry(name.clone()).or_default();
                    channel.update(std::slice::from_ref(value), -1);
                    if let Some(version) = checkpoint.channel_versions.get(name) {
                        channel.set_version(*version);
                    }
                    if let Some(field) = schema.field(name) {
                        let _ = field;
                        state.insert(name.clone(), value.clone());
                    }
                }
                *ctx.versions_seen.write() = checkpoint.versions_seen.clone();
                if !checkpoint.next_nodes.is_empty() {
                    let mut pending = ctx.pending_tasks.lock();
                    for (i, id) in checkpoint.next_nodes.iter().enumerate() {
                        pending.push_back(Task::new(format!("resume-{id}-{i}"), NodeKind::decode(id)));
                    }
                }
                resumed = true;
                resumed_step = Some(tuple.metadata.step.max(0) as u64);
                ctx.resumed = true;
                *ctx.last_checkpoint.lock() =
                    Some(config.with_checkpoint_id(checkpoint.id.clone()));
            }
        }

        if !resumed {
            let entry_channel = crate::graph::branch_channel(self.graph.entry_point());
            let channel = channels.entry(entry_channel).or_default();
            channel.update(&[Value::String("update".to_string())], -1);
        }

        *ctx.state.write() = state;
        *ctx.channels.write() = channels;
        ctx.resumed = resumed;
        ctx.resumed_step = resumed_step;

        Ok(ctx)
    }
}

enum StepOutcome {
    Continue,
    Done,
}

#[allow(clippy::too_many_arguments)]
async fn execute_single_task(
    ctx: Arc<ExecutionContext>,
    node: Arc<dyn crate::node::Node>,
    task: Task,
    step: u64,
    node_timeout: Option<Duration>,
    retry_policies: Vec<RetryPolicy>,
    cache: Option<Arc<dyn Cache>>,
    cache_policy: Option<CachePolicy>,
    graph_version: Option<String>,
) -> std::result::Result<TaskResult, (Task, NodeError)> {
    ctx.emit(Event::NodeStart {
        node_id: task.node_id.encode(),
        task_id: task.id.clone(),
        step,
    });

    let base_input = task
        .input_overlay
        .clone()
        .unwrap_or_else(|| ctx.state.read().clone());

    if let (Some(cache), Some(policy)) = (&cache, &cache_policy) {
        let key_fields: Vec<&str> = policy.key_fields.iter().map(String::as_str).collect();
        if let Ok(key) = crate::canonical::content_hash(&base_input, &[], &key_fields) {
            let namespace = crate::cache::namespace(&task.node_id.encode(), graph_version.as_deref());
            if let Some(cached) = cache.get(&namespace, &key) {
                if let Ok(update) = serde_json::from_value::<State>(cached) {
                    ctx.emit(Event::NodeComplete {
                        node_id: task.node_id.encode(),
                        task_id: task.id.clone(),
                        step,
                        cache_hit: true,
                    });
                    return Ok(TaskResult::Output {
                        task,
                        output: NodeOutput::State(update),
                    });
                }
            }
        }
    }

    let mut attempt: u32 = 1;
    let started = Instant::now();
    loop {
        let mut input = base_input.clone();
        input.insert(
            state::CURRENT_NODE_ID_KEY.to_string(),
            Value::String(task.node_id.encode()),
        );
        input.insert(
            state::EXEC_CONTEXT_KEY.to_string(),
            serde_json::json!({ "task_id": task.id, "step": step }),
        );
        let node_ctx = NodeContext::new(task.node_id.clone(), task.id.clone(), step, ctx.emitter.clone());
        let run_future = node.run(node_ctx, input);

        let outcome = match node_timeout {
            Some(limit) => match tokio::time::timeout(limit, run_future).await {
                Ok(result) => result,
                Err(_) => Err(NodeError::Timeout(limit)),
            },
            None => run_future.await,
        };

        match outcome {
            Ok(output) => {
                ctx.emit(Event::NodeComplete {
                    node_id: task.node_id.encode(),
                    task_id: task.id.clone(),
                    step,
                    cache_hit: false,
                });
                if let (Some(cache), Some(policy), NodeOutput::State(update)) =
                    (&cache, &cache_policy, &output)
                {
                    let key_fields: Vec<&str> = policy.key_fields.iter().map(String::as_str).collect();
                    if let Ok(key) = crate::canonical::content_hash(&base_input, &[], &key_fields) {
                        let namespace =
                            crate::cache::namespace(&task.node_id.encode(), graph_version.as_deref());
                        if let Ok(value) = serde_json::to_value(update) {
                            cache.set(&namespace, &key, value, policy.ttl);
                        }
                    }
                }
                return Ok(TaskResult::Output { task, output });
            }
            Err(mut error) => {
                if let NodeError::Interrupt(ref mut signal) = error {
                    signal.attach_context(task.node_id.clone(), task.id.clone(), step);
                    ctx.emit(Event::PregelInterrupt {
                        step,
                        node_id: task.node_id.encode(),
                        task_id: task.id.clone(),
                        value: signal.value.clone(),
                    });
                    return Ok(TaskResult::Interrupted {
                        task,
                        signal: signal.clone(),
                    });
                }

                ctx.emit(Event::NodeError {
                    node_id: task.node_id.encode(),
                    task_id: task.id.clone(),
                    step,
                    message: error.to_string(),
                });

                let Some(policy) = retry::select_policy(&retry_policies, &error) else {
                    return Err((task, error));
                };
                if !policy.allows_attempt(attempt + 1, started.elapsed()) {
                    return Err((task, error));
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt + 1)).await;
                attempt += 1;
            }
        }
    }
}

fn command_to_value(command: &Command) -> Value {
    let mut object = serde_json::Map::new();
    if let Some(resume) = &command.resume {
        object.insert("resume".to_string(), resume.clone());
    }
    if let Some(resume_map) = &command.resume_map {
        object.insert(
            "resume_map".to_string(),
            serde_json::to_value(resume_map).unwrap_or(Value::Null),
        );
    }
    if let Some(update) = &command.update {
        object.insert(
            "update".to_string(),
            Value::Object(update.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        );
    }
    Value::Object(object)
}

fn build_event_bus(config: &ExecutorConfig) -> EventBus {
    use crate::event_bus::{MemorySink, StdOutSink};

    let mut sinks: Vec<Box<dyn crate::event_bus::EventSink>> = Vec::new();
    for sink in config.event_bus.sinks() {
        match sink {
            SinkConfig::StdOut => sinks.push(Box::new(StdOutSink::default())),
            SinkConfig::Memory => sinks.push(Box::new(MemorySink::new())),
        }
    }
    if sinks.is_empty() {
        sinks.push(Box::new(StdOutSink::default()));
    }
    EventBus::with_capacity(sinks, config.event_bus.buffer_capacity())
}
