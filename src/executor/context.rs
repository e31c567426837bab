//! Per-run mutable state (spec §3: `ExecutionContext`).
//!
//! No direct teacher file — `Idleness76-Weavegraph`'s `AppRunner` keeps
//! per-session state in a plain `FxHashMap<String, SessionState>` with no
//! notion of per-resource locking at all (`runtimes::runner::SessionState`).
//! Grounded on spec §5/§9's explicit per-resource mutex discipline
//! ("model per-resource mutex ownership explicitly: RW mutex for exec
//! state, mutex for pendingTasks, mutex for pendingWrites, RW mutex for
//! versionsSeen, per-channel mutex") and on this crate's existing
//! `parking_lot` usage (`cache.rs`, `event_bus/bus.rs`).

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::channel::Channel;
use crate::checkpoint::{CheckpointConfig, InterruptState, PendingWrite};
use crate::event_bus::{Event, EventEmitter};
use crate::graph::CompiledGraph;
use crate::state::State;
use crate::types::NodeKind;

/// One unit of planned work for a super-step (spec §4.F `planStep`).
#[derive(Clone, Debug)]
pub struct Task {
    pub id: String,
    pub node_id: NodeKind,
    /// Pre-merged input this task's node body should see instead of the
    /// shared exec state — the fan-out case (spec §4.F
    /// `executeSingleTask`: "if task Input is itself a State ... use as
    /// base").
    pub input_overlay: Option<State>,
}

impl Task {
    #[must_use]
    pub fn new(id: impl Into<String>, node_id: NodeKind) -> Self {
        Self {
            id: id.into(),
            node_id,
            input_overlay: None,
        }
    }

    #[must_use]
    pub fn with_overlay(mut self, overlay: State) -> Self {
        self.input_overlay = Some(overlay);
        self
    }
}

/// Per-run state: created at `Execute` start, discarded at run end, never
/// shared across concurrent runs (spec §3/§5). Every field owns its own
/// lock rather than sharing one coarse mutex, matching spec §9's
/// "concurrency primitives" note.
pub struct ExecutionContext {
    pub graph: Arc<CompiledGraph>,
    pub invocation_id: String,
    pub emitter: Arc<dyn EventEmitter>,
    pub state: RwLock<State>,
    pub channels: RwLock<FxHashMap<String, Channel>>,
    /// `node id (encoded) -> channel name -> version last seen by that node`
    /// (spec §4.F: version-based triggering on resume).
    pub versions_seen: RwLock<FxHashMap<String, FxHashMap<String, u64>>>,
    pub last_checkpoint: Mutex<Option<CheckpointConfig>>,
    pub pending_tasks: Mutex<VecDeque<Task>>,
    pub pending_writes: Mutex<Vec<PendingWrite>>,
    /// Set when a task interrupts this step; carried into the next
    /// checkpoint save (spec §3 `Checkpoint.interruptState`).
    pub interrupt_state: Mutex<Option<InterruptState>>,
    sequence: AtomicU64,
    pub resumed: bool,
    pub resumed_step: Option<u64>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(graph: Arc<CompiledGraph>, invocation_id: String, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            graph,
            invocation_id,
            emitter,
            state: RwLock::new(State::default()),
            channels: RwLock::new(FxHashMap::default()),
            versions_seen: RwLock::new(FxHashMap::default()),
            last_checkpoint: Mutex::new(None),
            pending_tasks: Mutex::new(VecDeque::new()),
            pending_writes: Mutex::new(Vec::new()),
            interrupt_state: Mutex::new(None),
            sequence: AtomicU64::new(0),
            resumed: false,
            resumed_step: None,
        }
    }

    /// Next process-monotonic write sequence number (spec §5: "each write
    /// gets monotonic sequence under atomic counter for deterministic
    /// replay").
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Best-effort emit for high-frequency events (spec §5: "prefer
    /// drop-on-full for step/channel/node events"). Failures (closed bus,
    /// lagged receiver) are swallowed; a dropped diagnostic is not a run
    /// failure.
    pub fn emit(&self, event: Event) {
        if let Err(err) = self.emitter.emit(event) {
            tracing::debug!(invocation = %self.invocation_id, error = ?err, "dropped event");
        }
    }

    /// Emit for terminal events (spec §5: "block-with-cancel for terminal
    /// completion/error events"). The broadcast-backed emitter never
    /// actually blocks a producer, so this differs from [`Self::emit`] only
    /// in log severity on failure — losing a terminal event is worth a
    /// warning, not a debug line.
    pub fn emit_terminal(&self, event: Event) {
        if let Err(err) = self.emitter.emit(event) {
            tracing::warn!(invocation = %self.invocation_id, error = ?err, "failed to deliver terminal event");
        }
    }
}
