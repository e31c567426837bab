//! Checkpoint data model (spec §3: `Checkpoint`, `PendingWrite`,
//! `CheckpointTuple`; spec §4.E: `Fork`/`Copy` invariants).
//!
//! No direct teacher equivalent — `Idleness76-Weavegraph`'s
//! `runtimes::checkpointer::Checkpoint` stores a flat `SessionState` snapshot
//! with no lineage/namespace/fork concept at all. Grounded on that file's
//! general shape (`chrono::Utc` timestamps, `rustc_hash::FxHashMap`,
//! `#[must_use]` constructors) but the fields themselves come from spec §3's
//! literal data model.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source tag recorded on a checkpoint's metadata (spec §4.F: "Checkpoint
/// source tags: input | loop | update | fork | interrupt").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    Input,
    Loop,
    Update,
    Fork,
    Interrupt,
}

/// A node's pause mid-run (spec §3: `Checkpoint.interruptState`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterruptState {
    pub node_id: String,
    pub task_id: String,
    pub value: Value,
    pub step: u64,
    pub path: Option<String>,
}

/// A durable snapshot of run state at a super-step boundary (spec §3).
///
/// `Fork` mints a new id, sets `parent_checkpoint_id` to the source's id, and
/// refreshes the timestamp while deep-copying every other field; `Copy`
/// preserves `id`/`timestamp` (spec §3 invariant).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub channel_values: FxHashMap<String, Value>,
    pub channel_versions: FxHashMap<String, u64>,
    /// `node id -> channel name -> version last seen by that node`.
    pub versions_seen: FxHashMap<String, FxHashMap<String, u64>>,
    pub parent_checkpoint_id: Option<String>,
    pub updated_channels: Vec<String>,
    pub pending_sends: Vec<Value>,
    pub interrupt_state: Option<InterruptState>,
    pub next_nodes: Vec<String>,
    pub next_channels: Vec<String>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            channel_values: FxHashMap::default(),
            channel_versions: FxHashMap::default(),
            versions_seen: FxHashMap::default(),
            parent_checkpoint_id: None,
            updated_channels: Vec::new(),
            pending_sends: Vec::new(),
            interrupt_state: None,
            next_nodes: Vec::new(),
            next_channels: Vec::new(),
        }
    }

    /// Mints a new id, sets `parent_checkpoint_id` to `self.id`, refreshes
    /// the timestamp, and deep-copies every other field (spec §4.E Fork
    /// semantics).
    #[must_use]
    pub fn fork(&self, new_id: impl Into<String>) -> Self {
        Self {
            id: new_id.into(),
            timestamp: Utc::now(),
            parent_checkpoint_id: Some(self.id.clone()),
            channel_values: self.channel_values.clone(),
            channel_versions: self.channel_versions.clone(),
            versions_seen: self.versions_seen.clone(),
            updated_channels: self.updated_channels.clone(),
            pending_sends: self.pending_sends.clone(),
            interrupt_state: self.interrupt_state.clone(),
            next_nodes: self.next_nodes.clone(),
            next_channels: self.next_channels.clone(),
        }
    }
}

/// One pending write appended between checkpoints (spec §3: `PendingWrite`).
/// `sequence` is a process-monotonic counter assigned under the executor's
/// atomic sequence counter, used to replay writes in deterministic order on
/// resume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: String,
    pub channel: String,
    pub value: Value,
    pub sequence: u64,
}

/// Identifies a checkpoint to operate on: `checkpoint_id = None` means
/// "latest in this lineage + namespace" (spec §4.E: `GetTuple`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub lineage_id: String,
    pub checkpoint_ns: String,
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    #[must_use]
    pub fn new(lineage_id: impl Into<String>) -> Self {
        Self {
            lineage_id: lineage_id.into(),
            checkpoint_ns: String::new(),
            checkpoint_id: None,
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.checkpoint_ns = checkpoint_ns.into();
        self
    }

    #[must_use]
    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }
}

/// Metadata stored alongside a checkpoint (spec §3/§4.F).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: Option<CheckpointSource>,
    pub step: i64,
    /// `namespace -> checkpoint id`, used for cross-namespace parent
    /// resolution (spec §4.E: `CheckpointManager` "get-parent (cross-
    /// namespace fallback)").
    pub parents: FxHashMap<String, String>,
    /// Fork/branch provenance: source lineage/checkpoint/namespace (spec
    /// §4.E: "records source lineage/checkpoint/namespace in metadata
    /// extra").
    pub extra: Value,
}

/// What a `Saver::get_tuple`/`list` call returns (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub parent_config: Option<CheckpointConfig>,
    pub pending_writes: Vec<PendingWrite>,
}

/// Request for `Saver::put` (checkpoint alone, no pending writes).
#[derive(Clone, Debug)]
pub struct PutRequest {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub new_versions: FxHashMap<String, u64>,
}

/// Request for `Saver::put_writes` (append pending writes to an existing
/// checkpoint).
#[derive(Clone, Debug)]
pub struct PutWritesRequest {
    pub config: CheckpointConfig,
    pub writes: Vec<PendingWrite>,
}

/// Request for `Saver::put_full` — atomic store of checkpoint + pending
/// writes. "The executor always uses `put_full` for step and interrupt
/// checkpoints" (spec §4.E).
#[derive(Clone, Debug)]
pub struct PutFullRequest {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub new_versions: FxHashMap<String, u64>,
    pub pending_writes: Vec<PendingWrite>,
}

/// Filter accepted by `Saver::list` (spec §4.E: `List(config, filter)`).
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    /// Only return checkpoints strictly older than this one.
    pub before: Option<String>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fork_mints_new_id_and_sets_parent() {
        let mut source = Checkpoint::new("cp-1");
        source
            .channel_values
            .insert("counter".into(), json!(3));
        let forked = source.fork("cp-2");
        assert_eq!(forked.id, "cp-2");
        assert_eq!(forked.parent_checkpoint_id, Some("cp-1".to_string()));
        assert_eq!(forked.channel_values.get("counter"), Some(&json!(3)));
    }

    #[test]
    fn fork_refreshes_timestamp() {
        let source = Checkpoint::new("cp-1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let forked = source.fork("cp-2");
        assert!(forked.timestamp >= source.timestamp);
    }
}
