//! Checkpoint model, `Saver` contract, and lineage/fork management (spec
//! component E).
//!
//! Grounded on the teacher's `runtimes::checkpointer` (`Checkpoint`,
//! `Checkpointer`, `InMemoryCheckpointer`), generalized from a flat
//! one-checkpoint-per-session model to the lineage/namespace/history model
//! spec §4.E and §3 describe: a [`Saver`] stores [`model::CheckpointTuple`]
//! history per `(lineage_id, checkpoint_ns)`, and [`manager::CheckpointManager`]
//! layers resume/branch/fork/tree operations on top.

pub mod manager;
pub mod model;
pub mod saver;

pub use manager::{CheckpointManager, CheckpointTree, CheckpointTreeNode};
pub use model::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, CheckpointTuple,
    InterruptState, ListFilter, PendingWrite, PutFullRequest, PutRequest, PutWritesRequest,
};
pub use saver::{InMemorySaver, Saver, SaverError};
