//! The `Saver` trait and its in-memory implementation (spec §4.E).
//!
//! Grounded on the teacher's `Checkpointer` trait
//! (`runtimes::checkpointer::Checkpointer`/`InMemoryCheckpointer`): same
//! `async_trait` + `parking_lot`-free `std::sync::RwLock` idiom, same
//! `thiserror`+`miette::Diagnostic` error enum shape
//! (`NotFound`/`Backend`/`Other`). Generalized from "one checkpoint per
//! session id, no history" to the full lineage/namespace/history model spec
//! §4.E describes: `GetTuple`, `List`, `Put`, `PutWrites`, `PutFull`,
//! `DeleteLineage`, `Close`.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::RwLock;
use thiserror::Error;

use super::model::{
    CheckpointConfig, CheckpointTuple, ListFilter, PutFullRequest, PutRequest, PutWritesRequest,
};

#[derive(Debug, Error, Diagnostic)]
pub enum SaverError {
    #[error("no checkpoint found for lineage {lineage_id} (namespace {checkpoint_ns:?})")]
    #[diagnostic(code(bspgraph::checkpoint::not_found))]
    NotFound {
        lineage_id: String,
        checkpoint_ns: String,
    },

    #[error("checkpoint backend error: {message}")]
    #[diagnostic(code(bspgraph::checkpoint::backend))]
    Backend { message: String },

    #[error("checkpoint saver error: {message}")]
    #[diagnostic(code(bspgraph::checkpoint::other))]
    Other { message: String },
}

pub type Result<T> = std::result::Result<T, SaverError>;

/// Durable storage contract for checkpoints (spec §4.E). Implementations
/// must make `put_full` atomic: the checkpoint and its pending writes either
/// both land or neither does — the executor relies on this for every step
/// and interrupt checkpoint.
#[async_trait]
pub trait Saver: Send + Sync {
    /// Empty `checkpoint_id` on `config` means "latest in this lineage and
    /// namespace".
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// Newest-first history for a lineage/namespace, most-recent-first.
    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: ListFilter,
    ) -> Result<Vec<CheckpointTuple>>;

    /// Stores a checkpoint alone (no pending writes); returns the config
    /// echoing back the stored checkpoint's id.
    async fn put(&self, req: PutRequest) -> Result<CheckpointConfig>;

    /// Appends pending writes to an already-stored checkpoint.
    async fn put_writes(&self, req: PutWritesRequest) -> Result<()>;

    /// Atomically stores a checkpoint and its pending writes together.
    async fn put_full(&self, req: PutFullRequest) -> Result<CheckpointConfig>;

    /// Deletes every checkpoint in every namespace of `lineage_id`.
    async fn delete_lineage(&self, lineage_id: &str) -> Result<()>;

    /// Releases backend resources (connections, file handles). The
    /// in-memory backend is a no-op.
    async fn close(&self) -> Result<()>;
}

/// `(lineage_id, checkpoint_ns)` key for the in-memory history map.
type LineageKey = (String, String);

#[derive(Default)]
struct Lineage {
    /// Ordered oldest-to-newest.
    history: Vec<CheckpointTuple>,
}

/// Simple in-memory `Saver`. Keeps full per-namespace history (unlike the
/// teacher's `InMemoryCheckpointer`, which keeps only the latest snapshot —
/// spec §4.E's `List`/`GetParent`/`ListChildren` require history to exist at
/// all).
#[derive(Default)]
pub struct InMemorySaver {
    lineages: RwLock<FxHashMap<LineageKey, Lineage>>,
}

impl InMemorySaver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(config: &CheckpointConfig) -> LineageKey {
        (config.lineage_id.clone(), config.checkpoint_ns.clone())
    }
}

#[async_trait]
impl Saver for InMemorySaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let lineages = self.lineages.read().map_err(poisoned)?;
        let Some(lineage) = lineages.get(&Self::key(config)) else {
            return Ok(None);
        };
        let found = match &config.checkpoint_id {
            Some(id) => lineage.history.iter().find(|t| &t.checkpoint.id == id),
            None => lineage.history.last(),
        };
        Ok(found.cloned())
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: ListFilter,
    ) -> Result<Vec<CheckpointTuple>> {
        let lineages = self.lineages.read().map_err(poisoned)?;
        let Some(lineage) = lineages.get(&Self::key(config)) else {
            return Ok(Vec::new());
        };

        let mut out: Vec<CheckpointTuple> = lineage.history.iter().rev().cloned().collect();
        if let Some(before_id) = &filter.before {
            if let Some(pos) = out.iter().position(|t| &t.checkpoint.id == before_id) {
                out = out.split_off(pos + 1);
            }
        }
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn put(&self, req: PutRequest) -> Result<CheckpointConfig> {
        let mut lineages = self.lineages.write().map_err(poisoned)?;
        let key = Self::key(&req.config);
        let checkpoint_id = req.checkpoint.id.clone();
        let parent_config = parent_config_of(&req.config, &req.checkpoint);
        lineages.entry(key).or_default().history.push(CheckpointTuple {
            config: req.config.clone(),
            checkpoint: req.checkpoint,
            metadata: req.metadata,
            parent_config,
            pending_writes: Vec::new(),
        });
        Ok(req.config.with_checkpoint_id(checkpoint_id))
    }

    async fn put_writes(&self, req: PutWritesRequest) -> Result<()> {
        let mut lineages = self.lineages.write().map_err(poisoned)?;
        let lineage = lineages
            .get_mut(&Self::key(&req.config))
            .ok_or_else(|| SaverError::NotFound {
                lineage_id: req.config.lineage_id.clone(),
                checkpoint_ns: req.config.checkpoint_ns.clone(),
            })?;
        let target = match &req.config.checkpoint_id {
            Some(id) => lineage.history.iter_mut().find(|t| &t.checkpoint.id == id),
            None => lineage.history.last_mut(),
        };
        let target = target.ok_or_else(|| SaverError::NotFound {
            lineage_id: req.config.lineage_id.clone(),
            checkpoint_ns: req.config.checkpoint_ns.clone(),
        })?;
        target.pending_writes.extend(req.writes);
        Ok(())
    }

    async fn put_full(&self, req: PutFullRequest) -> Result<CheckpointConfig> {
        let mut lineages = self.lineages.write().map_err(poisoned)?;
        let key = Self::key(&req.config);
        let checkpoint_id = req.checkpoint.id.clone();
        let parent_config = parent_config_of(&req.config, &req.checkpoint);
        lineages.entry(key).or_default().history.push(CheckpointTuple {
            config: req.config.clone(),
            checkpoint: req.checkpoint,
            metadata: req.metadata,
            parent_config,
            pending_writes: req.pending_writes,
        });
        Ok(req.config.with_checkpoint_id(checkpoint_id))
    }

    async fn delete_lineage(&self, lineage_id: &str) -> Result<()> {
        let mut lineages = self.lineages.write().map_err(poisoned)?;
        lineages.retain(|(lid, _), _| lid != lineage_id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn parent_config_of(
    config: &CheckpointConfig,
    checkpoint: &crate::checkpoint::model::Checkpoint,
) -> Option<CheckpointConfig> {
    checkpoint
        .parent_checkpoint_id
        .clone()
        .map(|id| config.clone().with_checkpoint_id(id))
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> SaverError {
    SaverError::Backend {
        message: "lock poisoned".to_string(),
    }
}
