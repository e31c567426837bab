//! `CheckpointManager` — the high-level lineage/branch/fork API wrapping a
//! [`Saver`] (spec §4.E).
//!
//! No teacher equivalent (`Idleness76-Weavegraph`'s `AppRunner` calls
//! `Checkpointer::save`/`load_latest` directly; there is no lineage, no
//! branching, no tree view). Grounded on the teacher's `restore_session_state`
//! free function for the "rehydrate a session from a checkpoint" idiom, and
//! on `AppRunner`'s `#[instrument(..., err)]` style for the public async API.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::model::{
    CheckpointConfig, CheckpointMetadata, CheckpointSource, CheckpointTuple, ListFilter,
};
use super::saver::{Saver, SaverError};

pub type Result<T> = std::result::Result<T, SaverError>;

/// One node in a lineage's checkpoint tree (spec §4.E: "build-tree (nodes
/// keyed by checkpoint id, children sorted by timestamp, root = oldest
/// orphan)").
#[derive(Clone, Debug)]
pub struct CheckpointTreeNode {
    pub checkpoint_id: String,
    pub parent_checkpoint_id: Option<String>,
    pub children: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct CheckpointTree {
    pub nodes: FxHashMap<String, CheckpointTreeNode>,
    pub root: Option<String>,
}

/// Wraps a [`Saver`] with the lineage/resume/branch/fork operations spec
/// §4.E's `CheckpointManager` describes.
pub struct CheckpointManager {
    saver: Arc<dyn Saver>,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(saver: Arc<dyn Saver>) -> Self {
        Self { saver }
    }

    #[must_use]
    pub fn saver(&self) -> &Arc<dyn Saver> {
        &self.saver
    }

    /// Looks up a checkpoint to resume from: the named one if `config`
    /// carries a `checkpoint_id`, else the latest in its lineage/namespace.
    pub async fn resume(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        self.saver.get_tuple(config).await
    }

    pub async fn list(
        &self,
        config: &CheckpointConfig,
        filter: ListFilter,
    ) -> Result<Vec<CheckpointTuple>> {
        self.saver.list(config, filter).await
    }

    pub async fn latest(
        &self,
        lineage_id: &str,
        checkpoint_ns: &str,
    ) -> Result<Option<CheckpointTuple>> {
        self.saver
            .get_tuple(&CheckpointConfig::new(lineage_id).with_namespace(checkpoint_ns))
            .await
    }

    /// Jumps to a specific checkpoint by id within the given lineage/namespace.
    pub async fn goto(
        &self,
        lineage_id: &str,
        checkpoint_ns: &str,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointTuple>> {
        self.saver
            .get_tuple(
                &CheckpointConfig::new(lineage_id)
                    .with_namespace(checkpoint_ns)
                    .with_checkpoint_id(checkpoint_id),
            )
            .await
    }

    /// Forks `source` into a fresh checkpoint in the *same* lineage (spec
    /// §4.E: "branch-within-lineage").
    pub async fn branch_within_lineage(
        &self,
        source: &CheckpointConfig,
    ) -> Result<CheckpointConfig> {
        let tuple = self.saver.get_tuple(source).await?.ok_or_else(|| {
            SaverError::NotFound {
                lineage_id: source.lineage_id.clone(),
                checkpoint_ns: source.checkpoint_ns.clone(),
            }
        })?;
        let new_id = Uuid::new_v4().to_string();
        let forked = tuple.checkpoint.fork(new_id);
        let mut metadata = CheckpointMetadata {
            source: Some(CheckpointSource::Fork),
            step: tuple.metadata.step,
            ..Default::default()
        };
        metadata.extra = serde_json::json!({
            "source_lineage_id": source.lineage_id,
            "source_checkpoint_id": tuple.checkpoint.id,
            "source_checkpoint_ns": source.checkpoint_ns,
        });
        let new_config = source.clone().with_checkpoint_id(forked.id.clone());
        self.saver
            .put_full(super::model::PutFullRequest {
                config: new_config,
                checkpoint: forked,
                metadata,
                new_versions: FxHashMap::default(),
                pending_writes: tuple.pending_writes,
            })
            .await
    }

    /// Forks `source` into a brand-new lineage (spec §4.E:
    /// "branch-to-new-lineage"), recording the source lineage/checkpoint/
    /// namespace in the new checkpoint's metadata extra.
    pub async fn branch_to_new_lineage(
        &self,
        source: &CheckpointConfig,
        new_lineage_id: impl Into<String>,
    ) -> Result<CheckpointConfig> {
        let tuple = self.saver.get_tuple(source).await?.ok_or_else(|| {
            SaverError::NotFound {
                lineage_id: source.lineage_id.clone(),
                checkpoint_ns: source.checkpoint_ns.clone(),
            }
        })?;
        let new_id = Uuid::new_v4().to_string();
        let mut forked = tuple.checkpoint.fork(new_id);
        forked.parent_checkpoint_id = None;
        let new_lineage_id = new_lineage_id.into();
        let mut metadata = CheckpointMetadata {
            source: Some(CheckpointSource::Fork),
            step: tuple.metadata.step,
            ..Default::default()
        };
        metadata.extra = serde_json::json!({
            "source_lineage_id": source.lineage_id,
            "source_checkpoint_id": tuple.checkpoint.id,
            "source_checkpoint_ns": source.checkpoint_ns,
        });
        let new_config = CheckpointConfig::new(new_lineage_id)
            .with_namespace(source.checkpoint_ns.clone())
            .with_checkpoint_id(forked.id.clone());
        self.saver
            .put_full(super::model::PutFullRequest {
                config: new_config,
                checkpoint: forked,
                metadata,
                new_versions: FxHashMap::default(),
                pending_writes: tuple.pending_writes,
            })
            .await
    }

    /// Resolves the parent of `config`'s checkpoint, falling back to the
    /// checkpoint's own `metadata.parents[checkpoint_ns]` entry when the
    /// in-namespace `parent_checkpoint_id` is absent (spec §4.E:
    /// "get-parent (cross-namespace fallback)").
    pub async fn get_parent(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let Some(tuple) = self.saver.get_tuple(config).await? else {
            return Ok(None);
        };
        if let Some(parent_id) = &tuple.checkpoint.parent_checkpoint_id {
            let parent_config = config.clone().with_checkpoint_id(parent_id.clone());
            return self.saver.get_tuple(&parent_config).await;
        }
        if let Some(parent_id) = tuple.metadata.parents.get(&config.checkpoint_ns) {
            let parent_config = config.clone().with_checkpoint_id(parent_id.clone());
            return self.saver.get_tuple(&parent_config).await;
        }
        Ok(None)
    }

    /// Every checkpoint directly forked/stepped from `config`'s checkpoint.
    pub async fn list_children(&self, config: &CheckpointConfig) -> Result<Vec<CheckpointTuple>> {
        let Some(checkpoint_id) = &config.checkpoint_id else {
            return Ok(Vec::new());
        };
        let all = self
            .saver
            .list(
                &config.clone().with_checkpoint_id(String::new()),
                ListFilter::default(),
            )
            .await?;
        Ok(all
            .into_iter()
            .filter(|t| t.checkpoint.parent_checkpoint_id.as_deref() == Some(checkpoint_id))
            .collect())
    }

    /// Builds the full checkpoint tree for a lineage/namespace: nodes keyed
    /// by checkpoint id, children sorted by timestamp, root = oldest orphan
    /// (spec §4.E).
    pub async fn build_tree(
        &self,
        lineage_id: &str,
        checkpoint_ns: &str,
    ) -> Result<CheckpointTree> {
        let config = CheckpointConfig::new(lineage_id).with_namespace(checkpoint_ns);
        let mut history = self.saver.list(&config, ListFilter::default()).await?;
        history.sort_by_key(|t| t.checkpoint.timestamp);

        let mut tree = CheckpointTree::default();
        for tuple in &history {
            tree.nodes.insert(
                tuple.checkpoint.id.clone(),
                CheckpointTreeNode {
                    checkpoint_id: tuple.checkpoint.id.clone(),
                    parent_checkpoint_id: tuple.checkpoint.parent_checkpoint_id.clone(),
                    children: Vec::new(),
                },
            );
        }
        for tuple in &history {
            if let Some(parent_id) = &tuple.checkpoint.parent_checkpoint_id {
                if let Some(parent) = tree.nodes.get_mut(parent_id) {
                    parent.children.push(tuple.checkpoint.id.clone());
                }
            }
        }
        tree.root = history
            .iter()
            .find(|t| t.checkpoint.parent_checkpoint_id.is_none())
            .map(|t| t.checkpoint.id.clone());
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::model::{Checkpoint, CheckpointMetadata, PutRequest};
    use crate::checkpoint::saver::InMemorySaver;

    fn manager() -> CheckpointManager {
        CheckpointManager::new(Arc::new(InMemorySaver::new()))
    }

    #[tokio::test]
    async fn branch_within_lineage_keeps_lineage_id() {
        let manager = manager();
        let cfg = CheckpointConfig::new("l1");
        manager
            .saver()
            .put(PutRequest {
                config: cfg.clone(),
                checkpoint: Checkpoint::new("cp-1"),
                metadata: CheckpointMetadata::default(),
                new_versions: FxHashMap::default(),
            })
            .await
            .unwrap();

        let branched = manager.branch_within_lineage(&cfg).await.unwrap();
        assert_eq!(branched.lineage_id, "l1");
        assert_ne!(branched.checkpoint_id, Some("cp-1".to_string()));
    }

    #[tokio::test]
    async fn branch_to_new_lineage_has_no_parent() {
        let manager = manager();
        let cfg = CheckpointConfig::new("l1");
        manager
            .saver()
            .put(PutRequest {
                config: cfg.clone(),
                checkpoint: Checkpoint::new("cp-1"),
                metadata: CheckpointMetadata::default(),
                new_versions: FxHashMap::default(),
            })
            .await
            .unwrap();

        let branched = manager.branch_to_new_lineage(&cfg, "l2").await.unwrap();
        assert_eq!(branched.lineage_id, "l2");
        let tuple = manager.resume(&branched).await.unwrap().unwrap();
        assert!(tuple.checkpoint.parent_checkpoint_id.is_none());
        assert_eq!(
            tuple.metadata.extra["source_lineage_id"],
            serde_json::json!("l1")
        );
    }

    #[tokio::test]
    async fn build_tree_roots_at_oldest_orphan() {
        let manager = manager();
        let cfg = CheckpointConfig::new("l1");
        manager
            .saver()
            .put(PutRequest {
                config: cfg.clone(),
                checkpoint: Checkpoint::new("root"),
                metadata: CheckpointMetadata::default(),
                new_versions: FxHashMap::default(),
            })
            .await
            .unwrap();
        let root = manager.resume(&cfg).await.unwrap().unwrap().checkpoint;
        std::thread::sleep(std::time::Duration::from_millis(2));
        manager
            .saver()
            .put(PutRequest {
                config: cfg.clone(),
                checkpoint: root.fork("child"),
                metadata: CheckpointMetadata::default(),
                new_versions: FxHashMap::default(),
            })
            .await
            .unwrap();

        let tree = manager.build_tree("l1", "").await.unwrap();
        assert_eq!(tree.root, Some("root".to_string()));
        assert_eq!(tree.nodes["root"].children, vec!["child".to_string()]);
    }
}
