//! DAG bookkeeping: parent edges, selected parent, GHOSTDAG annotation.
//!
//! Every failure here is fatal to the call. The annotation is computed by the
//! node; this module only records it.

use log::{debug, warn};
use std::sync::Arc;

use crate::domain::{is_valid_hash, GhostdagData, ValidationError};
use crate::traits::{BlockParentsReader, BlueScoreReader, DagInfoReader, DagWriter};
use crate::{SyncError, SyncResult};

pub struct DagIndexer<N, D> {
    node: Arc<N>,
    dag: Arc<D>,
}

impl<N, D> DagIndexer<N, D>
where
    N: BlockParentsReader + DagInfoReader + BlueScoreReader,
    D: DagWriter,
{
    pub fn new(node: Arc<N>, dag: Arc<D>) -> Self {
        Self { node, dag }
    }

    /// Records one edge per parent of `block_hash` and returns how many were
    /// written. Genesis has no parents and writes nothing.
    ///
    /// The edge to `selected_parent` is flagged as selected; without one the
    /// first parent reported by the node is used.
    pub async fn index_relationships(
        &self,
        block_hash: &str,
        selected_parent: Option<&str>,
    ) -> SyncResult<usize> {
        let parents = self.node.get_block_parents(block_hash).await?;
        let Some(first) = parents.first() else {
            debug!("Block {} has no parents", block_hash);
            return Ok(0);
        };
        if let Some(bad) = parents.iter().find(|p| !is_valid_hash(p)) {
            return Err(ValidationError::InvalidHash {
                field: "parent",
                value: bad.clone(),
            }
            .into());
        }

        let selected = selected_parent.unwrap_or(first);
        if !parents.iter().any(|p| p == selected) {
            warn!(
                "Selected parent {} of {} is not among its {} parents",
                selected,
                block_hash,
                parents.len()
            );
        }

        for parent in &parents {
            self.dag
                .save_dag_relationship(block_hash, parent, parent == selected)
                .await?;
        }
        self.dag.set_selected_parent(block_hash, selected).await?;

        debug!(
            "Recorded {} parent edges for {} (selected {})",
            parents.len(),
            block_hash,
            selected
        );
        Ok(parents.len())
    }

    /// Fetches DAG info and blue score for the block and upserts its
    /// annotation. The selected parent is left to [`Self::index_relationships`].
    pub async fn index_ghostdag(&self, block_hash: &str, height: u64) -> SyncResult<GhostdagData> {
        let (info, blue_score) = tokio::try_join!(
            self.node.get_dag_info(block_hash),
            self.node.get_blue_score(Some(height)),
        )?;
        let info = info.ok_or_else(|| SyncError::NotFound(format!("DAG info for {}", block_hash)))?;

        let data = GhostdagData {
            block_hash: block_hash.to_string(),
            blue_score,
            blue_work: info.blue_work,
            selected_parent: None,
            merge_set_blues: info.merge_set_blues,
            merge_set_reds: info.merge_set_reds,
            complete: true,
        };
        self.dag.save_ghostdag_data(&data).await?;
        Ok(data)
    }
}
