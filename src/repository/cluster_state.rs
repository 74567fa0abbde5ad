/// Cluster-state repository.
///
/// The clustering engine checkpoints its whole incremental state per group;
/// a checkpoint replaces the previous one wholesale, so the upsert here
/// overwrites every state field rather than merging.
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::StorageMode;
use crate::document::{Collection, DocumentStore, DualDocumentProxy};
use crate::error::EngramError;
use crate::kv::KvStorage;
use crate::models::{ClusterState, CLUSTER_STATE_SCHEMA};
use crate::query::{Filter, Query};

/// Repository over cluster-state checkpoints.
pub struct ClusterStateRepository {
    proxy: DualDocumentProxy<ClusterState>,
}

impl ClusterStateRepository {
    /// Build against the shared document store and primary KV.
    pub fn new(store: &DocumentStore, kv: Arc<dyn KvStorage>, mode: StorageMode) -> Self {
        let collection = store.collection(&CLUSTER_STATE_SCHEMA);
        Self {
            proxy: DualDocumentProxy::new(collection, kv, mode),
        }
    }

    /// The backing collection (validator / test surface).
    pub fn collection(&self) -> &Arc<Collection> {
        self.proxy.collection()
    }

    /// Fetch the checkpoint of one group.
    pub async fn get_by_group_id(&self, group_id: &str) -> Option<ClusterState> {
        let query = Query::new().filter(Filter::eq("group_id", group_id));
        match self.proxy.find_one(&query).await {
            Ok(state) => state,
            Err(e) => {
                error!(group_id, error = %e, "cluster state lookup failed");
                None
            }
        }
    }

    /// Insert-or-replace the checkpoint for a group; the row id is stable.
    pub async fn upsert(&self, mut state: ClusterState) -> Option<ClusterState> {
        match self.proxy.insert(&mut state).await {
            Ok(()) => {
                debug!(group_id = %state.group_id, "cluster state inserted");
                return Some(state);
            }
            Err(EngramError::DuplicateKey { .. }) => {}
            Err(e) => {
                error!(group_id = %state.group_id, error = %e, "cluster state insert failed");
                return None;
            }
        }

        let existing = self.get_by_group_id(&state.group_id).await?;
        // A checkpoint is a complete snapshot: adopt the stored identity and
        // overwrite everything else.
        state.id = existing.id;
        state.created_at = existing.created_at;
        match self.proxy.save(&mut state).await {
            Ok(true) => Some(state),
            Ok(false) => {
                error!(group_id = %state.group_id, "cluster state vanished during upsert");
                None
            }
            Err(e) => {
                error!(group_id = %state.group_id, error = %e, "cluster state update failed");
                None
            }
        }
    }

    /// Remove the checkpoint of one group.
    pub async fn delete_by_group_id(&self, group_id: &str) -> bool {
        let query = Query::new().filter(Filter::eq("group_id", group_id));
        match self.proxy.delete_many(&query).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                error!(group_id, error = %e, "cluster state delete failed");
                false
            }
        }
    }
}
