/// Conversation metadata and status repositories.
///
/// Conversation status is unique per `group_id` and upserted: a duplicate-key
/// race on insert is caught and translated into a find-and-update, so the
/// caller always sees a successful write and the row keeps its original id.
/// Updates are last-write-wins per field: absent fields in the incoming
/// record leave the stored value untouched, and no monotonicity is enforced
/// on the window timestamps.
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::StorageMode;
use crate::document::{Collection, DocumentStore, DualDocumentProxy};
use crate::error::EngramError;
use crate::kv::KvStorage;
use crate::models::{
    ConversationMeta, ConversationStatus, CONVERSATION_META_SCHEMA, CONVERSATION_STATUS_SCHEMA,
};
use crate::query::{Filter, Query};

/// Repository over conversation metadata.
pub struct ConversationMetaRepository {
    proxy: DualDocumentProxy<ConversationMeta>,
}

impl ConversationMetaRepository {
    /// Build against the shared document store and primary KV.
    pub fn new(store: &DocumentStore, kv: Arc<dyn KvStorage>, mode: StorageMode) -> Self {
        let collection = store.collection(&CONVERSATION_META_SCHEMA);
        Self {
            proxy: DualDocumentProxy::new(collection, kv, mode),
        }
    }

    /// The backing collection (validator / test surface).
    pub fn collection(&self) -> &Arc<Collection> {
        self.proxy.collection()
    }

    /// Register a conversation group.
    ///
    /// Scene validation is fatal: an unknown scene is a caller bug, not a
    /// transport hiccup, so the error propagates.
    pub async fn create(
        &self,
        mut meta: ConversationMeta,
    ) -> Result<ConversationMeta, EngramError> {
        self.proxy.insert(&mut meta).await?;
        Ok(meta)
    }

    /// Fetch the metadata of one group.
    pub async fn get_by_group_id(&self, group_id: &str) -> Option<ConversationMeta> {
        let query = Query::new().filter(Filter::eq("group_id", group_id));
        match self.proxy.find_one(&query).await {
            Ok(meta) => meta,
            Err(e) => {
                error!(group_id, error = %e, "conversation meta lookup failed");
                None
            }
        }
    }

    /// Every group registered under one scene.
    pub async fn find_by_scene(&self, scene: &str, limit: usize) -> Vec<ConversationMeta> {
        let query = Query::new()
            .filter(Filter::eq("scene", scene))
            .sort_by("created_at", true)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(metas) => metas,
            Err(e) => {
                error!(scene, error = %e, "scene query failed");
                Vec::new()
            }
        }
    }

    /// Remove a group's metadata.
    pub async fn delete_by_group_id(&self, group_id: &str) -> usize {
        let query = Query::new().filter(Filter::eq("group_id", group_id));
        match self.proxy.delete_many(&query).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(group_id, error = %e, "conversation meta delete failed");
                0
            }
        }
    }
}

/// Repository over conversation status rows.
pub struct ConversationStatusRepository {
    proxy: DualDocumentProxy<ConversationStatus>,
}

impl ConversationStatusRepository {
    /// Build against the shared document store and primary KV.
    pub fn new(store: &DocumentStore, kv: Arc<dyn KvStorage>, mode: StorageMode) -> Self {
        let collection = store.collection(&CONVERSATION_STATUS_SCHEMA);
        Self {
            proxy: DualDocumentProxy::new(collection, kv, mode),
        }
    }

    /// The backing collection (validator / test surface).
    pub fn collection(&self) -> &Arc<Collection> {
        self.proxy.collection()
    }

    /// Fetch the status row of one group.
    pub async fn get_by_group_id(&self, group_id: &str) -> Option<ConversationStatus> {
        let query = Query::new().filter(Filter::eq("group_id", group_id));
        match self.proxy.find_one(&query).await {
            Ok(status) => status,
            Err(e) => {
                error!(group_id, error = %e, "conversation status lookup failed");
                None
            }
        }
    }

    /// Insert-or-update the status row for a group.
    ///
    /// At most one row per group ever exists; the id is stable across
    /// updates. Returns the stored row.
    pub async fn upsert(&self, mut status: ConversationStatus) -> Option<ConversationStatus> {
        match self.proxy.insert(&mut status).await {
            Ok(()) => {
                debug!(group_id = %status.group_id, "conversation status inserted");
                return Some(status);
            }
            Err(EngramError::DuplicateKey { .. }) => {
                // Lost the insert race (or the row predates us): merge onto
                // the existing row instead.
            }
            Err(e) => {
                error!(group_id = %status.group_id, error = %e, "conversation status insert failed");
                return None;
            }
        }

        let mut existing = self.get_by_group_id(&status.group_id).await?;
        merge_status(&mut existing, &status);
        match self.proxy.save(&mut existing).await {
            Ok(true) => {
                info!(group_id = %existing.group_id, "conversation status updated");
                Some(existing)
            }
            Ok(false) => {
                error!(group_id = %existing.group_id, "conversation status vanished during upsert");
                None
            }
            Err(e) => {
                error!(group_id = %existing.group_id, error = %e, "conversation status update failed");
                None
            }
        }
    }

    /// Remove the status row of one group.
    pub async fn delete_by_group_id(&self, group_id: &str) -> bool {
        let query = Query::new().filter(Filter::eq("group_id", group_id));
        match self.proxy.delete_many(&query).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                error!(group_id, error = %e, "conversation status delete failed");
                false
            }
        }
    }
}

/// Last-write-wins per field: only fields the incoming row actually carries
/// overwrite the stored row.
fn merge_status(existing: &mut ConversationStatus, incoming: &ConversationStatus) {
    if incoming.old_msg_start_time.is_some() {
        existing.old_msg_start_time = incoming.old_msg_start_time;
    }
    if incoming.new_msg_start_time.is_some() {
        existing.new_msg_start_time = incoming.new_msg_start_time;
    }
    if incoming.last_memcell_time.is_some() {
        existing.last_memcell_time = incoming.last_memcell_time;
    }
}
