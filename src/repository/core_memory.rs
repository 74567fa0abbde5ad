/// Core-memory repository.
///
/// Core memories are versioned per user: `(user_id, version)` is unique and
/// exactly one version per user carries `is_latest = true`. Appending a new
/// version demotes the previous latest in the same call.
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error};

use crate::config::StorageMode;
use crate::document::{Collection, DocumentStore, DualDocumentProxy};
use crate::kv::KvStorage;
use crate::models::{CoreMemory, CORE_MEMORY_SCHEMA};
use crate::query::{Filter, Query};

/// Repository over versioned core memories.
pub struct CoreMemoryRepository {
    proxy: DualDocumentProxy<CoreMemory>,
}

impl CoreMemoryRepository {
    /// Build against the shared document store and primary KV.
    pub fn new(store: &DocumentStore, kv: Arc<dyn KvStorage>, mode: StorageMode) -> Self {
        let collection = store.collection(&CORE_MEMORY_SCHEMA);
        Self {
            proxy: DualDocumentProxy::new(collection, kv, mode),
        }
    }

    /// The backing collection (validator / test surface).
    pub fn collection(&self) -> &Arc<Collection> {
        self.proxy.collection()
    }

    /// Append a new version for a user and mark it latest.
    ///
    /// Any previous latest version is demoted first; a duplicate
    /// `(user_id, version)` insert fails and leaves the existing rows alone.
    pub async fn append_version(&self, mut memory: CoreMemory) -> Option<CoreMemory> {
        memory.is_latest = Some(true);

        let demote_filters = vec![
            Filter::eq("user_id", memory.user_id.clone()),
            Filter::eq("is_latest", true),
        ];
        let mut demote = Map::new();
        demote.insert("is_latest".to_string(), JsonValue::Bool(false));
        if let Err(e) = self.proxy.update_many(&demote_filters, &demote).await {
            error!(user_id = %memory.user_id, error = %e, "failed to demote latest core memory");
            return None;
        }

        match self.proxy.insert(&mut memory).await {
            Ok(()) => {
                debug!(
                    user_id = %memory.user_id,
                    version = memory.version.as_deref().unwrap_or("<none>"),
                    "core memory version appended"
                );
                Some(memory)
            }
            Err(e) => {
                error!(user_id = %memory.user_id, error = %e, "core memory insert failed");
                None
            }
        }
    }

    /// Fetch the latest version for a user.
    pub async fn get_latest(&self, user_id: &str) -> Option<CoreMemory> {
        let query = Query::new()
            .filter(Filter::eq("user_id", user_id))
            .filter(Filter::eq("is_latest", true))
            .sort_by("created_at", false);
        match self.proxy.find_one(&query).await {
            Ok(memory) => memory,
            Err(e) => {
                error!(user_id, error = %e, "latest core memory lookup failed");
                None
            }
        }
    }

    /// Fetch one specific version for a user.
    pub async fn get_version(&self, user_id: &str, version: &str) -> Option<CoreMemory> {
        let query = Query::new()
            .filter(Filter::eq("user_id", user_id))
            .filter(Filter::eq("version", version));
        match self.proxy.find_one(&query).await {
            Ok(memory) => memory,
            Err(e) => {
                error!(user_id, version, error = %e, "core memory version lookup failed");
                None
            }
        }
    }

    /// Every version for a user, newest first.
    pub async fn list_versions(&self, user_id: &str, limit: usize) -> Vec<CoreMemory> {
        let query = Query::new()
            .filter(Filter::eq("user_id", user_id))
            .sort_by("created_at", false)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(memories) => memories,
            Err(e) => {
                error!(user_id, error = %e, "core memory version list failed");
                Vec::new()
            }
        }
    }
}
