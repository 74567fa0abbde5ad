/// Repositories for the derived memory classes.
///
/// Episodic memories, event-log records, and foresight records are born on
/// extraction, may be updated by the pipeline, and are deleted by ancestry:
/// removing a parent removes all of its descendants through the proxy, so
/// document rows and KV bodies disappear together.
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::StorageMode;
use crate::document::{Collection, DocumentStore, DualDocumentProxy};
use crate::kv::KvStorage;
use crate::models::{
    EpisodicMemory, EventLogRecord, ForesightRecord, EPISODIC_MEMORY_SCHEMA, EVENT_LOG_SCHEMA,
    FORESIGHT_SCHEMA,
};
use crate::query::{Filter, Query};

/// Repository over episodic memories.
pub struct EpisodicMemoryRepository {
    proxy: DualDocumentProxy<EpisodicMemory>,
}

impl EpisodicMemoryRepository {
    /// Build against the shared document store and primary KV.
    pub fn new(store: &DocumentStore, kv: Arc<dyn KvStorage>, mode: StorageMode) -> Self {
        let collection = store.collection(&EPISODIC_MEMORY_SCHEMA);
        Self {
            proxy: DualDocumentProxy::new(collection, kv, mode),
        }
    }

    /// The backing collection (validator / test surface).
    pub fn collection(&self) -> &Arc<Collection> {
        self.proxy.collection()
    }

    /// Persist a newly extracted memory.
    pub async fn append(&self, mut memory: EpisodicMemory) -> Option<EpisodicMemory> {
        match self.proxy.insert(&mut memory).await {
            Ok(()) => Some(memory),
            Err(e) => {
                error!(error = %e, "failed to save episodic memory");
                None
            }
        }
    }

    /// Update an existing memory in place.
    pub async fn update(&self, memory: &mut EpisodicMemory) -> bool {
        match self.proxy.save(memory).await {
            Ok(saved) => saved,
            Err(e) => {
                error!(error = %e, "failed to update episodic memory");
                false
            }
        }
    }

    /// Fetch one full memory by id.
    pub async fn get_by_id(&self, id: &str) -> Option<EpisodicMemory> {
        self.proxy.get_by_id(id).await
    }

    /// Memories of a group within a time window, oldest first.
    pub async fn find_by_group_id(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Vec<EpisodicMemory> {
        let query = Query::new()
            .filter(Filter::eq("group_id", group_id))
            .sort_by("timestamp", true)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(memories) => memories,
            Err(e) => {
                error!(group_id, error = %e, "episodic group query failed");
                Vec::new()
            }
        }
    }

    /// Memories of one user, newest first.
    pub async fn find_by_user_id(&self, user_id: &str, limit: usize) -> Vec<EpisodicMemory> {
        let query = Query::new()
            .filter(Filter::eq("user_id", user_id))
            .sort_by("timestamp", false)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(memories) => memories,
            Err(e) => {
                error!(user_id, error = %e, "episodic user query failed");
                Vec::new()
            }
        }
    }

    /// Keyword lookup over the indexed keywords field.
    pub async fn find_by_keyword(&self, keyword: &str, limit: usize) -> Vec<EpisodicMemory> {
        let query = Query::new()
            .filter(Filter::contains("keywords", keyword))
            .sort_by("timestamp", false)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(memories) => memories,
            Err(e) => {
                error!(keyword, error = %e, "episodic keyword query failed");
                Vec::new()
            }
        }
    }

    /// Delete one memory. Descendant cleanup is the caller's concern
    /// (see the event-log and foresight repositories' `delete_by_parent`).
    pub async fn delete(&self, id: &str) -> bool {
        self.proxy.delete(id).await
    }
}

/// Repository over event-log records.
pub struct EventLogRepository {
    proxy: DualDocumentProxy<EventLogRecord>,
}

impl EventLogRepository {
    /// Build against the shared document store and primary KV.
    pub fn new(store: &DocumentStore, kv: Arc<dyn KvStorage>, mode: StorageMode) -> Self {
        let collection = store.collection(&EVENT_LOG_SCHEMA);
        Self {
            proxy: DualDocumentProxy::new(collection, kv, mode),
        }
    }

    /// The backing collection (validator / test surface).
    pub fn collection(&self) -> &Arc<Collection> {
        self.proxy.collection()
    }

    /// Persist one extracted fact.
    pub async fn append(&self, mut record: EventLogRecord) -> Option<EventLogRecord> {
        match self.proxy.insert(&mut record).await {
            Ok(()) => Some(record),
            Err(e) => {
                error!(error = %e, "failed to save event log record");
                None
            }
        }
    }

    /// Fetch one full record by id.
    pub async fn get_by_id(&self, id: &str) -> Option<EventLogRecord> {
        self.proxy.get_by_id(id).await
    }

    /// All facts descended from one parent document, oldest first.
    pub async fn find_by_parent(&self, parent_id: &str, limit: usize) -> Vec<EventLogRecord> {
        let query = Query::new()
            .filter(Filter::eq("parent_id", parent_id))
            .sort_by("timestamp", true)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(records) => records,
            Err(e) => {
                error!(parent_id, error = %e, "event log parent query failed");
                Vec::new()
            }
        }
    }

    /// Facts of a group within a time window, oldest first.
    pub async fn find_by_group_id(&self, group_id: &str, limit: usize) -> Vec<EventLogRecord> {
        let query = Query::new()
            .filter(Filter::eq("group_id", group_id))
            .sort_by("timestamp", true)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(records) => records,
            Err(e) => {
                error!(group_id, error = %e, "event log group query failed");
                Vec::new()
            }
        }
    }

    /// Ancestry delete: remove every descendant of `parent_id`.
    pub async fn delete_by_parent(&self, parent_id: &str) -> usize {
        let query = Query::new().filter(Filter::eq("parent_id", parent_id));
        match self.proxy.delete_many(&query).await {
            Ok(removed) => {
                info!(parent_id, removed, "deleted event logs by ancestry");
                removed
            }
            Err(e) => {
                error!(parent_id, error = %e, "ancestry delete failed");
                0
            }
        }
    }
}

/// Repository over foresight records.
pub struct ForesightRepository {
    proxy: DualDocumentProxy<ForesightRecord>,
}

impl ForesightRepository {
    /// Build against the shared document store and primary KV.
    pub fn new(store: &DocumentStore, kv: Arc<dyn KvStorage>, mode: StorageMode) -> Self {
        let collection = store.collection(&FORESIGHT_SCHEMA);
        Self {
            proxy: DualDocumentProxy::new(collection, kv, mode),
        }
    }

    /// The backing collection (validator / test surface).
    pub fn collection(&self) -> &Arc<Collection> {
        self.proxy.collection()
    }

    /// Persist one foresight.
    pub async fn append(&self, mut record: ForesightRecord) -> Option<ForesightRecord> {
        match self.proxy.insert(&mut record).await {
            Ok(()) => Some(record),
            Err(e) => {
                error!(error = %e, "failed to save foresight record");
                None
            }
        }
    }

    /// Fetch one full record by id.
    pub async fn get_by_id(&self, id: &str) -> Option<ForesightRecord> {
        self.proxy.get_by_id(id).await
    }

    /// Foresights of one user whose validity window covers `at_ms`.
    pub async fn find_active(
        &self,
        user_id: &str,
        at_ms: i64,
        limit: usize,
    ) -> Vec<ForesightRecord> {
        let query = Query::new()
            .filter(Filter::eq("user_id", user_id))
            .filter(Filter::lte("start_time", at_ms))
            .filter(Filter::gte("end_time", at_ms))
            .sort_by("start_time", true)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(records) => records,
            Err(e) => {
                error!(user_id, error = %e, "active foresight query failed");
                Vec::new()
            }
        }
    }

    /// All foresights descended from one parent document.
    pub async fn find_by_parent(&self, parent_id: &str, limit: usize) -> Vec<ForesightRecord> {
        let query = Query::new()
            .filter(Filter::eq("parent_id", parent_id))
            .sort_by("start_time", true)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(records) => records,
            Err(e) => {
                error!(parent_id, error = %e, "foresight parent query failed");
                Vec::new()
            }
        }
    }

    /// Foresights of a group overlapping `[start_ms, end_ms]`.
    pub async fn find_by_group_in_window(
        &self,
        group_id: &str,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Vec<ForesightRecord> {
        let query = Query::new()
            .filter(Filter::eq("group_id", group_id))
            .filter(Filter::lte("start_time", end_ms))
            .filter(Filter::gte("end_time", start_ms))
            .sort_by("start_time", true)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(records) => records,
            Err(e) => {
                error!(group_id, error = %e, "foresight window query failed");
                Vec::new()
            }
        }
    }

    /// Soft-delete one foresight: the row keeps its id but carries the
    /// deletion markers in both stores.
    pub async fn soft_delete(&self, id: &str, deleted_by: Option<&str>) -> bool {
        match self.proxy.soft_delete(id, deleted_by).await {
            Ok(marked) => marked,
            Err(e) => {
                error!(id, error = %e, "foresight soft delete failed");
                false
            }
        }
    }

    /// Undo a soft delete, clearing the markers.
    pub async fn restore(&self, id: &str) -> bool {
        match self.proxy.restore(id).await {
            Ok(restored) => restored,
            Err(e) => {
                error!(id, error = %e, "foresight restore failed");
                false
            }
        }
    }

    /// Ancestry delete: remove every foresight descended from `parent_id`.
    pub async fn delete_by_parent(&self, parent_id: &str) -> usize {
        let query = Query::new().filter(Filter::eq("parent_id", parent_id));
        match self.proxy.delete_many(&query).await {
            Ok(removed) => {
                debug!(parent_id, removed, "deleted foresights by ancestry");
                removed
            }
            Err(e) => {
                error!(parent_id, error = %e, "foresight ancestry delete failed");
                0
            }
        }
    }
}
