/// Document-store dual-storage proxy.
///
/// Repositories never touch the backing collection directly; they hold a
/// `DualDocumentProxy<T>` with the same method shape and let it enforce the
/// dual-storage discipline:
///
/// - **writes** split the full document into a lite row (document store,
///   which assigns id and audit timestamps) and a full JSON body (KV under
///   the document id);
/// - **reads** join the lite id stream with a batched KV lookup and return
///   full documents, never lite stubs;
/// - **queries** are field-validated against the class's lite set before
///   execution.
///
/// The two writes of one logical write are sequential but not atomic. A
/// failure after the document-store write leaves drift, which is logged here
/// and repaired by the startup validator, never rolled back inline.
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error, warn};

use super::validate::{validate_query, validate_set_fields};
use super::{Collection, DocumentClass};
use crate::config::StorageMode;
use crate::error::{EngramError, EngramResult};
use crate::kv::KvStorage;
use crate::query::{Filter, Query};
use crate::schema::extract_lite_data;

/// Dual-storage proxy over one document class.
pub struct DualDocumentProxy<T: DocumentClass> {
    collection: Arc<Collection>,
    kv: Arc<dyn KvStorage>,
    mode: StorageMode,
    _class: PhantomData<fn() -> T>,
}

impl<T: DocumentClass> DualDocumentProxy<T> {
    /// Build a proxy over `collection`, storing full bodies in `kv`.
    pub fn new(collection: Arc<Collection>, kv: Arc<dyn KvStorage>, mode: StorageMode) -> Self {
        Self {
            collection,
            kv,
            mode,
            _class: PhantomData,
        }
    }

    /// The wrapped collection. Used by the validator (deliberately bypassing
    /// the proxy to see lite rows) and by tests asserting lite contents.
    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    fn project(&self, full: &JsonValue) -> Map<String, JsonValue> {
        match self.mode {
            StorageMode::Full => full.as_object().cloned().unwrap_or_default(),
            StorageMode::Lite => extract_lite_data(full, T::schema().field_set()),
        }
    }

    /// Insert a new document.
    ///
    /// On success `doc` carries the store-assigned id and audit timestamps,
    /// and the KV holds the serialized full body under that id.
    pub async fn insert(&self, doc: &mut T) -> EngramResult<()> {
        doc.validate()?;

        let full = serde_json::to_value(&*doc)?;
        let lite = self.project(&full);
        let meta = self.collection.insert(lite)?;
        doc.set_id(meta.id.clone());
        doc.set_timestamps(meta.created_at, meta.updated_at);

        let body = serde_json::to_string(&*doc)?;
        if !self.kv.put(&meta.id, &body).await {
            // The lite row stays; the validator will surface the gap.
            error!(
                class = T::schema().class_name,
                id = %meta.id,
                "KV write failed after document-store insert; drift expected"
            );
            return Err(EngramError::Transport {
                backend: "kv".to_string(),
                reason: format!("full-body write failed for id {}", meta.id),
            });
        }
        debug!(class = T::schema().class_name, id = %meta.id, "document inserted");
        Ok(())
    }

    /// Save an already-inserted document (update in place).
    ///
    /// Returns `false` if the document no longer exists in the store.
    pub async fn save(&self, doc: &mut T) -> EngramResult<bool> {
        doc.validate()?;
        let id = match doc.id() {
            Some(id) => id.to_string(),
            None => {
                return Err(EngramError::Storage(
                    "save requires a document with an id; use insert".to_string(),
                ))
            }
        };

        let full = serde_json::to_value(&*doc)?;
        let lite = self.project(&full);
        let Some(updated_at) = self.collection.replace(&id, lite) else {
            return Ok(false);
        };
        doc.touch(updated_at);

        let body = serde_json::to_string(&*doc)?;
        if !self.kv.put(&id, &body).await {
            error!(
                class = T::schema().class_name,
                id = %id,
                "KV write failed after document-store save; drift expected"
            );
            return Err(EngramError::Transport {
                backend: "kv".to_string(),
                reason: format!("full-body write failed for id {id}"),
            });
        }
        Ok(true)
    }

    /// Fetch one full document by id.
    ///
    /// Absent lite row → absent. Lite row with a missing KV body is drift:
    /// logged, and the document is reported absent rather than stub-returned.
    pub async fn get_by_id(&self, id: &str) -> Option<T> {
        self.collection.find_by_id(id)?;

        match self.kv.get(id).await {
            Some(body) => match serde_json::from_str::<T>(&body) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    error!(
                        class = T::schema().class_name,
                        id = %id,
                        error = %e,
                        "failed to deserialize full body"
                    );
                    None
                }
            },
            None => {
                warn!(
                    class = T::schema().class_name,
                    id = %id,
                    "drift: lite row present but KV body missing"
                );
                None
            }
        }
    }

    /// Run a validated query and materialize full documents.
    ///
    /// Results preserve the document store's order; lite hits whose KV body
    /// is missing are filtered out and logged as drift.
    pub async fn find(&self, query: &Query) -> EngramResult<Vec<T>> {
        validate_query(T::schema(), query)?;

        let hits = self.collection.find(query);
        let ids: Vec<String> = hits
            .iter()
            .filter_map(|row| row.get("id").and_then(JsonValue::as_str))
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let bodies = self.kv.batch_get(&ids).await;
        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            match bodies.get(id) {
                Some(body) => match serde_json::from_str::<T>(body) {
                    Ok(doc) => out.push(doc),
                    Err(e) => {
                        error!(
                            class = T::schema().class_name,
                            id = %id,
                            error = %e,
                            "failed to deserialize full body, dropping hit"
                        );
                    }
                },
                None => {
                    warn!(
                        class = T::schema().class_name,
                        id = %id,
                        "drift: lite hit without KV body, dropping"
                    );
                }
            }
        }
        Ok(out)
    }

    /// Run a validated query and return the first full document.
    pub async fn find_one(&self, query: &Query) -> EngramResult<Option<T>> {
        validate_query(T::schema(), query)?;

        let Some(row) = self.collection.find_one(query) else {
            return Ok(None);
        };
        let Some(id) = row.get("id").and_then(JsonValue::as_str) else {
            return Ok(None);
        };
        Ok(self.get_by_id(id).await)
    }

    /// Conditionally set fields on every matching document, in both stores.
    ///
    /// The document-store update is the atomic, authoritative step (per-row
    /// conditional check-and-set); the same fields are then patched into the
    /// affected KV bodies so the full record keeps its lite projection.
    pub async fn update_many(
        &self,
        filters: &[Filter],
        set: &Map<String, JsonValue>,
    ) -> EngramResult<usize> {
        let probe = Query {
            filters: filters.to_vec(),
            ..Query::default()
        };
        validate_query(T::schema(), &probe)?;
        validate_set_fields(T::schema(), set.keys().map(String::as_str))?;

        // One timestamp for both stores, so the lite projection of the
        // patched body still matches the row.
        let mut effective_set = set.clone();
        effective_set.insert(
            "updated_at".to_string(),
            JsonValue::from(Utc::now().timestamp_millis()),
        );

        let updated_ids = self.collection.update_many(filters, &effective_set);
        if updated_ids.is_empty() {
            return Ok(0);
        }

        let bodies = self.kv.batch_get(&updated_ids).await;
        for id in &updated_ids {
            let Some(body) = bodies.get(id) else {
                warn!(
                    class = T::schema().class_name,
                    id = %id,
                    "drift: updated lite row has no KV body"
                );
                continue;
            };
            let patched = match serde_json::from_str::<JsonValue>(body) {
                Ok(JsonValue::Object(mut full)) => {
                    for (field, value) in &effective_set {
                        full.insert(field.clone(), value.clone());
                    }
                    JsonValue::Object(full)
                }
                _ => {
                    error!(
                        class = T::schema().class_name,
                        id = %id,
                        "KV body is not a JSON object, skipping patch"
                    );
                    continue;
                }
            };
            match serde_json::to_string(&patched) {
                Ok(body) => {
                    if !self.kv.put(id, &body).await {
                        error!(
                            class = T::schema().class_name,
                            id = %id,
                            "KV patch failed after update_many; drift expected"
                        );
                    }
                }
                Err(e) => {
                    error!(class = T::schema().class_name, id = %id, error = %e, "patch serialization failed");
                }
            }
        }
        Ok(updated_ids.len())
    }

    /// Soft-delete one document: mark it in both stores instead of removing
    /// it. Only classes that declare soft-delete support carry the marker
    /// fields, so the set-field validation rejects everything else.
    pub async fn soft_delete(&self, id: &str, deleted_by: Option<&str>) -> EngramResult<bool> {
        let mut set = Map::new();
        set.insert(
            "deleted_at".to_string(),
            JsonValue::from(Utc::now().timestamp_millis()),
        );
        set.insert(
            "deleted_by".to_string(),
            deleted_by.map(JsonValue::from).unwrap_or(JsonValue::Null),
        );
        set.insert("deleted_id".to_string(), JsonValue::from(id));
        let modified = self
            .update_many(&[Filter::eq("id", id)], &set)
            .await?;
        Ok(modified > 0)
    }

    /// Undo a soft delete, clearing the marker fields in both stores.
    pub async fn restore(&self, id: &str) -> EngramResult<bool> {
        let mut set = Map::new();
        set.insert("deleted_at".to_string(), JsonValue::Null);
        set.insert("deleted_by".to_string(), JsonValue::Null);
        set.insert("deleted_id".to_string(), JsonValue::Null);
        let modified = self
            .update_many(&[Filter::eq("id", id)], &set)
            .await?;
        Ok(modified > 0)
    }

    /// Remove a document for good, soft-deleted or not.
    pub async fn hard_delete(&self, id: &str) -> bool {
        self.delete(id).await
    }

    /// Delete one document: document store first, KV second.
    ///
    /// A crash between the two leaves an orphaned KV body, which is benign
    /// (the lite row is gone, so nothing resolves to it).
    pub async fn delete(&self, id: &str) -> bool {
        let existed = self.collection.delete(id);
        if existed && !self.kv.delete(id).await {
            warn!(
                class = T::schema().class_name,
                id = %id,
                "KV delete failed; orphaned full body left behind"
            );
        }
        existed
    }

    /// Delete every document matching a validated query.
    pub async fn delete_many(&self, query: &Query) -> EngramResult<usize> {
        validate_query(T::schema(), query)?;

        let removed = self.collection.delete_many(query);
        if removed.is_empty() {
            return Ok(0);
        }
        let kv_removed = self.kv.batch_delete(&removed).await;
        if kv_removed < removed.len() {
            warn!(
                class = T::schema().class_name,
                doc_removed = removed.len(),
                kv_removed,
                "delete_many removed fewer KV bodies than lite rows"
            );
        }
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentStore;
    use crate::kv::InMemoryKv;
    use crate::schema::LiteSchema;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    static NOTE_SCHEMA: LiteSchema = LiteSchema::new(
        "soft_notes",
        &["author"],
        &[],
        &[],
        &[],
        true,
    );

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct SoftNote {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        author: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(
            default,
            with = "chrono::serde::ts_milliseconds_option",
            skip_serializing_if = "Option::is_none"
        )]
        deleted_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        deleted_by: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        deleted_id: Option<String>,
        #[serde(
            default,
            with = "chrono::serde::ts_milliseconds_option",
            skip_serializing_if = "Option::is_none"
        )]
        created_at: Option<DateTime<Utc>>,
        #[serde(
            default,
            with = "chrono::serde::ts_milliseconds_option",
            skip_serializing_if = "Option::is_none"
        )]
        updated_at: Option<DateTime<Utc>>,
    }

    impl DocumentClass for SoftNote {
        fn schema() -> &'static LiteSchema {
            &NOTE_SCHEMA
        }
        fn id(&self) -> Option<&str> {
            self.id.as_deref()
        }
        fn set_id(&mut self, id: String) {
            self.id = Some(id);
        }
        fn set_timestamps(&mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) {
            self.created_at = Some(created_at);
            self.updated_at = Some(updated_at);
        }
        fn touch(&mut self, updated_at: DateTime<Utc>) {
            self.updated_at = Some(updated_at);
        }
    }

    fn soft_proxy() -> DualDocumentProxy<SoftNote> {
        let store = DocumentStore::new();
        let kv: Arc<dyn KvStorage> = Arc::new(InMemoryKv::new());
        DualDocumentProxy::new(store.collection(&NOTE_SCHEMA), kv, StorageMode::Lite)
    }

    #[tokio::test]
    async fn soft_delete_marks_and_restore_clears() {
        let proxy = soft_proxy();
        let mut note = SoftNote {
            author: "alice".into(),
            body: Some("draft".into()),
            ..Default::default()
        };
        proxy.insert(&mut note).await.unwrap();
        let id = note.id.clone().unwrap();

        assert!(proxy.soft_delete(&id, Some("moderator")).await.unwrap());
        let row = proxy.collection().find_by_id(&id).unwrap();
        assert!(row["deleted_at"].is_i64());
        assert_eq!(row["deleted_by"], "moderator");
        // The record itself is still there, full body included.
        let loaded = proxy.get_by_id(&id).await.unwrap();
        assert!(loaded.deleted_at.is_some());
        assert_eq!(loaded.body.as_deref(), Some("draft"));

        assert!(proxy.restore(&id).await.unwrap());
        let loaded = proxy.get_by_id(&id).await.unwrap();
        assert!(loaded.deleted_at.is_none());
        assert!(loaded.deleted_by.is_none());
    }

    #[tokio::test]
    async fn hard_delete_removes_both_stores() {
        let proxy = soft_proxy();
        let mut note = SoftNote {
            author: "bob".into(),
            ..Default::default()
        };
        proxy.insert(&mut note).await.unwrap();
        let id = note.id.clone().unwrap();

        proxy.soft_delete(&id, None).await.unwrap();
        assert!(proxy.hard_delete(&id).await);
        assert!(proxy.collection().find_by_id(&id).is_none());
        assert!(proxy.get_by_id(&id).await.is_none());
    }

    #[tokio::test]
    async fn soft_delete_rejected_without_declared_support() {
        use crate::models::{EpisodicMemory, EPISODIC_MEMORY_SCHEMA};

        let store = DocumentStore::new();
        let kv: Arc<dyn KvStorage> = Arc::new(InMemoryKv::new());
        let proxy: DualDocumentProxy<EpisodicMemory> = DualDocumentProxy::new(
            store.collection(&EPISODIC_MEMORY_SCHEMA),
            kv,
            StorageMode::Lite,
        );

        let mut memory = EpisodicMemory::default();
        proxy.insert(&mut memory).await.unwrap();
        let id = memory.id.clone().unwrap();

        let err = proxy.soft_delete(&id, None).await.unwrap_err();
        assert!(matches!(err, EngramError::LiteStorageQuery { .. }));
    }
}
