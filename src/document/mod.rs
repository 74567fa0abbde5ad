/// Indexed document store and its dual-storage proxy.
///
/// The document store holds only *lite* rows: the indexed/query fields of
/// each document class, plus system fields. It owns the id space and the
/// audit timestamps. The complete record lives in the KV; the
/// [`DualDocumentProxy`] keeps the two in step and is the only surface the
/// repository layer touches.
///
/// The store itself is an in-process engine: thread-safe via DashMap, with
/// per-collection insert serialization for unique-constraint checks and
/// per-row conditional updates for the atomic `update_many` primitives.
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::error::{EngramError, EngramResult};
use crate::query::Query;
use crate::schema::LiteSchema;

mod proxy;
mod validate;

pub use proxy::DualDocumentProxy;
pub use validate::{validate_query, validate_set_fields};

/// A document class with a declared lite schema.
///
/// Implemented by every entity the substrate persists. The trait gives the
/// proxy what reflection gave the source system: the collection name, the
/// lite field set, and access to the id/audit fields it must copy back after
/// the store assigns them.
pub trait DocumentClass:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// The class's lite-schema declaration.
    fn schema() -> &'static LiteSchema;

    /// Primary id, present after insert.
    fn id(&self) -> Option<&str>;

    /// Set the store-assigned id.
    fn set_id(&mut self, id: String);

    /// Set both audit timestamps (insert path).
    fn set_timestamps(&mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>);

    /// Refresh the update timestamp (save path).
    fn touch(&mut self, updated_at: DateTime<Utc>);

    /// Semantic validation hook for enumerated fields.
    fn validate(&self) -> EngramResult<()> {
        Ok(())
    }
}

/// Metadata assigned by the store on insert.
#[derive(Debug, Clone)]
pub struct InsertMeta {
    /// Minted primary id.
    pub id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Update timestamp (equals `created_at` on insert).
    pub updated_at: DateTime<Utc>,
}

/// One stored lite row.
#[derive(Debug, Clone)]
struct StoredRow {
    /// Monotonic insertion sequence; tie-breaker for deterministic ordering.
    seq: u64,
    doc: Map<String, JsonValue>,
}

/// One collection of lite rows.
pub struct Collection {
    name: String,
    unique_indexes: &'static [&'static [&'static str]],
    rows: DashMap<String, StoredRow>,
    seq: AtomicU64,
    /// Serializes check-then-insert so unique constraints hold under races.
    insert_lock: Mutex<()>,
}

impl Collection {
    fn new(schema: &'static LiteSchema) -> Self {
        Self {
            name: schema.class_name.to_string(),
            unique_indexes: schema.unique_indexes,
            rows: DashMap::new(),
            seq: AtomicU64::new(0),
            insert_lock: Mutex::new(()),
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a lite row; mints the id and sets both audit timestamps.
    pub fn insert(&self, mut doc: Map<String, JsonValue>) -> EngramResult<InsertMeta> {
        let _guard = self
            .insert_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for unique in self.unique_indexes {
            if unique.is_empty() {
                continue;
            }
            let key_values: Vec<JsonValue> = unique
                .iter()
                .map(|f| doc.get(*f).cloned().unwrap_or(JsonValue::Null))
                .collect();
            let collision = self.rows.iter().any(|entry| {
                unique
                    .iter()
                    .zip(&key_values)
                    .all(|(f, expected)| {
                        entry.value().doc.get(*f).unwrap_or(&JsonValue::Null) == expected
                    })
            });
            if collision {
                return Err(EngramError::DuplicateKey {
                    class_name: self.name.clone(),
                    key: key_values
                        .iter()
                        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                        .collect::<Vec<_>>()
                        .join(":"),
                });
            }
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        doc.insert("id".to_string(), JsonValue::String(id.clone()));
        doc.insert("created_at".to_string(), JsonValue::from(now_ms));
        doc.insert("updated_at".to_string(), JsonValue::from(now_ms));

        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.rows.insert(id.clone(), StoredRow { seq, doc });

        Ok(InsertMeta {
            id,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the row for `id`, preserving creation metadata and refreshing
    /// `updated_at`. Returns the new update timestamp, or `None` if absent.
    pub fn replace(&self, id: &str, mut doc: Map<String, JsonValue>) -> Option<DateTime<Utc>> {
        let mut entry = self.rows.get_mut(id)?;
        let now = Utc::now();
        let created_at = entry
            .doc
            .get("created_at")
            .cloned()
            .unwrap_or(JsonValue::Null);
        doc.insert("id".to_string(), JsonValue::String(id.to_string()));
        doc.insert("created_at".to_string(), created_at);
        doc.insert(
            "updated_at".to_string(),
            JsonValue::from(now.timestamp_millis()),
        );
        entry.doc = doc;
        Some(now)
    }

    /// Fetch one row by id.
    pub fn find_by_id(&self, id: &str) -> Option<JsonValue> {
        self.rows
            .get(id)
            .map(|entry| JsonValue::Object(entry.doc.clone()))
    }

    /// Run a filtered, sorted, bounded query.
    ///
    /// The result is a point-in-time snapshot ordered by the query's sort
    /// specification, with insertion order as tie-breaker.
    pub fn find(&self, query: &Query) -> Vec<JsonValue> {
        let mut matches: Vec<(u64, JsonValue)> = self
            .rows
            .iter()
            .filter_map(|entry| {
                let doc = JsonValue::Object(entry.doc.clone());
                query.matches(&doc).then_some((entry.seq, doc))
            })
            .collect();

        matches.sort_by(|(a_seq, a_doc), (b_seq, b_doc)| {
            query
                .compare_docs(a_doc, b_doc)
                .then_with(|| a_seq.cmp(b_seq))
        });

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, doc)| doc)
            .collect()
    }

    /// Run a query and return the first match.
    pub fn find_one(&self, query: &Query) -> Option<JsonValue> {
        let mut bounded = query.clone();
        bounded.limit = Some(1);
        self.find(&bounded).into_iter().next()
    }

    /// Conditionally set fields on every row matching all filters.
    ///
    /// Each row is checked and mutated under its own map lock, so a
    /// predicate like `{sync_status: -1}` observes and advances state
    /// atomically per row, so a lost race updates zero rows.
    pub fn update_many(
        &self,
        filters: &[crate::query::Filter],
        set: &Map<String, JsonValue>,
    ) -> Vec<String> {
        let mut updated = Vec::new();
        for mut entry in self.rows.iter_mut() {
            let doc = JsonValue::Object(entry.doc.clone());
            if filters.iter().all(|f| f.matches_value(&doc)) {
                for (field, value) in set {
                    entry.doc.insert(field.clone(), value.clone());
                }
                updated.push(entry.key().clone());
            }
        }
        updated
    }

    /// Delete one row. Returns whether it was present.
    pub fn delete(&self, id: &str) -> bool {
        self.rows.remove(id).is_some()
    }

    /// Delete every row matching the query; returns the removed ids.
    pub fn delete_many(&self, query: &Query) -> Vec<String> {
        let victims: Vec<String> = self
            .rows
            .iter()
            .filter_map(|entry| {
                let doc = JsonValue::Object(entry.doc.clone());
                query.matches(&doc).then(|| entry.key().clone())
            })
            .collect();
        victims
            .into_iter()
            .filter(|id| self.rows.remove(id).is_some())
            .collect()
    }

    /// Number of rows.
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// Ids of rows created at or after `cutoff_ms` (all rows when `None`).
    pub fn ids_since(&self, cutoff_ms: Option<i64>) -> Vec<String> {
        self.rows
            .iter()
            .filter(|entry| match cutoff_ms {
                None => true,
                Some(cutoff) => entry
                    .value()
                    .doc
                    .get("created_at")
                    .and_then(JsonValue::as_i64)
                    .is_some_and(|created| created >= cutoff),
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Reinsert a lite row with a known id (validator repair path).
    ///
    /// Unlike [`Collection::insert`], nothing is minted: the row is restored
    /// exactly as projected from the authoritative KV body.
    pub fn restore(&self, id: &str, doc: Map<String, JsonValue>) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.rows
            .insert(id.to_string(), StoredRow { seq, doc });
    }
}

/// The in-process indexed document store: a set of named collections.
#[derive(Default)]
pub struct DocumentStore {
    collections: DashMap<String, Arc<Collection>>,
}

impl DocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the collection for a document class.
    pub fn collection(&self, schema: &'static LiteSchema) -> Arc<Collection> {
        self.collections
            .entry(schema.class_name.to_string())
            .or_insert_with(|| Arc::new(Collection::new(schema)))
            .clone()
    }

    /// Look up an existing collection by name.
    pub fn collection_by_name(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.get(name).map(|c| c.clone())
    }
}
