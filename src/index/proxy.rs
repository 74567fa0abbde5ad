/// Index dual-storage proxies.
///
/// A proxy wraps one index collection: on writes it stores only the declared
/// lite vector/text fields in the index and the complete entity in the KV
/// under `{collection}:{id}`; on reads it runs the index call, collects the
/// hit ids, batch-loads the full entities, and merges them on top of the lite
/// rows. Missing KV bodies are drift: logged, and the lite row is returned
/// unmodified (never a stub).
///
/// Callers that hand-query the raw index bypass the proxy and see lite rows
/// only; the startup validator does exactly that on purpose.
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, error, warn};

use super::text::TextIndex;
use super::vector::{VectorIndex, VectorSearchRequest};
use crate::error::{EngramError, EngramResult};
use crate::kv::KvStorage;
use crate::query::Filter;

/// Build the KV key for an index-backed entity.
///
/// `collection` is the logical base name, never the tenant-suffixed physical
/// name; neither part embeds the `:` separator.
fn kv_key(collection: &str, id: &str) -> String {
    format!("{collection}:{id}")
}

/// Project a full entity onto the declared lite fields (id always included).
fn project_lite(entity: &JsonValue, lite_fields: &[&str]) -> EngramResult<JsonValue> {
    let JsonValue::Object(full) = entity else {
        return Err(EngramError::Storage(
            "index entity must be a JSON object".to_string(),
        ));
    };
    if !full.get("id").is_some_and(|id| id.is_string()) {
        return Err(EngramError::Storage(
            "index entity must carry a string id".to_string(),
        ));
    }

    let mut lite = serde_json::Map::new();
    lite.insert("id".to_string(), full["id"].clone());
    for field in lite_fields {
        if let Some(value) = full.get(*field) {
            if !value.is_null() {
                lite.insert((*field).to_string(), value.clone());
            }
        }
    }
    Ok(JsonValue::Object(lite))
}

/// Merge a full KV body on top of a lite index row.
///
/// The result is a superset of the lite row: full fields win where both are
/// present, row-only fields (id, score) survive.
fn merge_row(lite_row: &JsonValue, body: &str, collection: &str) -> JsonValue {
    let full: JsonValue = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            error!(collection, error = %e, "failed to parse KV body, returning lite row");
            return lite_row.clone();
        }
    };
    let (JsonValue::Object(lite), JsonValue::Object(full)) = (lite_row, full) else {
        return lite_row.clone();
    };
    let mut merged = lite.clone();
    for (field, value) in full {
        merged.insert(field, value);
    }
    JsonValue::Object(merged)
}

/// Shared read path: join index hit rows with a batched KV lookup.
async fn materialize_rows(
    kv: &Arc<dyn KvStorage>,
    collection: &str,
    rows: Vec<JsonValue>,
) -> Vec<JsonValue> {
    let ids: Vec<String> = rows
        .iter()
        .filter_map(|row| row.get("id").and_then(JsonValue::as_str))
        .map(|id| kv_key(collection, id))
        .collect();
    if ids.is_empty() {
        return rows;
    }

    let bodies = kv.batch_get(&ids).await;
    rows.into_iter()
        .map(|row| {
            let Some(id) = row.get("id").and_then(JsonValue::as_str) else {
                return row;
            };
            match bodies.get(&kv_key(collection, id)) {
                Some(body) => merge_row(&row, body, collection),
                None => {
                    warn!(
                        collection,
                        id,
                        "drift: index row has no KV body, returning lite row"
                    );
                    row
                }
            }
        })
        .collect()
}

/// Shared write path: lite rows to the index, full bodies to the KV.
async fn store_bodies(
    kv: &Arc<dyn KvStorage>,
    collection: &str,
    entities: &[JsonValue],
) -> EngramResult<()> {
    for entity in entities {
        let Some(id) = entity.get("id").and_then(JsonValue::as_str) else {
            return Err(EngramError::Storage(
                "index entity must carry a string id".to_string(),
            ));
        };
        let body = serde_json::to_string(entity)?;
        if !kv.put(&kv_key(collection, id), &body).await {
            error!(collection, id, "KV write failed after index write; drift expected");
            return Err(EngramError::Transport {
                backend: "kv".to_string(),
                reason: format!("full-entity write failed for {collection}:{id}"),
            });
        }
    }
    Ok(())
}

/// Dual-storage proxy over one vector-index collection.
pub struct VectorDualProxy {
    index: Arc<dyn VectorIndex>,
    kv: Arc<dyn KvStorage>,
    collection: String,
    lite_fields: &'static [&'static str],
}

impl VectorDualProxy {
    /// Wrap `collection` of `index`, with the class's declared lite fields.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        kv: Arc<dyn KvStorage>,
        collection: impl Into<String>,
        lite_fields: &'static [&'static str],
    ) -> Self {
        Self {
            index,
            kv,
            collection: collection.into(),
            lite_fields,
        }
    }

    /// Logical collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Insert full entities: lite projections to the index, bodies to the KV.
    pub async fn insert(&self, entities: &[JsonValue]) -> EngramResult<usize> {
        let lite_rows = entities
            .iter()
            .map(|e| project_lite(e, self.lite_fields))
            .collect::<EngramResult<Vec<_>>>()?;
        let written = self.index.insert(&self.collection, &lite_rows).await?;
        store_bodies(&self.kv, &self.collection, entities).await?;
        debug!(collection = %self.collection, written, "vector insert");
        Ok(written)
    }

    /// Upsert full entities by id.
    pub async fn upsert(&self, entities: &[JsonValue]) -> EngramResult<usize> {
        let lite_rows = entities
            .iter()
            .map(|e| project_lite(e, self.lite_fields))
            .collect::<EngramResult<Vec<_>>>()?;
        let written = self.index.upsert(&self.collection, &lite_rows).await?;
        store_bodies(&self.kv, &self.collection, entities).await?;
        Ok(written)
    }

    /// Search and materialize: every returned row is a superset of its lite
    /// row, with full fields loaded from the KV.
    pub async fn search(&self, request: &VectorSearchRequest) -> EngramResult<Vec<JsonValue>> {
        let rows = self.index.search(&self.collection, request).await?;
        Ok(materialize_rows(&self.kv, &self.collection, rows).await)
    }

    /// Scalar query and materialize.
    pub async fn query(&self, filter: &Filter, limit: usize) -> EngramResult<Vec<JsonValue>> {
        let rows = self.index.query(&self.collection, filter, limit).await?;
        Ok(materialize_rows(&self.kv, &self.collection, rows).await)
    }

    /// Delete by id: index row first, KV body second.
    pub async fn delete(&self, ids: &[String]) -> EngramResult<usize> {
        let removed = self.index.delete(&self.collection, ids).await?;
        let kv_keys: Vec<String> = ids.iter().map(|id| kv_key(&self.collection, id)).collect();
        self.kv.batch_delete(&kv_keys).await;
        Ok(removed)
    }
}

/// Dual-storage proxy over one text index.
pub struct TextDualProxy {
    index: Arc<dyn TextIndex>,
    kv: Arc<dyn KvStorage>,
    index_name: String,
    lite_fields: &'static [&'static str],
}

impl TextDualProxy {
    /// Wrap `index_name` of `index`, with the class's declared lite fields.
    pub fn new(
        index: Arc<dyn TextIndex>,
        kv: Arc<dyn KvStorage>,
        index_name: impl Into<String>,
        lite_fields: &'static [&'static str],
    ) -> Self {
        Self {
            index,
            kv,
            index_name: index_name.into(),
            lite_fields,
        }
    }

    /// Logical index name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Index full entities: lite projections to the index, bodies to the KV.
    pub async fn index(&self, entities: &[JsonValue]) -> EngramResult<usize> {
        let lite_docs = entities
            .iter()
            .map(|e| project_lite(e, self.lite_fields))
            .collect::<EngramResult<Vec<_>>>()?;
        let written = self.index.index(&self.index_name, &lite_docs).await?;
        store_bodies(&self.kv, &self.index_name, entities).await?;
        Ok(written)
    }

    /// Keyword search and materialize.
    pub async fn search(
        &self,
        query: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> EngramResult<Vec<JsonValue>> {
        let docs = self
            .index
            .search(&self.index_name, query, filter, limit)
            .await?;
        Ok(materialize_rows(&self.kv, &self.index_name, docs).await)
    }

    /// Delete by filter: index documents first, KV bodies second.
    pub async fn delete_by_query(&self, filter: &Filter) -> EngramResult<usize> {
        let removed = self.index.delete_by_query(&self.index_name, filter).await?;
        if !removed.is_empty() {
            let kv_keys: Vec<String> = removed
                .iter()
                .map(|id| kv_key(&self.index_name, id))
                .collect();
            self.kv.batch_delete(&kv_keys).await;
        }
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kv_keys_are_namespaced_by_base_name() {
        assert_eq!(kv_key("episodic_memories", "abc"), "episodic_memories:abc");
    }

    #[test]
    fn lite_projection_keeps_declared_fields_only() {
        let entity = json!({
            "id": "x",
            "vector": [0.1, 0.2],
            "group_id": "g",
            "content": "full only",
            "evidence": null
        });
        let lite = project_lite(&entity, &["vector", "group_id", "evidence"]).unwrap();
        assert_eq!(lite["id"], "x");
        assert_eq!(lite["group_id"], "g");
        assert!(lite.get("content").is_none());
        // Nulls are not materialized.
        assert!(lite.get("evidence").is_none());
    }

    #[test]
    fn merge_keeps_row_only_fields() {
        let lite = json!({"id": "x", "group_id": "g", "score": 0.9});
        let merged = merge_row(&lite, r#"{"id":"x","group_id":"g","content":"A"}"#, "c");
        assert_eq!(merged["content"], "A");
        assert_eq!(merged["score"], 0.9);
    }
}
