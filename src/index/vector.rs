/// Vector index seam and in-memory backend.
///
/// The trait mirrors the slice of the production vector store the substrate
/// actually uses: row-oriented upserts, expression-filtered search with an
/// optional query vector, scalar queries, and id-based deletes. Rows are
/// plain JSON objects whose `vector` field is an array of numbers.
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value as JsonValue};

use crate::error::{EngramError, EngramResult};
use crate::query::Filter;

/// Parameters for a proxied vector search.
#[derive(Debug, Clone, Default)]
pub struct VectorSearchRequest {
    /// Query vector; `None` turns the call into a filtered scan.
    pub vector: Option<Vec<f32>>,
    /// Filter expression over lite fields.
    pub filter: Option<Filter>,
    /// Maximum number of hits.
    pub limit: usize,
    /// Requested fields; `["*"]` selects every stored (lite) field.
    pub output_fields: Vec<String>,
}

impl VectorSearchRequest {
    /// A search returning every stored field, bounded by `limit`.
    pub fn all_fields(limit: usize) -> Self {
        Self {
            vector: None,
            filter: None,
            limit,
            output_fields: vec!["*".to_string()],
        }
    }
}

/// Contract for a vector-index backend.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert rows (lite projections). Rows must carry an `id` field.
    async fn insert(&self, collection: &str, rows: &[JsonValue]) -> EngramResult<usize>;

    /// Insert-or-replace rows by id.
    async fn upsert(&self, collection: &str, rows: &[JsonValue]) -> EngramResult<usize>;

    /// Similarity search with optional filter; hits carry a `score` field
    /// when a query vector was given.
    async fn search(
        &self,
        collection: &str,
        request: &VectorSearchRequest,
    ) -> EngramResult<Vec<JsonValue>>;

    /// Scalar query without ranking.
    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> EngramResult<Vec<JsonValue>>;

    /// Delete rows by id; returns the count removed.
    async fn delete(&self, collection: &str, ids: &[String]) -> EngramResult<usize>;

    /// Every row id currently in the collection (validator surface).
    async fn list_ids(&self, collection: &str) -> EngramResult<Vec<String>>;
}

/// Flat in-memory vector index.
///
/// Brute-force cosine ranking over all rows of a collection. Exact, simple,
/// O(n) per query; the same trade the development KV makes.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    collections: DashMap<String, DashMap<String, JsonValue>>,
}

impl InMemoryVectorIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct row access, bypassing any proxy. Test/validator helper.
    pub fn raw_row(&self, collection: &str, id: &str) -> Option<JsonValue> {
        self.collections
            .get(collection)?
            .get(id)
            .map(|row| row.clone())
    }

    /// Remove a row without going through a proxy. Used to simulate drift.
    pub fn remove_row(&self, collection: &str, id: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|rows| rows.remove(id).is_some())
    }

    fn store(&self, collection: &str, rows: &[JsonValue], replace: bool) -> EngramResult<usize> {
        let bucket = self
            .collections
            .entry(collection.to_string())
            .or_default();
        let mut written = 0;
        for row in rows {
            let id = row
                .get("id")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| EngramError::Storage("vector row without id".to_string()))?;
            if !replace && bucket.contains_key(id) {
                continue;
            }
            bucket.insert(id.to_string(), row.clone());
            written += 1;
        }
        Ok(written)
    }
}

fn row_vector(row: &JsonValue) -> Option<Vec<f32>> {
    row.get("vector")?.as_array().map(|values| {
        values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    })
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

fn project(row: &JsonValue, output_fields: &[String]) -> JsonValue {
    if output_fields.iter().any(|f| f == "*") || output_fields.is_empty() {
        return row.clone();
    }
    let mut out = Map::new();
    if let JsonValue::Object(map) = row {
        // id always comes back; callers need it for the KV join.
        if let Some(id) = map.get("id") {
            out.insert("id".to_string(), id.clone());
        }
        for field in output_fields {
            if let Some(value) = map.get(field) {
                out.insert(field.clone(), value.clone());
            }
        }
    }
    JsonValue::Object(out)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(&self, collection: &str, rows: &[JsonValue]) -> EngramResult<usize> {
        self.store(collection, rows, false)
    }

    async fn upsert(&self, collection: &str, rows: &[JsonValue]) -> EngramResult<usize> {
        self.store(collection, rows, true)
    }

    async fn search(
        &self,
        collection: &str,
        request: &VectorSearchRequest,
    ) -> EngramResult<Vec<JsonValue>> {
        let Some(bucket) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(f32, JsonValue)> = Vec::new();
        for entry in bucket.iter() {
            let row = entry.value();
            if let Some(filter) = &request.filter {
                if !filter.matches_value(row) {
                    continue;
                }
            }
            match &request.vector {
                Some(query) => {
                    let Some(stored) = row_vector(row) else {
                        continue;
                    };
                    let Some(score) = cosine_similarity(query, &stored) else {
                        continue;
                    };
                    let mut scored = project(row, &request.output_fields);
                    if let JsonValue::Object(map) = &mut scored {
                        map.insert("score".to_string(), JsonValue::from(score as f64));
                    }
                    hits.push((score, scored));
                }
                None => hits.push((0.0, project(row, &request.output_fields))),
            }
        }

        if request.vector.is_some() {
            hits.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        }
        hits.truncate(request.limit);
        Ok(hits.into_iter().map(|(_, row)| row).collect())
    }

    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> EngramResult<Vec<JsonValue>> {
        let Some(bucket) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<JsonValue> = bucket
            .iter()
            .filter(|entry| filter.matches_value(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        rows.truncate(limit);
        Ok(rows)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> EngramResult<usize> {
        let Some(bucket) = self.collections.get(collection) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| bucket.remove(id.as_str()).is_some())
            .count())
    }

    async fn list_ids(&self, collection: &str) -> EngramResult<Vec<String>> {
        Ok(self
            .collections
            .get(collection)
            .map(|bucket| bucket.iter().map(|entry| entry.key().clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn search_ranks_by_cosine() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(
                "memories",
                &[
                    json!({"id": "a", "vector": [1.0, 0.0]}),
                    json!({"id": "b", "vector": [0.0, 1.0]}),
                    json!({"id": "c", "vector": [0.9, 0.1]}),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .search(
                "memories",
                &VectorSearchRequest {
                    vector: Some(vec![1.0, 0.0]),
                    filter: None,
                    limit: 2,
                    output_fields: vec!["*".to_string()],
                },
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0]["id"], "a");
        assert_eq!(hits[1]["id"], "c");
        assert!(hits[0]["score"].as_f64().unwrap() > hits[1]["score"].as_f64().unwrap());
    }

    #[tokio::test]
    async fn filters_apply_before_ranking() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(
                "memories",
                &[
                    json!({"id": "a", "group_id": "g1", "vector": [1.0, 0.0]}),
                    json!({"id": "b", "group_id": "g2", "vector": [1.0, 0.0]}),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .search(
                "memories",
                &VectorSearchRequest {
                    vector: Some(vec![1.0, 0.0]),
                    filter: Some(Filter::eq("group_id", "g2")),
                    limit: 10,
                    output_fields: vec!["*".to_string()],
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["id"], "b");
    }

    #[tokio::test]
    async fn projection_always_includes_id() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("memories", &[json!({"id": "a", "group_id": "g", "vector": [1.0]})])
            .await
            .unwrap();
        let hits = index
            .search(
                "memories",
                &VectorSearchRequest {
                    vector: None,
                    filter: None,
                    limit: 10,
                    output_fields: vec!["group_id".to_string()],
                },
            )
            .await
            .unwrap();
        assert_eq!(hits[0]["id"], "a");
        assert!(hits[0].get("vector").is_none());
    }
}
