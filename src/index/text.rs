/// Text index seam and in-memory backend.
///
/// Same contract as the vector side with the analyzed-text index in place of
/// the vector store: `index`, `search`, `delete_by_query`, and the id
/// enumeration the validator uses. Documents are lite projections; the full
/// entity is joined in from the KV by the proxy.
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value as JsonValue;

use crate::error::{EngramError, EngramResult};
use crate::query::Filter;

/// Contract for a text-index backend.
#[async_trait]
pub trait TextIndex: Send + Sync {
    /// Index documents (lite projections). Documents must carry an `id`.
    async fn index(&self, index: &str, docs: &[JsonValue]) -> EngramResult<usize>;

    /// Keyword search with optional filter, ranked by term overlap.
    async fn search(
        &self,
        index: &str,
        query: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> EngramResult<Vec<JsonValue>>;

    /// Delete every document matching the filter; returns removed ids.
    async fn delete_by_query(&self, index: &str, filter: &Filter) -> EngramResult<Vec<String>>;

    /// Delete documents by id; returns the count removed.
    async fn delete(&self, index: &str, ids: &[String]) -> EngramResult<usize>;

    /// Every document id currently in the index (validator surface).
    async fn list_ids(&self, index: &str) -> EngramResult<Vec<String>>;
}

/// Naive in-memory text index.
///
/// Scores documents by whitespace-token overlap across their string fields.
/// Good enough to exercise the dual-storage contract; relevance quality is
/// the production backend's concern.
#[derive(Debug, Default)]
pub struct InMemoryTextIndex {
    indices: DashMap<String, DashMap<String, JsonValue>>,
}

impl InMemoryTextIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a document without going through a proxy. Drift simulation.
    pub fn remove_doc(&self, index: &str, id: &str) -> bool {
        self.indices
            .get(index)
            .is_some_and(|docs| docs.remove(id).is_some())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn score_doc(doc: &JsonValue, query_tokens: &[String]) -> usize {
    let JsonValue::Object(map) = doc else {
        return 0;
    };
    let mut score = 0;
    for value in map.values() {
        let text = match value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Array(items) => items
                .iter()
                .filter_map(JsonValue::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            _ => continue,
        };
        let doc_tokens = tokenize(&text);
        score += query_tokens
            .iter()
            .filter(|q| doc_tokens.contains(q))
            .count();
    }
    score
}

#[async_trait]
impl TextIndex for InMemoryTextIndex {
    async fn index(&self, index: &str, docs: &[JsonValue]) -> EngramResult<usize> {
        let bucket = self.indices.entry(index.to_string()).or_default();
        let mut written = 0;
        for doc in docs {
            let id = doc
                .get("id")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| EngramError::Storage("text document without id".to_string()))?;
            bucket.insert(id.to_string(), doc.clone());
            written += 1;
        }
        Ok(written)
    }

    async fn search(
        &self,
        index: &str,
        query: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> EngramResult<Vec<JsonValue>> {
        let Some(bucket) = self.indices.get(index) else {
            return Ok(Vec::new());
        };
        let query_tokens = tokenize(query);

        let mut hits: Vec<(usize, JsonValue)> = bucket
            .iter()
            .filter(|entry| filter.is_none_or(|f| f.matches_value(entry.value())))
            .filter_map(|entry| {
                let score = if query_tokens.is_empty() {
                    1
                } else {
                    score_doc(entry.value(), &query_tokens)
                };
                (score > 0).then(|| (score, entry.value().clone()))
            })
            .collect();

        hits.sort_by(|(a, _), (b, _)| b.cmp(a));
        hits.truncate(limit);
        Ok(hits.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn delete_by_query(&self, index: &str, filter: &Filter) -> EngramResult<Vec<String>> {
        let Some(bucket) = self.indices.get(index) else {
            return Ok(Vec::new());
        };
        let victims: Vec<String> = bucket
            .iter()
            .filter(|entry| filter.matches_value(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        Ok(victims
            .into_iter()
            .filter(|id| bucket.remove(id).is_some())
            .collect())
    }

    async fn delete(&self, index: &str, ids: &[String]) -> EngramResult<usize> {
        let Some(bucket) = self.indices.get(index) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| bucket.remove(id.as_str()).is_some())
            .count())
    }

    async fn list_ids(&self, index: &str) -> EngramResult<Vec<String>> {
        Ok(self
            .indices
            .get(index)
            .map(|bucket| bucket.iter().map(|entry| entry.key().clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn search_ranks_by_token_overlap() {
        let index = InMemoryTextIndex::new();
        index
            .index(
                "events",
                &[
                    json!({"id": "a", "atomic_fact": "alice went hiking with bob"}),
                    json!({"id": "b", "atomic_fact": "bob bought a bike"}),
                    json!({"id": "c", "atomic_fact": "carol reads books"}),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .search("events", "bob hiking", None, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0]["id"], "a");
    }

    #[tokio::test]
    async fn delete_by_query_returns_removed_ids() {
        let index = InMemoryTextIndex::new();
        index
            .index(
                "events",
                &[
                    json!({"id": "a", "group_id": "g1", "atomic_fact": "x"}),
                    json!({"id": "b", "group_id": "g2", "atomic_fact": "y"}),
                ],
            )
            .await
            .unwrap();
        let removed = index
            .delete_by_query("events", &Filter::eq("group_id", "g1"))
            .await
            .unwrap();
        assert_eq!(removed, vec!["a".to_string()]);
        assert_eq!(index.list_ids("events").await.unwrap(), vec!["b".to_string()]);
    }
}
