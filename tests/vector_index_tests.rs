/// Vector/text index dual-storage tests.
///
/// The proxies must keep the index populated with lite rows only while every
/// read comes back with the full entity merged in from the KV.
use std::sync::Arc;

use engram::index::{
    InMemoryTextIndex, InMemoryVectorIndex, TextDualProxy, TextIndex, VectorDualProxy,
    VectorSearchRequest,
};
use engram::kv::{InMemoryKv, KvStorage};
use engram::models::{EventLogRecord, ForesightRecord};
use engram::query::Filter;
use serde_json::{json, Value as JsonValue};

fn foresight_entity(id: &str, content: &str, vector: [f64; 2]) -> JsonValue {
    json!({
        "id": id,
        "user_id": "u1",
        "group_id": "g1",
        "parent_id": "parent-1",
        "start_time": 1_700_000_000_000i64,
        "end_time": 1_700_086_400_000i64,
        "content": content,
        "evidence": ["said so"],
        "vector": vector,
        "metadata": {"user_name": "Alice"}
    })
}

fn vector_setup() -> (VectorDualProxy, Arc<InMemoryVectorIndex>, Arc<InMemoryKv>) {
    let index = Arc::new(InMemoryVectorIndex::new());
    let kv = Arc::new(InMemoryKv::new());
    let proxy = VectorDualProxy::new(
        index.clone(),
        kv.clone() as Arc<dyn KvStorage>,
        "foresight_vectors",
        ForesightRecord::LITE_VECTOR_FIELDS,
    );
    (proxy, index, kv)
}

#[tokio::test]
async fn search_returns_full_entities_transparently() {
    let (proxy, _index, _kv) = vector_setup();
    proxy
        .upsert(&[
            foresight_entity("f1", "A", [1.0, 0.0]),
            foresight_entity("f2", "B", [0.0, 1.0]),
            foresight_entity("f3", "C", [0.5, 0.5]),
        ])
        .await
        .unwrap();

    let hits = proxy
        .search(&VectorSearchRequest::all_fields(5))
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    // `content` is not a lite vector field, yet every row carries it.
    let mut contents: Vec<_> = hits
        .iter()
        .map(|h| h["content"].as_str().unwrap().to_string())
        .collect();
    contents.sort();
    assert_eq!(contents, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn index_rows_hold_lite_fields_only() {
    let (proxy, index, kv) = vector_setup();
    proxy
        .upsert(&[foresight_entity("f1", "A", [1.0, 0.0])])
        .await
        .unwrap();

    // Raw index row (proxy bypassed): lite projection only.
    let row = index.raw_row("foresight_vectors", "f1").unwrap();
    assert_eq!(row["group_id"], "g1");
    assert!(row.get("content").is_none());
    assert!(row.get("evidence").is_none());

    // The full entity lives in the KV under the namespaced key.
    let body = kv.get("foresight_vectors:f1").await.unwrap();
    let full: JsonValue = serde_json::from_str(&body).unwrap();
    assert_eq!(full["content"], "A");
}

#[tokio::test]
async fn vector_search_ranks_and_merges() {
    let (proxy, _index, _kv) = vector_setup();
    proxy
        .upsert(&[
            foresight_entity("f1", "A", [1.0, 0.0]),
            foresight_entity("f2", "B", [0.0, 1.0]),
        ])
        .await
        .unwrap();

    let hits = proxy
        .search(&VectorSearchRequest {
            vector: Some(vec![1.0, 0.0]),
            filter: Some(Filter::eq("group_id", "g1")),
            limit: 1,
            output_fields: vec!["*".to_string()],
        })
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], "f1");
    assert_eq!(hits[0]["content"], "A");
    assert!(hits[0]["score"].as_f64().unwrap() > 0.99);
}

#[tokio::test]
async fn superset_contract_every_full_field_is_present() {
    let (proxy, _index, _kv) = vector_setup();
    let entity = foresight_entity("f1", "A", [1.0, 0.0]);
    proxy.upsert(std::slice::from_ref(&entity)).await.unwrap();

    let hits = proxy
        .search(&VectorSearchRequest {
            vector: None,
            filter: Some(Filter::eq("id", "f1")),
            limit: 1,
            output_fields: vec!["*".to_string()],
        })
        .await
        .unwrap();
    let row = &hits[0];
    for (field, expected) in entity.as_object().unwrap() {
        assert_eq!(row.get(field), Some(expected), "field {field} missing");
    }
}

#[tokio::test]
async fn missing_kv_body_returns_lite_row_unmodified() {
    let (proxy, _index, kv) = vector_setup();
    proxy
        .upsert(&[foresight_entity("f1", "A", [1.0, 0.0])])
        .await
        .unwrap();

    kv.delete("foresight_vectors:f1").await;

    let hits = proxy
        .search(&VectorSearchRequest::all_fields(5))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["group_id"], "g1");
    // Lite row, not a stub: the full-only field is simply absent.
    assert!(hits[0].get("content").is_none());
}

#[tokio::test]
async fn delete_removes_index_row_then_body() {
    let (proxy, index, kv) = vector_setup();
    proxy
        .upsert(&[foresight_entity("f1", "A", [1.0, 0.0])])
        .await
        .unwrap();

    let removed = proxy.delete(&["f1".to_string()]).await.unwrap();
    assert_eq!(removed, 1);
    assert!(index.raw_row("foresight_vectors", "f1").is_none());
    assert_eq!(kv.get("foresight_vectors:f1").await, None);
}

#[tokio::test]
async fn scalar_query_merges_full_fields() {
    let (proxy, _index, _kv) = vector_setup();
    proxy
        .upsert(&[
            foresight_entity("f1", "A", [1.0, 0.0]),
            foresight_entity("f2", "B", [0.0, 1.0]),
        ])
        .await
        .unwrap();

    let rows = proxy
        .query(&Filter::eq("parent_id", "parent-1"), 10)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.get("content").is_some()));
}

// ---------------------------------------------------------------------------
// Text side
// ---------------------------------------------------------------------------

fn event_entity(id: &str, fact: &str) -> JsonValue {
    json!({
        "id": id,
        "user_id": "u1",
        "group_id": "g1",
        "parent_id": "parent-1",
        "timestamp": 1_700_000_000_000i64,
        "atomic_fact": fact,
        "event_type": "activity",
        "participants": ["alice", "bob"],
        "extend": {"source": "window-7"}
    })
}

fn text_setup() -> (TextDualProxy, Arc<InMemoryTextIndex>, Arc<InMemoryKv>) {
    let index = Arc::new(InMemoryTextIndex::new());
    let kv = Arc::new(InMemoryKv::new());
    let proxy = TextDualProxy::new(
        index.clone(),
        kv.clone() as Arc<dyn KvStorage>,
        "event_log_text",
        EventLogRecord::LITE_TEXT_FIELDS,
    );
    (proxy, index, kv)
}

#[tokio::test]
async fn text_search_merges_full_entity() {
    let (proxy, _index, _kv) = text_setup();
    proxy
        .index(&[
            event_entity("e1", "alice went hiking"),
            event_entity("e2", "bob bought a bike"),
        ])
        .await
        .unwrap();

    let hits = proxy.search("hiking", None, 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], "e1");
    // `participants` and `extend` are full-only fields.
    assert_eq!(hits[0]["participants"], json!(["alice", "bob"]));
    assert_eq!(hits[0]["extend"]["source"], "window-7");
}

#[tokio::test]
async fn text_delete_by_query_cleans_the_kv() {
    let (proxy, index, kv) = text_setup();
    proxy
        .index(&[
            event_entity("e1", "alice went hiking"),
            event_entity("e2", "bob bought a bike"),
        ])
        .await
        .unwrap();

    let removed = proxy
        .delete_by_query(&Filter::eq("parent_id", "parent-1"))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert!(index.list_ids("event_log_text").await.unwrap().is_empty());
    assert_eq!(kv.get("event_log_text:e1").await, None);
    assert_eq!(kv.get("event_log_text:e2").await, None);
}
