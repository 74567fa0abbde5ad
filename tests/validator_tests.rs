/// Startup validator tests.
///
/// The KV is authoritative: missing index rows are rebuilt from KV bodies,
/// missing KV bodies are reported and never fabricated.
use std::sync::Arc;

use chrono::Utc;
use engram::config::{StartupSyncConfig, StorageMode};
use engram::index::{InMemoryTextIndex, InMemoryVectorIndex, VectorSearchRequest};
use engram::kv::{InMemoryKv, KvStorage};
use engram::lifecycle::Engram;
use engram::models::EpisodicMemory;
use engram::query::Filter;
use serde_json::json;

fn full_scope_sync() -> StartupSyncConfig {
    StartupSyncConfig {
        bootstrap_mode: false,
        enabled: true,
        days: 0,
        check_vector: true,
        check_text: true,
    }
}

fn engram_with_backends() -> (
    Arc<Engram>,
    Arc<InMemoryKv>,
    Arc<InMemoryVectorIndex>,
    Arc<InMemoryTextIndex>,
) {
    let kv = Arc::new(InMemoryKv::new());
    let vectors = Arc::new(InMemoryVectorIndex::new());
    let texts = Arc::new(InMemoryTextIndex::new());
    let engram = Arc::new(Engram::assemble(
        kv.clone() as Arc<dyn KvStorage>,
        vectors.clone(),
        texts.clone(),
        StorageMode::Lite,
        full_scope_sync(),
        None,
    ));
    (engram, kv, vectors, texts)
}

async fn seed_memory(engram: &Engram, subject: &str) -> EpisodicMemory {
    let memory = EpisodicMemory {
        user_id: Some("u1".into()),
        group_id: Some("g1".into()),
        timestamp: Some(Utc::now()),
        subject: Some(subject.into()),
        summary: Some(format!("summary of {subject}")),
        vector: Some(vec![0.6, 0.8]),
        ..Default::default()
    };
    let saved = engram.episodic().append(memory).await.unwrap();

    // Mirror the document into the vector and text shadows, as the
    // extraction pipeline does after encoding.
    let entity = json!({
        "id": saved.id.clone().unwrap(),
        "user_id": "u1",
        "group_id": "g1",
        "timestamp": saved.timestamp.map(|t| t.timestamp_millis()),
        "summary": saved.summary,
        "subject": saved.subject,
        "vector": [0.6, 0.8],
        "metadata": {"title": subject}
    });
    engram
        .episodic_vectors()
        .upsert(std::slice::from_ref(&entity))
        .await
        .unwrap();
    engram
        .episodic_texts()
        .index(std::slice::from_ref(&entity))
        .await
        .unwrap();
    saved
}

#[tokio::test]
async fn consistent_stores_validate_clean() {
    let (engram, _kv, _vectors, _texts) = engram_with_backends();
    seed_memory(&engram, "clean").await;

    let results = engram.run_validation().await;
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.error_count == 0));
    assert!(results.iter().all(|r| r.synced_count == 0));
}

#[tokio::test]
async fn validator_repairs_missing_vector_row() {
    let (engram, _kv, vectors, _texts) = engram_with_backends();
    let saved = seed_memory(&engram, "repairable").await;
    let id = saved.id.clone().unwrap();

    // Remove the index row behind the proxy's back.
    assert!(vectors.remove_row("episodic_memory_vectors", &id));

    let results = engram.run_validation().await;
    let vector_pass = results
        .iter()
        .find(|r| r.target == "vector_index" && r.doc_type == "episodic_memories")
        .unwrap();
    assert_eq!(vector_pass.missing_count, 1);
    assert!(vector_pass.synced_count >= 1);
    assert_eq!(vector_pass.error_count, 0);

    // The row is searchable again, with full fields materialized.
    let hits = engram
        .episodic_vectors()
        .search(&VectorSearchRequest {
            vector: None,
            filter: Some(Filter::eq("id", id.clone())),
            limit: 1,
            output_fields: vec!["*".to_string()],
        })
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["subject"], "repairable");
}

#[tokio::test]
async fn validator_repairs_missing_text_document() {
    let (engram, _kv, _vectors, texts) = engram_with_backends();
    let saved = seed_memory(&engram, "searchable").await;
    let id = saved.id.clone().unwrap();

    assert!(texts.remove_doc("episodic_memory_text", &id));

    let results = engram.run_validation().await;
    let text_pass = results
        .iter()
        .find(|r| r.target == "text_index" && r.doc_type == "episodic_memories")
        .unwrap();
    assert_eq!(text_pass.synced_count, 1);

    let hits = engram
        .episodic_texts()
        .search("searchable", None, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], id);
}

#[tokio::test]
async fn missing_kv_body_is_reported_not_fabricated() {
    let (engram, kv, vectors, _texts) = engram_with_backends();
    let saved = seed_memory(&engram, "ghost").await;
    let id = saved.id.clone().unwrap();

    // Drop the authoritative body and the index row: nothing to rebuild from.
    kv.delete(&format!("episodic_memory_vectors:{id}")).await;
    assert!(vectors.remove_row("episodic_memory_vectors", &id));

    let results = engram.run_validation().await;
    let vector_pass = results
        .iter()
        .find(|r| r.target == "vector_index" && r.doc_type == "episodic_memories")
        .unwrap();
    assert_eq!(vector_pass.synced_count, 0);
    assert!(vector_pass.error_count >= 1);
    // The index row stays gone; fabricating content is unsafe.
    assert!(vectors.raw_row("episodic_memory_vectors", &id).is_none());
}

#[tokio::test]
async fn document_pass_counts_missing_bodies() {
    let (engram, kv, _vectors, _texts) = engram_with_backends();
    let saved = seed_memory(&engram, "orphaned").await;
    let id = saved.id.clone().unwrap();

    // The document-store body (bare id key) vanishes.
    kv.delete(&id).await;

    let results = engram.run_validation().await;
    let doc_pass = results
        .iter()
        .find(|r| r.target == "document_store" && r.doc_type == "episodic_memories")
        .unwrap();
    assert_eq!(doc_pass.missing_count, 1);
    assert!(doc_pass.error_count >= 1);
}

#[tokio::test]
async fn full_pass_with_zero_errors_means_every_id_has_a_body() {
    let (engram, kv, _vectors, _texts) = engram_with_backends();
    for subject in ["a", "b", "c"] {
        seed_memory(&engram, subject).await;
    }

    let results = engram.run_validation().await;
    assert!(results.iter().all(|r| r.error_count == 0));

    // Spot-check the property the pass certifies.
    let collection = engram.episodic().collection();
    for id in collection.ids_since(None) {
        assert!(kv.get(&id).await.is_some());
    }
}

#[tokio::test]
async fn scoped_pass_skips_old_documents() {
    let (engram, _kv, vectors, _texts) = engram_with_backends();
    let saved = seed_memory(&engram, "recent").await;
    let id = saved.id.clone().unwrap();
    assert!(vectors.remove_row("episodic_memory_vectors", &id));

    // A 7-day scope still covers a record created just now.
    let scoped = StartupSyncConfig {
        days: 7,
        ..full_scope_sync()
    };
    let results = engram.build_validator_scoped(scoped).run().await;
    let vector_pass = results
        .iter()
        .find(|r| r.target == "vector_index" && r.doc_type == "episodic_memories")
        .unwrap();
    assert_eq!(vector_pass.synced_count, 1);
}
