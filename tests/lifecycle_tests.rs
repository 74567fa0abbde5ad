/// Lifecycle and end-to-end flow tests.
///
/// Drives the write path the way the ingest and extraction layers do:
/// message → accumulation log → window confirmation → derived documents →
/// vector/text shadows → retrieval.
use chrono::Utc;
use engram::index::VectorSearchRequest;
use engram::models::{sync_status, EpisodicMemory, RequestLogRecord};
use engram::query::Filter;
use engram::{Engram, EngramConfig};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn start_with_in_memory_config() {
    init_tracing();
    let engram = Engram::start(EngramConfig::in_memory()).await.unwrap();
    assert!(engram.status_channel().is_none());
    engram.shutdown().await;
}

#[tokio::test]
async fn ingest_to_retrieval_flow() {
    init_tracing();
    let engram = Engram::start(EngramConfig::in_memory()).await.unwrap();

    // 1. Ingest three raw messages.
    for (message, content) in [
        ("m1", "let's go hiking on saturday"),
        ("m2", "i'll bring the map"),
        ("m3", "meet at nine"),
    ] {
        engram
            .request_logs()
            .append(RequestLogRecord {
                group_id: "g1".into(),
                request_id: format!("req-{message}"),
                user_id: Some("u1".into()),
                message_id: Some(message.into()),
                content: Some(content.into()),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    // 2. The window accumulates, then drains.
    engram
        .request_logs()
        .confirm_accumulation_by_message_ids(
            "g1",
            &["m1".into(), "m2".into(), "m3".into()],
        )
        .await;
    let window = engram.request_logs().fetch_unprocessed("g1", 100).await;
    assert_eq!(window.len(), 3);
    assert!(window
        .iter()
        .all(|r| r.sync_status == sync_status::ACCUMULATING));

    // 3. Extraction derives an episodic memory from the window.
    let memory = engram
        .episodic()
        .append(EpisodicMemory {
            user_id: Some("u1".into()),
            group_id: Some("g1".into()),
            timestamp: Some(Utc::now()),
            keywords: Some(vec!["hiking".into()]),
            subject: Some("Weekend hike".into()),
            summary: Some("The group plans a Saturday hike.".into()),
            vector: Some(vec![0.6, 0.8]),
            ..Default::default()
        })
        .await
        .unwrap();
    let memory_id = memory.id.clone().unwrap();

    // 4. The same document flows into the vector and text shadows.
    let entity = json!({
        "id": memory_id.clone(),
        "user_id": "u1",
        "group_id": "g1",
        "timestamp": memory.timestamp.map(|t| t.timestamp_millis()),
        "summary": memory.summary.clone(),
        "keywords": ["hiking"],
        "vector": [0.6, 0.8],
        "metadata": {"subject": "Weekend hike"}
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

    // 5. The window is consumed.
    engram.request_logs().mark_as_used_by_group_id("g1", &[]).await;
    assert!(engram
        .request_logs()
        .fetch_unprocessed("g1", 100)
        .await
        .is_empty());

    // 6. Retrieval sees full entities through every path.
    let by_id = engram.episodic().get_by_id(&memory_id).await.unwrap();
    assert_eq!(by_id.subject.as_deref(), Some("Weekend hike"));

    let vector_hits = engram
        .episodic_vectors()
        .search(&VectorSearchRequest {
            vector: Some(vec![0.6, 0.8]),
            filter: Some(Filter::eq("group_id", "g1")),
            limit: 5,
            output_fields: vec!["*".into()],
        })
        .await
        .unwrap();
    assert_eq!(vector_hits.len(), 1);
    assert_eq!(vector_hits[0]["summary"], "The group plans a Saturday hike.");

    let text_hits = engram
        .episodic_texts()
        .search("hike", None, 5)
        .await
        .unwrap();
    assert_eq!(text_hits.len(), 1);
    assert_eq!(text_hits[0]["id"], json!(memory_id));

    // 7. A validation pass over the whole substrate is clean.
    let results = engram.run_validation().await;
    assert!(results.iter().all(|r| r.error_count == 0));

    engram.shutdown().await;
}

#[tokio::test]
async fn keyword_lookup_through_the_proxy() {
    let engram = Engram::start(EngramConfig::in_memory()).await.unwrap();
    engram
        .episodic()
        .append(EpisodicMemory {
            group_id: Some("g1".into()),
            timestamp: Some(Utc::now()),
            keywords: Some(vec!["travel".into(), "tokyo".into()]),
            summary: Some("planning a trip".into()),
            ..Default::default()
        })
        .await
        .unwrap();

    let hits = engram.episodic().find_by_keyword("tokyo", 10).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].summary.as_deref(), Some("planning a trip"));
    engram.shutdown().await;
}
