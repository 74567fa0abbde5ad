/// Accumulation-log and window state-machine tests.
///
/// Covers the three-state `sync_status` lifecycle, the precise-update rules
/// that isolate concurrent requests, and the window queries consumers rely
/// on.
use std::sync::Arc;

use engram::config::StorageMode;
use engram::document::DocumentStore;
use engram::kv::{InMemoryKv, KvStorage};
use engram::models::{sync_status, RequestLogRecord};
use engram::repository::RequestLogRepository;

fn repository() -> RequestLogRepository {
    let store = DocumentStore::new();
    let kv: Arc<dyn KvStorage> = Arc::new(InMemoryKv::new());
    RequestLogRepository::new(&store, kv, StorageMode::Lite)
}

fn raw_log(group: &str, message: &str) -> RequestLogRecord {
    RequestLogRecord {
        group_id: group.into(),
        request_id: format!("req-{message}"),
        user_id: Some("u1".into()),
        message_id: Some(message.into()),
        content: Some(format!("content of {message}")),
        ..Default::default()
    }
}

#[tokio::test]
async fn ingest_and_window_confirmation() {
    let repo = repository();
    for message in ["m1", "m2", "m3"] {
        let saved = repo.append(raw_log("g", message)).await.unwrap();
        assert_eq!(saved.sync_status, sync_status::LOGGED);
    }

    let modified = repo
        .confirm_accumulation_by_message_ids("g", &["m1".into(), "m2".into()])
        .await;
    assert_eq!(modified, 2);

    // All three are still in the open window, oldest first.
    let unprocessed = repo.fetch_unprocessed("g", 10).await;
    assert_eq!(unprocessed.len(), 3);
    let messages: Vec<_> = unprocessed
        .iter()
        .filter_map(|r| r.message_id.clone())
        .collect();
    assert_eq!(messages, vec!["m1", "m2", "m3"]);

    let statuses: Vec<i64> = unprocessed.iter().map(|r| r.sync_status).collect();
    assert_eq!(
        statuses,
        vec![
            sync_status::ACCUMULATING,
            sync_status::ACCUMULATING,
            sync_status::LOGGED
        ]
    );
}

#[tokio::test]
async fn window_drain_consumes_everything() {
    let repo = repository();
    for message in ["m1", "m2", "m3"] {
        repo.append(raw_log("g", message)).await.unwrap();
    }
    repo.confirm_accumulation_by_message_ids("g", &["m1".into(), "m2".into()])
        .await;

    let drained = repo.mark_as_used_by_group_id("g", &[]).await;
    assert_eq!(drained, 3);

    assert!(repo.fetch_unprocessed("g", 10).await.is_empty());

    let consumed = repo
        .fetch_by_window("g", &[sync_status::CONSUMED], None, None, 10, true, &[])
        .await;
    assert_eq!(consumed.len(), 3);
}

#[tokio::test]
async fn transitions_never_decrement() {
    let repo = repository();
    repo.append(raw_log("g", "m1")).await.unwrap();

    // -1 -> 0
    assert_eq!(
        repo.confirm_accumulation_by_message_ids("g", &["m1".into()])
            .await,
        1
    );
    // Replaying the confirmation advances nothing: the predicate names -1.
    assert_eq!(
        repo.confirm_accumulation_by_message_ids("g", &["m1".into()])
            .await,
        0
    );

    // 0 -> 1
    assert_eq!(repo.mark_as_used_by_group_id("g", &[]).await, 1);
    // Consumed records are out of reach of both transitions.
    assert_eq!(
        repo.confirm_accumulation_by_message_ids("g", &["m1".into()])
            .await,
        0
    );
    assert_eq!(repo.mark_as_used_by_group_id("g", &[]).await, 0);

    let record = repo.get_by_request_id("req-m1").await.unwrap();
    assert_eq!(record.sync_status, sync_status::CONSUMED);
}

#[tokio::test]
async fn direct_drain_skips_accumulating_state() {
    let repo = repository();
    repo.append(raw_log("g", "m1")).await.unwrap();

    // -1 -> 1 without passing through 0 is a legal prefix.
    assert_eq!(repo.mark_as_used_by_group_id("g", &[]).await, 1);
    let record = repo.get_by_request_id("req-m1").await.unwrap();
    assert_eq!(record.sync_status, sync_status::CONSUMED);
}

#[tokio::test]
async fn confirmation_is_scoped_to_group_and_message() {
    let repo = repository();
    repo.append(raw_log("g1", "m1")).await.unwrap();
    repo.append(raw_log("g1", "m2")).await.unwrap();
    repo.append(raw_log("g2", "m1")).await.unwrap();

    // Another request confirming m1 in g1 must not touch g2's m1 or g1's m2.
    let modified = repo
        .confirm_accumulation_by_message_ids("g1", &["m1".into()])
        .await;
    assert_eq!(modified, 1);

    let g2 = repo.fetch_unprocessed("g2", 10).await;
    assert_eq!(g2[0].sync_status, sync_status::LOGGED);

    let g1 = repo.fetch_unprocessed("g1", 10).await;
    let by_message: std::collections::HashMap<_, _> = g1
        .iter()
        .map(|r| (r.message_id.clone().unwrap(), r.sync_status))
        .collect();
    assert_eq!(by_message["m1"], sync_status::ACCUMULATING);
    assert_eq!(by_message["m2"], sync_status::LOGGED);
}

#[tokio::test]
async fn drain_respects_exclusions() {
    let repo = repository();
    for message in ["m1", "m2", "m3"] {
        repo.append(raw_log("g", message)).await.unwrap();
    }

    let drained = repo
        .mark_as_used_by_group_id("g", &["m3".into()])
        .await;
    assert_eq!(drained, 2);

    let open = repo.fetch_unprocessed("g", 10).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].message_id.as_deref(), Some("m3"));
}

#[tokio::test]
async fn empty_message_ids_is_a_no_op() {
    let repo = repository();
    repo.append(raw_log("g", "m1")).await.unwrap();
    assert_eq!(repo.confirm_accumulation_by_message_ids("g", &[]).await, 0);
    let record = repo.get_by_request_id("req-m1").await.unwrap();
    assert_eq!(record.sync_status, sync_status::LOGGED);
}

#[tokio::test]
async fn group_wide_confirmation_for_offline_repair() {
    let repo = repository();
    repo.append(raw_log("g", "m1")).await.unwrap();
    repo.append(raw_log("g", "m2")).await.unwrap();

    assert_eq!(repo.confirm_accumulation_by_group_id("g").await, 2);
    let open = repo.fetch_unprocessed("g", 10).await;
    assert!(open
        .iter()
        .all(|r| r.sync_status == sync_status::ACCUMULATING));
}

#[tokio::test]
async fn window_query_bounds_and_order() {
    let repo = repository();
    for message in ["m1", "m2", "m3", "m4"] {
        repo.append(raw_log("g", message)).await.unwrap();
    }

    // Bounded fetch keeps replay order.
    let first_two = repo
        .fetch_by_window(
            "g",
            &[sync_status::LOGGED, sync_status::ACCUMULATING],
            None,
            None,
            2,
            true,
            &[],
        )
        .await;
    let messages: Vec<_> = first_two
        .iter()
        .filter_map(|r| r.message_id.clone())
        .collect();
    assert_eq!(messages, vec!["m1", "m2"]);

    // Descending order inspects the latest activity.
    let latest = repo
        .fetch_by_window(
            "g",
            &[sync_status::LOGGED],
            None,
            None,
            1,
            false,
            &[],
        )
        .await;
    assert_eq!(latest[0].message_id.as_deref(), Some("m4"));

    // Exclusions drop the named messages.
    let filtered = repo
        .fetch_by_window(
            "g",
            &[sync_status::LOGGED],
            None,
            None,
            10,
            true,
            &["m2".into(), "m3".into()],
        )
        .await;
    let messages: Vec<_> = filtered
        .iter()
        .filter_map(|r| r.message_id.clone())
        .collect();
    assert_eq!(messages, vec!["m1", "m4"]);
}

#[tokio::test]
async fn full_payload_survives_the_round_trip() {
    let repo = repository();
    let mut record = raw_log("g", "m1");
    record.raw_input = Some(serde_json::json!({"messages": [{"role": "user"}]}));
    record.endpoint = Some("/api/v1/memories".into());
    repo.append(record).await.unwrap();

    let loaded = repo.get_by_request_id("req-m1").await.unwrap();
    assert_eq!(loaded.content.as_deref(), Some("content of m1"));
    assert_eq!(loaded.endpoint.as_deref(), Some("/api/v1/memories"));
    assert!(loaded.raw_input.is_some());
}

#[tokio::test]
async fn find_by_user_returns_newest_first() {
    let repo = repository();
    for message in ["m1", "m2"] {
        repo.append(raw_log("g", message)).await.unwrap();
    }
    let logs = repo.find_by_user_id("u1", 10).await;
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].message_id.as_deref(), Some("m2"));
}

#[tokio::test]
async fn delete_by_group_removes_rows_and_bodies() {
    let repo = repository();
    repo.append(raw_log("g1", "m1")).await.unwrap();
    repo.append(raw_log("g2", "m2")).await.unwrap();

    assert_eq!(repo.delete_by_group_id("g1").await, 1);
    assert!(repo.get_by_request_id("req-m1").await.is_none());
    assert!(repo.get_by_request_id("req-m2").await.is_some());
}
