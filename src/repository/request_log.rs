/// Accumulation-log repository.
///
/// The raw request log is the per-group append-only record of ingest
/// requests. Its interesting semantics are the `sync_status` transitions,
/// executed as conditional `update_many` calls so concurrent requests can
/// never advance each other's records:
///
/// ```text
/// -1 (logged) ──confirm──▶ 0 (accumulating) ──drain──▶ 1 (consumed)
///      └───────────────────────── drain ──────────────────▶ 1
/// ```
///
/// Each transition predicate names the prior state, so a lost race updates
/// zero rows or advances correctly; the state never decrements.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, error, info};

use crate::config::StorageMode;
use crate::document::{Collection, DocumentStore, DualDocumentProxy};
use crate::kv::KvStorage;
use crate::models::{sync_status, RequestLogRecord, REQUEST_LOG_SCHEMA};
use crate::query::{Filter, Query};

/// Repository over the raw request log.
pub struct RequestLogRepository {
    proxy: DualDocumentProxy<RequestLogRecord>,
}

impl RequestLogRepository {
    /// Build against the shared document store and primary KV.
    pub fn new(store: &DocumentStore, kv: Arc<dyn KvStorage>, mode: StorageMode) -> Self {
        let collection = store.collection(&REQUEST_LOG_SCHEMA);
        Self {
            proxy: DualDocumentProxy::new(collection, kv, mode),
        }
    }

    /// The backing collection (validator / test surface).
    pub fn collection(&self) -> &Arc<Collection> {
        self.proxy.collection()
    }

    /// Persist one raw request log record.
    ///
    /// Records are born with `sync_status = -1` unless the caller says
    /// otherwise.
    pub async fn append(&self, mut record: RequestLogRecord) -> Option<RequestLogRecord> {
        match self.proxy.insert(&mut record).await {
            Ok(()) => {
                debug!(
                    group_id = %record.group_id,
                    request_id = %record.request_id,
                    "request log saved"
                );
                Some(record)
            }
            Err(e) => {
                error!(error = %e, "failed to save request log");
                None
            }
        }
    }

    /// Fetch one record by request id.
    pub async fn get_by_request_id(&self, request_id: &str) -> Option<RequestLogRecord> {
        let query = Query::new().filter(Filter::eq("request_id", request_id));
        match self.proxy.find_one(&query).await {
            Ok(record) => record,
            Err(e) => {
                error!(request_id, error = %e, "failed to fetch request log");
                None
            }
        }
    }

    /// The open window for a group: records still in state -1 or 0, oldest
    /// first. This is the primary read of the extraction consumer.
    pub async fn fetch_unprocessed(&self, group_id: &str, limit: usize) -> Vec<RequestLogRecord> {
        self.fetch_by_window(
            group_id,
            &[sync_status::LOGGED, sync_status::ACCUMULATING],
            None,
            None,
            limit,
            true,
            &[],
        )
        .await
    }

    /// Window query with explicit status set, time bounds, and exclusions.
    ///
    /// Ascending `created_at` is the replay order consumers rely on;
    /// descending is only for inspecting the latest activity.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_by_window(
        &self,
        group_id: &str,
        statuses: &[i64],
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        limit: usize,
        ascending: bool,
        exclude_message_ids: &[String],
    ) -> Vec<RequestLogRecord> {
        let mut query = Query::new().filter(Filter::eq("group_id", group_id));

        match statuses {
            [] => {}
            [only] => query = query.filter(Filter::eq("sync_status", *only)),
            many => {
                query = query.filter(Filter::r#in(
                    "sync_status",
                    many.iter().map(|s| json!(s)).collect(),
                ))
            }
        }
        if let Some(start) = start_time {
            query = query.filter(Filter::gte("created_at", start.timestamp_millis()));
        }
        if let Some(end) = end_time {
            query = query.filter(Filter::lte("created_at", end.timestamp_millis()));
        }
        if !exclude_message_ids.is_empty() {
            query = query.filter(Filter::not_in(
                "message_id",
                exclude_message_ids.iter().map(|m| json!(m)).collect(),
            ));
        }
        query = query.sort_by("created_at", ascending).limit(limit);

        match self.proxy.find(&query).await {
            Ok(records) => records,
            Err(e) => {
                error!(group_id, error = %e, "window query failed");
                Vec::new()
            }
        }
    }

    /// Latest activity for one user, newest first.
    pub async fn find_by_user_id(&self, user_id: &str, limit: usize) -> Vec<RequestLogRecord> {
        let query = Query::new()
            .filter(Filter::eq("user_id", user_id))
            .sort_by("created_at", false)
            .limit(limit);
        match self.proxy.find(&query).await {
            Ok(records) => records,
            Err(e) => {
                error!(user_id, error = %e, "user query failed");
                Vec::new()
            }
        }
    }

    /// Advance the named messages of a group from -1 to 0.
    ///
    /// The precise form: only records matching group, message id, *and*
    /// prior state advance, so a slow concurrent ingest cannot promote
    /// another request's logs.
    pub async fn confirm_accumulation_by_message_ids(
        &self,
        group_id: &str,
        message_ids: &[String],
    ) -> usize {
        if message_ids.is_empty() {
            debug!(group_id, "empty message_ids, skipping confirmation");
            return 0;
        }

        let filters = vec![
            Filter::eq("group_id", group_id),
            Filter::r#in(
                "message_id",
                message_ids.iter().map(|m| json!(m)).collect(),
            ),
            Filter::eq("sync_status", sync_status::LOGGED),
        ];
        let modified = self
            .transition(filters, sync_status::ACCUMULATING)
            .await;
        info!(
            group_id,
            message_ids = message_ids.len(),
            modified,
            "confirmed window accumulation (precise)"
        );
        modified
    }

    /// Advance every logged record of a group from -1 to 0.
    ///
    /// Offline-repair form; production code prefers
    /// [`Self::confirm_accumulation_by_message_ids`].
    pub async fn confirm_accumulation_by_group_id(&self, group_id: &str) -> usize {
        let filters = vec![
            Filter::eq("group_id", group_id),
            Filter::eq("sync_status", sync_status::LOGGED),
        ];
        let modified = self
            .transition(filters, sync_status::ACCUMULATING)
            .await;
        info!(group_id, modified, "confirmed window accumulation");
        modified
    }

    /// Drain the window: every record of a group in state -1 or 0 moves to 1,
    /// except the named carry-over messages.
    pub async fn mark_as_used_by_group_id(
        &self,
        group_id: &str,
        exclude_message_ids: &[String],
    ) -> usize {
        let mut filters = vec![
            Filter::eq("group_id", group_id),
            Filter::r#in(
                "sync_status",
                vec![json!(sync_status::LOGGED), json!(sync_status::ACCUMULATING)],
            ),
        ];
        if !exclude_message_ids.is_empty() {
            filters.push(Filter::not_in(
                "message_id",
                exclude_message_ids.iter().map(|m| json!(m)).collect(),
            ));
        }
        let modified = self.transition(filters, sync_status::CONSUMED).await;
        info!(
            group_id,
            exclude = exclude_message_ids.len(),
            modified,
            "marked window as used"
        );
        modified
    }

    /// Remove every record of a group. Operational surface only; the happy
    /// path never deletes, it consumes.
    pub async fn delete_by_group_id(&self, group_id: &str) -> usize {
        let query = Query::new().filter(Filter::eq("group_id", group_id));
        match self.proxy.delete_many(&query).await {
            Ok(removed) => {
                info!(group_id, removed, "deleted request logs");
                removed
            }
            Err(e) => {
                error!(group_id, error = %e, "failed to delete request logs");
                0
            }
        }
    }

    async fn transition(&self, filters: Vec<Filter>, to: i64) -> usize {
        let mut set = Map::new();
        set.insert("sync_status".to_string(), JsonValue::from(to));
        match self.proxy.update_many(&filters, &set).await {
            Ok(modified) => modified,
            Err(e) => {
                error!(error = %e, to, "sync_status transition failed");
                0
            }
        }
    }
}
