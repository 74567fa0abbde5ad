/// Startup data-sync validator.
///
/// On process start the validator reconciles each dual-storage class against
/// the KV, which holds the authoritative full bodies:
///
/// 1. **document store ↔ KV**: every lite row must have a KV body; a row
///    without one is drift, logged at ERROR (the KV is authoritative, so
///    nothing is fabricated to cover the gap);
/// 2. **vector index ↔ KV**: ids present in the document store whose KV
///    body exists but whose index row is missing get their lite projection
///    rebuilt from the body and re-inserted;
/// 3. **text index ↔ KV**: same repair for the text side.
///
/// Scope is last-N-days by `STARTUP_SYNC_DAYS`, or the full database when
/// that is zero (logged prominently, since full scans are slow). The validator
/// never blocks startup; the lifecycle spawns it as a detached task.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use crate::config::{StartupSyncConfig, StorageMode};
use crate::document::Collection;
use crate::index::{TextIndex, VectorIndex};
use crate::kv::KvStorage;
use crate::query::get_field;
use crate::schema::{extract_lite_data, LiteSchema};

/// KV batch size per page; bounds memory during full scans.
const PAGE_SIZE: usize = 100;

/// Timestamp fields compared with tolerance during consistency checks.
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "created_at", "updated_at"];

/// Allowed skew between the two stores' timestamps, in milliseconds.
const MAX_TIME_DIFF_MS: i64 = 1_000;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct SyncResult {
    /// Which store was reconciled ("document_store", "vector_index",
    /// "text_index").
    pub target: String,
    /// The document class checked.
    pub doc_type: String,
    /// Ids examined within scope.
    pub total_checked: usize,
    /// Ids missing from the target.
    pub missing_count: usize,
    /// Ids repaired into the target.
    pub synced_count: usize,
    /// Drift and transport failures observed.
    pub error_count: usize,
    /// Wall-clock seconds for the pass.
    pub elapsed_time: f64,
}

/// Vector-index binding of one class.
pub struct VectorBinding {
    pub index: Arc<dyn VectorIndex>,
    /// Logical collection name (KV namespace).
    pub collection: String,
    pub lite_fields: &'static [&'static str],
}

/// Text-index binding of one class.
pub struct TextBinding {
    pub index: Arc<dyn TextIndex>,
    /// Logical index name (KV namespace).
    pub index_name: String,
    pub lite_fields: &'static [&'static str],
}

/// One class registered for validation.
pub struct ValidationTarget {
    pub schema: &'static LiteSchema,
    pub collection: Arc<Collection>,
    pub vector: Option<VectorBinding>,
    pub text: Option<TextBinding>,
}

/// The validator over every registered class.
pub struct DataSyncValidator {
    kv: Arc<dyn KvStorage>,
    targets: Vec<ValidationTarget>,
    config: StartupSyncConfig,
    mode: StorageMode,
}

impl DataSyncValidator {
    /// Build a validator over the registered classes.
    pub fn new(
        kv: Arc<dyn KvStorage>,
        targets: Vec<ValidationTarget>,
        config: StartupSyncConfig,
        mode: StorageMode,
    ) -> Self {
        Self {
            kv,
            targets,
            config,
            mode,
        }
    }

    /// Run every enabled reconciliation and return the per-pass results.
    pub async fn run(&self) -> Vec<SyncResult> {
        if self.config.days == 0 {
            warn!(
                check_vector = self.config.check_vector,
                check_text = self.config.check_text,
                "starting FULL DATABASE validation (all documents); this may take a while"
            );
        } else {
            info!(
                days = self.config.days,
                check_vector = self.config.check_vector,
                check_text = self.config.check_text,
                "starting data sync validation"
            );
        }

        let cutoff_ms = (self.config.days > 0)
            .then(|| Utc::now().timestamp_millis() - self.config.days * 86_400_000);

        let passes = self.targets.iter().map(|target| self.validate_target(target, cutoff_ms));
        let results: Vec<SyncResult> = futures::future::join_all(passes)
            .await
            .into_iter()
            .flatten()
            .collect();

        let synced: usize = results.iter().map(|r| r.synced_count).sum();
        let errors: usize = results.iter().map(|r| r.error_count).sum();
        let checked: usize = results.iter().map(|r| r.total_checked).sum();
        if synced > 0 || errors > 0 {
            warn!(synced, errors, checked, "startup sync completed with repairs");
        } else {
            info!(checked, "startup sync completed, all data consistent");
        }
        results
    }

    async fn validate_target(
        &self,
        target: &ValidationTarget,
        cutoff_ms: Option<i64>,
    ) -> Vec<SyncResult> {
        let mut results = Vec::new();
        let ids = target.collection.ids_since(cutoff_ms);

        results.push(self.validate_documents(target, &ids).await);
        if self.config.check_vector {
            if let Some(binding) = &target.vector {
                results.push(self.validate_vector(target, binding, &ids).await);
            }
        }
        if self.config.check_text {
            if let Some(binding) = &target.text {
                results.push(self.validate_text(target, binding, &ids).await);
            }
        }
        for result in &results {
            log_result(result);
        }
        results
    }

    /// Document-store pass: every lite row within scope must have a KV body.
    async fn validate_documents(&self, target: &ValidationTarget, ids: &[String]) -> SyncResult {
        let started = Instant::now();
        let mut missing = 0;
        let mut errors = 0;

        for page in ids.chunks(PAGE_SIZE) {
            let bodies = self.kv.batch_get(page).await;
            for id in page {
                match bodies.get(id) {
                    None => {
                        missing += 1;
                        errors += 1;
                        error!(
                            class = target.schema.class_name,
                            id = %id,
                            "drift: document row has no KV body; not reconstructing"
                        );
                    }
                    Some(body) if self.mode.validates_consistency() => {
                        if let Some(row) = target.collection.find_by_id(id) {
                            if let Some(diff) =
                                compare_lite_projection(target.schema, &row, body)
                            {
                                errors += 1;
                                error!(
                                    class = target.schema.class_name,
                                    id = %id,
                                    diff = %diff,
                                    "drift: lite row diverges from KV body"
                                );
                            }
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        SyncResult {
            target: "document_store".to_string(),
            doc_type: target.schema.class_name.to_string(),
            total_checked: ids.len(),
            missing_count: missing,
            synced_count: 0,
            error_count: errors,
            elapsed_time: started.elapsed().as_secs_f64(),
        }
    }

    /// Vector pass: rebuild index rows whose KV body exists but whose index
    /// row is gone.
    async fn validate_vector(
        &self,
        target: &ValidationTarget,
        binding: &VectorBinding,
        ids: &[String],
    ) -> SyncResult {
        let started = Instant::now();
        let mut missing = 0;
        let mut synced = 0;
        let mut errors = 0;

        let index_ids: HashSet<String> = match binding.index.list_ids(&binding.collection).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                error!(collection = %binding.collection, error = %e, "cannot enumerate vector index");
                return SyncResult {
                    target: "vector_index".to_string(),
                    doc_type: target.schema.class_name.to_string(),
                    total_checked: ids.len(),
                    missing_count: 0,
                    synced_count: 0,
                    error_count: 1,
                    elapsed_time: started.elapsed().as_secs_f64(),
                };
            }
        };

        for page in ids.chunks(PAGE_SIZE) {
            let keys: Vec<String> = page
                .iter()
                .map(|id| format!("{}:{id}", binding.collection))
                .collect();
            let bodies = self.kv.batch_get(&keys).await;

            for id in page {
                if index_ids.contains(id) {
                    continue;
                }
                missing += 1;
                let key = format!("{}:{id}", binding.collection);
                match bodies.get(&key) {
                    Some(body) => {
                        match rebuild_lite_row(body, id, binding.lite_fields) {
                            Some(row) => {
                                match binding.index.insert(&binding.collection, &[row]).await {
                                    Ok(_) => synced += 1,
                                    Err(e) => {
                                        errors += 1;
                                        error!(
                                            collection = %binding.collection,
                                            id = %id,
                                            error = %e,
                                            "failed to re-insert vector row"
                                        );
                                    }
                                }
                            }
                            None => {
                                errors += 1;
                                error!(
                                    collection = %binding.collection,
                                    id = %id,
                                    "KV body is not a JSON object, cannot rebuild row"
                                );
                            }
                        }
                    }
                    None => {
                        errors += 1;
                        error!(
                            collection = %binding.collection,
                            id = %id,
                            "drift: vector row and KV body both missing; not reconstructing"
                        );
                    }
                }
            }
        }

        SyncResult {
            target: "vector_index".to_string(),
            doc_type: target.schema.class_name.to_string(),
            total_checked: ids.len(),
            missing_count: missing,
            synced_count: synced,
            error_count: errors,
            elapsed_time: started.elapsed().as_secs_f64(),
        }
    }

    /// Text pass: same repair as the vector side against the text index.
    async fn validate_text(
        &self,
        target: &ValidationTarget,
        binding: &TextBinding,
        ids: &[String],
    ) -> SyncResult {
        let started = Instant::now();
        let mut missing = 0;
        let mut synced = 0;
        let mut errors = 0;

        let index_ids: HashSet<String> = match binding.index.list_ids(&binding.index_name).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                error!(index = %binding.index_name, error = %e, "cannot enumerate text index");
                return SyncResult {
                    target: "text_index".to_string(),
                    doc_type: target.schema.class_name.to_string(),
                    total_checked: ids.len(),
                    missing_count: 0,
                    synced_count: 0,
                    error_count: 1,
                    elapsed_time: started.elapsed().as_secs_f64(),
                };
            }
        };

        for page in ids.chunks(PAGE_SIZE) {
            let keys: Vec<String> = page
                .iter()
                .map(|id| format!("{}:{id}", binding.index_name))
                .collect();
            let bodies = self.kv.batch_get(&keys).await;

            for id in page {
                if index_ids.contains(id) {
                    continue;
                }
                missing += 1;
                let key = format!("{}:{id}", binding.index_name);
                match bodies.get(&key) {
                    Some(body) => match rebuild_lite_row(body, id, binding.lite_fields) {
                        Some(doc) => match binding.index.index(&binding.index_name, &[doc]).await {
                            Ok(_) => synced += 1,
                            Err(e) => {
                                errors += 1;
                                error!(
                                    index = %binding.index_name,
                                    id = %id,
                                    error = %e,
                                    "failed to re-index text document"
                                );
                            }
                        },
                        None => {
                            errors += 1;
                            error!(
                                index = %binding.index_name,
                                id = %id,
                                "KV body is not a JSON object, cannot rebuild document"
                            );
                        }
                    },
                    None => {
                        errors += 1;
                        error!(
                            index = %binding.index_name,
                            id = %id,
                            "drift: text document and KV body both missing; not reconstructing"
                        );
                    }
                }
            }
        }

        SyncResult {
            target: "text_index".to_string(),
            doc_type: target.schema.class_name.to_string(),
            total_checked: ids.len(),
            missing_count: missing,
            synced_count: synced,
            error_count: errors,
            elapsed_time: started.elapsed().as_secs_f64(),
        }
    }
}

/// Rebuild a lite index row from an authoritative KV body.
fn rebuild_lite_row(body: &str, id: &str, lite_fields: &[&str]) -> Option<JsonValue> {
    let full: JsonValue = serde_json::from_str(body).ok()?;
    let object = full.as_object()?;
    let mut row = serde_json::Map::new();
    row.insert("id".to_string(), JsonValue::String(id.to_string()));
    for field in lite_fields {
        if let Some(value) = object.get(*field) {
            if !value.is_null() {
                row.insert((*field).to_string(), value.clone());
            }
        }
    }
    Some(JsonValue::Object(row))
}

/// Compare a lite row against the lite projection of a KV body.
///
/// Returns a human-readable diff, or `None` when consistent. Timestamp
/// fields tolerate small skew (the two stores round independently).
pub fn compare_lite_projection(
    schema: &LiteSchema,
    lite_row: &JsonValue,
    kv_body: &str,
) -> Option<String> {
    let full: JsonValue = serde_json::from_str(kv_body).ok()?;
    let projected = extract_lite_data(&full, schema.field_set());

    let mut diffs = Vec::new();
    for (field, expected) in &projected {
        let actual = get_field(lite_row, field);
        let matches = match &actual {
            Some(actual) => {
                if TIMESTAMP_FIELDS.contains(&field.as_str()) {
                    timestamps_close(actual, expected)
                } else {
                    actual == expected
                }
            }
            None => false,
        };
        if !matches {
            diffs.push(format!(
                "{field}: store={} kv={expected}",
                actual.unwrap_or(JsonValue::Null)
            ));
        }
    }

    (!diffs.is_empty()).then(|| diffs.join("; "))
}

fn timestamps_close(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => (a - b).abs() <= MAX_TIME_DIFF_MS,
        _ => a == b,
    }
}

fn log_result(result: &SyncResult) {
    if result.synced_count > 0 {
        warn!(
            doc_type = %result.doc_type,
            target = %result.target,
            missing = result.missing_count,
            synced = result.synced_count,
            errors = result.error_count,
            elapsed_secs = result.elapsed_time,
            "sync pass found and repaired missing rows"
        );
    } else if result.error_count > 0 {
        error!(
            doc_type = %result.doc_type,
            target = %result.target,
            errors = result.error_count,
            elapsed_secs = result.elapsed_time,
            "sync pass observed unrepairable drift"
        );
    } else {
        info!(
            doc_type = %result.doc_type,
            target = %result.target,
            checked = result.total_checked,
            elapsed_secs = result.elapsed_time,
            "sync pass consistent"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    static SCHEMA: LiteSchema = crate::schema::LiteSchema::new(
        "compare_docs",
        &["user_id", "timestamp"],
        &[],
        &[],
        &[],
        false,
    );

    #[test]
    fn consistent_projection_has_no_diff() {
        let row = json!({"id": "x", "user_id": "u", "timestamp": 1000, "created_at": 5, "updated_at": 5});
        let body = r#"{"id":"x","user_id":"u","timestamp":1000,"created_at":5,"updated_at":5,"summary":"full"}"#;
        assert_eq!(compare_lite_projection(&SCHEMA, &row, body), None);
    }

    #[test]
    fn timestamp_skew_within_tolerance_is_consistent() {
        let row = json!({"id": "x", "user_id": "u", "timestamp": 1000});
        let body = r#"{"id":"x","user_id":"u","timestamp":1800}"#;
        assert_eq!(compare_lite_projection(&SCHEMA, &row, body), None);

        let body = r#"{"id":"x","user_id":"u","timestamp":2500}"#;
        assert!(compare_lite_projection(&SCHEMA, &row, body).is_some());
    }

    #[test]
    fn diverging_field_is_reported_by_name() {
        let row = json!({"id": "x", "user_id": "u"});
        let body = r#"{"id":"x","user_id":"other"}"#;
        let diff = compare_lite_projection(&SCHEMA, &row, body).unwrap();
        assert!(diff.contains("user_id"));
    }

    #[test]
    fn rebuild_projects_lite_fields_only() {
        let body = r#"{"id":"x","vector":[0.1],"group_id":"g","content":"full"}"#;
        let row = rebuild_lite_row(body, "x", &["vector", "group_id"]).unwrap();
        assert_eq!(row["id"], "x");
        assert_eq!(row["group_id"], "g");
        assert!(row.get("content").is_none());
    }
}
