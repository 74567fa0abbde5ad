/// Entity classes of the memory substrate.
///
/// Every class carries the same dual-storage shape: a store-minted `id`,
/// audit timestamps owned by the document store, and a compile-time
/// [`LiteSchema`] naming the fields materialized in the indexed store.
/// Everything else lives only in the full KV body.
///
/// Timestamps serialize as epoch milliseconds so range predicates over them
/// compare numerically in the document store.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::document::DocumentClass;
use crate::error::{EngramError, EngramResult};
use crate::schema::LiteSchema;

/// Three-state lifecycle of a raw request-log record.
pub mod sync_status {
    /// Persisted by the request handler; no downstream commitment yet.
    pub const LOGGED: i64 = -1;
    /// Confirmed as part of an active extraction window.
    pub const ACCUMULATING: i64 = 0;
    /// The window drained; incorporated into derived memory.
    pub const CONSUMED: i64 = 1;
}

/// Allowed values of the conversation `scene` field.
pub const SCENE_VALUES: &[&str] = &["group_chat", "assistant"];

macro_rules! impl_document_class {
    ($ty:ty, $schema:ident) => {
        impl DocumentClass for $ty {
            fn schema() -> &'static LiteSchema {
                &$schema
            }
            fn id(&self) -> Option<&str> {
                self.id.as_deref()
            }
            fn set_id(&mut self, id: String) {
                self.id = Some(id);
            }
            fn set_timestamps(&mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) {
                self.created_at = Some(created_at);
                self.updated_at = Some(updated_at);
            }
            fn touch(&mut self, updated_at: DateTime<Utc>) {
                self.updated_at = Some(updated_at);
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Raw request log (accumulation log)
// ---------------------------------------------------------------------------

/// Lite schema of the raw request log.
pub static REQUEST_LOG_SCHEMA: LiteSchema = LiteSchema::new(
    "memory_request_logs",
    &[
        "group_id",
        "request_id",
        "user_id",
        "event_id",
        "message_id",
        "message_create_time",
        "sync_status",
    ],
    &[
        &["group_id", "created_at"],
        &["group_id", "sync_status"],
        &["group_id", "user_id", "sync_status"],
        &["group_id", "message_create_time"],
    ],
    &[],
    &[],
    false,
);

/// One ingested raw message, tracked through the accumulation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub group_id: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Message creation time as supplied by the client (ISO 8601).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_create_time: Option<String>,
    /// See [`sync_status`]; starts at [`sync_status::LOGGED`].
    #[serde(default = "default_sync_status")]
    pub sync_status: i64,

    // Full-only payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refer_list: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_input_str: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_sync_status() -> i64 {
    sync_status::LOGGED
}

impl Default for RequestLogRecord {
    fn default() -> Self {
        Self {
            id: None,
            group_id: String::new(),
            request_id: String::new(),
            user_id: None,
            event_id: None,
            message_id: None,
            message_create_time: None,
            sync_status: sync_status::LOGGED,
            content: None,
            sender: None,
            sender_name: None,
            role: None,
            refer_list: None,
            raw_input: None,
            raw_input_str: None,
            version: None,
            endpoint: None,
            method: None,
            url: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl_document_class!(RequestLogRecord, REQUEST_LOG_SCHEMA);

// ---------------------------------------------------------------------------
// Episodic memory
// ---------------------------------------------------------------------------

/// Lite schema of episodic memories.
pub static EPISODIC_MEMORY_SCHEMA: LiteSchema = LiteSchema::new(
    "episodic_memories",
    &["user_id", "group_id", "timestamp", "keywords", "linked_entities"],
    &[&["user_id", "timestamp"], &["group_id", "timestamp"]],
    &[],
    &[],
    false,
);

impl EpisodicMemory {
    /// Lite fields kept in the vector index for this class.
    pub const LITE_VECTOR_FIELDS: &'static [&'static str] =
        &["vector", "user_id", "group_id", "timestamp"];

    /// Lite fields kept in the text index for this class.
    pub const LITE_TEXT_FIELDS: &'static [&'static str] =
        &["user_id", "group_id", "timestamp", "summary", "keywords"];
}

/// A derived episodic memory. `user_id = None` marks a group memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodicMemory {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Occurrence time of the episode.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_entities: Option<Vec<String>>,

    // Full-only payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<String>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extend: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_model: Option<String>,

    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl_document_class!(EpisodicMemory, EPISODIC_MEMORY_SCHEMA);

// ---------------------------------------------------------------------------
// Event log record
// ---------------------------------------------------------------------------

/// Lite schema of event-log records.
pub static EVENT_LOG_SCHEMA: LiteSchema = LiteSchema::new(
    "event_log_records",
    &["user_id", "group_id", "parent_id", "parent_type", "timestamp"],
    &[&["group_id", "timestamp"], &["parent_id", "parent_type"]],
    &[],
    &[],
    false,
);

impl EventLogRecord {
    /// Lite fields kept in the vector index for this class.
    pub const LITE_VECTOR_FIELDS: &'static [&'static str] = &[
        "vector",
        "user_id",
        "group_id",
        "timestamp",
        "event_type",
        "parent_id",
    ];

    /// Lite fields kept in the text index for this class.
    pub const LITE_TEXT_FIELDS: &'static [&'static str] = &[
        "user_id",
        "group_id",
        "timestamp",
        "atomic_fact",
        "event_type",
        "parent_id",
    ];
}

/// An atomic fact extracted from a window, child of an episodic memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLogRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Id of the ancestor document (episodic memory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,

    // Full-only payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atomic_fact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extend: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_model: Option<String>,

    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl_document_class!(EventLogRecord, EVENT_LOG_SCHEMA);

// ---------------------------------------------------------------------------
// Foresight record
// ---------------------------------------------------------------------------

/// Lite schema of foresight records.
///
/// The ancestor reference is spelled `parent_id` everywhere; the historical
/// `parent_episode_id` spelling is gone. Foresight is the one derived class
/// that supports soft deletion, so its lite set carries the marker fields.
pub static FORESIGHT_SCHEMA: LiteSchema = LiteSchema::new(
    "foresight_records",
    &[
        "user_id",
        "group_id",
        "parent_id",
        "parent_type",
        "start_time",
        "end_time",
    ],
    &[&["user_id", "start_time"], &["group_id", "start_time"]],
    &[],
    &[],
    true,
);

impl ForesightRecord {
    /// Lite fields kept in the vector index for this class.
    pub const LITE_VECTOR_FIELDS: &'static [&'static str] = &[
        "vector",
        "user_id",
        "group_id",
        "parent_id",
        "start_time",
        "end_time",
    ];

    /// Lite fields kept in the text index for this class.
    pub const LITE_TEXT_FIELDS: &'static [&'static str] = &[
        "user_id",
        "group_id",
        "parent_id",
        "start_time",
        "end_time",
        "content",
    ];
}

/// A prospective memory: something expected to matter in a future window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForesightRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<Utc>>,

    // Full-only payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extend: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_model: Option<String>,

    // Soft-delete markers.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_id: Option<String>,

    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl_document_class!(ForesightRecord, FORESIGHT_SCHEMA);

// ---------------------------------------------------------------------------
// Conversation metadata
// ---------------------------------------------------------------------------

/// Lite schema of conversation metadata.
pub static CONVERSATION_META_SCHEMA: LiteSchema = LiteSchema::new(
    "conversation_metas",
    &["group_id", "scene"],
    &[&["group_id", "scene"]],
    &[],
    &[],
    false,
);

/// Static description of one conversation group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub group_id: String,
    /// One of [`SCENE_VALUES`].
    pub scene: String,

    // Full-only payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_desc: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_details: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DocumentClass for ConversationMeta {
    fn schema() -> &'static LiteSchema {
        &CONVERSATION_META_SCHEMA
    }
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
    fn set_timestamps(&mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) {
        self.created_at = Some(created_at);
        self.updated_at = Some(updated_at);
    }
    fn touch(&mut self, updated_at: DateTime<Utc>) {
        self.updated_at = Some(updated_at);
    }

    fn validate(&self) -> EngramResult<()> {
        if SCENE_VALUES.contains(&self.scene.as_str()) {
            Ok(())
        } else {
            Err(EngramError::InvalidFieldValue {
                class_name: CONVERSATION_META_SCHEMA.class_name.to_string(),
                field: "scene".to_string(),
                value: self.scene.clone(),
                allowed: SCENE_VALUES.iter().map(|s| s.to_string()).collect(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation status
// ---------------------------------------------------------------------------

/// Lite schema of conversation status; one row per group.
pub static CONVERSATION_STATUS_SCHEMA: LiteSchema = LiteSchema::new(
    "conversation_status",
    &["group_id"],
    &[],
    &[&["group_id"]],
    &[],
    false,
);

/// Moving window markers for one conversation group.
///
/// Field updates are last-write-wins; no monotonicity is enforced here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub group_id: String,

    // Full-only payload.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub old_msg_start_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub new_msg_start_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_memcell_time: Option<DateTime<Utc>>,

    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl_document_class!(ConversationStatus, CONVERSATION_STATUS_SCHEMA);

// ---------------------------------------------------------------------------
// User profile
// ---------------------------------------------------------------------------

/// Lite schema of user profiles; one row per `(user_id, group_id)`.
pub static USER_PROFILE_SCHEMA: LiteSchema = LiteSchema::new(
    "user_profiles",
    &["user_id", "group_id"],
    &[],
    &[&["user_id", "group_id"]],
    &[],
    false,
);

/// Accumulated profile of one user within one group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub user_id: String,
    pub group_id: String,

    // Full-only payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memcell_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_cluster: Option<i64>,

    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl_document_class!(UserProfile, USER_PROFILE_SCHEMA);

// ---------------------------------------------------------------------------
// Cluster state
// ---------------------------------------------------------------------------

/// Lite schema of the clustering engine's checkpoint; one row per group.
pub static CLUSTER_STATE_SCHEMA: LiteSchema = LiteSchema::new(
    "cluster_states",
    &["group_id"],
    &[],
    &[&["group_id"]],
    &[],
    false,
);

/// Serialized state of the incremental clustering engine for one group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub group_id: String,

    // Full-only payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eventid_to_cluster: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cluster_idx: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_centroids: Option<Vec<Vec<f32>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_counts: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_last_ts: Option<JsonValue>,

    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl_document_class!(ClusterState, CLUSTER_STATE_SCHEMA);

// ---------------------------------------------------------------------------
// Core memory
// ---------------------------------------------------------------------------

/// Lite schema of versioned core memories.
pub static CORE_MEMORY_SCHEMA: LiteSchema = LiteSchema::new(
    "core_memories",
    &["user_id"],
    &[&["user_id", "version"], &["user_id", "is_latest"]],
    &[&["user_id", "version"]],
    &[],
    false,
);

/// A versioned core profile document for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreMemory {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_latest: Option<bool>,

    // Full-only payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl_document_class!(CoreMemory, CORE_MEMORY_SCHEMA);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::extract_lite_data;

    #[test]
    fn request_log_is_born_logged() {
        let record = RequestLogRecord::default();
        assert_eq!(record.sync_status, sync_status::LOGGED);
    }

    #[test]
    fn request_log_lite_set_holds_window_fields() {
        let set = REQUEST_LOG_SCHEMA.field_set();
        for field in ["group_id", "message_id", "sync_status", "created_at"] {
            assert!(set.contains(field), "missing {field}");
        }
        assert!(!set.contains("content"));
        assert!(!set.contains("raw_input"));
    }

    #[test]
    fn episodic_summary_is_full_only() {
        let memory = EpisodicMemory {
            user_id: Some("u1".into()),
            summary: Some("only-in-kv".into()),
            ..Default::default()
        };
        let full = serde_json::to_value(&memory).unwrap();
        let lite = extract_lite_data(&full, EPISODIC_MEMORY_SCHEMA.field_set());
        assert!(lite.contains_key("user_id"));
        assert!(!lite.contains_key("summary"));
    }

    #[test]
    fn foresight_lite_set_carries_soft_delete_markers() {
        let set = FORESIGHT_SCHEMA.field_set();
        for field in ["deleted_at", "deleted_by", "deleted_id"] {
            assert!(set.contains(field), "missing {field}");
        }
        // No other class declares soft deletion.
        assert!(!EPISODIC_MEMORY_SCHEMA.field_set().contains("deleted_at"));
        assert!(!EVENT_LOG_SCHEMA.field_set().contains("deleted_at"));
    }

    #[test]
    fn vector_lite_fields_name_only_serialized_keys() {
        let foresight = ForesightRecord {
            user_id: Some("u1".into()),
            group_id: Some("g1".into()),
            parent_id: Some("p1".into()),
            start_time: Some(Utc::now()),
            end_time: Some(Utc::now()),
            vector: Some(vec![0.1]),
            extend: Some(serde_json::json!({"note": "full only"})),
            ..Default::default()
        };
        let full = serde_json::to_value(&foresight).unwrap();
        for field in ForesightRecord::LITE_VECTOR_FIELDS {
            assert!(full.get(*field).is_some(), "{field} never serialized");
        }
        assert!(!ForesightRecord::LITE_VECTOR_FIELDS.contains(&"extend"));
    }

    #[test]
    fn scene_outside_allowed_set_is_rejected() {
        let meta = ConversationMeta {
            group_id: "g".into(),
            scene: "metaverse".into(),
            ..Default::default()
        };
        let err = meta.validate().unwrap_err();
        assert!(matches!(err, EngramError::InvalidFieldValue { .. }));

        let ok = ConversationMeta {
            group_id: "g".into(),
            scene: "group_chat".into(),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn timestamps_serialize_as_epoch_millis() {
        let record = RequestLogRecord {
            group_id: "g".into(),
            request_id: "r".into(),
            created_at: Some(Utc::now()),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["created_at"].is_i64());
    }

    #[test]
    fn memory_type_round_trips_through_rename() {
        let memory = EpisodicMemory {
            memory_type: Some("conversation".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&memory).unwrap();
        assert_eq!(json["type"], "conversation");
        let back: EpisodicMemory = serde_json::from_value(json).unwrap();
        assert_eq!(back.memory_type.as_deref(), Some("conversation"));
    }
}
