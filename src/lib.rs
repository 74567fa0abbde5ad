//! # Engram: dual-storage memory substrate
//!
//! Engram is the persistence core of a long-term conversational memory
//! service. Every logical document is split in two:
//!
//! - a thin **lite** shadow (indexed and query fields only) lives in the
//!   indexed document store, which owns ids and audit timestamps;
//! - the complete **full** body lives in a pluggable key-value store, which
//!   is authoritative for content.
//!
//! Classes that are searchable also keep a compact shadow in a vector index
//! and a text index, with the full entity stored in the KV under a
//! `{collection}:{id}` key. Proxies make all of this transparent: reads
//! always return full records, queries are validated against the lite field
//! set before execution, and a startup validator detects and repairs drift
//! between the stores.
//!
//! ## Quick start
//!
//! ```ignore
//! use engram::{Engram, EngramConfig};
//! use engram::models::RequestLogRecord;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engram = Engram::start(EngramConfig::in_memory()).await?;
//!
//!     // Ingest a raw message into the accumulation log.
//!     let record = RequestLogRecord {
//!         group_id: "g1".into(),
//!         request_id: "req-1".into(),
//!         message_id: Some("m1".into()),
//!         content: Some("hello".into()),
//!         ..Default::default()
//!     };
//!     engram.request_logs().append(record).await;
//!
//!     // Confirm the window and drain it.
//!     engram.request_logs()
//!         .confirm_accumulation_by_message_ids("g1", &["m1".into()])
//!         .await;
//!     engram.request_logs()
//!         .mark_as_used_by_group_id("g1", &[])
//!         .await;
//!
//!     engram.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! 1. [`kv`]: the pluggable KV substrate (in-memory, redis, chain-backed)
//! 2. [`schema`]: lite-field derivation per document class
//! 3. [`document`]: indexed store + dual-storage proxy + query validation
//! 4. [`index`]: vector/text index seams and their dual-storage proxies
//! 5. [`repository`]: per-class repositories, including the accumulation
//!    log and its `sync_status` state machine
//! 6. [`status`]: the TTL-bounded per-request status channel
//! 7. [`validator`]: startup reconciliation of every store pair
//! 8. [`lifecycle`]: composition root for KV selection, wiring, shutdown
//!
//! ## Consistency model
//!
//! Within one logical write the lite row lands first and the full body
//! second; there is no rollback. Failures leave detectable drift that the
//! validator repairs where safe (the KV is authoritative; index rows are
//! rebuilt from it, never the other way around). `sync_status` transitions
//! are conditional per-row updates, so the three-state lifecycle of a raw
//! message never moves backwards.

pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod kv;
pub mod lifecycle;
pub mod models;
pub mod query;
pub mod repository;
pub mod schema;
pub mod status;
pub mod validator;

pub use config::{KvStorageType, StartupSyncConfig, StorageMode, ZeroGConfig};
pub use error::{EngramError, EngramResult};
pub use lifecycle::{Engram, EngramConfig};
