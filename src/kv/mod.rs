/// Pluggable key-value substrate.
///
/// The KV owns the authoritative Full body of every document: keys are opaque
/// strings (document ids, or `{collection}:{id}` for index-backed classes)
/// and values are JSON strings. Three interchangeable implementations exist:
///
/// - [`InMemoryKv`]: process-local map, for tests and development
/// - [`RedisKv`]: shared networked cache, for production
/// - [`ZeroGKv`]: content-addressed chain storage via an external client
///
/// One implementation is selected at startup from `KV_STORAGE_TYPE` and
/// registered as the process-wide primary store (see `lifecycle`).
///
/// Failures are translated to benign returns at this boundary: reads come
/// back absent, writes come back `false`. Drift introduced by a failed write
/// is repaired by the startup validator.
use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

mod encoding;
mod memory;
mod redis;
mod zerog;

pub use encoding::{decode_value, decode_values_batch, encode_value};
pub use memory::InMemoryKv;
pub use redis::RedisKv;
pub use zerog::ZeroGKv;

/// Contract shared by every KV implementation.
#[async_trait]
pub trait KvStorage: Send + Sync {
    /// Get the most recently written value for `key`, or absent.
    async fn get(&self, key: &str) -> Option<String>;

    /// Make subsequent `get(key)` return `value`. Overwrites.
    async fn put(&self, key: &str, value: &str) -> bool;

    /// Make subsequent `get(key)` return absent.
    ///
    /// Returns whether a value was present (best effort for backends that
    /// cannot observe prior state).
    async fn delete(&self, key: &str) -> bool;

    /// Get many values in one call.
    ///
    /// The returned map contains every key whose value is present; missing
    /// keys are omitted.
    async fn batch_get(&self, keys: &[String]) -> HashMap<String, String>;

    /// Delete many keys in one call; returns the count actually removed.
    async fn batch_delete(&self, keys: &[String]) -> usize;

    /// Yield every live `(key, value)` pair exactly once.
    ///
    /// Tombstones (empty values) are skipped. Large backings page through a
    /// cursor so iteration never blocks the store. Isolation against
    /// concurrent mutation is implementation-defined.
    fn iterate_all(&self) -> BoxStream<'static, (String, String)>;

    /// Block until every queued write is durable.
    ///
    /// Only meaningful for backends with asynchronous uploads; the default
    /// is a no-op. Shutdown must call this before the process exits.
    async fn flush(&self) -> bool {
        true
    }
}
