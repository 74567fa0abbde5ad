/// Networked-cache KV implementation.
///
/// Stores values in a shared Redis-compatible service. Keys pass through
/// unchanged and values carry no expiration; persistence is the cache
/// server's concern. `iterate_all` pages through cursor-based SCAN so a large
/// keyspace never blocks the server.
use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use tracing::{debug, error};

use super::KvStorage;
use crate::error::{EngramError, EngramResult};

/// SCAN page size; also bounds each MGET batch during iteration.
const SCAN_PAGE: usize = 100;

/// Redis-backed KV.
///
/// Holds a pooled [`ConnectionManager`]; clones of the manager share the
/// underlying multiplexed connection, so per-call clones are cheap.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    /// Connect to the cache service at `url`.
    pub async fn connect(url: &str) -> EngramResult<Self> {
        let client = redis::Client::open(url).map_err(|e| EngramError::Transport {
            backend: "redis".to_string(),
            reason: e.to_string(),
        })?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| EngramError::Transport {
                backend: "redis".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { conn })
    }

    /// Wrap an already-established connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KvStorage for RedisKv {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        let value: redis::RedisResult<Option<String>> =
            redis::cmd("GET").arg(key).query_async(&mut conn).await;
        match value {
            Ok(value) => value,
            Err(e) => {
                error!(key = %key, error = %e, "redis GET failed");
                None
            }
        }
    }

    async fn put(&self, key: &str, value: &str) -> bool {
        let mut conn = self.conn.clone();
        let outcome: redis::RedisResult<()> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await;
        match outcome {
            Ok(()) => {
                debug!(key = %key, bytes = value.len(), "redis PUT");
                true
            }
            Err(e) => {
                error!(key = %key, error = %e, "redis SET failed");
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        let mut conn = self.conn.clone();
        let removed: redis::RedisResult<usize> =
            redis::cmd("DEL").arg(key).query_async(&mut conn).await;
        match removed {
            Ok(removed) => removed > 0,
            Err(e) => {
                error!(key = %key, error = %e, "redis DEL failed");
                false
            }
        }
    }

    async fn batch_get(&self, keys: &[String]) -> HashMap<String, String> {
        if keys.is_empty() {
            return HashMap::new();
        }

        let mut conn = self.conn.clone();
        let values: redis::RedisResult<Vec<Option<String>>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await;
        match values {
            Ok(values) => keys
                .iter()
                .zip(values)
                .filter_map(|(k, v)| v.map(|v| (k.clone(), v)))
                .collect(),
            Err(e) => {
                error!(count = keys.len(), error = %e, "redis MGET failed");
                HashMap::new()
            }
        }
    }

    async fn batch_delete(&self, keys: &[String]) -> usize {
        if keys.is_empty() {
            return 0;
        }

        let mut conn = self.conn.clone();
        let removed: redis::RedisResult<usize> =
            redis::cmd("DEL").arg(keys).query_async(&mut conn).await;
        match removed {
            Ok(removed) => {
                debug!(removed, requested = keys.len(), "redis batch delete");
                removed
            }
            Err(e) => {
                error!(count = keys.len(), error = %e, "redis batch DEL failed");
                0
            }
        }
    }

    fn iterate_all(&self) -> BoxStream<'static, (String, String)> {
        struct ScanState {
            conn: ConnectionManager,
            cursor: u64,
            buffer: VecDeque<(String, String)>,
            done: bool,
        }

        let state = ScanState {
            conn: self.conn.clone(),
            cursor: 0,
            buffer: VecDeque::new(),
            done: false,
        };

        stream::unfold(state, |mut st| async move {
            loop {
                if let Some(pair) = st.buffer.pop_front() {
                    return Some((pair, st));
                }
                if st.done {
                    return None;
                }

                let (next_cursor, keys): (u64, Vec<String>) = match redis::cmd("SCAN")
                    .arg(st.cursor)
                    .arg("COUNT")
                    .arg(SCAN_PAGE)
                    .query_async(&mut st.conn)
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        error!(error = %e, "redis SCAN failed, ending iteration");
                        return None;
                    }
                };

                st.cursor = next_cursor;
                if next_cursor == 0 {
                    st.done = true;
                }

                if keys.is_empty() {
                    continue;
                }

                let values: Vec<Option<String>> = match redis::cmd("MGET")
                    .arg(&keys)
                    .query_async(&mut st.conn)
                    .await
                {
                    Ok(values) => values,
                    Err(e) => {
                        error!(error = %e, "redis MGET failed during iteration");
                        return None;
                    }
                };

                for (key, value) in keys.into_iter().zip(values) {
                    // SCAN can return keys deleted since the page was read;
                    // empty values are tombstones either way.
                    if let Some(value) = value {
                        if !value.is_empty() {
                            st.buffer.push_back((key, value));
                        }
                    }
                }
            }
        })
        .boxed()
    }
}
