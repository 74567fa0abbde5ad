/// In-memory KV implementation.
///
/// A process-local concurrent map. Non-persistent; used by tests and the
/// default development mode.
use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};

use super::KvStorage;

/// In-memory KV backed by a [`DashMap`].
#[derive(Debug, Default)]
pub struct InMemoryKv {
    storage: DashMap<String, String>,
}

impl InMemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries. Test/diagnostic helper.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

#[async_trait]
impl KvStorage for InMemoryKv {
    async fn get(&self, key: &str) -> Option<String> {
        self.storage.get(key).map(|v| v.value().clone())
    }

    async fn put(&self, key: &str, value: &str) -> bool {
        self.storage.insert(key.to_string(), value.to_string());
        true
    }

    async fn delete(&self, key: &str) -> bool {
        self.storage.remove(key).is_some()
    }

    async fn batch_get(&self, keys: &[String]) -> HashMap<String, String> {
        let mut result = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(v) = self.storage.get(key) {
                result.insert(key.clone(), v.value().clone());
            }
        }
        result
    }

    async fn batch_delete(&self, keys: &[String]) -> usize {
        keys.iter()
            .filter(|key| self.storage.remove(key.as_str()).is_some())
            .count()
    }

    fn iterate_all(&self) -> BoxStream<'static, (String, String)> {
        // Snapshot the live map; iteration against concurrent mutation is
        // unspecified, so a point-in-time copy is a valid (and simple) choice.
        let snapshot: Vec<(String, String)> = self
            .storage
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        stream::iter(snapshot).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let kv = InMemoryKv::new();
        assert!(kv.put("k", "{\"a\":1}").await);
        assert_eq!(kv.get("k").await.as_deref(), Some("{\"a\":1}"));
        assert!(kv.delete("k").await);
        assert!(!kv.delete("k").await);
        assert_eq!(kv.get("k").await, None);
    }

    #[tokio::test]
    async fn batch_get_omits_missing_keys() {
        let kv = InMemoryKv::new();
        kv.put("a", "1").await;
        kv.put("c", "3").await;
        let got = kv
            .batch_get(&["a".into(), "b".into(), "c".into()])
            .await;
        assert_eq!(got.len(), 2);
        assert!(!got.contains_key("b"));
    }

    #[tokio::test]
    async fn empty_batches_are_no_ops() {
        let kv = InMemoryKv::new();
        assert!(kv.batch_get(&[]).await.is_empty());
        assert_eq!(kv.batch_delete(&[]).await, 0);
        assert_eq!(kv.iterate_all().collect::<Vec<_>>().await.len(), 0);
    }

    #[tokio::test]
    async fn iterate_all_yields_each_pair_once() {
        let kv = InMemoryKv::new();
        kv.put("a", "1").await;
        kv.put("b", "2").await;
        let mut pairs = kv.iterate_all().collect::<Vec<_>>().await;
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }
}
