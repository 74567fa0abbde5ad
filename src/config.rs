/// Environment-driven configuration.
///
/// Configuration is exclusively via named environment variables; there is no
/// config file for KV selection or the chain-backed secrets. The wallet
/// secret comes from `ZEROG_WALLET_KEY`, is held in the process, and is never
/// logged.
use std::env;

use crate::error::{EngramError, EngramResult};

/// Parse the loose boolean convention used across the service's env surface.
fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_int(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Which KV implementation backs the primary store.
///
/// Selected at startup from `KV_STORAGE_TYPE`; an unknown value falls back to
/// the in-memory implementation with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KvStorageType {
    /// Process-local hash map; non-persistent. Tests and development.
    #[default]
    InMemory,
    /// Shared networked cache (Redis-compatible).
    Redis,
    /// Content-addressed, append-only chain storage via an external client.
    ZeroG,
}

impl KvStorageType {
    /// Resolve the KV implementation from `KV_STORAGE_TYPE`.
    pub fn from_env() -> Self {
        let raw = env::var("KV_STORAGE_TYPE").unwrap_or_else(|_| "inmemory".to_string());
        match raw.to_lowercase().as_str() {
            "inmemory" => Self::InMemory,
            "redis" => Self::Redis,
            "zerog" => Self::ZeroG,
            other => {
                tracing::warn!(
                    kv_storage_type = other,
                    "unknown KV_STORAGE_TYPE, falling back to 'inmemory'"
                );
                Self::InMemory
            }
        }
    }
}

/// Connection settings for the chain-backed KV.
///
/// The wallet private key is read only from `ZEROG_WALLET_KEY`; it is never
/// accepted through any other channel and never appears in log output.
#[derive(Clone)]
pub struct ZeroGConfig {
    /// Comma-separated write endpoints.
    pub nodes: String,
    /// Endpoint used for read operations.
    pub read_node: String,
    /// EVM RPC endpoint for write settlement.
    pub rpc_url: String,
    /// Unified stream id shared by all collections.
    pub stream_id: String,
    /// Wallet private key (secret).
    pub wallet_key: String,
    /// Per-invocation timeout in seconds.
    pub timeout_secs: u64,
    /// Retry budget per invocation.
    pub max_retries: u32,
    /// Client binary to invoke. Overridable for tests.
    pub client_bin: String,
}

impl std::fmt::Debug for ZeroGConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroGConfig")
            .field("nodes", &self.nodes)
            .field("read_node", &self.read_node)
            .field("rpc_url", &self.rpc_url)
            .field("stream_id", &self.stream_id)
            .field("wallet_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("client_bin", &self.client_bin)
            .finish()
    }
}

impl ZeroGConfig {
    /// Build from the `ZEROG_*` environment variables.
    ///
    /// Missing required variables abort startup with a configuration error.
    pub fn from_env() -> EngramResult<Self> {
        let mut missing = Vec::new();
        let mut required = |name: &str| -> String {
            match env::var(name) {
                Ok(v) if !v.is_empty() => v,
                _ => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        };

        let nodes = required("ZEROG_NODES");
        let read_node = required("ZEROG_READ_NODE");
        let rpc_url = required("ZEROG_RPC_URL");
        let stream_id = required("ZEROG_STREAM_ID");
        let wallet_key = required("ZEROG_WALLET_KEY");

        if !missing.is_empty() {
            return Err(EngramError::Configuration {
                reason: format!(
                    "missing required 0G-Storage configuration: {}",
                    missing.join(", ")
                ),
            });
        }

        Ok(Self {
            nodes,
            read_node,
            rpc_url,
            stream_id,
            wallet_key,
            timeout_secs: env_int("ZEROG_TIMEOUT", 30).max(1) as u64,
            max_retries: env_int("ZEROG_MAX_RETRIES", 3).max(1) as u32,
            client_bin: env::var("ZEROG_CLIENT_BIN")
                .unwrap_or_else(|_| "0g-storage-client".to_string()),
        })
    }
}

/// Controls for the startup data-sync validator.
#[derive(Debug, Clone)]
pub struct StartupSyncConfig {
    /// One-shot script mode; skips the validator entirely.
    pub bootstrap_mode: bool,
    /// Master switch for the startup validator.
    pub enabled: bool,
    /// Scope in days; 0 means full database.
    pub days: i64,
    /// Validate the vector index.
    pub check_vector: bool,
    /// Validate the text index.
    pub check_text: bool,
}

impl StartupSyncConfig {
    /// Read `BOOTSTRAP_MODE` and the `STARTUP_SYNC_*` variables.
    pub fn from_env() -> Self {
        Self {
            bootstrap_mode: env_flag("BOOTSTRAP_MODE", false),
            enabled: env_flag("STARTUP_SYNC_ENABLED", true),
            days: env_int("STARTUP_SYNC_DAYS", 0),
            check_vector: env_flag("STARTUP_SYNC_MILVUS", true),
            check_text: env_flag("STARTUP_SYNC_ES", true),
        }
    }

    /// Whether the validator should run at all.
    pub fn should_run(&self) -> bool {
        !self.bootstrap_mode && self.enabled && (self.check_vector || self.check_text)
    }
}

/// Global storage-mode toggle.
///
/// In full mode the document store keeps complete records alongside the KV
/// and lite/full consistency is validated; in lite mode (the canonical mode)
/// the document store keeps only the lite projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Document store holds full records; consistency validation enabled.
    Full,
    /// Document store holds lite projections only.
    Lite,
}

impl StorageMode {
    /// Resolve from `FULL_STORAGE_MODE` (default `true`).
    pub fn from_env() -> Self {
        if env_flag("FULL_STORAGE_MODE", true) {
            Self::Full
        } else {
            Self::Lite
        }
    }

    /// Whether lite/full consistency comparison is performed.
    pub fn validates_consistency(&self) -> bool {
        matches!(self, Self::Full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kv_type_falls_back_to_inmemory() {
        env::set_var("KV_STORAGE_TYPE", "etcd");
        assert_eq!(KvStorageType::from_env(), KvStorageType::InMemory);
        env::remove_var("KV_STORAGE_TYPE");
    }

    #[test]
    fn zerog_config_requires_all_endpoints() {
        env::remove_var("ZEROG_NODES");
        env::remove_var("ZEROG_READ_NODE");
        env::remove_var("ZEROG_RPC_URL");
        env::remove_var("ZEROG_STREAM_ID");
        env::remove_var("ZEROG_WALLET_KEY");
        let err = ZeroGConfig::from_env().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ZEROG_NODES"));
        assert!(msg.contains("ZEROG_WALLET_KEY"));
    }

    #[test]
    fn wallet_key_is_redacted_in_debug() {
        let cfg = ZeroGConfig {
            nodes: "http://n1".into(),
            read_node: "http://r1".into(),
            rpc_url: "http://rpc".into(),
            stream_id: "s".into(),
            wallet_key: "super-secret".into(),
            timeout_secs: 30,
            max_retries: 3,
            client_bin: "0g-storage-client".into(),
        };
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
