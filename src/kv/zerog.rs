/// Chain-backed KV implementation.
///
/// Wraps a content-addressed, append-only storage network driven through an
/// external command-line client. Values are Base64-encoded before submission
/// (the wire format tolerates neither newlines nor commas) and deletion is
/// modelled by writing the empty string.
///
/// Writes are asynchronous from the caller's view: `put`/`delete` enqueue the
/// encoded write to a single background uploader and keep the value in a
/// pending overlay so reads stay read-your-writes; [`ZeroGKv::flush`] blocks
/// until every queued write is durable on chain. Shutdown must flush, or
/// queued writes are lost.
///
/// Every client invocation is retried with exponential backoff up to the
/// configured bound on either timeout or non-zero exit. The wallet secret is
/// read from `ZEROG_WALLET_KEY` at startup and never logged.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::encoding::{decode_value, decode_values_batch, encode_value};
use super::KvStorage;
use crate::config::ZeroGConfig;
use crate::error::{EngramError, EngramResult};

/// Work item for the background uploader.
enum UploadJob {
    /// One `kv-write` invocation; values are already encoded (empty string
    /// marks a deletion).
    Write { keys: Vec<String>, values: Vec<String> },
    /// Barrier: acknowledged once every job enqueued before it is durable.
    Flush(oneshot::Sender<()>),
}

/// KV backed by 0G-Storage through the `0g-storage-client` binary.
pub struct ZeroGKv {
    config: Arc<ZeroGConfig>,
    /// Enqueued-but-not-yet-durable values (encoded); `""` = pending delete.
    pending: Arc<DashMap<String, String>>,
    tx: mpsc::UnboundedSender<UploadJob>,
}

impl ZeroGKv {
    /// Create the store and spawn its background uploader.
    pub fn new(config: ZeroGConfig) -> Self {
        let config = Arc::new(config);
        let pending: Arc<DashMap<String, String>> = Arc::new(DashMap::new());
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_uploader(rx, Arc::clone(&config), Arc::clone(&pending)));

        info!(
            stream_id = %config.stream_id,
            read_node = %config.read_node,
            timeout_secs = config.timeout_secs,
            max_retries = config.max_retries,
            "0G-Storage KV initialized"
        );

        Self {
            config,
            pending,
            tx,
        }
    }

    /// Enqueue one write invocation. Returns `false` if the uploader is gone.
    fn commit(&self, keys: Vec<String>, values: Vec<String>) -> bool {
        for (key, value) in keys.iter().zip(values.iter()) {
            self.pending.insert(key.clone(), value.clone());
        }
        match self.tx.send(UploadJob::Write { keys, values }) {
            Ok(()) => true,
            Err(_) => {
                error!("0G uploader is not running, write dropped");
                false
            }
        }
    }

    /// Read one page of keys from the chain, decoded.
    async fn read_chain(&self, keys: &[String]) -> EngramResult<HashMap<String, String>> {
        let keys_csv = keys.join(",");
        let args = vec![
            "kv-read".to_string(),
            "--node".to_string(),
            self.config.read_node.clone(),
            "--stream-id".to_string(),
            self.config.stream_id.clone(),
            "--stream-keys".to_string(),
            keys_csv,
        ];
        let stdout = execute_client(&self.config, &args).await?;
        // Response shape: {"key1":"b64value1","key2":"b64value2"}
        let encoded: HashMap<String, String> = serde_json::from_str(stdout.trim())?;
        Ok(decode_values_batch(encoded))
    }
}

#[async_trait]
impl KvStorage for ZeroGKv {
    async fn get(&self, key: &str) -> Option<String> {
        // Pending overlay wins: it is strictly newer than anything on chain.
        if let Some(entry) = self.pending.get(key) {
            if entry.value().is_empty() {
                return None;
            }
            return decode_value(entry.value()).ok();
        }

        let chain_keys = [key.to_string()];
        match self.read_chain(&chain_keys).await {
            Ok(mut decoded) => decoded.remove(key),
            Err(e) => {
                error!(key = %key, error = %e, "0G get failed");
                None
            }
        }
    }

    async fn put(&self, key: &str, value: &str) -> bool {
        let encoded = match encode_value(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(key = %key, error = %e, "0G put: value encoding failed");
                return false;
            }
        };
        debug!(key = %key, bytes = value.len(), "0G put enqueued");
        self.commit(vec![key.to_string()], vec![encoded])
    }

    async fn delete(&self, key: &str) -> bool {
        debug!(key = %key, "0G delete enqueued");
        self.commit(vec![key.to_string()], vec![String::new()])
    }

    async fn batch_get(&self, keys: &[String]) -> HashMap<String, String> {
        if keys.is_empty() {
            return HashMap::new();
        }

        let mut result = HashMap::new();
        let mut chain_keys = Vec::new();
        for key in keys {
            match self.pending.get(key) {
                Some(entry) if entry.value().is_empty() => {
                    // Pending delete: absent, and not worth a chain read.
                }
                Some(entry) => {
                    if let Ok(json) = decode_value(entry.value()) {
                        result.insert(key.clone(), json);
                    }
                }
                None => chain_keys.push(key.clone()),
            }
        }

        if !chain_keys.is_empty() {
            match self.read_chain(&chain_keys).await {
                Ok(decoded) => result.extend(decoded),
                Err(e) => {
                    error!(count = chain_keys.len(), error = %e, "0G batch get failed");
                }
            }
        }
        result
    }

    async fn batch_delete(&self, keys: &[String]) -> usize {
        if keys.is_empty() {
            return 0;
        }
        let values = vec![String::new(); keys.len()];
        if self.commit(keys.to_vec(), values) {
            keys.len()
        } else {
            0
        }
    }

    fn iterate_all(&self) -> BoxStream<'static, (String, String)> {
        // The chain client exposes no key enumeration; full iteration is not
        // supported on this backend.
        warn!("0G-Storage does not support key enumeration; iterate_all yields nothing");
        stream::empty().boxed()
    }

    async fn flush(&self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(UploadJob::Flush(ack_tx)).is_err() {
            error!("0G uploader is not running, flush failed");
            return false;
        }
        ack_rx.await.is_ok()
    }
}

/// Background uploader: drains the queue sequentially so a `Flush` marker
/// acknowledges durability of everything enqueued before it.
async fn run_uploader(
    mut rx: mpsc::UnboundedReceiver<UploadJob>,
    config: Arc<ZeroGConfig>,
    pending: Arc<DashMap<String, String>>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            UploadJob::Write { keys, values } => {
                let keys_csv = keys.join(",");
                let values_csv = values.join(",");
                let args = vec![
                    "kv-write".to_string(),
                    "--node".to_string(),
                    config.nodes.clone(),
                    "--key".to_string(),
                    config.wallet_key.clone(),
                    "--stream-id".to_string(),
                    config.stream_id.clone(),
                    "--stream-keys".to_string(),
                    keys_csv,
                    "--stream-values".to_string(),
                    values_csv,
                    "--url".to_string(),
                    config.rpc_url.clone(),
                ];

                match execute_client(&config, &args).await {
                    Ok(_) => {
                        for (key, value) in keys.iter().zip(values.iter()) {
                            // Only clear the overlay if no newer write landed.
                            pending.remove_if(key, |_, current| current == value);
                        }
                        debug!(count = keys.len(), "0G write durable");
                    }
                    Err(e) => {
                        // The overlay keeps serving the value; the startup
                        // validator repairs the chain-side gap.
                        error!(count = keys.len(), error = %e, "0G write failed after retries");
                    }
                }
            }
            UploadJob::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("0G uploader stopped");
}

/// Invoke the storage client with retry and exponential backoff.
///
/// Retries on timeout and non-zero exit; backoff doubles per attempt
/// (1s, 2s, 4s, ...). Only the subcommand name is logged, never the full
/// argument vector, so the wallet secret stays out of log output.
async fn execute_client(config: &ZeroGConfig, args: &[String]) -> EngramResult<String> {
    let subcommand = args.first().map(String::as_str).unwrap_or("<none>");
    let timeout = Duration::from_secs(config.timeout_secs);

    for attempt in 1..=config.max_retries {
        let invocation = Command::new(&config.client_bin)
            .args(args)
            .kill_on_drop(true)
            .output();

        let outcome = tokio::time::timeout(timeout, invocation).await;
        match outcome {
            Ok(Ok(output)) if output.status.success() => {
                if attempt > 1 {
                    info!(subcommand, attempt, "0G client succeeded after retry");
                }
                return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    subcommand,
                    attempt,
                    max_retries = config.max_retries,
                    code = output.status.code(),
                    stderr = %stderr.trim(),
                    "0G client exited non-zero"
                );
                if attempt == config.max_retries {
                    return Err(EngramError::Transport {
                        backend: "zerog".to_string(),
                        reason: format!(
                            "{subcommand} failed with code {:?} after {} attempts",
                            output.status.code(),
                            config.max_retries
                        ),
                    });
                }
            }
            Ok(Err(e)) => {
                warn!(subcommand, attempt, error = %e, "0G client failed to spawn");
                if attempt == config.max_retries {
                    return Err(EngramError::Transport {
                        backend: "zerog".to_string(),
                        reason: format!("{subcommand} could not be spawned: {e}"),
                    });
                }
            }
            Err(_) => {
                warn!(
                    subcommand,
                    attempt,
                    timeout_secs = config.timeout_secs,
                    "0G client timed out"
                );
                if attempt == config.max_retries {
                    return Err(EngramError::Transport {
                        backend: "zerog".to_string(),
                        reason: format!(
                            "{subcommand} timed out after {} attempts (timeout={}s)",
                            config.max_retries, config.timeout_secs
                        ),
                    });
                }
            }
        }

        let backoff = Duration::from_secs(1 << (attempt - 1));
        tokio::time::sleep(backoff).await;
    }

    unreachable!("retry loop returns on final attempt")
}
