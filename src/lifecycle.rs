/// Lifecycle orchestration.
///
/// [`Engram::start`] is the process composition root: it selects the KV
/// implementation from configuration, registers it as the process-wide
/// primary store, wires every repository and index proxy against it, and
/// kicks off the startup validator as a detached task. [`Engram::shutdown`]
/// flushes the KV before the process exits, mandatory for the chain-backed
/// store, whose queued writes are otherwise lost.
///
/// # Example
///
/// ```ignore
/// use engram::Engram;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engram = Engram::start_from_env().await?;
///
///     let logs = engram.request_logs();
///     // ... serve ...
///
///     engram.shutdown().await;
///     Ok(())
/// }
/// ```
use std::env;
use std::sync::Arc;

use tracing::info;

use crate::config::{KvStorageType, StartupSyncConfig, StorageMode, ZeroGConfig};
use crate::document::DocumentStore;
use crate::error::{EngramError, EngramResult};
use crate::index::{
    InMemoryTextIndex, InMemoryVectorIndex, TextDualProxy, TextIndex, VectorDualProxy, VectorIndex,
};
use crate::kv::{InMemoryKv, KvStorage, RedisKv, ZeroGKv};
use crate::models::{EpisodicMemory, EventLogRecord, ForesightRecord};
use crate::models::{
    CLUSTER_STATE_SCHEMA, CONVERSATION_META_SCHEMA, CONVERSATION_STATUS_SCHEMA,
    CORE_MEMORY_SCHEMA, EPISODIC_MEMORY_SCHEMA, EVENT_LOG_SCHEMA, FORESIGHT_SCHEMA,
    REQUEST_LOG_SCHEMA, USER_PROFILE_SCHEMA,
};
use crate::repository::{
    ClusterStateRepository, ConversationMetaRepository, ConversationStatusRepository,
    CoreMemoryRepository, EpisodicMemoryRepository, EventLogRepository, ForesightRepository,
    RequestLogRepository, UserProfileRepository,
};
use crate::status::{DefaultTenantProvider, RequestStatusChannel, TenantKeyProvider};
use crate::validator::{
    DataSyncValidator, SyncResult, TextBinding, ValidationTarget, VectorBinding,
};

/// Logical vector collection names (KV namespaces).
mod vector_collections {
    pub const EPISODIC: &str = "episodic_memory_vectors";
    pub const EVENT_LOG: &str = "event_log_vectors";
    pub const FORESIGHT: &str = "foresight_vectors";
}

/// Logical text index names (KV namespaces).
mod text_indices {
    pub const EPISODIC: &str = "episodic_memory_text";
    pub const EVENT_LOG: &str = "event_log_text";
    pub const FORESIGHT: &str = "foresight_text";
}

/// Startup configuration for [`Engram::start`].
pub struct EngramConfig {
    /// Which KV backs the primary store.
    pub kv_type: KvStorageType,
    /// Lite vs full document-store rows.
    pub storage_mode: StorageMode,
    /// Startup-validator controls.
    pub sync: StartupSyncConfig,
    /// Cache service URL; enables the redis KV and the status channel.
    pub redis_url: Option<String>,
    /// Chain-backed KV settings; required when `kv_type` is ZeroG.
    pub zerog: Option<ZeroGConfig>,
}

impl EngramConfig {
    /// Resolve everything from the environment.
    ///
    /// Fatal configuration problems (missing `ZEROG_*` variables when the
    /// chain KV is selected) surface here and abort startup.
    pub fn from_env() -> EngramResult<Self> {
        let kv_type = KvStorageType::from_env();
        let zerog = match kv_type {
            KvStorageType::ZeroG => Some(ZeroGConfig::from_env()?),
            _ => None,
        };
        Ok(Self {
            kv_type,
            storage_mode: StorageMode::from_env(),
            sync: StartupSyncConfig::from_env(),
            redis_url: env::var("REDIS_URL").ok(),
            zerog,
        })
    }

    /// All-in-memory configuration with the validator disabled; the default
    /// for tests and development.
    pub fn in_memory() -> Self {
        Self {
            kv_type: KvStorageType::InMemory,
            storage_mode: StorageMode::Lite,
            sync: StartupSyncConfig {
                bootstrap_mode: false,
                enabled: false,
                days: 0,
                check_vector: true,
                check_text: true,
            },
            redis_url: None,
            zerog: None,
        }
    }
}

/// The running substrate: primary KV, document store, indexes, repositories.
///
/// Cheap to share behind an `Arc`; every handle it returns is wired against
/// the same primary stores.
pub struct Engram {
    kv: Arc<dyn KvStorage>,
    documents: Arc<DocumentStore>,
    vector_index: Arc<dyn VectorIndex>,
    text_index: Arc<dyn TextIndex>,
    mode: StorageMode,
    sync: StartupSyncConfig,

    request_logs: RequestLogRepository,
    episodic: EpisodicMemoryRepository,
    event_logs: EventLogRepository,
    foresights: ForesightRepository,
    conversation_metas: ConversationMetaRepository,
    conversation_status: ConversationStatusRepository,
    user_profiles: UserProfileRepository,
    cluster_states: ClusterStateRepository,
    core_memories: CoreMemoryRepository,

    episodic_vectors: VectorDualProxy,
    event_vectors: VectorDualProxy,
    foresight_vectors: VectorDualProxy,
    episodic_texts: TextDualProxy,
    event_texts: TextDualProxy,
    foresight_texts: TextDualProxy,

    status_channel: Option<RequestStatusChannel>,
}

impl Engram {
    /// Start from the process environment. See [`EngramConfig::from_env`].
    pub async fn start_from_env() -> EngramResult<Arc<Self>> {
        Self::start(EngramConfig::from_env()?).await
    }

    /// Start the substrate: select and register the primary KV, wire the
    /// repositories, and spawn the startup validator (detached, never
    /// blocking startup).
    pub async fn start(config: EngramConfig) -> EngramResult<Arc<Self>> {
        let kv: Arc<dyn KvStorage> = match config.kv_type {
            KvStorageType::InMemory => {
                info!("initializing in-memory KV (data will be lost on restart)");
                Arc::new(InMemoryKv::new())
            }
            KvStorageType::Redis => {
                let url = config.redis_url.clone().ok_or_else(|| {
                    EngramError::Configuration {
                        reason: "KV_STORAGE_TYPE=redis requires REDIS_URL".to_string(),
                    }
                })?;
                info!("initializing redis KV");
                Arc::new(RedisKv::connect(&url).await?)
            }
            KvStorageType::ZeroG => {
                let zerog = config
                    .zerog
                    .clone()
                    .map(Ok)
                    .unwrap_or_else(ZeroGConfig::from_env)?;
                Arc::new(ZeroGKv::new(zerog))
            }
        };

        let status_channel = match &config.redis_url {
            Some(url) => {
                let client = redis::Client::open(url.as_str()).map_err(|e| {
                    EngramError::Transport {
                        backend: "redis".to_string(),
                        reason: e.to_string(),
                    }
                })?;
                let conn = redis::aio::ConnectionManager::new(client).await.map_err(|e| {
                    EngramError::Transport {
                        backend: "redis".to_string(),
                        reason: e.to_string(),
                    }
                })?;
                let tenant: Arc<dyn TenantKeyProvider> = Arc::new(DefaultTenantProvider);
                Some(RequestStatusChannel::new(conn, tenant))
            }
            None => None,
        };

        let engram = Arc::new(Self::assemble(
            kv,
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(InMemoryTextIndex::new()),
            config.storage_mode,
            config.sync,
            status_channel,
        ));

        if engram.sync.should_run() {
            let validator = engram.build_validator();
            tokio::spawn(async move {
                validator.run().await;
            });
        } else if engram.sync.bootstrap_mode {
            info!("skipping startup data sync (bootstrap mode)");
        } else {
            info!("startup data sync is disabled");
        }

        Ok(engram)
    }

    /// Wire repositories and proxies over explicit backends. Test surface;
    /// production goes through [`Engram::start`].
    pub fn assemble(
        kv: Arc<dyn KvStorage>,
        vector_index: Arc<dyn VectorIndex>,
        text_index: Arc<dyn TextIndex>,
        mode: StorageMode,
        sync: StartupSyncConfig,
        status_channel: Option<RequestStatusChannel>,
    ) -> Self {
        let documents = Arc::new(DocumentStore::new());

        let request_logs = RequestLogRepository::new(&documents, Arc::clone(&kv), mode);
        let episodic = EpisodicMemoryRepository::new(&documents, Arc::clone(&kv), mode);
        let event_logs = EventLogRepository::new(&documents, Arc::clone(&kv), mode);
        let foresights = ForesightRepository::new(&documents, Arc::clone(&kv), mode);
        let conversation_metas =
            ConversationMetaRepository::new(&documents, Arc::clone(&kv), mode);
        let conversation_status =
            ConversationStatusRepository::new(&documents, Arc::clone(&kv), mode);
        let user_profiles = UserProfileRepository::new(&documents, Arc::clone(&kv), mode);
        let cluster_states = ClusterStateRepository::new(&documents, Arc::clone(&kv), mode);
        let core_memories = CoreMemoryRepository::new(&documents, Arc::clone(&kv), mode);

        let episodic_vectors = VectorDualProxy::new(
            Arc::clone(&vector_index),
            Arc::clone(&kv),
            vector_collections::EPISODIC,
            EpisodicMemory::LITE_VECTOR_FIELDS,
        );
        let event_vectors = VectorDualProxy::new(
            Arc::clone(&vector_index),
            Arc::clone(&kv),
            vector_collections::EVENT_LOG,
            EventLogRecord::LITE_VECTOR_FIELDS,
        );
        let foresight_vectors = VectorDualProxy::new(
            Arc::clone(&vector_index),
            Arc::clone(&kv),
            vector_collections::FORESIGHT,
            ForesightRecord::LITE_VECTOR_FIELDS,
        );
        let episodic_texts = TextDualProxy::new(
            Arc::clone(&text_index),
            Arc::clone(&kv),
            text_indices::EPISODIC,
            EpisodicMemory::LITE_TEXT_FIELDS,
        );
        let event_texts = TextDualProxy::new(
            Arc::clone(&text_index),
            Arc::clone(&kv),
            text_indices::EVENT_LOG,
            EventLogRecord::LITE_TEXT_FIELDS,
        );
        let foresight_texts = TextDualProxy::new(
            Arc::clone(&text_index),
            Arc::clone(&kv),
            text_indices::FORESIGHT,
            ForesightRecord::LITE_TEXT_FIELDS,
        );

        info!(mode = ?mode, "engram substrate assembled");

        Self {
            kv,
            documents,
            vector_index,
            text_index,
            mode,
            sync,
            request_logs,
            episodic,
            event_logs,
            foresights,
            conversation_metas,
            conversation_status,
            user_profiles,
            cluster_states,
            core_memories,
            episodic_vectors,
            event_vectors,
            foresight_vectors,
            episodic_texts,
            event_texts,
            foresight_texts,
            status_channel,
        }
    }

    /// Build a validator over every registered class, using the startup
    /// sync configuration.
    pub fn build_validator(&self) -> DataSyncValidator {
        self.build_validator_scoped(self.sync.clone())
    }

    /// Build a validator with an explicit scope (operational resync surface).
    pub fn build_validator_scoped(&self, sync: StartupSyncConfig) -> DataSyncValidator {
        let vector_classes = [
            (
                &EPISODIC_MEMORY_SCHEMA,
                vector_collections::EPISODIC,
                EpisodicMemory::LITE_VECTOR_FIELDS,
                text_indices::EPISODIC,
                EpisodicMemory::LITE_TEXT_FIELDS,
            ),
            (
                &EVENT_LOG_SCHEMA,
                vector_collections::EVENT_LOG,
                EventLogRecord::LITE_VECTOR_FIELDS,
                text_indices::EVENT_LOG,
                EventLogRecord::LITE_TEXT_FIELDS,
            ),
            (
                &FORESIGHT_SCHEMA,
                vector_collections::FORESIGHT,
                ForesightRecord::LITE_VECTOR_FIELDS,
                text_indices::FORESIGHT,
                ForesightRecord::LITE_TEXT_FIELDS,
            ),
        ];

        let mut targets: Vec<ValidationTarget> = vector_classes
            .into_iter()
            .map(|(schema, vector_name, vector_fields, text_name, text_fields)| {
                ValidationTarget {
                    schema,
                    collection: self.documents.collection(schema),
                    vector: Some(VectorBinding {
                        index: Arc::clone(&self.vector_index),
                        collection: vector_name.to_string(),
                        lite_fields: vector_fields,
                    }),
                    text: Some(TextBinding {
                        index: Arc::clone(&self.text_index),
                        index_name: text_name.to_string(),
                        lite_fields: text_fields,
                    }),
                }
            })
            .collect();

        for schema in [
            &REQUEST_LOG_SCHEMA,
            &CONVERSATION_META_SCHEMA,
            &CONVERSATION_STATUS_SCHEMA,
            &USER_PROFILE_SCHEMA,
            &CLUSTER_STATE_SCHEMA,
            &CORE_MEMORY_SCHEMA,
        ] {
            targets.push(ValidationTarget {
                schema,
                collection: self.documents.collection(schema),
                vector: None,
                text: None,
            });
        }

        DataSyncValidator::new(Arc::clone(&self.kv), targets, sync, self.mode)
    }

    /// Run a validation pass on demand and return the results.
    pub async fn run_validation(&self) -> Vec<SyncResult> {
        self.build_validator().run().await
    }

    /// Flush queued writes and release the substrate.
    ///
    /// Must run before process exit when the chain-backed KV is active.
    pub async fn shutdown(&self) {
        info!("shutting down engram substrate");
        self.kv.flush().await;
    }

    /// The primary KV.
    pub fn kv(&self) -> &Arc<dyn KvStorage> {
        &self.kv
    }

    /// The indexed document store.
    pub fn documents(&self) -> &Arc<DocumentStore> {
        &self.documents
    }

    /// The vector-index backend (proxy-bypassing surface).
    pub fn vector_index(&self) -> &Arc<dyn VectorIndex> {
        &self.vector_index
    }

    /// The text-index backend (proxy-bypassing surface).
    pub fn text_index(&self) -> &Arc<dyn TextIndex> {
        &self.text_index
    }

    /// Accumulation-log repository.
    pub fn request_logs(&self) -> &RequestLogRepository {
        &self.request_logs
    }

    /// Episodic-memory repository.
    pub fn episodic(&self) -> &EpisodicMemoryRepository {
        &self.episodic
    }

    /// Event-log repository.
    pub fn event_logs(&self) -> &EventLogRepository {
        &self.event_logs
    }

    /// Foresight repository.
    pub fn foresights(&self) -> &ForesightRepository {
        &self.foresights
    }

    /// Conversation-metadata repository.
    pub fn conversation_metas(&self) -> &ConversationMetaRepository {
        &self.conversation_metas
    }

    /// Conversation-status repository.
    pub fn conversation_status(&self) -> &ConversationStatusRepository {
        &self.conversation_status
    }

    /// User-profile repository.
    pub fn user_profiles(&self) -> &UserProfileRepository {
        &self.user_profiles
    }

    /// Cluster-state repository.
    pub fn cluster_states(&self) -> &ClusterStateRepository {
        &self.cluster_states
    }

    /// Core-memory repository.
    pub fn core_memories(&self) -> &CoreMemoryRepository {
        &self.core_memories
    }

    /// Episodic vector-index proxy.
    pub fn episodic_vectors(&self) -> &VectorDualProxy {
        &self.episodic_vectors
    }

    /// Event-log vector-index proxy.
    pub fn event_vectors(&self) -> &VectorDualProxy {
        &self.event_vectors
    }

    /// Foresight vector-index proxy.
    pub fn foresight_vectors(&self) -> &VectorDualProxy {
        &self.foresight_vectors
    }

    /// Episodic text-index proxy.
    pub fn episodic_texts(&self) -> &TextDualProxy {
        &self.episodic_texts
    }

    /// Event-log text-index proxy.
    pub fn event_texts(&self) -> &TextDualProxy {
        &self.event_texts
    }

    /// Foresight text-index proxy.
    pub fn foresight_texts(&self) -> &TextDualProxy {
        &self.foresight_texts
    }

    /// The request-status channel, when a cache service is configured.
    pub fn status_channel(&self) -> Option<&RequestStatusChannel> {
        self.status_channel.as_ref()
    }
}
