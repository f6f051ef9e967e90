//! Service wiring.
//!
//! [`AppState::build`] constructs every service from explicit dependencies so the HTTP router, the
//! MCP server, the worker CLI, and tests share one assembly path. Background consumers are
//! returned separately as [`Workers`] and only run where the caller spawns them.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::batch::{BatchDispatcher, BatchOrchestrator, LocalOrchestrator, WorkItemHandler};
use crate::config::{BatchDispatchMode, Config, ConfigError};
use crate::generation::{GenerationClient, GenerationError, MessagesClient};
use crate::history::{HistoryService, MemoryHistoryStore};
use crate::jobs::JobService;
use crate::knowledge::{KnowledgePipeline, PipelineSettings, WorkItem};
use crate::ledger::MemoryLedger;
use crate::metrics::PipelineMetrics;
use crate::query::{
    AsyncQueryCoordinator, MemoryQueryStore, QueryStore, QueryTask, QueryTaskHandler,
    spawn_reaper,
};
use crate::retrieval::{
    AgentActionHandler, AgentClient, AgentRuntimeClient, KnowledgeBaseClient,
    KnowledgeBaseSettings, QueryEngine, RetrievalClient, RetrievalError,
};
use crate::storage::{FsObjectStore, LinkError, MemoryObjectStore, ObjectStore, StoreError, UrlSigner};
use crate::sync::{IndexSyncClient, IndexSyncError, IngestionClient, SyncTrigger};
use crate::tasks::{ChannelQueue, RetryPolicy, TaskReceiver, WorkerReport, run_worker};
use crate::templates::{MemoryTemplateStore, TemplateService};

/// Interval between sweeps of expired async query records.
const REAPER_INTERVAL: Duration = Duration::from_secs(300);

/// Errors raised while assembling the services.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Object store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Download link signer rejected its settings.
    #[error(transparent)]
    Link(#[from] LinkError),
    /// Generation client could not be built.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// Ingestion client could not be built.
    #[error(transparent)]
    IndexSync(#[from] IndexSyncError),
    /// Retrieval or agent client could not be built.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

/// Outbound provider clients.
#[derive(Clone)]
pub struct Clients {
    /// Transcription and knowledge extraction model.
    pub generation: Arc<dyn GenerationClient>,
    /// Knowledge index ingestion trigger.
    pub index_sync: Arc<dyn IndexSyncClient>,
    /// Filtered retrieve-and-generate.
    pub retrieval: Arc<dyn RetrievalClient>,
    /// Conversational agent runtime.
    pub agents: Arc<dyn AgentClient>,
}

impl Clients {
    /// Build the HTTP clients described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let connect = Duration::from_secs(config.http_connect_timeout_secs);
        let read = Duration::from_secs(config.http_read_timeout_secs);
        Ok(Self {
            generation: Arc::new(MessagesClient::new(
                &config.generation_url,
                config.generation_api_key.clone(),
                &config.generation_model,
                connect,
                read,
            )?),
            index_sync: Arc::new(IngestionClient::new(
                &config.retrieval_url,
                config.retrieval_api_key.clone(),
                &config.knowledge_base_id,
                &config.data_source_id,
                connect,
            )?),
            retrieval: Arc::new(KnowledgeBaseClient::new(
                &config.retrieval_url,
                config.retrieval_api_key.clone(),
                KnowledgeBaseSettings {
                    knowledge_base_id: config.knowledge_base_id.clone(),
                    model_arn: config.model_arn.clone(),
                    rerank_model_arn: config.rerank_model_arn.clone(),
                },
                connect,
                read,
            )?),
            agents: Arc::new(AgentRuntimeClient::new(
                &config.retrieval_url,
                config.retrieval_api_key.clone(),
                connect,
                read,
            )?),
        })
    }
}

/// Every service behind the public surfaces.
#[derive(Clone)]
pub struct AppState {
    /// Source documents and generated artifacts.
    pub store: Arc<dyn ObjectStore>,
    /// Job records and folder configuration.
    pub ledger: Arc<MemoryLedger>,
    /// Job creation and status.
    pub jobs: Arc<JobService>,
    /// Per-file pipeline plus sync trigger, as run by workers.
    pub work_items: Arc<WorkItemHandler>,
    /// Synchronous and async queries.
    pub queries: Arc<AsyncQueryCoordinator>,
    /// Async query records.
    pub query_store: Arc<dyn QueryStore>,
    /// Conversation history.
    pub history: Arc<HistoryService>,
    /// Capability invoked by the conversational agent.
    pub agent_actions: Arc<AgentActionHandler>,
    /// Output-format templates per agent type.
    pub templates: Arc<TemplateService>,
    /// Download link signer.
    pub signer: Arc<UrlSigner>,
    /// Pipeline and query counters.
    pub metrics: Arc<PipelineMetrics>,
}

/// Background consumers of the in-process queues.
pub struct Workers {
    work_items: TaskReceiver<WorkItem>,
    work_item_handler: Arc<WorkItemHandler>,
    queries: TaskReceiver<QueryTask>,
    query_handler: Arc<QueryTaskHandler>,
    query_store: Arc<dyn QueryStore>,
    policy: RetryPolicy,
}

/// Handles of spawned workers.
pub struct WorkerHandles {
    /// Fan-out work item consumer.
    pub work_items: JoinHandle<WorkerReport>,
    /// Async query consumer.
    pub queries: JoinHandle<WorkerReport>,
    /// Expired query record sweeper.
    pub reaper: JoinHandle<()>,
}

impl Workers {
    /// Spawn the queue consumers and the query record reaper.
    pub fn spawn(self) -> WorkerHandles {
        WorkerHandles {
            work_items: tokio::spawn(run_worker(
                self.work_items,
                self.work_item_handler,
                self.policy,
            )),
            queries: tokio::spawn(run_worker(self.queries, self.query_handler, self.policy)),
            reaper: spawn_reaper(self.query_store, REAPER_INTERVAL),
        }
    }
}

impl AppState {
    /// Open the configured object store, build the provider clients, and assemble the services.
    pub async fn from_config(config: &Config) -> Result<(Self, Workers), StartupError> {
        let store: Arc<dyn ObjectStore> = match &config.data_dir {
            Some(root) => Arc::new(FsObjectStore::open(root.clone()).await?),
            None => {
                tracing::warn!("DOCTOKNOW_DATA_DIR not set; using in-memory object store");
                Arc::new(MemoryObjectStore::new())
            }
        };
        let clients = Clients::from_config(config)?;
        Self::build(config, store, clients)
    }

    /// Assemble the services over an existing store and clients.
    pub fn build(
        config: &Config,
        store: Arc<dyn ObjectStore>,
        clients: Clients,
    ) -> Result<(Self, Workers), StartupError> {
        let metrics = Arc::new(PipelineMetrics::new());
        let signer = Arc::new(UrlSigner::new(
            &config.signing_secret,
            &config.public_base_url,
            config.download_url_ttl_secs,
        )?);
        let ledger = Arc::new(MemoryLedger::new());
        let policy = RetryPolicy {
            max_attempts: config.task_max_attempts,
        };

        let pipeline = Arc::new(KnowledgePipeline::new(
            store.clone(),
            ledger.clone(),
            clients.generation,
            metrics.clone(),
            PipelineSettings {
                max_tokens: config.generation_max_tokens,
                bucket: config.storage_bucket.clone(),
            },
        ));
        let sync = Arc::new(SyncTrigger::new(
            ledger.clone(),
            ledger.clone(),
            clients.index_sync,
            metrics.clone(),
        ));
        let work_items = Arc::new(WorkItemHandler::new(pipeline, sync));

        let (work_item_queue, work_item_receiver) = ChannelQueue::<WorkItem>::channel();
        let orchestrator: Option<Arc<dyn BatchOrchestrator>> = match config.batch_dispatch {
            BatchDispatchMode::Orchestrated => Some(Arc::new(LocalOrchestrator::new(
                work_items.clone(),
                policy,
            ))),
            BatchDispatchMode::FanOut => None,
        };
        let dispatcher = Arc::new(BatchDispatcher::new(
            config.batch_dispatch,
            orchestrator,
            Arc::new(work_item_queue),
            config.max_batch_payload_bytes,
        ));
        let jobs = Arc::new(JobService::new(
            store.clone(),
            ledger.clone(),
            ledger.clone(),
            dispatcher,
            signer.clone(),
        ));

        let engine = Arc::new(QueryEngine::new(
            clients.retrieval,
            clients.agents,
            config.agents.clone(),
            config.max_context_length,
        ));
        let history = Arc::new(HistoryService::new(
            Arc::new(MemoryHistoryStore::new()),
            signer.clone(),
            config.history_ttl_days,
        ));
        let query_store: Arc<dyn QueryStore> = Arc::new(MemoryQueryStore::new());
        let (query_queue, query_receiver) = ChannelQueue::<QueryTask>::channel();
        let queries = Arc::new(AsyncQueryCoordinator::new(
            engine.clone(),
            history.clone(),
            query_store.clone(),
            Arc::new(query_queue),
            signer.clone(),
            metrics.clone(),
            config.query_ttl_secs,
        ));
        let agent_actions = Arc::new(AgentActionHandler::new(engine, signer.clone()));
        let templates = Arc::new(TemplateService::new(Arc::new(MemoryTemplateStore::new())));

        tracing::info!(
            batch_dispatch = ?config.batch_dispatch,
            max_attempts = policy.max_attempts,
            "Services assembled"
        );
        let workers = Workers {
            work_items: work_item_receiver,
            work_item_handler: work_items.clone(),
            queries: query_receiver,
            query_handler: Arc::new(QueryTaskHandler::new(queries.clone())),
            query_store: query_store.clone(),
            policy,
        };
        Ok((
            Self {
                store,
                ledger,
                jobs,
                work_items,
                queries,
                query_store,
                history,
                agent_actions,
                templates,
                signer,
                metrics,
            },
            workers,
        ))
    }
}
