//! Fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::batch::{BatchError, BatchOrchestrator};
use crate::config::{AgentDirectory, AgentRef, BatchDispatchMode, Config};
use crate::generation::{GenerationClient, GenerationError, GenerationRequest};
use crate::knowledge::WorkItem;
use crate::ledger::{
    JobLedger, JobRecord, JobStatus, JobSyncRecord, LedgerError, MemoryLedger, RecordKey,
    StatusChange,
};
use crate::retrieval::{
    AgentClient, AgentEvent, AgentEventStream, AgentInvocation, Citation, GeneratedAnswer,
    RetrievalClient, RetrievalError,
};
use crate::sync::{IndexSyncClient, IndexSyncError, IngestionJob};
use crate::tasks::{TaskError, TaskQueue};

/// Ledger whose writes of selected statuses fail with a backend error.
pub(crate) struct FailingLedger {
    inner: MemoryLedger,
    failing: Vec<JobStatus>,
}

impl FailingLedger {
    pub(crate) fn failing(statuses: &[JobStatus]) -> Self {
        Self {
            inner: MemoryLedger::new(),
            failing: statuses.to_vec(),
        }
    }

    pub(crate) fn inner(&self) -> &MemoryLedger {
        &self.inner
    }

    fn check(&self, status: JobStatus) -> Result<(), LedgerError> {
        if self.failing.contains(&status) {
            return Err(LedgerError::Backend("throttled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobLedger for FailingLedger {
    async fn create(&self, record: JobRecord) -> Result<(), LedgerError> {
        self.check(record.status)?;
        self.inner.create(record).await
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<JobRecord>, LedgerError> {
        self.inner.get(key).await
    }

    async fn apply(&self, key: &RecordKey, change: StatusChange) -> Result<JobRecord, LedgerError> {
        self.check(change.status)?;
        self.inner.apply(key, change).await
    }

    async fn records_for_job(
        &self,
        job_id: &str,
        folder_path: Option<&str>,
    ) -> Result<Vec<JobRecord>, LedgerError> {
        self.inner.records_for_job(job_id, folder_path).await
    }

    async fn records_for_folder(&self, folder_path: &str) -> Result<Vec<JobRecord>, LedgerError> {
        self.inner.records_for_folder(folder_path).await
    }

    async fn set_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        details: Option<Value>,
    ) -> Result<JobSyncRecord, LedgerError> {
        self.check(status)?;
        self.inner.set_job_status(job_id, status, details).await
    }

    async fn job_status(&self, job_id: &str) -> Result<Option<JobSyncRecord>, LedgerError> {
        self.inner.job_status(job_id).await
    }
}

/// Generation client replaying queued responses and recording every request.
#[derive(Default)]
pub(crate) struct ScriptedGeneration {
    responses: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGeneration {
    pub(crate) fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.to_string())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) async fn fail_next(&self, message: &str) {
        self.responses
            .lock()
            .await
            .push_front(Err(message.to_string()));
    }

    pub(crate) async fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGeneration {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().await.push(request);
        match self.responses.lock().await.pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(GenerationError::Unavailable(message)),
            None => Err(GenerationError::InvalidResponse("no scripted response".into())),
        }
    }
}

/// Index sync client answering every call with the same scripted result.
pub(crate) struct RecordingIndexSync {
    result: Result<IngestionJob, IndexSyncError>,
    calls: AtomicUsize,
}

impl RecordingIndexSync {
    pub(crate) fn accepting() -> Self {
        Self {
            result: Ok(IngestionJob {
                ingestion_job_id: "ingest-1".into(),
                status: "STARTING".into(),
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn rejecting(code: &str, message: &str) -> Self {
        Self {
            result: Err(IndexSyncError::Rejected {
                code: code.into(),
                message: message.into(),
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexSyncClient for RecordingIndexSync {
    async fn start_ingestion(&self) -> Result<IngestionJob, IndexSyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Orchestrator recording started executions without running them.
#[derive(Default)]
pub(crate) struct RecordingOrchestrator {
    unavailable: bool,
    executions: Mutex<Vec<(String, Vec<WorkItem>)>>,
}

impl RecordingOrchestrator {
    pub(crate) fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub(crate) async fn executions(&self) -> Vec<(String, Vec<WorkItem>)> {
        self.executions.lock().await.clone()
    }
}

#[async_trait]
impl BatchOrchestrator for RecordingOrchestrator {
    async fn start_execution(&self, name: &str, items: Vec<WorkItem>) -> Result<(), BatchError> {
        if self.unavailable {
            return Err(BatchError::OrchestratorUnavailable("not deployed".into()));
        }
        let mut executions = self.executions.lock().await;
        if executions.iter().any(|(existing, _)| existing == name) {
            return Err(BatchError::Conflict(name.to_string()));
        }
        executions.push((name.to_string(), items));
        Ok(())
    }
}

/// Task queue collecting enqueued tasks.
pub(crate) struct RecordingQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for RecordingQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> RecordingQueue<T> {
    pub(crate) async fn items(&self) -> Vec<T> {
        self.items.lock().await.clone()
    }
}

#[async_trait]
impl<T: Send + 'static> TaskQueue<T> for RecordingQueue<T> {
    async fn enqueue(&self, task: T) -> Result<(), TaskError> {
        self.items.lock().await.push(task);
        Ok(())
    }
}

/// Retrieval client returning one scripted answer and recording every call.
pub(crate) struct ScriptedRetrieval {
    answer: Result<GeneratedAnswer, String>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedRetrieval {
    pub(crate) fn answering(text: &str, citations: Vec<Citation>) -> Self {
        Self {
            answer: Ok(GeneratedAnswer {
                text: text.to_string(),
                citations,
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) async fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl RetrievalClient for ScriptedRetrieval {
    async fn retrieve_and_generate(
        &self,
        query: &str,
        filter: &Value,
    ) -> Result<GeneratedAnswer, RetrievalError> {
        self.calls
            .lock()
            .await
            .push((query.to_string(), filter.clone()));
        self.answer
            .clone()
            .map_err(RetrievalError::Unavailable)
    }
}

/// Agent client replaying scripted events and recording every invocation.
#[derive(Default)]
pub(crate) struct ScriptedAgent {
    events: Vec<AgentEvent>,
    invocations: Mutex<Vec<AgentInvocation>>,
}

impl ScriptedAgent {
    pub(crate) fn new(events: Vec<AgentEvent>) -> Self {
        Self {
            events,
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn answering(text: &str) -> Self {
        Self::new(vec![AgentEvent::Chunk(text.as_bytes().to_vec())])
    }

    pub(crate) async fn invocations(&self) -> Vec<AgentInvocation> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentEventStream, RetrievalError> {
        self.invocations.lock().await.push(invocation);
        let events: Vec<Result<AgentEvent, RetrievalError>> =
            self.events.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

/// Configuration pointing every provider at `base_url`, with in-memory storage.
pub(crate) fn test_config(base_url: &str) -> Config {
    Config {
        data_dir: None,
        storage_bucket: "doctoknow-test".into(),
        generation_url: base_url.into(),
        generation_api_key: None,
        generation_model: "test-model".into(),
        generation_max_tokens: 2000,
        retrieval_url: base_url.into(),
        retrieval_api_key: None,
        knowledge_base_id: "KB1".into(),
        data_source_id: "DS1".into(),
        model_arn: "model".into(),
        rerank_model_arn: "rerank".into(),
        agents: AgentDirectory {
            default: Some(AgentRef {
                agent_id: "AGENT".into(),
                alias_id: "ALIAS".into(),
            }),
            ..Default::default()
        },
        max_context_length: 10_000,
        http_connect_timeout_secs: 5,
        http_read_timeout_secs: 30,
        signing_secret: "test-secret".into(),
        public_base_url: "http://files.test".into(),
        download_url_ttl_secs: 600,
        query_ttl_secs: 3_600,
        history_ttl_days: 30,
        max_batch_payload_bytes: 262_144,
        batch_dispatch: BatchDispatchMode::Orchestrated,
        task_max_attempts: 2,
        server_port: None,
    }
}
