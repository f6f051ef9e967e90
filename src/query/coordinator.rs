//! Synchronous answering and the start / execute / poll protocol for long-running queries.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use super::{
    QueryError, QueryInput, QueryOutcome, QueryRecord, QueryStatus, QueryStore, QueryTask,
};
use crate::clock;
use crate::history::{ChatMessage, HistoryService, HistoryWrite, NewMessage};
use crate::metrics::PipelineMetrics;
use crate::retrieval::sources::{Source, sign_sources};
use crate::retrieval::{
    EngineAnswer, QueryEngine, QueryRequest, Selector, resolve_available_selectors,
    resolve_selectors,
};
use crate::storage::signer::UrlSigner;
use crate::tasks::{Delivery, TaskHandler, TaskQueue};

/// Answer returned by a synchronous query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AskResponse {
    /// Answer text.
    pub answer: String,
    /// Cited documents with fresh links.
    pub sources: Vec<Source>,
    /// Assistant message recorded for the answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Client view of an async query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryStatusView {
    /// Query id.
    pub query_id: String,
    /// Current status.
    pub status: QueryStatus,
    /// Submitted question.
    pub query: String,
    /// ISO-8601 creation time.
    pub created_at: String,
    /// Answer text once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Cited documents with fresh links once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    /// Assistant message id once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Failure description once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answers queries and tracks long-running ones.
pub struct AsyncQueryCoordinator {
    engine: Arc<QueryEngine>,
    history: Arc<HistoryService>,
    store: Arc<dyn QueryStore>,
    queue: Arc<dyn TaskQueue<QueryTask>>,
    signer: Arc<UrlSigner>,
    metrics: Arc<PipelineMetrics>,
    ttl_secs: u64,
}

impl AsyncQueryCoordinator {
    /// Create a coordinator whose records expire `ttl_secs` after creation.
    pub fn new(
        engine: Arc<QueryEngine>,
        history: Arc<HistoryService>,
        store: Arc<dyn QueryStore>,
        queue: Arc<dyn TaskQueue<QueryTask>>,
        signer: Arc<UrlSigner>,
        metrics: Arc<PipelineMetrics>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            engine,
            history,
            store,
            queue,
            signer,
            metrics,
            ttl_secs,
        }
    }

    /// Answer a query in-line and record the turn.
    ///
    /// Every requested folder must map to a job. The user message is saved before answering so
    /// a failed answer still leaves the question in the history.
    pub async fn ask(&self, input: &QueryInput) -> Result<AskResponse, QueryError> {
        input.validate()?;
        if input.folder_paths.is_empty() {
            return Err(QueryError::InvalidRequest(
                "folder_paths must contain at least one folder".into(),
            ));
        }
        let selectors = resolve_selectors(&input.folder_paths, &input.folder_default_job_ids)?;
        let prior = self.prior_history(&input.chat_session_id).await;
        let job_id = selectors[0].job_id.clone();

        self.history
            .record(user_message(input, &job_id, prior.is_empty()))
            .await;

        let answer = self.answer(input, &selectors, &prior).await?;
        let saved = self
            .history
            .record(NewMessage::assistant(
                job_id,
                input.chat_session_id.clone(),
                answer.answer.clone(),
                answer.sources.clone(),
            ))
            .await;

        Ok(AskResponse {
            sources: sign_sources(&self.signer, &answer.sources),
            answer: answer.answer,
            message_id: saved.message_id().map(str::to_string),
        })
    }

    /// Persist a `processing` record, schedule its execution, and return its id.
    pub async fn start(&self, input: QueryInput) -> Result<String, QueryError> {
        input.validate()?;
        let now = clock::now();
        let timestamp = clock::iso_timestamp(now);
        let query_id = Uuid::new_v4().to_string();
        let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);

        self.store
            .insert(QueryRecord {
                query_id: query_id.clone(),
                status: QueryStatus::Processing,
                input,
                answer: None,
                sources: Vec::new(),
                message_id: None,
                error: None,
                created_at: timestamp.clone(),
                updated_at: timestamp,
                expires_at: now.unix_timestamp().saturating_add(ttl),
            })
            .await?;

        if let Err(error) = self
            .queue
            .enqueue(QueryTask {
                query_id: query_id.clone(),
            })
            .await
        {
            self.fail(&query_id, &error.to_string()).await;
            return Err(error.into());
        }
        tracing::info!(query_id = %query_id, "Async query accepted");
        Ok(query_id)
    }

    /// Run a stored query to completion.
    ///
    /// Failures mark the record `failed` and are returned so the delivering transport can retry.
    /// A retried execution records its history turn again.
    pub async fn execute(&self, query_id: &str) -> Result<QueryRecord, QueryError> {
        let record = self
            .store
            .get(query_id)
            .await?
            .ok_or_else(|| QueryError::NotFound(query_id.to_string()))?;
        if record.status == QueryStatus::Completed {
            tracing::info!(query_id, "Query already completed; skipping duplicate delivery");
            return Ok(record);
        }

        match self.run(&record.input).await {
            Ok((answer, message_id)) => {
                let record = self
                    .store
                    .finish(
                        query_id,
                        QueryOutcome::Completed {
                            answer: answer.answer,
                            sources: answer.sources,
                            message_id,
                        },
                        &clock::now_iso(),
                    )
                    .await?;
                tracing::info!(query_id, "Async query completed");
                Ok(record)
            }
            Err(error) => {
                tracing::error!(query_id, error = %error, "Async query failed");
                self.fail(query_id, &error.to_string()).await;
                Err(error)
            }
        }
    }

    /// Current state of a query, with fresh links for completed answers.
    pub async fn poll(&self, query_id: &str) -> Result<QueryStatusView, QueryError> {
        let record = self
            .store
            .get(query_id)
            .await?
            .ok_or_else(|| QueryError::NotFound(query_id.to_string()))?;

        let completed = record.status == QueryStatus::Completed;
        Ok(QueryStatusView {
            query_id: record.query_id,
            status: record.status,
            query: record.input.query,
            created_at: record.created_at,
            answer: record.answer.filter(|_| completed),
            sources: completed.then(|| sign_sources(&self.signer, &record.sources)),
            message_id: record.message_id.filter(|_| completed),
            error: record.error.filter(|_| record.status == QueryStatus::Failed),
        })
    }

    async fn run(&self, input: &QueryInput) -> Result<(EngineAnswer, Option<String>), QueryError> {
        let selectors =
            resolve_available_selectors(&input.folder_paths, &input.folder_default_job_ids)?;
        let prior = self.prior_history(&input.chat_session_id).await;
        let answer = self.answer(input, &selectors, &prior).await?;

        let job_id = selectors[0].job_id.clone();
        self.history
            .record(user_message(input, &job_id, prior.is_empty()))
            .await;
        let saved = self
            .history
            .record(NewMessage::assistant(
                job_id,
                input.chat_session_id.clone(),
                answer.answer.clone(),
                answer.sources.clone(),
            ))
            .await;
        let message_id = match saved {
            HistoryWrite::Saved { message_id } => Some(message_id),
            HistoryWrite::Failed { .. } => None,
        };
        Ok((answer, message_id))
    }

    async fn answer(
        &self,
        input: &QueryInput,
        selectors: &[Selector],
        prior: &[ChatMessage],
    ) -> Result<EngineAnswer, QueryError> {
        let result = self
            .engine
            .answer(&QueryRequest {
                query: &input.query,
                selectors,
                session_id: &input.chat_session_id,
                use_agent: input.use_agent,
                agent_type: input.agent_type,
                history: prior,
            })
            .await;
        self.metrics.record_query(result.is_ok());
        Ok(result?)
    }

    async fn prior_history(&self, chat_session_id: &str) -> Vec<ChatMessage> {
        match self.history.session_messages(chat_session_id).await {
            Ok(messages) => messages,
            Err(error) => {
                tracing::warn!(
                    chat_session_id,
                    error = %error,
                    "Failed to load conversation history; answering without it"
                );
                Vec::new()
            }
        }
    }

    async fn fail(&self, query_id: &str, error: &str) {
        let outcome = QueryOutcome::Failed {
            error: error.to_string(),
        };
        if let Err(store_error) = self
            .store
            .finish(query_id, outcome, &clock::now_iso())
            .await
        {
            tracing::error!(query_id, error = %store_error, "Failed to mark query as failed");
        }
    }
}

fn user_message(input: &QueryInput, job_id: &str, first_in_session: bool) -> NewMessage {
    let message = NewMessage::user(job_id, input.chat_session_id.clone(), input.query.clone());
    if first_in_session {
        message.with_selection(input.folder_paths.clone(), job_id)
    } else {
        message
    }
}

/// Executes queued async queries.
pub struct QueryTaskHandler {
    coordinator: Arc<AsyncQueryCoordinator>,
}

impl QueryTaskHandler {
    /// Create a handler delegating to `coordinator`.
    pub fn new(coordinator: Arc<AsyncQueryCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl TaskHandler<QueryTask> for QueryTaskHandler {
    type Error = QueryError;

    async fn handle(&self, delivery: &Delivery<QueryTask>) -> Result<(), QueryError> {
        tracing::debug!(
            query_id = %delivery.task.query_id,
            attempt = delivery.attempt,
            "Executing async query"
        );
        self.coordinator
            .execute(&delivery.task.query_id)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentDirectory, AgentRef};
    use crate::history::{MemoryHistoryStore, Role};
    use crate::query::MemoryQueryStore;
    use crate::retrieval::{AgentType, Citation, RetrievalError};
    use crate::test_support::{RecordingQueue, ScriptedAgent, ScriptedRetrieval};
    use serde_json::{Map, json};
    use std::collections::HashMap;

    struct Fixture {
        coordinator: AsyncQueryCoordinator,
        retrieval: Arc<ScriptedRetrieval>,
        agent: Arc<ScriptedAgent>,
        history: Arc<HistoryService>,
        queue: Arc<RecordingQueue<QueryTask>>,
        metrics: Arc<PipelineMetrics>,
    }

    fn fixture(retrieval: ScriptedRetrieval, agent: ScriptedAgent) -> Fixture {
        let retrieval = Arc::new(retrieval);
        let agent = Arc::new(agent);
        let signer =
            Arc::new(UrlSigner::new("secret", "http://localhost:4100", 3600).expect("signer"));
        let engine = Arc::new(QueryEngine::new(
            retrieval.clone(),
            agent.clone(),
            AgentDirectory {
                default: Some(AgentRef {
                    agent_id: "A".into(),
                    alias_id: "B".into(),
                }),
                ..Default::default()
            },
            10_000,
        ));
        let history = Arc::new(HistoryService::new(
            Arc::new(MemoryHistoryStore::new()),
            signer.clone(),
            30,
        ));
        let queue = Arc::new(RecordingQueue::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let coordinator = AsyncQueryCoordinator::new(
            engine,
            history.clone(),
            Arc::new(MemoryQueryStore::new()),
            queue.clone(),
            signer,
            metrics.clone(),
            3600,
        );
        Fixture {
            coordinator,
            retrieval,
            agent,
            history,
            queue,
            metrics,
        }
    }

    fn cited(key: &str) -> Citation {
        let mut metadata = Map::new();
        metadata.insert("FileName".into(), json!(key.rsplit('/').next()));
        metadata.insert("s3Key".into(), json!(key));
        Citation {
            uri: None,
            metadata,
        }
    }

    fn input(use_agent: bool, folders: &[&str], defaults: &[(&str, &str)]) -> QueryInput {
        QueryInput {
            query: "締付トルクは?".into(),
            chat_session_id: "session-1".into(),
            folder_paths: folders.iter().map(|folder| folder.to_string()).collect(),
            folder_default_job_ids: defaults
                .iter()
                .map(|(folder, job)| (folder.to_string(), job.to_string()))
                .collect::<HashMap<_, _>>(),
            use_agent,
            agent_type: AgentType::Default,
        }
    }

    #[tokio::test]
    async fn ask_records_turn_and_signs_sources() {
        let fx = fixture(
            ScriptedRetrieval::answering("40 Nm", vec![cited("PDF/f/1/a.pdf")]),
            ScriptedAgent::default(),
        );

        let response = fx
            .coordinator
            .ask(&input(false, &["f"], &[("f", "1")]))
            .await
            .expect("answer");

        assert_eq!(response.answer, "40 Nm");
        assert_eq!(response.sources[0].s3_key, "PDF/f/1/a.pdf");
        assert!(response.sources[0].presigned_url.contains("signature="));
        let messages = fx.history.session_messages("session-1").await.expect("history");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].job_id, "1");
        assert_eq!(messages[0].selected_folder_paths, Some(vec!["f".to_string()]));
        assert_eq!(response.message_id.as_deref(), Some(messages[1].message_id.as_str()));
        assert_eq!(fx.metrics.snapshot().queries_answered, 1);

        // the second turn sees the first in its context and carries no selection
        fx.coordinator
            .ask(&input(false, &["f"], &[("f", "1")]))
            .await
            .expect("answer");
        let calls = fx.retrieval.calls().await;
        assert!(!calls[0].0.contains("アシスタント: 40 Nm"));
        assert!(calls[1].0.contains("アシスタント: 40 Nm"));
        let messages = fx.history.session_messages("session-1").await.expect("history");
        assert_eq!(messages[2].selected_folder_paths, None);
    }

    #[tokio::test]
    async fn ask_requires_a_job_for_every_folder() {
        let fx = fixture(
            ScriptedRetrieval::answering("x", Vec::new()),
            ScriptedAgent::default(),
        );
        let error = fx
            .coordinator
            .ask(&input(false, &["f", "g"], &[("f", "1")]))
            .await
            .expect_err("missing job");
        assert!(matches!(
            error,
            QueryError::Retrieval(RetrievalError::MissingDefaultJob(folder)) if folder == "g"
        ));
        assert!(fx.retrieval.calls().await.is_empty());
        assert!(matches!(
            fx.coordinator.ask(&input(false, &[], &[])).await,
            Err(QueryError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn start_then_execute_then_poll() {
        let fx = fixture(
            ScriptedRetrieval::failing("unused"),
            ScriptedAgent::answering("agent answer"),
        );
        let query_id = fx
            .coordinator
            .start(input(true, &["f", "g"], &[("g", "2")]))
            .await
            .expect("start");

        let pending = fx.coordinator.poll(&query_id).await.expect("poll");
        assert_eq!(pending.status, QueryStatus::Processing);
        assert_eq!(pending.answer, None);
        assert_eq!(pending.sources, None);
        assert_eq!(
            fx.queue.items().await,
            vec![QueryTask {
                query_id: query_id.clone()
            }]
        );

        fx.coordinator.execute(&query_id).await.expect("execute");

        let done = fx.coordinator.poll(&query_id).await.expect("poll");
        assert_eq!(done.status, QueryStatus::Completed);
        assert_eq!(done.answer.as_deref(), Some("agent answer"));
        assert_eq!(done.sources, Some(Vec::new()));
        assert!(done.message_id.is_some());

        let invocations = fx.agent.invocations().await;
        assert_eq!(invocations.len(), 1);
        assert_eq!(
            invocations[0].session_attributes["folder_job_pairs"],
            r#"[{"folder_path":"g","job_id":"2"}]"#
        );
        let messages = fx.history.session_messages("session-1").await.expect("history");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].job_id, "2");
    }

    #[tokio::test]
    async fn failed_execution_marks_record_and_propagates() {
        let fx = fixture(
            ScriptedRetrieval::failing("provider down"),
            ScriptedAgent::default(),
        );
        let query_id = fx
            .coordinator
            .start(input(false, &["f"], &[("f", "1")]))
            .await
            .expect("start");

        let error = fx.coordinator.execute(&query_id).await.expect_err("failure");
        assert!(error.to_string().contains("provider down"));

        let view = fx.coordinator.poll(&query_id).await.expect("poll");
        assert_eq!(view.status, QueryStatus::Failed);
        assert!(view.error.expect("error").contains("provider down"));
        assert_eq!(view.answer, None);
        assert_eq!(fx.metrics.snapshot().queries_failed, 1);
    }

    #[tokio::test]
    async fn execution_without_resolvable_folders_fails() {
        let fx = fixture(
            ScriptedRetrieval::answering("x", Vec::new()),
            ScriptedAgent::default(),
        );
        let query_id = fx
            .coordinator
            .start(input(false, &["f"], &[]))
            .await
            .expect("start");
        assert!(fx.coordinator.execute(&query_id).await.is_err());
        assert_eq!(
            fx.coordinator.poll(&query_id).await.expect("poll").status,
            QueryStatus::Failed
        );
    }

    #[tokio::test]
    async fn unknown_queries_are_not_found() {
        let fx = fixture(
            ScriptedRetrieval::answering("x", Vec::new()),
            ScriptedAgent::default(),
        );
        assert!(matches!(
            fx.coordinator.poll("missing").await,
            Err(QueryError::NotFound(_))
        ));
        assert!(matches!(
            fx.coordinator.start(QueryInput {
                query: " ".into(),
                ..input(false, &["f"], &[("f", "1")])
            })
            .await,
            Err(QueryError::InvalidRequest(_))
        ));
    }
}
