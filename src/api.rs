//! HTTP surface for doctoknow.
//!
//! The router exposes the job entry contract, synchronous and async queries, history browsing,
//! the agent action capability, signed downloads, and two discovery endpoints:
//!
//! - `POST /api/job`, `POST /api/reknowledge` – Create processing jobs (202).
//! - `GET|PUT /api/folders/default-job`, `GET /api/folders/pdfs` – Folder configuration.
//! - `GET /api/jobs`, `GET /api/jobs/{job_id}` – Job ids of a folder and per-file status.
//! - `POST /api/query`, `POST /api/query/start`, `GET /api/query/status/{query_id}` – Queries.
//! - `GET /api/history/sessions|search|{message_id}`, `PUT /api/history/{message_id}/feedback`.
//! - `GET|POST|PUT|DELETE /api/prompt-templates` – Output-format templates per agent type.
//! - `POST /api/agent/actions` – Capability invoked by the conversational agent.
//! - `GET /files/{key}` – Download a stored object through a signed link.
//! - `GET /metrics` – Pipeline and query counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! Errors are returned as `{"error": message}` with the message cut to 200 characters.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::app::AppState;
use crate::batch::BatchError;
use crate::clock;
use crate::history::{Feedback, HistoryError, SearchHit, SessionDetail, SessionSummary};
use crate::jobs::{
    CreateJobRequest, DefaultJob, JobAccepted, JobError, JobStatusView, ReknowledgeRequest,
};
use crate::metrics::MetricsSnapshot;
use crate::query::{AskResponse, QueryError, QueryInput, QueryStatus, QueryStatusView};
use crate::retrieval::{AgentActionEvent, AgentType, RetrievalError};
use crate::storage::{LinkError, StoreError};
use crate::templates::{NewTemplate, PromptTemplate, TemplateError, TemplateUpdate};

const MAX_ERROR_CHARS: usize = 200;

/// Build the HTTP router over the assembled services.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/job", post(create_job))
        .route("/api/reknowledge", post(reknowledge))
        .route(
            "/api/folders/default-job",
            get(get_default_job).put(set_default_job),
        )
        .route("/api/folders/pdfs", get(list_pdfs))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/:job_id", get(job_status))
        .route("/api/query", post(ask))
        .route("/api/query/start", post(start_query))
        .route("/api/query/status/:query_id", get(poll_query))
        .route("/api/history/sessions", get(history_sessions))
        .route("/api/history/search", get(history_search))
        .route("/api/history/:message_id", get(history_detail))
        .route("/api/history/:message_id/feedback", put(history_feedback))
        .route(
            "/api/prompt-templates",
            get(get_templates)
                .post(create_template)
                .put(update_template)
                .delete(delete_template),
        )
        .route("/api/agent/actions", post(agent_action))
        .route("/files/*key", get(download))
        .route("/metrics", get(get_metrics))
        .route("/commands", get(get_commands))
        .with_state(state)
}

async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let accepted = state.jobs.create_job(&request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn reknowledge(
    State(state): State<AppState>,
    Json(request): Json<ReknowledgeRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let accepted = state.jobs.reknowledge(&request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Query string carrying a folder path.
#[derive(Deserialize)]
struct FolderQuery {
    #[serde(default)]
    folder_path: String,
}

async fn get_default_job(
    State(state): State<AppState>,
    Query(query): Query<FolderQuery>,
) -> Result<Json<DefaultJob>, AppError> {
    Ok(Json(state.jobs.default_job(&query.folder_path).await?))
}

/// Request body for `PUT /api/folders/default-job`.
#[derive(Deserialize)]
struct SetDefaultJobRequest {
    #[serde(default)]
    folder_path: String,
    #[serde(default)]
    job_id: String,
}

async fn set_default_job(
    State(state): State<AppState>,
    Json(request): Json<SetDefaultJobRequest>,
) -> Result<Json<DefaultJob>, AppError> {
    Ok(Json(
        state
            .jobs
            .set_default_job(&request.folder_path, &request.job_id)
            .await?,
    ))
}

async fn list_pdfs(
    State(state): State<AppState>,
    Query(query): Query<FolderQuery>,
) -> Result<Json<Value>, AppError> {
    let files = state.jobs.list_pdfs(&query.folder_path).await?;
    Ok(Json(json!({ "count": files.len(), "files": files })))
}

/// Response body for `GET /api/jobs`.
#[derive(Serialize)]
struct JobIdsResponse {
    folder_path: String,
    job_ids: Vec<String>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<FolderQuery>,
) -> Result<Json<JobIdsResponse>, AppError> {
    let job_ids = state.jobs.job_ids(&query.folder_path).await?;
    Ok(Json(JobIdsResponse {
        folder_path: query.folder_path,
        job_ids,
    }))
}

/// Optional folder filter for `GET /api/jobs/{job_id}`.
#[derive(Deserialize)]
struct JobStatusQuery {
    #[serde(default)]
    folder_path: Option<String>,
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<JobStatusQuery>,
) -> Result<Json<JobStatusView>, AppError> {
    Ok(Json(
        state
            .jobs
            .job_status(&job_id, query.folder_path.as_deref())
            .await?,
    ))
}

async fn ask(
    State(state): State<AppState>,
    Json(input): Json<QueryInput>,
) -> Result<Json<AskResponse>, AppError> {
    Ok(Json(state.queries.ask(&input).await?))
}

/// Response body for `POST /api/query/start`.
#[derive(Serialize)]
struct QueryStarted {
    query_id: String,
    status: QueryStatus,
}

async fn start_query(
    State(state): State<AppState>,
    Json(input): Json<QueryInput>,
) -> Result<(StatusCode, Json<QueryStarted>), AppError> {
    let query_id = state.queries.start(input).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(QueryStarted {
            query_id,
            status: QueryStatus::Processing,
        }),
    ))
}

async fn poll_query(
    State(state): State<AppState>,
    Path(query_id): Path<String>,
) -> Result<Json<QueryStatusView>, AppError> {
    Ok(Json(state.queries.poll(&query_id).await?))
}

/// Query string of the history endpoints.
#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    mode: Option<String>,
}

impl HistoryQuery {
    /// `all` lists every session; anything else names an agent type (default when absent).
    fn mode(&self) -> Result<Option<AgentType>, AppError> {
        match self.mode.as_deref().map(str::trim) {
            Some("all") => Ok(None),
            None => Ok(Some(AgentType::Default)),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|message: String| AppError::new(StatusCode::BAD_REQUEST, message)),
        }
    }
}

async fn history_sessions(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, AppError> {
    let sessions: Vec<SessionSummary> = state.history.summaries(query.mode()?).await?;
    Ok(Json(json!({ "sessions": sessions })))
}

async fn history_search(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, AppError> {
    let needle = query.q.as_deref().map(str::trim).unwrap_or_default();
    if needle.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "q is required"));
    }
    let results: Vec<SearchHit> = state.history.search(needle, query.mode()?).await?;
    Ok(Json(json!({ "query": needle, "results": results })))
}

async fn history_detail(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<SessionDetail>, AppError> {
    Ok(Json(state.history.detail(&message_id).await?))
}

async fn history_feedback(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(feedback): Json<Feedback>,
) -> Result<Json<Value>, AppError> {
    let updated = state.history.feedback(&message_id, &feedback).await?;
    Ok(Json(json!({
        "message_id": updated.message_id,
        "rating": updated.rating,
        "comment": updated.comment,
        "updated_at": updated.updated_at,
    })))
}

/// Query string of the template endpoints.
#[derive(Deserialize)]
struct TemplateQuery {
    #[serde(default, rename = "agentType")]
    agent_type: String,
    #[serde(default, rename = "templateId")]
    template_id: Option<String>,
}

/// One template when `templateId` is given, otherwise every template of the agent type.
async fn get_templates(
    State(state): State<AppState>,
    Query(query): Query<TemplateQuery>,
) -> Result<Response, AppError> {
    match query.template_id.as_deref().filter(|id| !id.is_empty()) {
        Some(template_id) => Ok(Json(state.templates.get(&query.agent_type, template_id).await?)
            .into_response()),
        None => Ok(Json(state.templates.list(&query.agent_type).await?).into_response()),
    }
}

async fn create_template(
    State(state): State<AppState>,
    Json(request): Json<NewTemplate>,
) -> Result<(StatusCode, Json<PromptTemplate>), AppError> {
    let template = state.templates.create(request).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn update_template(
    State(state): State<AppState>,
    Json(request): Json<TemplateUpdate>,
) -> Result<Json<PromptTemplate>, AppError> {
    Ok(Json(state.templates.update(request).await?))
}

async fn delete_template(
    State(state): State<AppState>,
    Query(query): Query<TemplateQuery>,
) -> Result<Json<Value>, AppError> {
    state
        .templates
        .delete(&query.agent_type, query.template_id.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(json!({ "message": "Template deleted successfully" })))
}

async fn agent_action(
    State(state): State<AppState>,
    Json(event): Json<AgentActionEvent>,
) -> Json<Value> {
    Json(state.agent_actions.handle(&event).await)
}

/// Signed link parameters.
#[derive(Deserialize)]
struct LinkQuery {
    expires: i64,
    signature: String,
}

async fn download(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(link): Query<LinkQuery>,
) -> Result<Response, AppError> {
    state
        .signer
        .verify(&key, link.expires, &link.signature, clock::now())?;
    let object = state.store.get(&key).await?;
    tracing::debug!(key = %key, bytes = object.body.len(), "Serving signed download");
    Ok(([(header::CONTENT_TYPE, object.content_type)], object.body).into_response())
}

/// Return the pipeline and query counters.
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "create_job",
                method: "POST",
                path: "/api/job",
                description: "Process every PDF of a leaf folder into knowledge chunks. Responds 202 with { \"job_id\", \"file_count\", \"execution\" }.",
                request_example: Some(json!({
                    "folder_path": "設計/2025",
                    "processing_mode": "full",
                    "transcript_prompt": "Transcribe the document.",
                    "knowledge_prompt": "Extract knowledge as a JSON array.",
                    "files": ["manual.pdf"]
                })),
            },
            CommandDescriptor {
                name: "reknowledge",
                method: "POST",
                path: "/api/reknowledge",
                description: "Re-run knowledge extraction over an earlier job's transcripts under a new job id.",
                request_example: Some(json!({
                    "source_job_id": "20250101093000",
                    "folder_path": "設計/2025",
                    "knowledge_prompt": "Extract knowledge as a JSON array."
                })),
            },
            CommandDescriptor {
                name: "default_job",
                method: "GET|PUT",
                path: "/api/folders/default-job",
                description: "Read (?folder_path=) or set the job whose knowledge a folder answers from.",
                request_example: Some(json!({
                    "folder_path": "設計/2025",
                    "job_id": "20250101093000"
                })),
            },
            CommandDescriptor {
                name: "job_status",
                method: "GET",
                path: "/api/jobs/{job_id}",
                description: "Per-file status with download links plus the index sync status (?folder_path= filters).",
                request_example: None,
            },
            CommandDescriptor {
                name: "list_jobs",
                method: "GET",
                path: "/api/jobs",
                description: "Job ids that processed a folder (?folder_path=), newest first.",
                request_example: None,
            },
            CommandDescriptor {
                name: "query",
                method: "POST",
                path: "/api/query",
                description: "Answer a question from the selected folders' knowledge and record the turn.",
                request_example: Some(json!({
                    "query": "What is the torque limit?",
                    "chat_session_id": "session-1",
                    "folder_paths": ["設計/2025"],
                    "folder_default_job_ids": { "設計/2025": "20250101093000" },
                    "use_agent": true,
                    "agent_type": "default"
                })),
            },
            CommandDescriptor {
                name: "start_query",
                method: "POST",
                path: "/api/query/start",
                description: "Start a long-running query; poll /api/query/status/{query_id} for the answer.",
                request_example: None,
            },
            CommandDescriptor {
                name: "history",
                method: "GET",
                path: "/api/history/sessions",
                description: "Conversation summaries, newest first (?mode=default|verification|specification|all).",
                request_example: None,
            },
            CommandDescriptor {
                name: "feedback",
                method: "PUT",
                path: "/api/history/{message_id}/feedback",
                description: "Rate (1-10) and/or comment on a message.",
                request_example: Some(json!({ "rating": 8, "comment": "Helpful" })),
            },
            CommandDescriptor {
                name: "prompt_templates",
                method: "GET|POST|PUT|DELETE",
                path: "/api/prompt-templates",
                description: "List (?agentType=) or read (&templateId=) output-format templates; create, update, or delete one. At most one default per agent type.",
                request_example: Some(json!({
                    "agentType": "verification",
                    "name": "社内フォーマット",
                    "description": "Verification plan as a table",
                    "editablePrompt": "【出力形式】検証項目を表で出力してください",
                    "isDefault": true
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return pipeline and query counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

/// Error response carrying a status and a client-facing message.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_CHARS).collect()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        }
        (
            self.status,
            Json(json!({ "error": truncate_message(&self.message) })),
        )
            .into_response()
    }
}

fn retrieval_status(error: &RetrievalError) -> StatusCode {
    match error {
        RetrievalError::NoSelectors
        | RetrievalError::MissingDefaultJob(_)
        | RetrievalError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn store_status(error: &StoreError) -> StatusCode {
    match error {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<JobError> for AppError {
    fn from(error: JobError) -> Self {
        let status = match &error {
            JobError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::Conflict(_) => StatusCode::CONFLICT,
            JobError::Store(inner) => store_status(inner),
            JobError::Batch(BatchError::Empty) => StatusCode::BAD_REQUEST,
            JobError::Batch(BatchError::Conflict(_)) => StatusCode::CONFLICT,
            JobError::Batch(BatchError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            JobError::Ledger(_) | JobError::Batch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl From<QueryError> for AppError {
    fn from(error: QueryError) -> Self {
        let status = match &error {
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            QueryError::Retrieval(inner) => retrieval_status(inner),
            QueryError::Store(_) | QueryError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl From<HistoryError> for AppError {
    fn from(error: HistoryError) -> Self {
        let status = match &error {
            HistoryError::NotFound(_) => StatusCode::NOT_FOUND,
            HistoryError::InvalidFeedback(_) => StatusCode::BAD_REQUEST,
            HistoryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl From<TemplateError> for AppError {
    fn from(error: TemplateError) -> Self {
        let status = match &error {
            TemplateError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            TemplateError::NotFound(_) => StatusCode::NOT_FOUND,
            TemplateError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl From<LinkError> for AppError {
    fn from(error: LinkError) -> Self {
        Self::new(StatusCode::FORBIDDEN, error.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        Self::new(store_status(&error), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands, truncate_message};
    use crate::app::{AppState, Clients, Workers};
    use crate::config::BatchDispatchMode;
    use crate::retrieval::Citation;
    use crate::storage::{MemoryObjectStore, ObjectStore, PDF_CONTENT_TYPE};
    use crate::test_support::{
        RecordingIndexSync, ScriptedAgent, ScriptedGeneration, ScriptedRetrieval, test_config,
    };
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Map, Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        state: AppState,
        store: Arc<MemoryObjectStore>,
        _workers: Workers,
    }

    async fn test_app(seed: &[&str]) -> TestApp {
        let store = Arc::new(MemoryObjectStore::new());
        for key in seed {
            store
                .put(key, b"%PDF-1.7".to_vec(), PDF_CONTENT_TYPE)
                .await
                .expect("seed");
        }
        let mut metadata = Map::new();
        metadata.insert("FileName".into(), json!("manual.pdf"));
        metadata.insert("s3Key".into(), json!("PDF/設計/manual.pdf"));
        let clients = Clients {
            generation: Arc::new(ScriptedGeneration::default()),
            index_sync: Arc::new(RecordingIndexSync::accepting()),
            retrieval: Arc::new(ScriptedRetrieval::answering(
                "トルクは 12 N·m です。",
                vec![Citation {
                    uri: None,
                    metadata,
                }],
            )),
            agents: Arc::new(ScriptedAgent::answering("agent answer")),
        };
        let mut config = test_config("http://127.0.0.1:9");
        config.batch_dispatch = BatchDispatchMode::FanOut;
        let (state, workers) =
            AppState::build(&config, store.clone(), clients).expect("assemble services");
        TestApp {
            router: create_router(state.clone()),
            state,
            store,
            _workers: workers,
        }
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        let response = router.clone().oneshot(request).await.expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn direct_query(session: &str) -> Value {
        json!({
            "query": "トルクの上限は？",
            "chat_session_id": session,
            "folder_paths": ["設計"],
            "folder_default_job_ids": { "設計": "20250101000000" },
            "use_agent": false
        })
    }

    #[tokio::test]
    async fn commands_catalog_exposes_job_and_query_endpoints() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let create = commands
            .iter()
            .find(|cmd| cmd.name == "create_job")
            .expect("create_job command present");

        assert_eq!(create.method, "POST");
        assert_eq!(create.path, "/api/job");
        assert!(commands.iter().any(|cmd| cmd.path == "/api/query"));
    }

    #[tokio::test]
    async fn create_job_returns_accepted_and_reports_status() {
        let app = test_app(&["PDF/設計/a.pdf", "PDF/設計/b.pdf"]).await;

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/job",
            Some(json!({ "folder_path": "設計", "processing_mode": "direct_pdf" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["file_count"], 2);
        assert_eq!(body["execution"], "fan_out");

        let job_id = body["job_id"].as_str().expect("job id").to_string();
        let (status, body) = send(
            &app.router,
            Method::GET,
            &format!("/api/jobs/{job_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let files = body["files"].as_array().expect("files");
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["status"], "queued");
        assert!(files[0]["file_url"]
            .as_str()
            .expect("url")
            .starts_with("http://files.test/files/PDF/"));
    }

    #[tokio::test]
    async fn job_errors_map_to_statuses() {
        let app = test_app(&["PDF/親/子/a.pdf"]).await;

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/job",
            Some(json!({ "folder_path": "親", "processing_mode": "direct_pdf" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().expect("error").contains("leaf folder"));

        let (status, _) = send(
            &app.router,
            Method::POST,
            "/api/job",
            Some(json!({ "folder_path": "親/子" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app.router, Method::GET, "/api/jobs/19990101000000", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn query_answers_records_history_and_accepts_feedback() {
        let app = test_app(&["PDF/設計/manual.pdf"]).await;

        let (status, body) =
            send(&app.router, Method::POST, "/api/query", Some(direct_query("s-1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "トルクは 12 N·m です。");
        assert_eq!(body["sources"][0]["fileName"], "manual.pdf");
        let message_id = body["message_id"].as_str().expect("message id").to_string();

        let (status, body) = send(&app.router, Method::GET, "/api/history/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessions"][0]["chat_session_id"], "s-1");
        assert_eq!(body["sessions"][0]["message_count"], 2);

        let encoded = message_id.replace('#', "%23");
        let (status, _) = send(
            &app.router,
            Method::PUT,
            &format!("/api/history/{encoded}/feedback"),
            Some(json!({ "rating": 11 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app.router,
            Method::PUT,
            &format!("/api/history/{encoded}/feedback"),
            Some(json!({ "rating": 9, "comment": "助かった" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rating"], 9);
    }

    #[tokio::test]
    async fn query_without_a_job_for_every_folder_is_rejected() {
        let app = test_app(&[]).await;
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/query",
            Some(json!({
                "query": "q",
                "chat_session_id": "s",
                "folder_paths": ["設計", "製造"],
                "folder_default_job_ids": { "設計": "1" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("error").contains("製造"));
    }

    #[tokio::test]
    async fn started_queries_are_pollable() {
        let app = test_app(&[]).await;
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/query/start",
            Some(direct_query("s-2")),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "processing");
        let query_id = body["query_id"].as_str().expect("query id").to_string();

        let (status, body) = send(
            &app.router,
            Method::GET,
            &format!("/api/query/status/{query_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "processing");

        app.state.queries.execute(&query_id).await.expect("execute");
        let (_, body) = send(
            &app.router,
            Method::GET,
            &format!("/api/query/status/{query_id}"),
            None,
        )
        .await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["answer"], "トルクは 12 N·m です。");

        let (status, _) = send(&app.router, Method::GET, "/api/query/status/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn signed_links_serve_objects_and_reject_tampering() {
        let app = test_app(&["PDF/設計/manual.pdf"]).await;
        let link = app.state.signer.sign("PDF/設計/manual.pdf");
        let path = link.strip_prefix("http://files.test").expect("relative path");

        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/pdf");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert_eq!(&bytes[..], b"%PDF-1.7");

        let tampered = path.replace("manual.pdf", "other.pdf");
        let (status, _) = send(&app.router, Method::GET, &tampered, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(app.store.exists("PDF/設計/manual.pdf").await.expect("exists"));
    }

    #[tokio::test]
    async fn agent_actions_return_the_function_envelope() {
        let app = test_app(&[]).await;
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/agent/actions",
            Some(json!({
                "actionGroup": "search",
                "function": "search_documents",
                "parameters": [
                    { "name": "query", "type": "string", "value": "トルク" },
                    { "name": "folder_job_pairs", "type": "string",
                      "value": "[{\"folder_path\":\"設計\",\"job_id\":\"1\"}]" }
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messageVersion"], "1.0");
        let inner: Value = serde_json::from_str(
            body["response"]["functionResponse"]["responseBody"]["TEXT"]["body"]
                .as_str()
                .expect("body"),
        )
        .expect("inner json");
        assert_eq!(inner["answer"], "トルクは 12 N·m です。");
    }

    #[tokio::test]
    async fn prompt_templates_keep_one_default_per_agent_type() {
        let app = test_app(&[]).await;

        let (status, body) = send(
            &app.router,
            Method::GET,
            "/api/prompt-templates?agentType=VERIFICATION",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["agentType"], "verification");
        assert_eq!(body["count"], 1);
        assert_eq!(body["templates"][0]["templateId"], "default-verification");
        assert_eq!(body["templates"][0]["isDefault"], true);

        let (status, created) = send(
            &app.router,
            Method::POST,
            "/api/prompt-templates",
            Some(json!({
                "agentType": "verification",
                "name": "社内フォーマット",
                "editablePrompt": "検証項目を表で出力",
                "isDefault": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["version"], 1);
        let template_id = created["templateId"].as_str().expect("template id").to_string();

        let (_, seeded) = send(
            &app.router,
            Method::GET,
            "/api/prompt-templates?agentType=verification&templateId=default-verification",
            None,
        )
        .await;
        assert_eq!(seeded["isDefault"], false);

        let (status, updated) = send(
            &app.router,
            Method::PUT,
            "/api/prompt-templates",
            Some(json!({
                "agentType": "verification",
                "templateId": template_id,
                "name": "社内フォーマット v2"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["version"], 2);
        assert_eq!(updated["isDefault"], true);

        let uri = format!("/api/prompt-templates?agentType=verification&templateId={template_id}");
        let (status, body) = send(&app.router, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Template deleted successfully");
        let (status, _) = send(&app.router, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn prompt_template_validation_errors_are_bad_requests() {
        let app = test_app(&[]).await;

        let (status, body) = send(&app.router, Method::GET, "/api/prompt-templates", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "agentType is required");

        let (status, _) = send(
            &app.router,
            Method::POST,
            "/api/prompt-templates",
            Some(json!({ "agentType": "specification", "name": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app.router,
            Method::DELETE,
            "/api/prompt-templates?agentType=specification",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn error_messages_are_truncated_by_characters() {
        let long = "あ".repeat(250);
        assert_eq!(truncate_message(&long).chars().count(), 200);
        assert_eq!(truncate_message("short"), "short");
    }
}
