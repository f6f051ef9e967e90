//! Handlers for the query tools.

use std::collections::HashMap;
use std::sync::Arc;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, JsonObject},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{parse_arguments, query_error};
use crate::mcp::format::structured;
use crate::query::{AsyncQueryCoordinator, QueryInput};
use crate::retrieval::AgentType;

/// Request payload accepted by the `ask` and `start-query` tools.
#[derive(Debug, Deserialize)]
pub(crate) struct QueryToolRequest {
    /// Question text.
    pub(crate) query: String,
    /// Conversation to continue; a fresh `mcp-` session is opened when omitted.
    #[serde(default)]
    pub(crate) chat_session_id: Option<String>,
    /// Folders to search.
    #[serde(default)]
    pub(crate) folder_paths: Vec<String>,
    /// Job to search for each folder.
    #[serde(default)]
    pub(crate) folder_default_job_ids: HashMap<String, String>,
    /// Answer through the conversational agent.
    #[serde(default)]
    pub(crate) use_agent: Option<bool>,
    /// Agent persona.
    #[serde(default)]
    pub(crate) agent_type: AgentType,
}

impl QueryToolRequest {
    fn into_input(self) -> QueryInput {
        QueryInput {
            query: self.query,
            chat_session_id: self
                .chat_session_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("mcp-{}", Uuid::new_v4())),
            folder_paths: self.folder_paths,
            folder_default_job_ids: self.folder_default_job_ids,
            use_agent: self.use_agent.unwrap_or(true),
            agent_type: self.agent_type,
        }
    }
}

/// Request payload accepted by the `poll-query` tool.
#[derive(Debug, Deserialize)]
pub(crate) struct PollToolRequest {
    /// Query returned by `start-query`.
    pub(crate) query_id: String,
}

/// Handle the `ask` tool by answering in-line.
pub(crate) async fn handle_ask(
    queries: &Arc<AsyncQueryCoordinator>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let input = parse_arguments::<QueryToolRequest>(arguments)?.into_input();
    let response = queries.ask(&input).await.map_err(query_error)?;
    let mut result = structured(&response)?;
    if let Some(payload) = result.structured_content.as_mut()
        && let Some(object) = payload.as_object_mut()
    {
        object.insert("chat_session_id".into(), json!(input.chat_session_id));
    }
    Ok(result)
}

/// Handle the `start-query` tool by scheduling background execution.
pub(crate) async fn handle_start_query(
    queries: &Arc<AsyncQueryCoordinator>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let input = parse_arguments::<QueryToolRequest>(arguments)?.into_input();
    let chat_session_id = input.chat_session_id.clone();
    let query_id = queries.start(input).await.map_err(query_error)?;
    Ok(CallToolResult::structured(json!({
        "query_id": query_id,
        "status": "processing",
        "chat_session_id": chat_session_id,
    })))
}

/// Handle the `poll-query` tool.
pub(crate) async fn handle_poll_query(
    queries: &Arc<AsyncQueryCoordinator>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let request: PollToolRequest = parse_arguments(arguments)?;
    if request.query_id.trim().is_empty() {
        return Err(McpError::invalid_params("`query_id` must not be empty", None));
    }
    let view = queries
        .poll(request.query_id.trim())
        .await
        .map_err(query_error)?;
    structured(&view)
}
