//! Handlers for the job tools.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, JsonObject},
};
use serde::Deserialize;

use super::{job_error, parse_arguments};
use crate::jobs::{CreateJobRequest, JobService};
use crate::mcp::format::structured;

/// Request payload accepted by the `job-status` tool.
#[derive(Debug, Deserialize)]
pub(crate) struct JobStatusToolRequest {
    /// Job to report on.
    pub(crate) job_id: String,
    /// Optional folder restricting the listing.
    #[serde(default)]
    pub(crate) folder_path: Option<String>,
}

/// Handle the `create-job` tool by registering and dispatching a processing job.
pub(crate) async fn handle_create_job(
    jobs: &Arc<JobService>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let request: CreateJobRequest = parse_arguments(arguments)?;
    let accepted = jobs.create_job(&request).await.map_err(job_error)?;
    tracing::info!(
        job_id = %accepted.job_id,
        folder_path = %accepted.folder_path,
        file_count = accepted.file_count,
        "Job created via MCP"
    );
    structured(&accepted)
}

/// Handle the `job-status` tool.
pub(crate) async fn handle_job_status(
    jobs: &Arc<JobService>,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpError> {
    let request: JobStatusToolRequest = parse_arguments(arguments)?;
    if request.job_id.trim().is_empty() {
        return Err(McpError::invalid_params("`job_id` must not be empty", None));
    }
    let view = jobs
        .job_status(request.job_id.trim(), request.folder_path.as_deref())
        .await
        .map_err(job_error)?;
    structured(&view)
}
