//! Handler for the metrics tool.

use std::sync::Arc;

use crate::metrics::PipelineMetrics;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use serde_json::json;

/// Handle the `metrics` tool, returning the current pipeline and query counters.
pub(crate) async fn handle_metrics(
    metrics: &Arc<PipelineMetrics>,
) -> Result<CallToolResult, McpError> {
    let snapshot = metrics.snapshot();
    Ok(CallToolResult::structured(json!({
        "filesProcessed": snapshot.files_processed,
        "filesFailed": snapshot.files_failed,
        "chunksWritten": snapshot.chunks_written,
        "queriesAnswered": snapshot.queries_answered,
        "queriesFailed": snapshot.queries_failed,
        "syncsStarted": snapshot.syncs_started,
        "syncErrors": snapshot.sync_errors,
    })))
}
