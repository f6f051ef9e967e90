//! Batch coordination.
//!
//! A submission becomes one work item per file. Exactly one item, the last in submission order,
//! carries the index sync flag. That item is the logical last, not necessarily the last to
//! finish: under parallel execution the sync may start while other files are still being
//! written. Callers needing a barrier must serialize execution.

mod handler;
mod orchestrator;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

pub use handler::{WorkItemError, WorkItemHandler, WorkItemOutcome};
pub use orchestrator::{BatchOrchestrator, LocalOrchestrator};

use crate::config::BatchDispatchMode;
use crate::knowledge::WorkItem;
use crate::ledger::ProcessingMode;
use crate::tasks::{TaskError, TaskQueue};

/// Errors that fail a whole submission.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Submission contained no files.
    #[error("Batch contains no files")]
    Empty,
    /// Serialized work items exceed the dispatch limit.
    #[error("Batch payload is {size} bytes, exceeding the {limit} byte limit")]
    PayloadTooLarge {
        /// Serialized size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },
    /// An execution with the same name already exists.
    #[error("Execution already exists: {0}")]
    Conflict(String),
    /// Orchestrator could not accept the execution.
    #[error("Orchestrator unavailable: {0}")]
    OrchestratorUnavailable(String),
    /// Fan-out queue rejected an item.
    #[error(transparent)]
    Queue(#[from] TaskError),
    /// Work items could not be serialized.
    #[error("Failed to serialize batch: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One source file of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedFile {
    /// Object key of the source document.
    pub file_key: String,
    /// File name of the source document.
    pub file_name: String,
}

/// Files sharing one job, folder, and mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSubmission {
    /// Job every item belongs to.
    pub job_id: String,
    /// Folder scope, when any.
    pub folder_path: Option<String>,
    /// Processing mode of every item.
    pub mode: ProcessingMode,
    /// Source job for reknowledge submissions.
    pub source_job_id: Option<String>,
    /// Whether the folder has never completed a job before.
    pub is_new_folder: bool,
    /// Files in submission order.
    pub files: Vec<SubmittedFile>,
}

/// Build one work item per file; only the last item triggers the index sync.
pub fn build_work_items(submission: &BatchSubmission) -> Vec<WorkItem> {
    let last = submission.files.len().saturating_sub(1);
    submission
        .files
        .iter()
        .enumerate()
        .map(|(index, file)| WorkItem {
            job_id: submission.job_id.clone(),
            folder_path: submission.folder_path.clone(),
            file_key: Some(file.file_key.clone()),
            file_name: file.file_name.clone(),
            processing_mode: submission.mode,
            source_job_id: submission.source_job_id.clone(),
            trigger_kb_sync: index == last,
            is_new_folder: submission.is_new_folder && index == last,
        })
        .collect()
}

/// Reject batches whose serialized work items exceed `limit` bytes.
pub fn check_payload_size(items: &[WorkItem], limit: usize) -> Result<usize, BatchError> {
    let size = serde_json::to_vec(items)?.len();
    if size > limit {
        return Err(BatchError::PayloadTooLarge { size, limit });
    }
    Ok(size)
}

/// How a batch was handed off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    /// Execution name, or `fan_out` when items were queued individually.
    pub execution: String,
    /// Number of dispatched items.
    pub item_count: usize,
}

/// Hands batches to the orchestrator or, when that is unavailable, to the fan-out queue.
pub struct BatchDispatcher {
    mode: BatchDispatchMode,
    orchestrator: Option<Arc<dyn BatchOrchestrator>>,
    queue: Arc<dyn TaskQueue<WorkItem>>,
    max_payload_bytes: usize,
}

impl BatchDispatcher {
    /// Assemble a dispatcher.
    pub fn new(
        mode: BatchDispatchMode,
        orchestrator: Option<Arc<dyn BatchOrchestrator>>,
        queue: Arc<dyn TaskQueue<WorkItem>>,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            mode,
            orchestrator,
            queue,
            max_payload_bytes,
        }
    }

    /// Build, size-check, and dispatch the work items of `submission`.
    pub async fn submit(
        &self,
        execution_name: &str,
        submission: &BatchSubmission,
    ) -> Result<DispatchReceipt, BatchError> {
        if submission.files.is_empty() {
            return Err(BatchError::Empty);
        }
        let items = build_work_items(submission);
        let size = check_payload_size(&items, self.max_payload_bytes)?;
        tracing::info!(
            job_id = %submission.job_id,
            execution = execution_name,
            items = items.len(),
            bytes = size,
            "Dispatching batch"
        );
        let item_count = items.len();

        if self.mode == BatchDispatchMode::Orchestrated
            && let Some(orchestrator) = &self.orchestrator
        {
            match orchestrator.start_execution(execution_name, items.clone()).await {
                Ok(()) => {
                    return Ok(DispatchReceipt {
                        execution: execution_name.to_string(),
                        item_count,
                    });
                }
                Err(BatchError::OrchestratorUnavailable(reason)) => {
                    tracing::warn!(
                        execution = execution_name,
                        reason = %reason,
                        "Orchestrator unavailable; fanning out"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        for item in items {
            self.queue.enqueue(item).await?;
        }
        Ok(DispatchReceipt {
            execution: "fan_out".to_string(),
            item_count,
        })
    }
}
