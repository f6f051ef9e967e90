//! Execution of one work item: pipeline run followed by the sync trigger.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::knowledge::{KnowledgePipeline, PipelineCommand, PipelineError, WorkItem};
use crate::ledger::ProcessingMode;
use crate::sync::{SyncError, SyncOutcome, SyncRequest, SyncTrigger};
use crate::tasks::{Delivery, TaskHandler};

/// Errors failing one work item.
#[derive(Debug, Error)]
pub enum WorkItemError {
    /// Pipeline run failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Sync trigger could not record the job status.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Result reported for a completed work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItemOutcome {
    /// Job the file belongs to.
    pub job_id: String,
    /// Processed file name.
    pub file_name: String,
    /// Folder scope, when any.
    pub folder_path: Option<String>,
    /// Processing mode.
    pub mode: ProcessingMode,
    /// Always `completed`.
    pub status: &'static str,
    /// Whether this item carried the sync flag.
    pub trigger_kb_sync: bool,
    /// Completion message recorded in the ledger.
    pub message: String,
    /// Keys of the knowledge objects written.
    pub knowledge_keys: Vec<String>,
    /// What the sync trigger did.
    pub sync: SyncOutcome,
}

/// Runs work items end to end.
pub struct WorkItemHandler {
    pipeline: Arc<KnowledgePipeline>,
    sync: Arc<SyncTrigger>,
}

impl WorkItemHandler {
    /// Assemble a handler.
    pub fn new(pipeline: Arc<KnowledgePipeline>, sync: Arc<SyncTrigger>) -> Self {
        Self { pipeline, sync }
    }

    /// Validate `item`, process its file, then run the sync trigger with the item's flag.
    pub async fn run(&self, item: &WorkItem) -> Result<WorkItemOutcome, WorkItemError> {
        let command = PipelineCommand::try_from(item)?;
        let outcome = self.pipeline.process(&command).await?;

        let sync = self
            .sync
            .trigger(&SyncRequest {
                job_id: item.job_id.clone(),
                trigger: item.trigger_kb_sync,
                new_folder: if item.is_new_folder {
                    outcome.folder_path.clone()
                } else {
                    None
                },
            })
            .await?;

        Ok(WorkItemOutcome {
            job_id: outcome.job_id,
            file_name: outcome.file_name,
            folder_path: outcome.folder_path,
            mode: outcome.mode,
            status: "completed",
            trigger_kb_sync: item.trigger_kb_sync,
            message: outcome.message,
            knowledge_keys: outcome.knowledge_keys,
            sync,
        })
    }
}

#[async_trait]
impl TaskHandler<WorkItem> for WorkItemHandler {
    type Error = WorkItemError;

    async fn handle(&self, delivery: &Delivery<WorkItem>) -> Result<(), WorkItemError> {
        tracing::debug!(
            job_id = %delivery.task.job_id,
            file_name = %delivery.task.file_name,
            attempt = delivery.attempt,
            "Work item delivered"
        );
        self.run(&delivery.task).await.map(|_| ())
    }
}
