//! Index sync trigger.
//!
//! Runs after the designated last item of a batch. A rejected sync (typically because the index
//! is already ingesting) is recorded on the job and reported as success: a stale index can be
//! re-synced later, a lost batch status cannot. Ledger writes made here are best-effort too; a
//! failed write is logged and surfaces as [`SyncOutcome::StatusUnrecorded`].

mod client;

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

pub use client::IngestionClient;

use crate::ledger::{FolderRegistry, JobLedger, JobStatus, LedgerError};
use crate::metrics::PipelineMetrics;

/// Errors raised by the index sync provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexSyncError {
    /// Provider rejected the request.
    #[error("Index sync rejected ({code}): {message}")]
    Rejected {
        /// Provider error code (e.g. `ConflictException`).
        code: String,
        /// Provider error message.
        message: String,
    },
    /// Provider could not be reached.
    #[error("Index sync provider unavailable: {0}")]
    Unavailable(String),
}

impl IndexSyncError {
    /// Error code recorded on the job.
    pub fn code(&self) -> &str {
        match self {
            Self::Rejected { code, .. } => code,
            Self::Unavailable(_) => "Unavailable",
        }
    }

    /// Error message recorded on the job.
    pub fn message(&self) -> &str {
        match self {
            Self::Rejected { message, .. } | Self::Unavailable(message) => message,
        }
    }
}

/// Ingestion pass accepted by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionJob {
    /// Provider identifier of the ingestion pass.
    pub ingestion_job_id: String,
    /// Provider status of the pass.
    pub status: String,
}

/// Client requesting one synchronization pass of the knowledge index.
#[async_trait::async_trait]
pub trait IndexSyncClient: Send + Sync {
    /// Start an ingestion pass over the configured data source.
    async fn start_ingestion(&self) -> Result<IngestionJob, IndexSyncError>;
}

/// Input of one trigger invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Job whose batch finished.
    pub job_id: String,
    /// Whether this invocation should sync at all.
    pub trigger: bool,
    /// Folder to register when this is its first knowledge completion.
    pub new_folder: Option<String>,
}

/// Result of a trigger invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Trigger flag was false; nothing was touched.
    Skipped,
    /// Provider accepted the ingestion pass.
    Started(IngestionJob),
    /// Provider rejected the pass; recorded on the job and otherwise ignored.
    Failed {
        /// Provider error code.
        error_code: String,
        /// Provider error message.
        error_message: String,
    },
    /// Ingestion was requested but the job-level status could not be written.
    StatusUnrecorded {
        /// Ingestion pass, when the provider accepted one.
        ingestion: Option<IngestionJob>,
        /// First ledger failure.
        ledger_error: String,
    },
}

/// Errors that abort a trigger invocation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invocation did not name a job.
    #[error("job_id is required")]
    MissingJobId,
}

/// Records the job's sync status, registers new folders, and starts index ingestion.
pub struct SyncTrigger {
    ledger: Arc<dyn JobLedger>,
    folders: Arc<dyn FolderRegistry>,
    index: Arc<dyn IndexSyncClient>,
    metrics: Arc<PipelineMetrics>,
}

impl SyncTrigger {
    /// Assemble a trigger from its collaborators.
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        folders: Arc<dyn FolderRegistry>,
        index: Arc<dyn IndexSyncClient>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            ledger,
            folders,
            index,
            metrics,
        }
    }

    /// Run one trigger invocation.
    pub async fn trigger(&self, request: &SyncRequest) -> Result<SyncOutcome, SyncError> {
        let job_id = request.job_id.trim();
        if job_id.is_empty() {
            return Err(SyncError::MissingJobId);
        }
        if !request.trigger {
            tracing::info!(job_id, "Index sync not requested");
            return Ok(SyncOutcome::Skipped);
        }

        if let Some(folder_path) = request.new_folder.as_deref().filter(|f| !f.is_empty()) {
            match self.folders.register_completion(folder_path, job_id).await {
                Ok(registration) => {
                    tracing::info!(job_id, folder_path, ?registration, "Folder registered")
                }
                Err(error) => {
                    tracing::error!(job_id, folder_path, error = %error, "Folder registration failed")
                }
            }
        }

        let mut unrecorded = self
            .record_status(job_id, JobStatus::KbSyncInProgress, None)
            .await
            .err();

        let outcome = match self.index.start_ingestion().await {
            Ok(ingestion) => {
                tracing::info!(
                    job_id,
                    ingestion_job_id = %ingestion.ingestion_job_id,
                    status = %ingestion.status,
                    "Index sync started"
                );
                self.metrics.record_sync(true);
                let details = json!({
                    "ingestion_job_id": ingestion.ingestion_job_id,
                    "status": ingestion.status,
                });
                if let Err(error) = self
                    .record_status(job_id, JobStatus::KbSyncStarted, Some(details))
                    .await
                {
                    unrecorded.get_or_insert(error);
                }
                match unrecorded {
                    Some(error) => SyncOutcome::StatusUnrecorded {
                        ingestion: Some(ingestion),
                        ledger_error: error.to_string(),
                    },
                    None => SyncOutcome::Started(ingestion),
                }
            }
            Err(error) => {
                tracing::warn!(
                    job_id,
                    code = error.code(),
                    error = %error,
                    "Index sync rejected; batch still completes"
                );
                self.metrics.record_sync(false);
                let details = json!({
                    "error_code": error.code(),
                    "error_message": error.message(),
                });
                if let Err(ledger_error) = self
                    .record_status(job_id, JobStatus::KbSyncError, Some(details))
                    .await
                {
                    unrecorded.get_or_insert(ledger_error);
                }
                match unrecorded {
                    Some(ledger_error) => SyncOutcome::StatusUnrecorded {
                        ingestion: None,
                        ledger_error: ledger_error.to_string(),
                    },
                    None => SyncOutcome::Failed {
                        error_code: error.code().to_string(),
                        error_message: error.message().to_string(),
                    },
                }
            }
        };
        Ok(outcome)
    }

    async fn record_status(
        &self,
        job_id: &str,
        status: JobStatus,
        details: Option<serde_json::Value>,
    ) -> Result<(), LedgerError> {
        self.ledger
            .set_job_status(job_id, status, details)
            .await
            .map(|_| ())
            .inspect_err(|error| {
                tracing::error!(job_id, ?status, error = %error, "Job sync status not recorded")
            })
    }
}
