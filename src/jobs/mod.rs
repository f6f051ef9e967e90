//! Job entry contract: creating jobs, reknowledge requests, default jobs, and status listings.
//!
//! A job targets one leaf folder. Creating it registers one `queued` record per source document,
//! stores the prompts under `Prompts/{folder_path}/{job_id}/`, and hands the files to the batch
//! dispatcher. Reknowledge jobs reuse the transcripts of a source job and only rerun extraction.

mod service;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::BatchError;
use crate::ledger::{JobStatus, JobSyncRecord, LedgerError, ProcessingMode};
use crate::storage::StoreError;

pub use service::JobService;

/// Errors raised by the job services.
#[derive(Debug, Error)]
pub enum JobError {
    /// Request failed validation.
    #[error("{0}")]
    InvalidRequest(String),
    /// Referenced job or folder does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Request conflicts with existing state.
    #[error("{0}")]
    Conflict(String),
    /// Object storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Dispatch failure.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Body of a job creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CreateJobRequest {
    /// Leaf folder whose documents are processed.
    pub folder_path: String,
    /// `full` (default) or `direct_pdf`.
    #[serde(default)]
    pub processing_mode: Option<String>,
    /// Transcription prompt; required unless the mode is `direct_pdf`.
    #[serde(default)]
    pub transcript_prompt: Option<String>,
    /// Knowledge extraction prompt; required unless the mode is `direct_pdf`.
    #[serde(default)]
    pub knowledge_prompt: Option<String>,
    /// Restrict processing to these file names.
    #[serde(default, alias = "pdfFiles")]
    pub files: Vec<String>,
}

/// Body of a reknowledge request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReknowledgeRequest {
    /// Job whose transcripts are reused.
    #[serde(alias = "job_id")]
    pub source_job_id: String,
    /// Folder the source job processed.
    pub folder_path: String,
    /// New knowledge extraction prompt.
    pub knowledge_prompt: String,
}

/// Accepted job, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobAccepted {
    /// Newly assigned job id.
    pub job_id: String,
    /// Target folder.
    pub folder_path: String,
    /// Number of dispatched files.
    pub file_count: usize,
    /// Execution name, or `fan_out` when items were queued individually.
    pub execution: String,
    /// Source job of a reknowledge request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_job_id: Option<String>,
}

/// Status of one file of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStatus {
    /// Source file name.
    pub file_name: String,
    /// Current status.
    pub status: JobStatus,
    /// Processing mode the record was registered with.
    pub processing_mode: ProcessingMode,
    /// Latest status message.
    pub message: String,
    /// Timestamp of the last change.
    pub last_update: String,
    /// Fresh download link for the source document.
    pub file_url: String,
}

/// Status of a whole job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    /// Job id.
    pub job_id: String,
    /// Folder filter applied to the listing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    /// File records ordered by sort key.
    pub files: Vec<FileStatus>,
    /// Post-batch index sync status, once one was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<JobSyncRecord>,
}

/// Default job selection of a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultJob {
    /// Folder path.
    pub folder_path: String,
    /// Default job, when one is set.
    pub job_id: Option<String>,
}
