//! Ledger record types and the job status state machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Errors returned by ledger backends.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Requested status change is not allowed from the record's current status.
    #[error("Illegal status transition from {from} to {to}")]
    IllegalTransition {
        /// Current status, or `absent` when no record exists.
        from: &'static str,
        /// Requested status.
        to: JobStatus,
    },
    /// A record already exists for the key being created.
    #[error("Record already exists: {0}")]
    AlreadyExists(String),
    /// Backend failure.
    #[error("Ledger backend failed: {0}")]
    Backend(String),
}

/// Status of a file record or, for the `kb_sync_*` variants, of a whole job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Registered by job creation, waiting for a worker.
    Queued,
    /// A worker is processing the file.
    Running,
    /// Processing finished successfully.
    Done,
    /// Processing failed; the message carries the error.
    Failed,
    /// Registered by a reknowledge request, waiting for a worker.
    Reknowledge,
    /// Index sync requested for the job.
    KbSyncInProgress,
    /// Index sync accepted by the provider.
    KbSyncStarted,
    /// Index sync rejected by the provider.
    KbSyncError,
}

/// Whether a status applies to one file record or to the job as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusScope {
    /// Status of one `(job, folder, file)` record.
    File,
    /// Post-batch index sync status of a job.
    Job,
}

use JobStatus::*;

/// Allowed `(from, to)` pairs; `None` means no record exists yet.
///
/// Redelivered work items may re-enter `running` from any file state, so re-running a key
/// overwrites its record instead of being rejected.
const TRANSITIONS: &[(Option<JobStatus>, JobStatus)] = &[
    (None, Queued),
    (None, Reknowledge),
    (None, Running),
    (Some(Queued), Running),
    (Some(Queued), Failed),
    (Some(Reknowledge), Running),
    (Some(Reknowledge), Failed),
    (Some(Running), Running),
    (Some(Running), Done),
    (Some(Running), Failed),
    (Some(Done), Running),
    (Some(Failed), Running),
    (None, KbSyncInProgress),
    (Some(KbSyncInProgress), KbSyncInProgress),
    (Some(KbSyncInProgress), KbSyncStarted),
    (Some(KbSyncInProgress), KbSyncError),
    (Some(KbSyncStarted), KbSyncInProgress),
    (Some(KbSyncError), KbSyncInProgress),
];

impl JobStatus {
    /// Wire representation of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Queued => "queued",
            Running => "running",
            Done => "done",
            Failed => "failed",
            Reknowledge => "reknowledge",
            KbSyncInProgress => "kb_sync_in_progress",
            KbSyncStarted => "kb_sync_started",
            KbSyncError => "kb_sync_error",
        }
    }

    /// Whether the status describes a file record or a job.
    pub fn scope(self) -> StatusScope {
        match self {
            KbSyncInProgress | KbSyncStarted | KbSyncError => StatusScope::Job,
            _ => StatusScope::File,
        }
    }

    /// Whether the status ends a file's pipeline run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Done | Failed)
    }

    /// Validate a status change against the transition table.
    pub fn check_transition(from: Option<JobStatus>, to: JobStatus) -> Result<(), LedgerError> {
        if TRANSITIONS.contains(&(from, to)) {
            Ok(())
        } else {
            Err(LedgerError::IllegalTransition {
                from: from.map(JobStatus::as_str).unwrap_or("absent"),
                to,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a work item is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Transcribe, then extract knowledge.
    Full,
    /// Reuse an earlier job's transcript and only re-extract knowledge.
    Reknowledge,
    /// Copy the source document into the knowledge location as-is.
    DirectPdf,
}

impl ProcessingMode {
    /// Wire representation of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingMode::Full => "full",
            ProcessingMode::Reknowledge => "reknowledge",
            ProcessingMode::DirectPdf => "direct_pdf",
        }
    }

    /// Whether the mode calls the generation client and therefore needs prompts.
    pub fn requires_prompts(self) -> bool {
        !matches!(self, ProcessingMode::DirectPdf)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(ProcessingMode::Full),
            "reknowledge" => Ok(ProcessingMode::Reknowledge),
            "direct_pdf" => Ok(ProcessingMode::DirectPdf),
            other => Err(format!("unknown processing mode `{other}`")),
        }
    }
}

/// Key of one file record: the job partition plus the `folder_path#file_name` sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Job partition key.
    pub job_id: String,
    /// Folder scope; `None` for legacy flat records.
    pub folder_path: Option<String>,
    /// Source file name.
    pub file_name: String,
}

impl RecordKey {
    /// Build a record key.
    pub fn new(job_id: &str, folder_path: Option<&str>, file_name: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            folder_path: folder_path.map(str::to_string),
            file_name: file_name.to_string(),
        }
    }

    /// Composite sort attribute (`{folder_path}#{file_name}`, or the bare file name for legacy
    /// records).
    pub fn sort_key(&self) -> String {
        match &self.folder_path {
            Some(folder) => format!("{folder}#{}", self.file_name),
            None => self.file_name.clone(),
        }
    }
}

/// One `(job, folder, file)` unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job partition key.
    pub job_id: String,
    /// Folder scope; `None` for legacy flat records.
    pub folder_path: Option<String>,
    /// Source file name.
    pub file_name: String,
    /// Object key of the source file.
    pub file_key: String,
    /// Current status.
    pub status: JobStatus,
    /// Processing mode the record was registered with.
    pub processing_mode: ProcessingMode,
    /// Job whose transcript is reused (reknowledge only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_job_id: Option<String>,
    /// Human readable status message.
    pub message: String,
    /// Offset-qualified timestamp of the last change.
    pub last_update: String,
}

impl JobRecord {
    /// Key addressing this record.
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.job_id, self.folder_path.as_deref(), &self.file_name)
    }
}

/// Status change applied to a file record, creating the record when it does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    /// Target status.
    pub status: JobStatus,
    /// Message stored with the change.
    pub message: String,
    /// Object key of the source file.
    pub file_key: String,
    /// Processing mode of the run making the change.
    pub processing_mode: ProcessingMode,
    /// Job whose transcript is reused (reknowledge only).
    pub source_job_id: Option<String>,
}

/// Post-batch index sync status of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSyncRecord {
    /// Job the status belongs to.
    pub job_id: String,
    /// One of the `kb_sync_*` statuses.
    pub status: JobStatus,
    /// Provider details (ingestion job id, or error code and message).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Offset-qualified timestamp of the last change.
    pub last_update: String,
}

/// Per-folder job selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Folder path (primary key).
    pub folder_path: String,
    /// Job whose knowledge is used when no job is selected explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_job_id: Option<String>,
    /// Most recent job targeting the folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_job_id: Option<String>,
    /// Offset-qualified timestamp of the last change.
    pub updated_at: String,
}

/// Outcome of registering a completed job against its folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderRegistration {
    /// Folder had no default job; the job became both default and latest.
    Registered,
    /// Folder already had a default job; only the latest job changed.
    Updated,
}
