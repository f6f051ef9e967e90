//! Job ledger and folder configuration records.
//!
//! The ledger holds one record per `(job_id, folder_path, file_name)` with a status driven by the
//! knowledge pipeline, a job-level record for the post-batch index sync, and a folder index used
//! by status listings. Status changes are validated against the table in [`types`]; backends
//! reject illegal transitions instead of silently overwriting them.

mod memory;
pub mod types;

pub use memory::MemoryLedger;
pub use types::{
    FolderConfig, FolderRegistration, JobRecord, JobStatus, JobSyncRecord, LedgerError,
    ProcessingMode, RecordKey, StatusChange, StatusScope,
};

use async_trait::async_trait;
use serde_json::Value;

/// Keyed store of per-file job records and job-level sync status.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Register a new record; fails when a record already exists for its key.
    async fn create(&self, record: JobRecord) -> Result<(), LedgerError>;

    /// Fetch the record stored under `key`.
    async fn get(&self, key: &RecordKey) -> Result<Option<JobRecord>, LedgerError>;

    /// Apply a status change, creating the record when absent, and return the stored record.
    async fn apply(&self, key: &RecordKey, change: StatusChange) -> Result<JobRecord, LedgerError>;

    /// Records of one job, optionally restricted to one folder, ordered by sort key.
    async fn records_for_job(
        &self,
        job_id: &str,
        folder_path: Option<&str>,
    ) -> Result<Vec<JobRecord>, LedgerError>;

    /// Records of every job targeting `folder_path` (secondary index).
    async fn records_for_folder(&self, folder_path: &str) -> Result<Vec<JobRecord>, LedgerError>;

    /// Change the job-level sync status.
    async fn set_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        details: Option<Value>,
    ) -> Result<JobSyncRecord, LedgerError>;

    /// Job-level sync status, when one was recorded.
    async fn job_status(&self, job_id: &str) -> Result<Option<JobSyncRecord>, LedgerError>;
}

/// Store of folder configuration records.
///
/// Writes are last-writer-wins without optimistic locking.
#[async_trait]
pub trait FolderRegistry: Send + Sync {
    /// Fetch the configuration for `folder_path`.
    async fn folder(&self, folder_path: &str) -> Result<Option<FolderConfig>, LedgerError>;

    /// Record `job_id` as the folder's latest job, creating the record when absent.
    async fn record_latest_job(&self, folder_path: &str, job_id: &str)
    -> Result<(), LedgerError>;

    /// Register a completed job: becomes default when the folder has none, latest otherwise.
    async fn register_completion(
        &self,
        folder_path: &str,
        job_id: &str,
    ) -> Result<FolderRegistration, LedgerError>;

    /// Set the folder's default job, creating the record when absent.
    async fn set_default_job(
        &self,
        folder_path: &str,
        job_id: &str,
    ) -> Result<FolderConfig, LedgerError>;
}
