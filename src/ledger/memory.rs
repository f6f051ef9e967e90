//! In-memory ledger backend.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    FolderConfig, FolderRegistration, FolderRegistry, JobLedger, JobRecord, JobStatus,
    JobSyncRecord, LedgerError, RecordKey, StatusChange, StatusScope,
};
use crate::clock;

/// Ledger and folder registry kept in process memory.
#[derive(Default)]
pub struct MemoryLedger {
    // job_id -> sort key -> record
    records: RwLock<HashMap<String, BTreeMap<String, JobRecord>>>,
    jobs: RwLock<HashMap<String, JobSyncRecord>>,
    folders: RwLock<HashMap<String, FolderConfig>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

fn scope_error(from: Option<JobStatus>, to: JobStatus) -> LedgerError {
    LedgerError::IllegalTransition {
        from: from.map(JobStatus::as_str).unwrap_or("absent"),
        to,
    }
}

#[async_trait]
impl JobLedger for MemoryLedger {
    async fn create(&self, record: JobRecord) -> Result<(), LedgerError> {
        JobStatus::check_transition(None, record.status)?;
        if record.status.scope() != StatusScope::File {
            return Err(scope_error(None, record.status));
        }
        let key = record.key();
        let mut records = self.records.write().await;
        let partition = records.entry(key.job_id.clone()).or_default();
        let sort_key = key.sort_key();
        if partition.contains_key(&sort_key) {
            return Err(LedgerError::AlreadyExists(format!(
                "{}/{sort_key}",
                key.job_id
            )));
        }
        partition.insert(sort_key, record);
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<JobRecord>, LedgerError> {
        Ok(self
            .records
            .read()
            .await
            .get(&key.job_id)
            .and_then(|partition| partition.get(&key.sort_key()))
            .cloned())
    }

    async fn apply(&self, key: &RecordKey, change: StatusChange) -> Result<JobRecord, LedgerError> {
        if change.status.scope() != StatusScope::File {
            return Err(scope_error(None, change.status));
        }
        let mut records = self.records.write().await;
        let partition = records.entry(key.job_id.clone()).or_default();
        let sort_key = key.sort_key();
        let current = partition.get(&sort_key).map(|record| record.status);
        JobStatus::check_transition(current, change.status)?;

        let record = JobRecord {
            job_id: key.job_id.clone(),
            folder_path: key.folder_path.clone(),
            file_name: key.file_name.clone(),
            file_key: change.file_key,
            status: change.status,
            processing_mode: change.processing_mode,
            source_job_id: change.source_job_id,
            message: change.message,
            last_update: clock::now_iso(),
        };
        partition.insert(sort_key, record.clone());
        Ok(record)
    }

    async fn records_for_job(
        &self,
        job_id: &str,
        folder_path: Option<&str>,
    ) -> Result<Vec<JobRecord>, LedgerError> {
        let records = self.records.read().await;
        let Some(partition) = records.get(job_id) else {
            return Ok(Vec::new());
        };
        let prefix = folder_path.map(|folder| format!("{folder}#"));
        Ok(partition
            .iter()
            .filter(|(sort_key, _)| match &prefix {
                Some(prefix) => sort_key.starts_with(prefix.as_str()),
                None => true,
            })
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn records_for_folder(&self, folder_path: &str) -> Result<Vec<JobRecord>, LedgerError> {
        let records = self.records.read().await;
        let mut matches: Vec<JobRecord> = records
            .values()
            .flat_map(|partition| partition.values())
            .filter(|record| record.folder_path.as_deref() == Some(folder_path))
            .cloned()
            .collect();
        matches.sort_by(|a, b| (&a.job_id, &a.file_name).cmp(&(&b.job_id, &b.file_name)));
        Ok(matches)
    }

    async fn set_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        details: Option<Value>,
    ) -> Result<JobSyncRecord, LedgerError> {
        if status.scope() != StatusScope::Job {
            return Err(scope_error(None, status));
        }
        let mut jobs = self.jobs.write().await;
        let current = jobs.get(job_id).map(|record| record.status);
        JobStatus::check_transition(current, status)?;
        let record = JobSyncRecord {
            job_id: job_id.to_string(),
            status,
            details,
            last_update: clock::now_iso(),
        };
        jobs.insert(job_id.to_string(), record.clone());
        Ok(record)
    }

    async fn job_status(&self, job_id: &str) -> Result<Option<JobSyncRecord>, LedgerError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }
}

#[async_trait]
impl FolderRegistry for MemoryLedger {
    async fn folder(&self, folder_path: &str) -> Result<Option<FolderConfig>, LedgerError> {
        Ok(self.folders.read().await.get(folder_path).cloned())
    }

    async fn record_latest_job(
        &self,
        folder_path: &str,
        job_id: &str,
    ) -> Result<(), LedgerError> {
        let mut folders = self.folders.write().await;
        let entry = folders
            .entry(folder_path.to_string())
            .or_insert_with(|| empty_folder(folder_path));
        entry.latest_job_id = Some(job_id.to_string());
        entry.updated_at = clock::now_iso();
        Ok(())
    }

    async fn register_completion(
        &self,
        folder_path: &str,
        job_id: &str,
    ) -> Result<FolderRegistration, LedgerError> {
        let mut folders = self.folders.write().await;
        let entry = folders
            .entry(folder_path.to_string())
            .or_insert_with(|| empty_folder(folder_path));
        let registration = if entry.default_job_id.is_none() {
            entry.default_job_id = Some(job_id.to_string());
            FolderRegistration::Registered
        } else {
            FolderRegistration::Updated
        };
        entry.latest_job_id = Some(job_id.to_string());
        entry.updated_at = clock::now_iso();
        Ok(registration)
    }

    async fn set_default_job(
        &self,
        folder_path: &str,
        job_id: &str,
    ) -> Result<FolderConfig, LedgerError> {
        let mut folders = self.folders.write().await;
        let entry = folders
            .entry(folder_path.to_string())
            .or_insert_with(|| empty_folder(folder_path));
        entry.default_job_id = Some(job_id.to_string());
        entry.updated_at = clock::now_iso();
        Ok(entry.clone())
    }
}

fn empty_folder(folder_path: &str) -> FolderConfig {
    FolderConfig {
        folder_path: folder_path.to_string(),
        default_job_id: None,
        latest_job_id: None,
        updated_at: clock::now_iso(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ProcessingMode;

    fn queued(job_id: &str, folder: &str, file: &str) -> JobRecord {
        JobRecord {
            job_id: job_id.into(),
            folder_path: Some(folder.into()),
            file_name: file.into(),
            file_key: format!("PDF/{folder}/{file}"),
            status: JobStatus::Queued,
            processing_mode: ProcessingMode::Full,
            source_job_id: None,
            message: "Job queued for processing".into(),
            last_update: clock::now_iso(),
        }
    }

    fn change(status: JobStatus) -> StatusChange {
        StatusChange {
            status,
            message: status.to_string(),
            file_key: "PDF/a/x.pdf".into(),
            processing_mode: ProcessingMode::Full,
            source_job_id: None,
        }
    }

    #[tokio::test]
    async fn apply_overwrites_the_same_key() {
        let ledger = MemoryLedger::new();
        ledger.create(queued("1", "a", "x.pdf")).await.expect("create");
        let key = RecordKey::new("1", Some("a"), "x.pdf");

        ledger.apply(&key, change(JobStatus::Running)).await.expect("running");
        ledger.apply(&key, change(JobStatus::Done)).await.expect("done");
        ledger.apply(&key, change(JobStatus::Running)).await.expect("rerun");
        ledger.apply(&key, change(JobStatus::Done)).await.expect("done again");

        let records = ledger.records_for_job("1", None).await.expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, JobStatus::Done);
    }

    #[tokio::test]
    async fn apply_rejects_illegal_transitions() {
        let ledger = MemoryLedger::new();
        ledger.create(queued("1", "a", "x.pdf")).await.expect("create");
        let key = RecordKey::new("1", Some("a"), "x.pdf");

        let error = ledger
            .apply(&key, change(JobStatus::Done))
            .await
            .expect_err("queued cannot finish without running");
        assert!(matches!(
            error,
            LedgerError::IllegalTransition { from: "queued", to: JobStatus::Done }
        ));
        let stored = ledger.get(&key).await.expect("get").expect("record");
        assert_eq!(stored.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let ledger = MemoryLedger::new();
        ledger.create(queued("1", "a", "x.pdf")).await.expect("create");
        let error = ledger
            .create(queued("1", "a", "x.pdf"))
            .await
            .expect_err("duplicate");
        assert!(matches!(error, LedgerError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn records_are_filtered_by_folder_prefix_and_index() {
        let ledger = MemoryLedger::new();
        ledger.create(queued("1", "a", "x.pdf")).await.expect("create");
        ledger.create(queued("1", "ab", "y.pdf")).await.expect("create");
        ledger.create(queued("2", "a", "z.pdf")).await.expect("create");

        let scoped = ledger.records_for_job("1", Some("a")).await.expect("scoped");
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].file_name, "x.pdf");

        let folder = ledger.records_for_folder("a").await.expect("folder");
        let files: Vec<_> = folder.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(files, vec!["x.pdf", "z.pdf"]);
    }

    #[tokio::test]
    async fn job_status_only_accepts_sync_states() {
        let ledger = MemoryLedger::new();
        ledger
            .set_job_status("1", JobStatus::KbSyncInProgress, None)
            .await
            .expect("in progress");
        ledger
            .set_job_status("1", JobStatus::KbSyncStarted, Some(serde_json::json!({"ingestion_job_id": "ing"})))
            .await
            .expect("started");
        assert!(ledger.set_job_status("1", JobStatus::Done, None).await.is_err());
        let status = ledger.job_status("1").await.expect("status").expect("record");
        assert_eq!(status.status, JobStatus::KbSyncStarted);
    }

    #[tokio::test]
    async fn first_completion_sets_default_then_only_latest() {
        let ledger = MemoryLedger::new();
        ledger.record_latest_job("a", "1").await.expect("latest");
        assert_eq!(
            ledger.register_completion("a", "1").await.expect("register"),
            FolderRegistration::Registered
        );
        assert_eq!(
            ledger.register_completion("a", "2").await.expect("update"),
            FolderRegistration::Updated
        );
        let config = ledger.folder("a").await.expect("get").expect("config");
        assert_eq!(config.default_job_id.as_deref(), Some("1"));
        assert_eq!(config.latest_job_id.as_deref(), Some("2"));
    }
}
