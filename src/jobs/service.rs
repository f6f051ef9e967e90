use std::collections::BTreeSet;
use std::sync::Arc;

use time::OffsetDateTime;

use super::{
    CreateJobRequest, DefaultJob, FileStatus, JobAccepted, JobError, JobStatusView,
    ReknowledgeRequest,
};
use crate::batch::{BatchDispatcher, BatchSubmission, SubmittedFile};
use crate::clock;
use crate::ledger::{FolderRegistry, JobLedger, JobRecord, JobStatus, LedgerError, ProcessingMode};
use crate::storage::keys::{self, JobPaths};
use crate::storage::{ObjectStore, TEXT_CONTENT_TYPE, UrlSigner};

const QUEUED_MESSAGE: &str = "Job queued for processing";
const LEAF_ONLY_MESSAGE: &str = "Selected folder has child folders. Please select a leaf folder only.";

/// Creates jobs and reports their progress.
pub struct JobService {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn JobLedger>,
    folders: Arc<dyn FolderRegistry>,
    dispatcher: Arc<BatchDispatcher>,
    signer: Arc<UrlSigner>,
}

impl JobService {
    /// Assemble the service from its dependencies.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn JobLedger>,
        folders: Arc<dyn FolderRegistry>,
        dispatcher: Arc<BatchDispatcher>,
        signer: Arc<UrlSigner>,
    ) -> Self {
        Self {
            store,
            ledger,
            folders,
            dispatcher,
            signer,
        }
    }

    /// Create a job for every PDF in a leaf folder and dispatch it.
    pub async fn create_job(&self, request: &CreateJobRequest) -> Result<JobAccepted, JobError> {
        self.create_job_at(request, clock::now()).await
    }

    /// [`JobService::create_job`] with an explicit creation instant.
    pub async fn create_job_at(
        &self,
        request: &CreateJobRequest,
        now: OffsetDateTime,
    ) -> Result<JobAccepted, JobError> {
        let mode = match request.processing_mode.as_deref().map(str::trim) {
            None | Some("") => ProcessingMode::Full,
            Some(raw) => match raw.parse() {
                Ok(mode @ (ProcessingMode::Full | ProcessingMode::DirectPdf)) => mode,
                _ => {
                    return Err(JobError::InvalidRequest(
                        "Invalid processing_mode. Must be one of: full, direct_pdf".into(),
                    ));
                }
            },
        };
        let folder_path = keys::normalize_folder_path(&request.folder_path);
        if folder_path.is_empty() {
            return Err(JobError::InvalidRequest("folder_path is required".into()));
        }
        let prompts = match (
            non_blank(request.transcript_prompt.as_deref()),
            non_blank(request.knowledge_prompt.as_deref()),
        ) {
            (Some(transcript), Some(knowledge)) => Some((transcript, knowledge)),
            _ if mode.requires_prompts() => {
                return Err(JobError::InvalidRequest(
                    "transcript_prompt and knowledge_prompt are required for non-direct_pdf modes"
                        .into(),
                ));
            }
            _ => None,
        };

        if !self
            .store
            .list_children(&keys::folder_prefix(&folder_path))
            .await?
            .is_empty()
        {
            return Err(JobError::Conflict(LEAF_ONLY_MESSAGE.into()));
        }
        let files = self.pdf_files(&folder_path, &request.files).await?;
        if files.is_empty() {
            return Err(JobError::InvalidRequest(format!(
                "No PDF files found in folder: {folder_path}"
            )));
        }

        let job_id = clock::job_id_at(now);
        let last_update = clock::iso_timestamp(now);
        for file in &files {
            self.register(JobRecord {
                job_id: job_id.clone(),
                folder_path: Some(folder_path.clone()),
                file_name: file.file_name.clone(),
                file_key: file.file_key.clone(),
                status: JobStatus::Queued,
                processing_mode: mode,
                source_job_id: None,
                message: QUEUED_MESSAGE.to_string(),
                last_update: last_update.clone(),
            })
            .await?;
        }
        if let Err(error) = self.folders.record_latest_job(&folder_path, &job_id).await {
            tracing::warn!(
                job_id = %job_id,
                folder_path = %folder_path,
                error = %error,
                "Failed to record latest job"
            );
        }

        let paths = JobPaths::new(Some(&folder_path), &job_id);
        if let Some((transcript, knowledge)) = prompts {
            self.put_text(&paths.transcript_prompt(), transcript).await?;
            self.put_text(&paths.knowledge_prompt(), knowledge).await?;
        }

        let submission = BatchSubmission {
            job_id: job_id.clone(),
            folder_path: Some(folder_path.clone()),
            mode,
            source_job_id: None,
            is_new_folder: self.is_new_folder(&folder_path).await,
            files,
        };
        let receipt = self
            .dispatcher
            .submit(&format!("job-{job_id}"), &submission)
            .await?;
        tracing::info!(
            job_id = %job_id,
            folder_path = %folder_path,
            mode = %mode,
            files = receipt.item_count,
            execution = %receipt.execution,
            "Job created"
        );
        Ok(JobAccepted {
            job_id,
            folder_path,
            file_count: receipt.item_count,
            execution: receipt.execution,
            source_job_id: None,
        })
    }

    /// Rerun knowledge extraction over the transcripts of an earlier job under a new job id.
    pub async fn reknowledge(&self, request: &ReknowledgeRequest) -> Result<JobAccepted, JobError> {
        self.reknowledge_at(request, clock::now()).await
    }

    /// [`JobService::reknowledge`] with an explicit creation instant.
    pub async fn reknowledge_at(
        &self,
        request: &ReknowledgeRequest,
        now: OffsetDateTime,
    ) -> Result<JobAccepted, JobError> {
        let source_job_id = request.source_job_id.trim();
        let folder_path = keys::normalize_folder_path(&request.folder_path);
        let Some(knowledge_prompt) = non_blank(Some(&request.knowledge_prompt)) else {
            return Err(missing_reknowledge_fields());
        };
        if source_job_id.is_empty() || folder_path.is_empty() {
            return Err(missing_reknowledge_fields());
        }

        let sources = self
            .ledger
            .records_for_job(source_job_id, Some(&folder_path))
            .await?;
        if sources.is_empty() {
            return Err(JobError::NotFound(format!(
                "No job found for source_job_id={source_job_id}, folder_path={folder_path}"
            )));
        }

        let job_id = clock::job_id_at(now);
        let source_paths = JobPaths::new(Some(&folder_path), source_job_id);
        let paths = JobPaths::new(Some(&folder_path), &job_id);
        self.store
            .copy(&source_paths.transcript_prompt(), &paths.transcript_prompt())
            .await?;
        self.put_text(&paths.knowledge_prompt(), knowledge_prompt)
            .await?;

        let last_update = clock::iso_timestamp(now);
        let message = format!("Waiting for reknowledge processing from source {source_job_id}");
        let mut files = Vec::with_capacity(sources.len());
        for source in sources {
            self.register(JobRecord {
                job_id: job_id.clone(),
                folder_path: Some(folder_path.clone()),
                file_name: source.file_name.clone(),
                file_key: source.file_key.clone(),
                status: JobStatus::Reknowledge,
                processing_mode: ProcessingMode::Reknowledge,
                source_job_id: Some(source_job_id.to_string()),
                message: message.clone(),
                last_update: last_update.clone(),
            })
            .await?;
            files.push(SubmittedFile {
                file_key: source.file_key,
                file_name: source.file_name,
            });
        }

        let submission = BatchSubmission {
            job_id: job_id.clone(),
            folder_path: Some(folder_path.clone()),
            mode: ProcessingMode::Reknowledge,
            source_job_id: Some(source_job_id.to_string()),
            is_new_folder: self.is_new_folder(&folder_path).await,
            files,
        };
        let receipt = self
            .dispatcher
            .submit(&format!("{job_id}-reknowledge"), &submission)
            .await?;
        tracing::info!(
            job_id = %job_id,
            source_job_id,
            folder_path = %folder_path,
            files = receipt.item_count,
            "Reknowledge job created"
        );
        Ok(JobAccepted {
            job_id,
            folder_path,
            file_count: receipt.item_count,
            execution: receipt.execution,
            source_job_id: Some(source_job_id.to_string()),
        })
    }

    /// Default job of a folder.
    pub async fn default_job(&self, folder_path: &str) -> Result<DefaultJob, JobError> {
        let folder_path = required_folder(folder_path)?;
        let job_id = self
            .folders
            .folder(&folder_path)
            .await?
            .and_then(|config| config.default_job_id);
        Ok(DefaultJob {
            folder_path,
            job_id,
        })
    }

    /// Make `job_id` the default job of a folder.
    pub async fn set_default_job(
        &self,
        folder_path: &str,
        job_id: &str,
    ) -> Result<DefaultJob, JobError> {
        let folder_path = keys::normalize_folder_path(folder_path);
        let job_id = job_id.trim();
        if folder_path.is_empty() || job_id.is_empty() {
            return Err(JobError::InvalidRequest(
                "folder_path and job_id are required".into(),
            ));
        }
        let config = self.folders.set_default_job(&folder_path, job_id).await?;
        tracing::info!(folder_path = %folder_path, job_id, "Default job set");
        Ok(DefaultJob {
            folder_path: config.folder_path,
            job_id: config.default_job_id,
        })
    }

    /// File records of a job with fresh download links, plus the job-level sync status.
    pub async fn job_status(
        &self,
        job_id: &str,
        folder_path: Option<&str>,
    ) -> Result<JobStatusView, JobError> {
        let folder_path = folder_path
            .map(keys::normalize_folder_path)
            .filter(|folder| !folder.is_empty());
        let records = self
            .ledger
            .records_for_job(job_id, folder_path.as_deref())
            .await?;
        let sync = self.ledger.job_status(job_id).await?;
        if records.is_empty() && sync.is_none() {
            return Err(JobError::NotFound(format!("Job not found: {job_id}")));
        }
        let files = records
            .into_iter()
            .map(|record| FileStatus {
                file_url: self.signer.sign(&record.file_key),
                file_name: record.file_name,
                status: record.status,
                processing_mode: record.processing_mode,
                message: record.message,
                last_update: record.last_update,
            })
            .collect();
        Ok(JobStatusView {
            job_id: job_id.to_string(),
            folder_path,
            files,
            sync,
        })
    }

    /// Job ids that targeted a folder, newest first.
    pub async fn job_ids(&self, folder_path: &str) -> Result<Vec<String>, JobError> {
        let folder_path = required_folder(folder_path)?;
        let mut job_ids: BTreeSet<String> = self
            .store
            .list_children(&keys::prompts_prefix(&folder_path))
            .await?
            .into_iter()
            .collect();
        job_ids.extend(
            self.ledger
                .records_for_folder(&folder_path)
                .await?
                .into_iter()
                .map(|record| record.job_id),
        );
        Ok(job_ids.into_iter().rev().collect())
    }

    /// Names of the PDF documents directly inside a folder.
    pub async fn list_pdfs(&self, folder_path: &str) -> Result<Vec<String>, JobError> {
        let folder_path = required_folder(folder_path)?;
        Ok(self
            .pdf_files(&folder_path, &[])
            .await?
            .into_iter()
            .map(|file| file.file_name)
            .collect())
    }

    async fn pdf_files(
        &self,
        folder_path: &str,
        only: &[String],
    ) -> Result<Vec<SubmittedFile>, JobError> {
        let prefix = keys::folder_prefix(folder_path);
        Ok(self
            .store
            .list(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| {
                let file_name = key.strip_prefix(&prefix)?.to_string();
                let is_pdf = !file_name.contains('/')
                    && file_name != keys::FOLDER_MARKER
                    && keys::base_name(&file_name).len() < file_name.len();
                let selected = only.is_empty() || only.iter().any(|name| name == &file_name);
                (is_pdf && selected).then_some(SubmittedFile {
                    file_key: key,
                    file_name,
                })
            })
            .collect())
    }

    async fn register(&self, record: JobRecord) -> Result<(), JobError> {
        match self.ledger.create(record).await {
            Err(LedgerError::AlreadyExists(key)) => {
                Err(JobError::Conflict(format!("Job record already exists: {key}")))
            }
            other => Ok(other?),
        }
    }

    async fn is_new_folder(&self, folder_path: &str) -> bool {
        match self.folders.folder(folder_path).await {
            Ok(config) => config.and_then(|config| config.default_job_id).is_none(),
            Err(error) => {
                tracing::warn!(folder_path, error = %error, "Failed to read folder configuration");
                false
            }
        }
    }

    async fn put_text(&self, key: &str, text: &str) -> Result<(), JobError> {
        self.store
            .put(key, text.as_bytes().to_vec(), TEXT_CONTENT_TYPE)
            .await?;
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.trim().is_empty())
}

fn required_folder(folder_path: &str) -> Result<String, JobError> {
    let folder_path = keys::normalize_folder_path(folder_path);
    if folder_path.is_empty() {
        return Err(JobError::InvalidRequest("folder_path is required".into()));
    }
    Ok(folder_path)
}

fn missing_reknowledge_fields() -> JobError {
    JobError::InvalidRequest(
        "job_id (source), folder_path, and knowledge_prompt are required".into(),
    )
}
