//! Per-file pipeline driver.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::extract::{Extraction, UNSTRUCTURED_PROVENANCE, extract_chunks};
use super::metadata::ChunkMetadata;
use super::{FileTarget, PipelineCommand};
use crate::generation::{GenerationClient, GenerationError, GenerationRequest};
use crate::ledger::{JobLedger, JobStatus, LedgerError, ProcessingMode, StatusChange};
use crate::metrics::PipelineMetrics;
use crate::storage::keys::{self, JobPaths};
use crate::storage::{
    JSON_CONTENT_TYPE, ObjectStore, PDF_CONTENT_TYPE, StoreError, TEXT_CONTENT_TYPE, get_text,
};

const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Errors that fail a file's pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Work item failed validation.
    #[error("Invalid work item: {0}")]
    InvalidCommand(String),
    /// A prompt required by the mode is missing.
    #[error("Prompt not found: {0}")]
    MissingPrompt(String),
    /// Object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Generation call failure.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// Ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Metadata serialization failure.
    #[error("Failed to serialize metadata: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Static settings of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Output token budget per generation call.
    pub max_tokens: u32,
    /// Bucket name used in `source_uri` metadata (`s3://{bucket}/{key}`).
    pub bucket: String,
}

/// Summary returned for a completed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineOutcome {
    /// Job the file belongs to.
    pub job_id: String,
    /// Folder scope, when any.
    pub folder_path: Option<String>,
    /// Processed file name.
    pub file_name: String,
    /// Mode the file was processed with.
    pub mode: ProcessingMode,
    /// Keys of the knowledge objects written.
    pub knowledge_keys: Vec<String>,
    /// Completion message recorded in the ledger.
    pub message: String,
}

/// Drives one file through transcription, extraction, and persistence.
pub struct KnowledgePipeline {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn JobLedger>,
    generation: Arc<dyn GenerationClient>,
    metrics: Arc<PipelineMetrics>,
    settings: PipelineSettings,
}

impl KnowledgePipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn JobLedger>,
        generation: Arc<dyn GenerationClient>,
        metrics: Arc<PipelineMetrics>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            generation,
            metrics,
            settings,
        }
    }

    /// Process one file, recording `running` and then `done` or `failed` in the ledger.
    ///
    /// Failures, including a `done` write the ledger refuses, are recorded as `failed` on a
    /// best-effort basis and returned to the caller, whose transport decides on retries.
    /// Re-running the same `(job_id, folder_path, file_name)` overwrites the record and the
    /// knowledge objects.
    pub async fn process(&self, command: &PipelineCommand) -> Result<PipelineOutcome, PipelineError> {
        let target = command.target();
        tracing::info!(
            job_id = %target.job_id,
            folder_path = ?target.folder_path,
            file_name = %target.file_name,
            mode = %command.mode(),
            "Processing file"
        );
        self.record(command, JobStatus::Running, running_message(command))
            .await?;

        let message = completed_message(command.mode()).to_string();
        let completed = match self.run(command).await {
            Ok(knowledge_keys) => self
                .record(command, JobStatus::Done, message.clone())
                .await
                .map(|()| knowledge_keys),
            Err(error) => Err(error),
        };

        match completed {
            Ok(knowledge_keys) => {
                self.metrics.record_file(knowledge_keys.len() as u64);
                tracing::info!(
                    job_id = %target.job_id,
                    file_name = %target.file_name,
                    objects = knowledge_keys.len(),
                    "File processed"
                );
                Ok(PipelineOutcome {
                    job_id: target.job_id.clone(),
                    folder_path: target.folder_path.clone(),
                    file_name: target.file_name.clone(),
                    mode: command.mode(),
                    knowledge_keys,
                    message,
                })
            }
            Err(error) => {
                self.metrics.record_file_failure();
                tracing::error!(
                    job_id = %target.job_id,
                    file_name = %target.file_name,
                    error = %error,
                    "File processing failed"
                );
                let message = truncate(&format!("Error: {error}"), MAX_ERROR_MESSAGE_CHARS);
                if let Err(ledger_error) = self.record(command, JobStatus::Failed, message).await {
                    tracing::error!(
                        job_id = %target.job_id,
                        file_name = %target.file_name,
                        error = %ledger_error,
                        "Failed to record failure status"
                    );
                }
                Err(error)
            }
        }
    }

    async fn run(&self, command: &PipelineCommand) -> Result<Vec<String>, PipelineError> {
        match command {
            PipelineCommand::Full(target) => self.run_full(target).await,
            PipelineCommand::Reknowledge {
                target,
                source_job_id,
            } => self.run_reknowledge(target, source_job_id).await,
            PipelineCommand::DirectPdf(target) => self.run_direct(target).await,
        }
    }

    async fn run_full(&self, target: &FileTarget) -> Result<Vec<String>, PipelineError> {
        let paths = JobPaths::new(target.folder_path.as_deref(), &target.job_id);
        let transcript_prompt = self.prompt(&paths.transcript_prompt()).await?;
        let knowledge_prompt = self.prompt(&paths.knowledge_prompt()).await?;

        let source = self.store.get(&target.file_key).await?;
        tracing::debug!(
            file_key = %target.file_key,
            bytes = source.body.len(),
            "Transcribing source document"
        );
        let transcript = self
            .generation
            .generate(GenerationRequest::document(
                PDF_CONTENT_TYPE,
                source.body,
                &transcript_prompt,
                self.settings.max_tokens,
            ))
            .await?;

        let transcript_key = paths.transcript(&target.file_name);
        self.store
            .put(
                &transcript_key,
                transcript.clone().into_bytes(),
                TEXT_CONTENT_TYPE,
            )
            .await?;
        tracing::debug!(key = %transcript_key, "Transcript saved");

        self.write_knowledge(target, &paths, &knowledge_prompt, &transcript)
            .await
    }

    async fn run_reknowledge(
        &self,
        target: &FileTarget,
        source_job_id: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let paths = JobPaths::new(target.folder_path.as_deref(), &target.job_id);
        let knowledge_prompt = self.prompt(&paths.knowledge_prompt()).await?;

        let source_paths = JobPaths::new(target.folder_path.as_deref(), source_job_id);
        let source_transcript = source_paths.transcript(&target.file_name);
        let transcript_key = paths.transcript(&target.file_name);
        self.store.copy(&source_transcript, &transcript_key).await?;
        tracing::debug!(
            from = %source_transcript,
            to = %transcript_key,
            "Transcript copied from source job"
        );

        let transcript = get_text(self.store.as_ref(), &transcript_key).await?;
        self.write_knowledge(target, &paths, &knowledge_prompt, &transcript)
            .await
    }

    async fn run_direct(&self, target: &FileTarget) -> Result<Vec<String>, PipelineError> {
        let paths = JobPaths::new(target.folder_path.as_deref(), &target.job_id);
        let knowledge_key = paths.knowledge_passthrough(&target.file_name);
        self.store.copy(&target.file_key, &knowledge_key).await?;
        self.write_sidecar(target, &knowledge_key, None).await?;
        Ok(vec![knowledge_key])
    }

    async fn write_knowledge(
        &self,
        target: &FileTarget,
        paths: &JobPaths<'_>,
        knowledge_prompt: &str,
        transcript: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let raw = self
            .generation
            .generate(GenerationRequest::text(
                format!("{knowledge_prompt}\n\n---\n\n{transcript}"),
                self.settings.max_tokens,
            ))
            .await?;

        let chunks: Vec<(String, String, String)> = match extract_chunks(&raw) {
            Extraction::Structured(chunks) => chunks
                .into_iter()
                .enumerate()
                .map(|(index, chunk)| {
                    (
                        paths.knowledge_chunk(&target.file_name, Some(index + 1)),
                        chunk.content,
                        chunk.statedindocument,
                    )
                })
                .collect(),
            Extraction::Unstructured { text, reason } => {
                tracing::warn!(
                    job_id = %target.job_id,
                    file_name = %target.file_name,
                    reason = %reason,
                    "Knowledge output is not a chunk array; storing it as one chunk"
                );
                vec![(
                    paths.knowledge_chunk(&target.file_name, None),
                    text,
                    UNSTRUCTURED_PROVENANCE.to_string(),
                )]
            }
        };

        let written: Vec<String> = chunks.iter().map(|(key, _, _)| key.clone()).collect();
        self.remove_stale_chunks(target, paths, &written).await?;

        for (key, content, stated) in chunks {
            self.store
                .put(&key, content.into_bytes(), TEXT_CONTENT_TYPE)
                .await?;
            self.write_sidecar(target, &key, Some(&stated)).await?;
        }
        Ok(written)
    }

    /// Delete chunks left behind by an earlier run of the same file that produced more (or
    /// differently numbered) chunks.
    async fn remove_stale_chunks(
        &self,
        target: &FileTarget,
        paths: &JobPaths<'_>,
        keep: &[String],
    ) -> Result<(), PipelineError> {
        let unnumbered = paths.knowledge_chunk(&target.file_name, None);
        let stem = unnumbered.trim_end_matches(".txt");
        let existing = self.store.list(stem).await?;
        for key in existing {
            let content_key = key.strip_suffix(keys::METADATA_SUFFIX).unwrap_or(&key);
            if !is_chunk_key(content_key, stem) || keep.iter().any(|kept| kept == content_key) {
                continue;
            }
            self.store.delete(&key).await?;
            tracing::debug!(key = %key, "Removed stale knowledge object");
        }
        Ok(())
    }

    async fn write_sidecar(
        &self,
        target: &FileTarget,
        content_key: &str,
        stated_in_document: Option<&str>,
    ) -> Result<(), PipelineError> {
        let source_uri = format!("s3://{}/{}", self.settings.bucket, target.file_key);
        let metadata = ChunkMetadata {
            file_name: &target.file_name,
            source_key: &target.file_key,
            folder_path: target.folder_path.as_deref().unwrap_or_default(),
            job_id: &target.job_id,
            source_uri: &source_uri,
            stated_in_document,
        };
        let body = serde_json::to_vec_pretty(&metadata.to_sidecar())?;
        self.store
            .put(&keys::metadata_key(content_key), body, JSON_CONTENT_TYPE)
            .await?;
        Ok(())
    }

    async fn prompt(&self, key: &str) -> Result<String, PipelineError> {
        match get_text(self.store.as_ref(), key).await {
            Ok(prompt) => Ok(prompt),
            Err(StoreError::NotFound(_)) => Err(PipelineError::MissingPrompt(key.to_string())),
            Err(error) => Err(error.into()),
        }
    }

    async fn record(
        &self,
        command: &PipelineCommand,
        status: JobStatus,
        message: String,
    ) -> Result<(), PipelineError> {
        let target = command.target();
        self.ledger
            .apply(
                &target.record_key(),
                StatusChange {
                    status,
                    message,
                    file_key: target.file_key.clone(),
                    processing_mode: command.mode(),
                    source_job_id: command.source_job_id().map(str::to_string),
                },
            )
            .await?;
        Ok(())
    }
}

/// Whether `key` is `{stem}.txt` or `{stem}_NNN.txt`.
fn is_chunk_key(key: &str, stem: &str) -> bool {
    let Some(rest) = key.strip_prefix(stem) else {
        return false;
    };
    if rest == ".txt" {
        return true;
    }
    rest.strip_prefix('_')
        .and_then(|rest| rest.strip_suffix(".txt"))
        .is_some_and(|digits| digits.len() >= 3 && digits.bytes().all(|b| b.is_ascii_digit()))
}

fn running_message(command: &PipelineCommand) -> String {
    match command {
        PipelineCommand::Full(_) => "Processing started".to_string(),
        PipelineCommand::Reknowledge { source_job_id, .. } => {
            format!("Reknowledge processing started from source job {source_job_id}")
        }
        PipelineCommand::DirectPdf(_) => "Processing started (direct_pdf)".to_string(),
    }
}

fn completed_message(mode: ProcessingMode) -> &'static str {
    match mode {
        ProcessingMode::Full => "Processing completed",
        ProcessingMode::Reknowledge => "Reknowledge processing completed",
        ProcessingMode::DirectPdf => "Direct PDF processing completed",
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{JobRecord, MemoryLedger, RecordKey};
    use crate::storage::MemoryObjectStore;
    use crate::test_support::{FailingLedger, ScriptedGeneration};

    struct Fixture {
        store: Arc<MemoryObjectStore>,
        ledger: Arc<MemoryLedger>,
        generation: Arc<ScriptedGeneration>,
        metrics: Arc<PipelineMetrics>,
        pipeline: KnowledgePipeline,
    }

    fn fixture(responses: Vec<&str>) -> Fixture {
        let store = Arc::new(MemoryObjectStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let generation = Arc::new(ScriptedGeneration::new(responses));
        let metrics = Arc::new(PipelineMetrics::new());
        let pipeline = KnowledgePipeline::new(
            store.clone(),
            ledger.clone(),
            generation.clone(),
            metrics.clone(),
            PipelineSettings {
                max_tokens: 2000,
                bucket: "docs".into(),
            },
        );
        Fixture {
            store,
            ledger,
            generation,
            metrics,
            pipeline,
        }
    }

    fn target(job_id: &str) -> FileTarget {
        FileTarget {
            job_id: job_id.into(),
            folder_path: Some("設計/A".into()),
            file_key: "PDF/設計/A/manual.pdf".into(),
            file_name: "manual.pdf".into(),
        }
    }

    async fn seed(store: &MemoryObjectStore, job_id: &str) {
        let paths = JobPaths::new(Some("設計/A"), job_id);
        store
            .put("PDF/設計/A/manual.pdf", b"%PDF-1.7".to_vec(), PDF_CONTENT_TYPE)
            .await
            .expect("pdf");
        store
            .put(&paths.transcript_prompt(), b"Transcribe".to_vec(), TEXT_CONTENT_TYPE)
            .await
            .expect("transcript prompt");
        store
            .put(&paths.knowledge_prompt(), b"Extract".to_vec(), TEXT_CONTENT_TYPE)
            .await
            .expect("knowledge prompt");
    }

    async fn queue(ledger: &MemoryLedger, target: &FileTarget) {
        ledger
            .create(JobRecord {
                job_id: target.job_id.clone(),
                folder_path: target.folder_path.clone(),
                file_name: target.file_name.clone(),
                file_key: target.file_key.clone(),
                status: JobStatus::Queued,
                processing_mode: ProcessingMode::Full,
                source_job_id: None,
                message: "Job queued for processing".into(),
                last_update: crate::clock::now_iso(),
            })
            .await
            .expect("queued");
    }

    const TWO_CHUNKS: &str = r#"Sure:
[{"statedindocument":"p.1","content":"alpha"},{"statedindocument":"p.2","content":"beta"}]"#;

    #[tokio::test]
    async fn full_mode_writes_transcript_chunks_and_sidecars() {
        let fx = fixture(vec!["transcript text", TWO_CHUNKS]);
        seed(&fx.store, "1").await;
        let target = target("1");
        queue(&fx.ledger, &target).await;

        let outcome = fx
            .pipeline
            .process(&PipelineCommand::Full(target.clone()))
            .await
            .expect("processed");

        assert_eq!(
            outcome.knowledge_keys,
            vec![
                "Knowledge/設計/A/1/manual_001.txt".to_string(),
                "Knowledge/設計/A/1/manual_002.txt".to_string(),
            ]
        );
        let transcript = get_text(&*fx.store, "Transcript/設計/A/1/manual.txt")
            .await
            .expect("transcript");
        assert_eq!(transcript, "transcript text");
        assert_eq!(
            get_text(&*fx.store, "Knowledge/設計/A/1/manual_002.txt")
                .await
                .expect("chunk"),
            "beta"
        );
        let sidecar: serde_json::Value = serde_json::from_str(
            &get_text(&*fx.store, "Knowledge/設計/A/1/manual_001.txt.metadata.json")
                .await
                .expect("sidecar"),
        )
        .expect("json");
        let attributes = &sidecar["metadataAttributes"];
        assert_eq!(attributes["statedindocument"]["value"]["stringValue"], "p.1");
        assert_eq!(attributes["folder_path"]["value"]["stringValue"], "設計/A");
        assert_eq!(attributes["job_id"]["value"]["stringValue"], "1");
        assert_eq!(
            attributes["source_uri"]["value"]["stringValue"],
            "s3://docs/PDF/設計/A/manual.pdf"
        );

        let requests = fx.generation.requests().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].content,
            vec![crate::generation::ContentBlock::Text(
                "Extract\n\n---\n\ntranscript text".into()
            )]
        );

        let record = fx
            .ledger
            .get(&target.record_key())
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.status, JobStatus::Done);
        assert_eq!(record.message, "Processing completed");
        assert_eq!(fx.metrics.snapshot().chunks_written, 2);
    }

    #[tokio::test]
    async fn unparseable_knowledge_becomes_a_single_unnumbered_chunk() {
        let fx = fixture(vec!["transcript", "free-form knowledge without JSON"]);
        seed(&fx.store, "1").await;

        let outcome = fx
            .pipeline
            .process(&PipelineCommand::Full(target("1")))
            .await
            .expect("processed");

        assert_eq!(outcome.knowledge_keys, vec!["Knowledge/設計/A/1/manual.txt".to_string()]);
        let sidecar = get_text(&*fx.store, "Knowledge/設計/A/1/manual.txt.metadata.json")
            .await
            .expect("sidecar");
        assert!(sidecar.contains("\"stringValue\": \"-\""));
    }

    #[tokio::test]
    async fn missing_prompt_marks_the_file_failed() {
        let fx = fixture(vec![]);
        fx.store
            .put("PDF/設計/A/manual.pdf", b"%PDF".to_vec(), PDF_CONTENT_TYPE)
            .await
            .expect("pdf");
        let target = target("1");
        queue(&fx.ledger, &target).await;

        let error = fx
            .pipeline
            .process(&PipelineCommand::Full(target.clone()))
            .await
            .expect_err("missing prompt");
        assert!(matches!(error, PipelineError::MissingPrompt(ref key) if key.ends_with("transcript_prompt.txt")));

        let record = fx
            .ledger
            .get(&target.record_key())
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.message.starts_with("Error: Prompt not found"));
        assert!(fx.generation.requests().await.is_empty());
        assert_eq!(fx.metrics.snapshot().files_failed, 1);
    }

    #[tokio::test]
    async fn generation_failure_is_recorded_and_returned() {
        let fx = fixture(vec![]);
        fx.generation.fail_next("provider overloaded").await;
        seed(&fx.store, "1").await;

        let error = fx
            .pipeline
            .process(&PipelineCommand::Full(target("1")))
            .await
            .expect_err("generation failure");
        assert!(matches!(error, PipelineError::Generation(_)));
        let record = fx
            .ledger
            .get(&RecordKey::new("1", Some("設計/A"), "manual.pdf"))
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.message.contains("provider overloaded"));
    }

    #[tokio::test]
    async fn refused_done_write_falls_back_to_failed() {
        let store = Arc::new(MemoryObjectStore::new());
        let ledger = Arc::new(FailingLedger::failing(&[JobStatus::Done]));
        let metrics = Arc::new(PipelineMetrics::new());
        let pipeline = KnowledgePipeline::new(
            store.clone(),
            ledger.clone(),
            Arc::new(ScriptedGeneration::new(vec![])),
            metrics.clone(),
            PipelineSettings {
                max_tokens: 2000,
                bucket: "docs".into(),
            },
        );
        seed(&store, "1").await;

        let error = pipeline
            .process(&PipelineCommand::DirectPdf(target("1")))
            .await
            .expect_err("done write refused");

        assert!(matches!(error, PipelineError::Ledger(LedgerError::Backend(_))));
        let record = ledger
            .inner()
            .get(&RecordKey::new("1", Some("設計/A"), "manual.pdf"))
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.message.contains("throttled"));
        assert_eq!(metrics.snapshot().files_failed, 1);
    }

    #[tokio::test]
    async fn rerun_overwrites_chunks_instead_of_appending() {
        let fx = fixture(vec!["transcript", TWO_CHUNKS, "transcript", "plain text"]);
        seed(&fx.store, "1").await;
        let command = PipelineCommand::Full(target("1"));

        fx.pipeline.process(&command).await.expect("first run");
        fx.pipeline.process(&command).await.expect("second run");

        let keys = fx.store.list("Knowledge/設計/A/1/").await.expect("list");
        assert_eq!(
            keys,
            vec![
                "Knowledge/設計/A/1/manual.txt".to_string(),
                "Knowledge/設計/A/1/manual.txt.metadata.json".to_string(),
            ]
        );
        let records = fx.ledger.records_for_job("1", None).await.expect("records");
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn reknowledge_reuses_the_source_transcript() {
        let fx = fixture(vec![TWO_CHUNKS]);
        fx.store
            .put("Transcript/設計/A/1/manual.txt", b"old transcript".to_vec(), TEXT_CONTENT_TYPE)
            .await
            .expect("source transcript");
        fx.store
            .put("Prompts/設計/A/2/knowledge_prompt.txt", b"Extract v2".to_vec(), TEXT_CONTENT_TYPE)
            .await
            .expect("prompt");

        let outcome = fx
            .pipeline
            .process(&PipelineCommand::Reknowledge {
                target: target("2"),
                source_job_id: "1".into(),
            })
            .await
            .expect("reknowledge");

        assert_eq!(outcome.message, "Reknowledge processing completed");
        let copied = fx.store.get("Transcript/設計/A/2/manual.txt").await.expect("copy");
        assert_eq!(copied.body, b"old transcript");
        let requests = fx.generation.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(matches!(
            &requests[0].content[0],
            crate::generation::ContentBlock::Text(text) if text.starts_with("Extract v2")
        ));
        let record = fx
            .ledger
            .get(&RecordKey::new("2", Some("設計/A"), "manual.pdf"))
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.source_job_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn direct_pdf_copies_the_source_verbatim() {
        let fx = fixture(vec![]);
        fx.store
            .put("PDF/設計/A/manual.pdf", b"%PDF-bytes".to_vec(), PDF_CONTENT_TYPE)
            .await
            .expect("pdf");

        let outcome = fx
            .pipeline
            .process(&PipelineCommand::DirectPdf(target("3")))
            .await
            .expect("direct");

        assert_eq!(outcome.knowledge_keys, vec!["Knowledge/設計/A/3/manual.pdf".to_string()]);
        let copy = fx.store.get("Knowledge/設計/A/3/manual.pdf").await.expect("copy");
        assert_eq!(copy.body, b"%PDF-bytes");
        let sidecar = get_text(&*fx.store, "Knowledge/設計/A/3/manual.pdf.metadata.json")
            .await
            .expect("sidecar");
        assert!(!sidecar.contains("statedindocument"));
        assert!(fx.generation.requests().await.is_empty());
    }

    #[test]
    fn chunk_keys_are_matched_exactly() {
        let stem = "Knowledge/a/1/doc";
        assert!(is_chunk_key("Knowledge/a/1/doc.txt", stem));
        assert!(is_chunk_key("Knowledge/a/1/doc_012.txt", stem));
        assert!(!is_chunk_key("Knowledge/a/1/doc2.txt", stem));
        assert!(!is_chunk_key("Knowledge/a/1/doc_notes.txt", stem));
    }

    #[test]
    fn truncation_respects_character_boundaries() {
        assert_eq!(truncate("エラー発生", 3), "エラー");
        assert_eq!(truncate("short", 10), "short");
    }
}
