use serde::{Deserialize, Serialize};

use crate::ledger::{ProcessingMode, RecordKey};
use crate::storage::keys;

use super::PipelineError;

/// Serialized unit of work dispatched for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Job the file belongs to.
    pub job_id: String,
    /// Folder scope; absent for legacy flat addressing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    /// Object key of the source file; derived from the folder and file name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    /// Source file name.
    pub file_name: String,
    /// Processing mode.
    pub processing_mode: ProcessingMode,
    /// Job whose transcript is reused (reknowledge only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_job_id: Option<String>,
    /// Whether finishing this item triggers the index sync.
    #[serde(default)]
    pub trigger_kb_sync: bool,
    /// Whether the folder had no default job when the batch was submitted.
    #[serde(default)]
    pub is_new_folder: bool,
}

/// Addressing shared by every pipeline mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    /// Job the file belongs to.
    pub job_id: String,
    /// Folder scope; `None` selects legacy flat addressing.
    pub folder_path: Option<String>,
    /// Object key of the source file.
    pub file_key: String,
    /// Source file name.
    pub file_name: String,
}

impl FileTarget {
    /// Ledger key of the file record.
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(&self.job_id, self.folder_path.as_deref(), &self.file_name)
    }
}

/// Validated pipeline instruction, one variant per processing mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineCommand {
    /// Transcribe then extract knowledge.
    Full(FileTarget),
    /// Re-extract knowledge from the transcript of `source_job_id`.
    Reknowledge {
        /// File being processed; always folder scoped.
        target: FileTarget,
        /// Job whose transcript is reused.
        source_job_id: String,
    },
    /// Copy the source file into the knowledge location.
    DirectPdf(FileTarget),
}

impl PipelineCommand {
    /// File addressed by the command.
    pub fn target(&self) -> &FileTarget {
        match self {
            PipelineCommand::Full(target) | PipelineCommand::DirectPdf(target) => target,
            PipelineCommand::Reknowledge { target, .. } => target,
        }
    }

    /// Processing mode of the command.
    pub fn mode(&self) -> ProcessingMode {
        match self {
            PipelineCommand::Full(_) => ProcessingMode::Full,
            PipelineCommand::Reknowledge { .. } => ProcessingMode::Reknowledge,
            PipelineCommand::DirectPdf(_) => ProcessingMode::DirectPdf,
        }
    }

    /// Source job of a reknowledge command.
    pub fn source_job_id(&self) -> Option<&str> {
        match self {
            PipelineCommand::Reknowledge { source_job_id, .. } => Some(source_job_id),
            _ => None,
        }
    }
}

fn required(value: &str, field: &str) -> Result<String, PipelineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(PipelineError::InvalidCommand(format!("{field} is required")))
    } else {
        Ok(trimmed.to_string())
    }
}

impl TryFrom<&WorkItem> for PipelineCommand {
    type Error = PipelineError;

    fn try_from(item: &WorkItem) -> Result<Self, Self::Error> {
        let job_id = required(&item.job_id, "job_id")?;
        let file_name = required(&item.file_name, "file_name")?;
        let folder_path = item
            .folder_path
            .as_deref()
            .map(keys::normalize_folder_path)
            .filter(|folder| !folder.is_empty());
        let file_key = match item.file_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => keys::source_file(folder_path.as_deref(), &job_id, &file_name),
        };
        let target = FileTarget {
            job_id,
            folder_path,
            file_key,
            file_name,
        };

        match item.processing_mode {
            ProcessingMode::Full => Ok(PipelineCommand::Full(target)),
            ProcessingMode::DirectPdf => Ok(PipelineCommand::DirectPdf(target)),
            ProcessingMode::Reknowledge => {
                let source_job_id = required(
                    item.source_job_id.as_deref().unwrap_or_default(),
                    "source_job_id",
                )?;
                if target.folder_path.is_none() {
                    return Err(PipelineError::InvalidCommand(
                        "folder_path is required for reknowledge".into(),
                    ));
                }
                Ok(PipelineCommand::Reknowledge {
                    target,
                    source_job_id,
                })
            }
        }
    }
}
