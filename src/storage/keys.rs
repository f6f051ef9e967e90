//! Object key layout.
//!
//! These keys are shared with the knowledge index and existing deployments, so the shapes below
//! are fixed:
//!
//! - `PDF/{folder_path}/{file_name}` (legacy: `PDF/{job_id}/{file_name}`)
//! - `Transcript/{folder_path}/{job_id}/{base_name}.txt`
//! - `Knowledge/{folder_path}/{job_id}/{base_name}_{NNN}.txt` plus `.metadata.json` sidecars
//! - `Prompts/{folder_path}/{job_id}/transcript_prompt.txt` and `knowledge_prompt.txt`
//! - `PDF/{folder_path}/.folder_marker`
//!
//! Legacy flat addressing drops the folder segment everywhere.

use super::StoreError;

/// Marker object that keeps an empty folder visible.
pub const FOLDER_MARKER: &str = ".folder_marker";
/// Suffix appended to a content key to address its metadata sidecar.
pub const METADATA_SUFFIX: &str = ".metadata.json";
/// File name of the transcription prompt.
pub const TRANSCRIPT_PROMPT: &str = "transcript_prompt.txt";
/// File name of the knowledge extraction prompt.
pub const KNOWLEDGE_PROMPT: &str = "knowledge_prompt.txt";

/// File name without a trailing `.pdf` extension (matched case-insensitively).
pub fn base_name(file_name: &str) -> &str {
    let split = file_name.len().saturating_sub(4);
    match file_name.get(split..) {
        Some(extension) if split > 0 && extension.eq_ignore_ascii_case(".pdf") => {
            &file_name[..split]
        }
        _ => file_name,
    }
}

/// Normalize a user-supplied folder path: trim whitespace and surrounding slashes.
pub fn normalize_folder_path(folder_path: &str) -> String {
    folder_path.trim().trim_matches('/').to_string()
}

/// Reject empty keys and keys containing empty, `.` or `..` segments.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Address of a source document.
pub fn source_file(folder_path: Option<&str>, job_id: &str, file_name: &str) -> String {
    match folder_path {
        Some(folder) => format!("PDF/{folder}/{file_name}"),
        None => format!("PDF/{job_id}/{file_name}"),
    }
}

/// Prefix under which a folder's source documents live.
pub fn folder_prefix(folder_path: &str) -> String {
    format!("PDF/{folder_path}/")
}

/// Address of a folder's presence marker.
pub fn folder_marker(folder_path: &str) -> String {
    format!("PDF/{folder_path}/{FOLDER_MARKER}")
}

/// Prefix under which every job's prompts for a folder live.
pub fn prompts_prefix(folder_path: &str) -> String {
    format!("Prompts/{folder_path}/")
}

/// Address of the metadata sidecar for a content object.
pub fn metadata_key(content_key: &str) -> String {
    format!("{content_key}{METADATA_SUFFIX}")
}

/// Key builder for the artifacts of one job, optionally scoped to a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPaths<'a> {
    folder_path: Option<&'a str>,
    job_id: &'a str,
}

impl<'a> JobPaths<'a> {
    /// Build paths for `job_id`, using legacy flat addressing when `folder_path` is `None`.
    pub fn new(folder_path: Option<&'a str>, job_id: &'a str) -> Self {
        Self {
            folder_path,
            job_id,
        }
    }

    fn scope(&self) -> String {
        match self.folder_path {
            Some(folder) => format!("{folder}/{}", self.job_id),
            None => self.job_id.to_string(),
        }
    }

    /// Address of the transcription prompt.
    pub fn transcript_prompt(&self) -> String {
        format!("Prompts/{}/{TRANSCRIPT_PROMPT}", self.scope())
    }

    /// Address of the knowledge extraction prompt.
    pub fn knowledge_prompt(&self) -> String {
        format!("Prompts/{}/{KNOWLEDGE_PROMPT}", self.scope())
    }

    /// Address of the transcript generated for `file_name`.
    pub fn transcript(&self, file_name: &str) -> String {
        format!("Transcript/{}/{}.txt", self.scope(), base_name(file_name))
    }

    /// Address of a knowledge chunk; `None` selects the unnumbered single-chunk form.
    pub fn knowledge_chunk(&self, file_name: &str, sequence: Option<usize>) -> String {
        let base = base_name(file_name);
        match sequence {
            Some(sequence) => format!("Knowledge/{}/{base}_{sequence:03}.txt", self.scope()),
            None => format!("Knowledge/{}/{base}.txt", self.scope()),
        }
    }

    /// Address of a source document copied verbatim into the knowledge location.
    pub fn knowledge_passthrough(&self, file_name: &str) -> String {
        format!("Knowledge/{}/{file_name}", self.scope())
    }
}
