//! Citation resolution and download links.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::client::Citation;
use crate::storage::signer::UrlSigner;

const KNOWLEDGE_MARKER: &str = "/Knowledge/";

/// A cited source document, before link signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    /// Display name of the document.
    pub file_name: String,
    /// Object key of the original PDF.
    pub s3_key: String,
}

/// A cited source document with a fresh download link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Display name of the document.
    pub file_name: String,
    /// Object key of the original PDF.
    pub s3_key: String,
    /// Time-limited download link.
    pub presigned_url: String,
}

/// Resolve one retrieved reference to its source PDF.
///
/// Metadata attributes win; a missing name or key is derived from the knowledge URI, which maps
/// back to `PDF/{job_id}/{name}.pdf`.
pub fn resolve_citation(citation: &Citation) -> Option<SourceRef> {
    let attribute = |name: &str| {
        citation
            .metadata
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let mut file_name = attribute("FileName");
    let mut s3_key = attribute("s3Key");
    if (file_name.is_none() || s3_key.is_none())
        && let Some((job_id, pdf_name)) = citation.uri.as_deref().and_then(parse_knowledge_uri)
    {
        s3_key = s3_key.or_else(|| Some(format!("PDF/{job_id}/{pdf_name}")));
        file_name = file_name.or(Some(pdf_name));
    }
    Some(SourceRef {
        file_name: file_name?,
        s3_key: s3_key?,
    })
}

/// Extract `(job_id, pdf_name)` from a knowledge object URI.
///
/// The first segment after `/Knowledge/` is taken as the job id and the last one, with `.txt`
/// replaced by `.pdf`, as the document name.
pub fn parse_knowledge_uri(uri: &str) -> Option<(String, String)> {
    let (_, tail) = uri.split_once(KNOWLEDGE_MARKER)?;
    let segments: Vec<&str> = tail.split('/').filter(|segment| !segment.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }
    let job_id = segments[0].to_string();
    let last = segments[segments.len() - 1];
    let pdf_name = match last.strip_suffix(".txt") {
        Some(stem) => format!("{stem}.pdf"),
        None => last.to_string(),
    };
    Some((job_id, pdf_name))
}

/// Resolve and deduplicate every citation, keeping first-seen order.
pub fn collect_sources(citations: &[Citation]) -> Vec<SourceRef> {
    dedupe(citations.iter().filter_map(resolve_citation))
}

/// Drop repeated keys, keeping the first occurrence.
pub fn dedupe(sources: impl IntoIterator<Item = SourceRef>) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|source| seen.insert(source.s3_key.clone()))
        .collect()
}

/// Parse a JSON source list as produced by the agent action group or stored with history.
///
/// Entries without a key are skipped; a missing name falls back to the last key segment.
pub fn sources_from_value(value: &Value) -> Vec<SourceRef> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    dedupe(entries.iter().filter_map(|entry| {
        let s3_key = entry
            .get("s3Key")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|key| !key.is_empty())?;
        let file_name = entry
            .get("fileName")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| file_name_from_key(s3_key).to_string());
        Some(SourceRef {
            file_name,
            s3_key: s3_key.to_string(),
        })
    }))
}

/// Last segment of an object key.
pub fn file_name_from_key(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Attach a fresh download link to every source.
pub fn sign_sources(signer: &UrlSigner, sources: &[SourceRef]) -> Vec<Source> {
    sources
        .iter()
        .map(|source| Source {
            file_name: source.file_name.clone(),
            s3_key: source.s3_key.clone(),
            presigned_url: signer.sign(&source.s3_key),
        })
        .collect()
}
