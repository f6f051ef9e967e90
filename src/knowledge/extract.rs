//! Recovery of structured knowledge chunks from model output.
//!
//! The extraction prompt asks for a JSON array of `{statedindocument, content}` objects, but
//! models routinely wrap it in commentary. The array is taken from the first `[` to the last `]`;
//! anything that does not parse into non-empty, well-formed objects falls back to one
//! unstructured chunk holding the whole text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provenance recorded for chunks that could not be parsed.
pub const UNSTRUCTURED_PROVENANCE: &str = "-";

/// One extracted knowledge unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    /// Pointer into the source document (page, section, ...).
    pub statedindocument: String,
    /// Extracted knowledge text.
    pub content: String,
}

/// Result of interpreting raw knowledge text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Text contained a valid chunk array.
    Structured(Vec<KnowledgeChunk>),
    /// Text is kept whole; `reason` explains why parsing was abandoned.
    Unstructured {
        /// Entire raw text.
        text: String,
        /// Why the structured interpretation failed.
        reason: String,
    },
}

/// Interpret raw model output as knowledge chunks.
pub fn extract_chunks(raw: &str) -> Extraction {
    match parse_array(raw) {
        Ok(chunks) => Extraction::Structured(chunks),
        Err(reason) => Extraction::Unstructured {
            text: raw.to_string(),
            reason,
        },
    }
}

fn parse_array(raw: &str) -> Result<Vec<KnowledgeChunk>, String> {
    let start = raw.find('[').ok_or("no opening bracket")?;
    let end = raw.rfind(']').ok_or("no closing bracket")?;
    if end < start {
        return Err("closing bracket precedes opening bracket".into());
    }

    let value: Value = serde_json::from_str(&raw[start..=end])
        .map_err(|error| format!("invalid JSON array: {error}"))?;
    let Value::Array(items) = value else {
        return Err("top-level value is not an array".into());
    };
    if items.is_empty() {
        return Err("array is empty".into());
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let Value::Object(mut fields) = item else {
                return Err(format!("element {index} is not an object"));
            };
            let statedindocument = fields
                .remove("statedindocument")
                .ok_or_else(|| format!("element {index} lacks statedindocument"))?;
            let content = fields
                .remove("content")
                .ok_or_else(|| format!("element {index} lacks content"))?;
            Ok(KnowledgeChunk {
                statedindocument: value_text(statedindocument),
                content: value_text(content),
            })
        })
        .collect()
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
