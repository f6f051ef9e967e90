//! Metadata sidecars attached to every knowledge object.
//!
//! The index ingests `{content_key}.metadata.json` next to each object. Every attribute is a
//! string value included for embedding; `folder_path` and `job_id` are what retrieval filters on.

use serde_json::{Map, Value, json};

/// Attributes describing one knowledge object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata<'a> {
    /// Human file name of the source document.
    pub file_name: &'a str,
    /// Object key of the source document.
    pub source_key: &'a str,
    /// Folder scope (empty for legacy flat addressing).
    pub folder_path: &'a str,
    /// Job that produced the object.
    pub job_id: &'a str,
    /// Storage URI of the source document.
    pub source_uri: &'a str,
    /// Provenance pointer; omitted for passthrough copies.
    pub stated_in_document: Option<&'a str>,
}

impl ChunkMetadata<'_> {
    /// Render the sidecar document.
    pub fn to_sidecar(&self) -> Value {
        let mut attributes = Map::new();
        attributes.insert("FileName".into(), attribute(self.file_name));
        attributes.insert("s3Key".into(), attribute(self.source_key));
        attributes.insert("folder_path".into(), attribute(self.folder_path));
        attributes.insert("job_id".into(), attribute(self.job_id));
        attributes.insert("source_uri".into(), attribute(self.source_uri));
        if let Some(stated) = self.stated_in_document {
            attributes.insert("statedindocument".into(), attribute(stated));
        }
        json!({ "metadataAttributes": Value::Object(attributes) })
    }
}

fn attribute(value: &str) -> Value {
    json!({
        "value": {
            "type": "STRING",
            "stringValue": value,
        },
        "includeForEmbedding": true,
    })
}
