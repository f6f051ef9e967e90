//! Object storage for source files, transcripts, knowledge chunks, and prompts.
//!
//! Everything the pipeline persists lives behind the [`ObjectStore`] trait and is addressed by
//! the hierarchical keys produced in [`keys`]. Two backends ship with the crate: an in-memory map
//! used by tests and ephemeral runs, and a filesystem tree rooted at `DOCTOKNOW_DATA_DIR`.

mod fs;
pub mod keys;
mod memory;
pub mod signer;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;
pub use signer::{LinkError, UrlSigner};

use async_trait::async_trait;
use thiserror::Error;

/// Content type used for transcripts, prompts, and knowledge chunks.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
/// Content type used for metadata sidecars.
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type used for source documents.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Errors returned by object store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object exists at the requested key.
    #[error("Object not found: {0}")]
    NotFound(String),
    /// Key is empty or escapes the storage namespace.
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    /// Filesystem failure in the local backend.
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Any other backend failure.
    #[error("Storage backend failed: {0}")]
    Backend(String),
}

/// Object payload together with its stored content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Raw object bytes.
    pub body: Vec<u8>,
    /// Content type recorded at write time (or inferred from the key).
    pub content_type: String,
}

impl StoredObject {
    /// Decode the body as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Durable storage addressed by `/`-delimited keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the object stored at `key`.
    async fn get(&self, key: &str) -> Result<StoredObject, StoreError>;

    /// Write (or overwrite) the object stored at `key`.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError>;

    /// Copy an object verbatim to a new key, overwriting any existing object there.
    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError>;

    /// Remove the object at `key`; returns whether an object was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Return whether an object exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// List every key starting with `prefix`, sorted lexicographically.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// List the immediate child "directories" below `prefix` (which should end with `/`).
    async fn list_children(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Fetch an object and decode it as text.
pub async fn get_text(store: &dyn ObjectStore, key: &str) -> Result<String, StoreError> {
    Ok(store.get(key).await?.text())
}

/// Content type inferred from a key's extension.
pub(crate) fn content_type_for(key: &str) -> &'static str {
    let lower = key.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        PDF_CONTENT_TYPE
    } else if lower.ends_with(".json") {
        JSON_CONTENT_TYPE
    } else if lower.ends_with(".txt") {
        TEXT_CONTENT_TYPE
    } else {
        "application/octet-stream"
    }
}

/// Immediate child names below `prefix`, derived from a flat key listing.
pub(crate) fn child_names<'a>(keys: impl Iterator<Item = &'a str>, prefix: &str) -> Vec<String> {
    let mut children: Vec<String> = keys
        .filter_map(|key| key.strip_prefix(prefix))
        .filter_map(|rest| rest.split_once('/').map(|(child, _)| child))
        .filter(|child| !child.is_empty())
        .map(str::to_string)
        .collect();
    children.sort();
    children.dedup();
    children
}
