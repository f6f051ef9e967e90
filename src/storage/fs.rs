//! Filesystem object store backend.
//!
//! Keys map one-to-one onto relative paths below the configured root. Writes go to a temporary
//! sibling first and are renamed into place so readers never observe a partially written object.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use walkdir::WalkDir;

use super::{
    ObjectStore, StoreError, StoredObject, child_names, content_type_for, keys::validate_key,
};

const TEMP_PREFIX: &str = ".tmp-";

/// Object store persisting objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`, creating the directory when missing.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "Opened filesystem object store");
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(key
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment)))
    }

    async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StoreError> {
        Self::ensure_parent(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = path.with_file_name(format!(
            "{TEMP_PREFIX}{}-{file_name}",
            uuid::Uuid::new_v4().simple()
        ));
        fs::write(&temp, body).await?;
        if let Err(error) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(error.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<StoredObject, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(body) => Ok(StoredObject {
                body,
                content_type: content_type_for(key).to_string(),
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        Self::write_atomic(&path, &body).await
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let source = self.path_for(from)?;
        let target = self.path_for(to)?;
        let body = match fs::read(&source).await {
            Ok(body) => body,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(from.to_string()));
            }
            Err(error) => return Err(error.into()),
        };
        Self::write_atomic(&target, &body).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let walk_dir = match prefix.rsplit_once('/') {
            Some((dir, _)) => dir
                .split('/')
                .fold(root.clone(), |path, segment| path.join(segment)),
            None => root.clone(),
        };

        tokio::task::spawn_blocking(move || {
            if !walk_dir.is_dir() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&walk_dir) {
                let entry = entry.map_err(|error| StoreError::Backend(error.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(TEMP_PREFIX)
                {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|error| StoreError::Backend(format!("listing task failed: {error}")))?
    }

    async fn list_children(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let keys = self.list(prefix).await?;
        Ok(child_names(keys.iter().map(String::as_str), prefix))
    }
}
