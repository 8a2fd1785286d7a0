//! Blob store over a local directory

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::reasoning::BlobStore;
use crate::domain::DomainError;

/// Stores each blob as a file named by its storage key under `root`
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a blob, creating parent directories as needed
    pub async fn save(&self, key: &str, data: &[u8]) -> Result<(), DomainError> {
        let path = self.path_for(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::storage(format!("Failed to create directory: {}", e)))?;
        }

        tokio::fs::write(&path, data)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to write blob {}: {}", key, e)))
    }

    /// Keys are relative paths that stay inside the root
    fn path_for(&self, key: &str) -> Result<PathBuf, DomainError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

        if !valid {
            return Err(DomainError::validation(format!("Invalid storage key: {}", key)));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn load(&self, key: &str) -> Result<Bytes, DomainError> {
        let path = self.path_for(key)?;

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(DomainError::not_found(format!("Blob not found: {}", key)))
            }
            Err(e) => Err(DomainError::storage(format!("Failed to read blob {}: {}", key, e))),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        let path = self.path_for(key)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DomainError::storage(format!("Failed to delete blob {}: {}", key, e))),
        }
    }
}
