// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Filesystem-backed blob store
//!
//! Stores blobs as plain files under `<root>[/<bucket>]/<key>`. Keys always start with a
//! commit SHA (or a fixed namespace such as `metadata/`), so runs for
//! different revisions never share a directory.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use super::BlobStore;
use crate::errors::{AphexError, AphexResult};

/// Filesystem-backed blob store
pub struct FilesystemBlobStore {
    /// Storage root, already scoped to the bucket
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// Create a new blob store under `root`, one directory per bucket
    pub fn new(root: &Path, bucket: Option<&str>) -> Self {
        let root = match bucket {
            Some(bucket) => root.join(bucket),
            None => root.to_path_buf(),
        };
        Self { root }
    }

    /// Resolve a key to a path, rejecting keys that escape the root
    fn blob_path(&self, key: &str) -> AphexResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !valid {
            return Err(AphexError::ArtifactTransfer {
                key: key.to_string(),
                message: "blob keys must be relative paths without '..'".into(),
            });
        }

        Ok(self.root.join(relative))
    }

    fn collect(&self, dir: &Path, keys: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path, keys)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                keys.push(key);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> AphexResult<()> {
        let path = self.blob_path(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AphexError::ArtifactTransfer {
                    key: key.to_string(),
                    message: format!("Failed to create blob directory: {}", e),
                })?;
        }

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AphexError::ArtifactTransfer {
                key: key.to_string(),
                message: format!("Failed to write blob: {}", e),
            })
    }

    async fn get_blob(&self, key: &str) -> AphexResult<Vec<u8>> {
        let path = self.blob_path(key)?;

        tokio::fs::read(&path)
            .await
            .map_err(|e| AphexError::ArtifactTransfer {
                key: key.to_string(),
                message: format!("Failed to read blob: {}", e),
            })
    }

    async fn list_blobs(&self, prefix: &str) -> AphexResult<Vec<String>> {
        let mut keys = Vec::new();

        if self.root.exists() {
            self.collect(&self.root, &mut keys)
                .map_err(|e| AphexError::ArtifactTransfer {
                    key: prefix.to_string(),
                    message: format!("Failed to list blobs: {}", e),
                })?;
        }

        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn location(&self, prefix: &str) -> String {
        format!("file://{}/{}", self.root.display(), prefix)
    }
}
