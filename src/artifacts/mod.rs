// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Content-addressed build artifacts
//!
//! Artifacts of a build are stored under `<commit_sha>/<relative_path>`, so
//! two revisions can never read each other's outputs.

mod digest;

pub use digest::{digest_bytes, ContentDigest};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{AphexError, AphexResult};
use crate::providers::BlobStore;

/// One published file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Path relative to the artifact directory, `/`-separated
    pub path: String,
    pub size: u64,
    pub digest: String,
}

/// Everything a build published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub commit_sha: String,
    pub location: String,
    pub files: Vec<ArtifactEntry>,
    /// Digest over every path and its content
    pub digest: String,
}

impl ArtifactManifest {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Blob prefix of a revision's artifacts
pub fn artifact_prefix(commit_sha: &str) -> String {
    format!("{}/", commit_sha)
}

/// Blob key of a diagnostic file, kept apart from the artifact prefix
pub fn diagnostics_key(commit_sha: &str, name: &str) -> String {
    format!("diagnostics/{}/{}", commit_sha, name)
}

/// Files under `dir`, sorted
fn collect_files(dir: &Path) -> AphexResult<Vec<PathBuf>> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.to_string_lossy()));

    let mut files: Vec<PathBuf> = glob::glob(&pattern)?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn relative_key(dir: &Path, file: &Path) -> String {
    file.strip_prefix(dir)
        .unwrap_or(file)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Upload every file under `dir` to `<commit_sha>/<relative_path>`
///
/// A missing or empty directory publishes nothing and is not an error.
pub async fn publish(
    store: &dyn BlobStore,
    commit_sha: &str,
    dir: &Path,
) -> AphexResult<ArtifactManifest> {
    let prefix = artifact_prefix(commit_sha);
    let files = if dir.is_dir() {
        collect_files(dir)?
    } else {
        Vec::new()
    };

    if files.is_empty() {
        tracing::warn!("No artifacts found in {}", dir.display());
    }

    let mut entries = Vec::with_capacity(files.len());
    let mut manifest_digest = ContentDigest::new();

    for file in files {
        let relative = relative_key(dir, &file);
        let bytes = tokio::fs::read(&file)
            .await
            .map_err(|e| AphexError::FileReadError {
                path: file.clone(),
                error: e.to_string(),
            })?;

        manifest_digest.update_labelled(&relative, &bytes);
        entries.push(ArtifactEntry {
            path: relative.clone(),
            size: bytes.len() as u64,
            digest: digest_bytes(&bytes),
        });

        store.put_blob(&format!("{}{}", prefix, relative), bytes).await?;
    }

    tracing::info!(
        "Published {} artifact(s) to {}",
        entries.len(),
        store.location(&prefix)
    );

    Ok(ArtifactManifest {
        commit_sha: commit_sha.to_string(),
        location: store.location(&prefix),
        files: entries,
        digest: manifest_digest.finalize(),
    })
}

/// Download every artifact of `commit_sha` into `dest`, returning the written paths
pub async fn fetch(
    store: &dyn BlobStore,
    commit_sha: &str,
    dest: &Path,
) -> AphexResult<Vec<PathBuf>> {
    let prefix = artifact_prefix(commit_sha);
    let keys = store.list_blobs(&prefix).await?;
    let mut written = Vec::with_capacity(keys.len());

    for key in keys {
        let relative = &key[prefix.len()..];
        let path = dest.join(relative);
        let bytes = store.get_blob(&key).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AphexError::ArtifactTransfer {
                key: key.clone(),
                message: format!("Failed to write {}: {}", path.display(), e),
            })?;
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::MemoryBlobStore;

    #[tokio::test]
    async fn test_publish_and_fetch() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("js")).unwrap();
        std::fs::write(src.path().join("index.html"), "<html/>").unwrap();
        std::fs::write(src.path().join("js/app.js"), "run()").unwrap();

        let store = MemoryBlobStore::new();
        let manifest = publish(&store, "abc123", src.path()).await.unwrap();

        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.files[0].path, "index.html");
        assert_eq!(manifest.files[1].path, "js/app.js");
        assert_eq!(manifest.total_size(), 12);
        assert_eq!(manifest.location, "mem://abc123/");
        assert_eq!(store.keys(), vec!["abc123/index.html", "abc123/js/app.js"]);

        let dest = tempfile::tempdir().unwrap();
        let written = fetch(&store, "abc123", dest.path()).await.unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dest.path().join("js/app.js")).unwrap(),
            "run()"
        );
    }

    #[tokio::test]
    async fn test_missing_directory_publishes_nothing() {
        let store = MemoryBlobStore::new();
        let manifest = publish(&store, "abc", Path::new("/definitely/not/here"))
            .await
            .unwrap();
        assert!(manifest.is_empty());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_revisions_do_not_cross() {
        let store = MemoryBlobStore::new();
        let one = tempfile::tempdir().unwrap();
        std::fs::write(one.path().join("x"), "first").unwrap();
        let two = tempfile::tempdir().unwrap();
        std::fs::write(two.path().join("x"), "second").unwrap();

        publish(&store, "sha1", one.path()).await.unwrap();
        publish(&store, "sha2", two.path()).await.unwrap();

        let dest = tempfile::tempdir().unwrap();
        fetch(&store, "sha1", dest.path()).await.unwrap();
        assert_eq!(std::fs::read_to_string(dest.path().join("x")).unwrap(), "first");
    }

    #[test]
    fn test_diagnostics_are_outside_artifact_prefix() {
        let key = diagnostics_key("abc", "build-error.log");
        assert!(!key.starts_with(&artifact_prefix("abc")));
    }
}
