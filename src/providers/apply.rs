// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Topology appliers

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{CommandRunner, Invocation, TopologyApplier};
use crate::errors::{AphexError, AphexResult};

/// Applies manifests to the cluster with `kubectl apply`
pub struct KubectlApplier {
    runner: Arc<dyn CommandRunner>,
    namespace: String,
}

impl KubectlApplier {
    pub fn new(runner: Arc<dyn CommandRunner>, namespace: &str) -> Self {
        Self {
            runner,
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl TopologyApplier for KubectlApplier {
    async fn apply_topology(&self, manifest: &str) -> AphexResult<()> {
        let staging = tempfile_path();
        tokio::fs::write(&staging, manifest)
            .await
            .map_err(|e| AphexError::FileWriteError {
                path: staging.clone(),
                error: e.to_string(),
            })?;

        let inv = Invocation::new("kubectl", Path::new("."))
            .args(["apply", "-n", self.namespace.as_str(), "-f"])
            .arg(staging.to_string_lossy());
        let result = self.runner.run(&inv).await;
        let _ = tokio::fs::remove_file(&staging).await;

        let output = result?;
        if !output.success() {
            return Err(AphexError::TopologyGeneration {
                reason: format!("kubectl apply failed: {}", output.stderr.trim()),
            });
        }

        tracing::info!("Applied workflow template to namespace {}", self.namespace);
        Ok(())
    }
}

fn tempfile_path() -> PathBuf {
    std::env::temp_dir().join(format!("aphex-topology-{}.yaml", uuid::Uuid::new_v4()))
}

/// Installs manifests by writing them to a file the next local run reads
pub struct FileApplier {
    path: PathBuf,
}

impl FileApplier {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait]
impl TopologyApplier for FileApplier {
    async fn apply_topology(&self, manifest: &str) -> AphexResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, manifest)
            .await
            .map_err(|e| AphexError::FileWriteError {
                path: self.path.clone(),
                error: e.to_string(),
            })?;

        tracing::info!("Installed workflow manifest at {}", self.path.display());
        Ok(())
    }
}
