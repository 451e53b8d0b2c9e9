// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Workflow run metadata kept in the blob store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{RunStatus, RunSummary, StageOutcome};
use crate::config::RevisionRef;
use crate::errors::{AphexError, AphexResult};
use crate::providers::BlobStore;

/// Blob key of a run's metadata document
pub fn metadata_key(run_id: &str) -> String {
    format!("metadata/workflows/{}.json", run_id)
}

/// Who ran what, when, and how it went
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub run_id: String,
    pub commit_sha: String,
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stages: BTreeMap<String, StageOutcome>,
}

impl WorkflowMetadata {
    /// Metadata of a run that is starting now
    pub fn started(run_id: &str, revision: &RevisionRef, branch: Option<&str>) -> Self {
        Self {
            run_id: run_id.to_string(),
            commit_sha: revision.commit_sha.clone(),
            repo_url: revision.repo_url.clone(),
            branch: branch.map(str::to_string),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            stages: BTreeMap::new(),
        }
    }

    /// Fold a finished run's summary in
    pub fn finish(&mut self, summary: &RunSummary) {
        self.status = summary.status;
        self.finished_at = Some(summary.finished_at);
        self.stages = summary
            .stages
            .iter()
            .map(|s| (s.name.clone(), s.outcome))
            .collect();
    }

    pub async fn record(&self, store: &dyn BlobStore) -> AphexResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        store.put_blob(&metadata_key(&self.run_id), bytes).await
    }

    pub async fn load(store: &dyn BlobStore, run_id: &str) -> AphexResult<Self> {
        let key = metadata_key(run_id);
        let bytes = store.get_blob(&key).await?;
        serde_json::from_slice(&bytes).map_err(|e| AphexError::ArtifactTransfer {
            key,
            message: format!("unreadable metadata: {}", e),
        })
    }
}
