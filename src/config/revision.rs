// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Revision references and push events

use serde::{Deserialize, Serialize};

use crate::errors::{AphexError, AphexResult};

/// The exact revision a whole run operates against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionRef {
    pub commit_sha: String,
    pub repo_url: String,
}

impl RevisionRef {
    /// Build a revision reference, rejecting anything but a full 40-hex SHA
    pub fn new(commit_sha: &str, repo_url: &str) -> AphexResult<Self> {
        let sha = commit_sha.trim().to_ascii_lowercase();

        if sha.len() != 40 {
            return Err(AphexError::InvalidRevision {
                value: commit_sha.to_string(),
                reason: format!("expected 40 hex characters, got {}", sha.len()),
            });
        }
        if !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AphexError::InvalidRevision {
                value: commit_sha.to_string(),
                reason: "contains non-hex characters".into(),
            });
        }

        Ok(Self {
            commit_sha: sha,
            repo_url: repo_url.to_string(),
        })
    }

    /// Abbreviated SHA for display
    pub fn short_sha(&self) -> &str {
        &self.commit_sha[..8]
    }
}

impl std::fmt::Display for RevisionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.repo_url, self.short_sha())
    }
}

/// Commit information extracted from a Git push webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushEvent {
    pub commit_sha: String,
    pub branch: String,
    pub repo_url: String,
    pub repo_name: Option<String>,
    pub pusher: Option<String>,
}

#[derive(Deserialize)]
struct RawPush {
    after: Option<String>,
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    repository: Option<RawRepository>,
    pusher: Option<RawPusher>,
}

#[derive(Deserialize)]
struct RawRepository {
    clone_url: Option<String>,
    full_name: Option<String>,
}

#[derive(Deserialize)]
struct RawPusher {
    name: Option<String>,
    login: Option<String>,
}

impl PushEvent {
    /// Parse a push webhook payload
    pub fn parse(payload: &str) -> AphexResult<Self> {
        let raw: RawPush = serde_json::from_str(payload)?;

        let commit_sha = non_empty(raw.after, "after")?;
        let git_ref = non_empty(raw.git_ref, "ref")?;
        let repository = raw.repository.ok_or_else(|| missing("repository"))?;
        let repo_url = non_empty(repository.clone_url, "repository.clone_url")?;

        let branch = git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&git_ref)
            .to_string();

        Ok(Self {
            commit_sha,
            branch,
            repo_url,
            repo_name: repository.full_name,
            pusher: raw.pusher.and_then(|p| p.name.or(p.login)),
        })
    }

    /// Whether the push targets the main line
    pub fn is_main_branch(&self) -> bool {
        matches!(self.branch.as_str(), "main" | "master")
    }

    /// The revision this push pins a run to
    pub fn revision(&self) -> AphexResult<RevisionRef> {
        RevisionRef::new(&self.commit_sha, &self.repo_url)
    }
}

fn missing(field: &str) -> AphexError {
    AphexError::Json {
        message: format!("missing '{}' field in push payload", field),
    }
}

fn non_empty(value: Option<String>, field: &str) -> AphexResult<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(missing(field)),
    }
}
