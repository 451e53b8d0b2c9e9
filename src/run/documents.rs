// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Result documents of one run
//!
//! Every document lives under `<results>/<run_id>/` and carries the stage in
//! its name, so sibling stages never write the same file.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::errors::{AphexError, AphexResult};
use crate::stages::StageResult;

/// Writer for the result documents of one run
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
    run_id: String,
}

impl ResultStore {
    pub fn new(root: &Path, run_id: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            run_id: run_id.to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Directory holding this run's documents
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.run_id)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir().join(name)
    }

    /// Write a document as pretty JSON
    pub fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> AphexResult<PathBuf> {
        let content = serde_json::to_string_pretty(value)?;
        self.write_text(name, &content)
    }

    /// Write a plain-text document
    pub fn write_text(&self, name: &str, content: &str) -> AphexResult<PathBuf> {
        let dir = self.dir();
        std::fs::create_dir_all(&dir).map_err(|e| AphexError::FileWriteError {
            path: dir.clone(),
            error: e.to_string(),
        })?;

        let path = dir.join(name);
        std::fs::write(&path, content).map_err(|e| AphexError::FileWriteError {
            path: path.clone(),
            error: e.to_string(),
        })?;

        tracing::debug!("Wrote {}", path.display());
        Ok(path)
    }

    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> AphexResult<T> {
        let path = self.path(name);
        let content = std::fs::read_to_string(&path).map_err(|e| AphexError::FileReadError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(Into::into)
    }

    /// `<stage>.json`
    pub fn write_stage_result(&self, result: &StageResult) -> AphexResult<PathBuf> {
        self.write_json(&format!("{}.json", result.stage_name), result)
    }

    pub fn read_stage_result(&self, stage: &str) -> AphexResult<StageResult> {
        self.read_json(&format!("{}.json", stage))
    }

    /// Best-effort JSON write; failures are logged
    pub fn persist_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) {
        if let Err(e) = self.write_json(name, value) {
            tracing::warn!("Failed to persist {}: {}", name, e);
        }
    }

    /// Best-effort text write; failures are logged
    pub fn persist_text(&self, name: &str, content: &str) {
        if let Err(e) = self.write_text(name, content) {
            tracing::warn!("Failed to persist {}: {}", name, e);
        }
    }
}
