// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Runner settings
//!
//! Everything the engine needs that is not part of the pipeline configuration
//! itself. Loaded from an optional `.aphex.toml`; every field has a default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AphexError, AphexResult};

/// Default settings file name
pub const SETTINGS_FILE: &str = ".aphex.toml";

/// Runner settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Directory that receives per-stage checkouts
    pub workspace_dir: PathBuf,

    /// Artifact directory inside a checkout
    pub artifacts_dir: String,

    /// Pipeline configuration file inside a checkout
    pub config_file: String,

    /// Role assumed in target accounts
    pub cross_account_role: String,

    /// Deploy through the CDK bootstrap deploy role after switching accounts
    pub use_bootstrap_deploy_role: bool,

    /// Name of the pipeline's own infrastructure stack
    pub pipeline_stack: String,

    /// Directory of the pipeline's own infrastructure inside a checkout
    pub pipeline_stack_dir: String,

    /// Region of the pipeline's own infrastructure
    pub pipeline_region: String,

    /// Artifact bucket; looked up from the pipeline stack when absent
    pub artifact_bucket: Option<String>,

    /// Root of the local blob store
    pub blob_root: PathBuf,

    /// Directory that receives result documents
    pub results_dir: PathBuf,

    /// Timeout applied to each test command, in seconds
    pub test_timeout_secs: u64,

    /// Keep going with the existing topology when the pipeline stack fails to deploy
    pub continue_on_error: bool,

    /// Shell used to run build and test commands
    pub shell: String,

    /// Where the file applier installs the generated manifest
    pub topology_file: PathBuf,

    /// Install generated manifests with kubectl instead of writing a file
    pub apply_with_kubectl: bool,

    /// Channel that receives run completion notifications
    pub notification_channel: String,

    /// Workflow manifest settings
    pub manifest: ManifestSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from(".aphex/work"),
            artifacts_dir: "dist".into(),
            config_file: crate::config::CONFIG_FILE.into(),
            cross_account_role: "AphexPipelineCrossAccountRole".into(),
            use_bootstrap_deploy_role: false,
            pipeline_stack: "AphexPipelineStack".into(),
            pipeline_stack_dir: "pipeline-infra".into(),
            pipeline_region: "us-east-1".into(),
            artifact_bucket: None,
            blob_root: PathBuf::from(".aphex/blobs"),
            results_dir: PathBuf::from(".aphex/results"),
            test_timeout_secs: 3600,
            continue_on_error: true,
            shell: "bash".into(),
            topology_file: PathBuf::from(".aphex/topology.yaml"),
            apply_with_kubectl: false,
            notification_channel: "aphex-pipeline".into(),
            manifest: ManifestSettings::default(),
        }
    }
}

/// Workflow manifest settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ManifestSettings {
    pub template_name: String,
    pub namespace: String,
    pub service_account: String,
    pub image: String,
}

impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            template_name: "aphex-pipeline-template".into(),
            namespace: "argo".into(),
            service_account: "workflow-executor".into(),
            image: "aphex/aphex:latest".into(),
        }
    }
}

impl Settings {
    /// Load settings from an explicit file, or `.aphex.toml` in `dir` if present
    pub fn load(explicit: Option<&Path>, dir: &Path) -> AphexResult<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = dir.join(SETTINGS_FILE);
                if default_path.exists() {
                    Self::from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> AphexResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AphexError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_toml(&content)
    }

    /// Parse settings from TOML
    pub fn from_toml(content: &str) -> AphexResult<Self> {
        toml::from_str(content).map_err(Into::into)
    }

    /// Per-command test timeout
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    /// Role ARN assumed in a target account
    pub fn role_arn(&self, account: &str) -> String {
        crate::stages::role_arn(account, &self.cross_account_role)
    }
}
