// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Pipeline configuration model
//!
//! Defines the schema for aphex-config.yaml files: build commands and the
//! ordered list of deployment environments, each with its ordered stacks and
//! optional post-deploy tests.

mod revision;
mod validation;

pub use revision::{PushEvent, RevisionRef};
pub use validation::{ConfigValidator, ValidationResult};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{AphexError, AphexResult};

/// Default configuration file name
pub const CONFIG_FILE: &str = "aphex-config.yaml";

/// Pipeline configuration from aphex-config.yaml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Configuration {
    /// Configuration version
    #[serde(default = "default_version")]
    pub version: String,

    /// Build stage definition
    #[serde(default)]
    pub build: BuildSpec,

    /// Environments in deployment order
    pub environments: Vec<Environment>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Configuration {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> AphexResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AphexError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> AphexResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> AphexResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get an environment by name
    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.name == name)
    }

    /// Get all environment names in deployment order
    pub fn environment_names(&self) -> Vec<&str> {
        self.environments.iter().map(|e| e.name.as_str()).collect()
    }

    /// Number of environments that declare post-deploy tests
    pub fn tested_environment_count(&self) -> usize {
        self.environments.iter().filter(|e| e.tests.is_some()).count()
    }
}

/// Build stage definition
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildSpec {
    /// Shell commands, executed in order
    #[serde(default)]
    pub commands: Vec<String>,
}

/// A deployment target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Environment {
    /// Environment name (unique, lowercase, used in stage names)
    pub name: String,

    /// Cloud region
    pub region: String,

    /// 12-digit cloud account identifier
    pub account: String,

    /// Stacks in deployment order
    #[serde(default)]
    pub stacks: Vec<Stack>,

    /// Post-deploy tests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestSpec>,
}

impl Environment {
    /// Name of this environment's deploy stage
    pub fn deploy_stage_name(&self) -> String {
        format!("deploy-{}", self.name)
    }

    /// Name of this environment's test stage
    pub fn test_stage_name(&self) -> String {
        format!("test-{}", self.name)
    }

    /// Test commands, empty when no tests are declared
    pub fn test_commands(&self) -> &[String] {
        self.tests.as_ref().map(|t| t.commands.as_slice()).unwrap_or(&[])
    }
}

/// One deployable infrastructure stack
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stack {
    /// Stack name (unique within its environment)
    pub name: String,

    /// Infrastructure-definition root relative to the repository root
    #[serde(default = "default_stack_path")]
    pub path: String,
}

fn default_stack_path() -> String {
    ".".to_string()
}

impl Stack {
    /// Resolve the stack's app directory inside a checkout
    pub fn app_dir(&self, repo_root: &Path) -> PathBuf {
        match self.path.trim() {
            "" | "." | "./" => repo_root.to_path_buf(),
            path => repo_root.join(path.trim_start_matches("./")),
        }
    }
}

/// Post-deploy test commands
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestSpec {
    #[serde(default)]
    pub commands: Vec<String>,
}
