// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Error types for the pipeline engine
//!
//! Every failure a stage can hit maps onto one [`AphexError`] variant, and
//! every variant maps onto a serializable [`ErrorKind`] so that stage result
//! documents carry a structured error instead of a bare string.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for aphex operations
pub type AphexResult<T> = Result<T, AphexError>;

/// Main error type for aphex
#[derive(Error, Debug, Diagnostic)]
pub enum AphexError {
    // ─────────────────────────────────────────────────────────────────────────
    // Revision Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Revision checkout failed: expected {expected}, {reason}")]
    #[diagnostic(
        code(aphex::revision_checkout),
        help("Check that the commit exists in the repository and is reachable from the clone URL")
    )]
    RevisionCheckout { expected: String, reason: String },

    #[error("Invalid revision '{value}': {reason}")]
    #[diagnostic(
        code(aphex::invalid_revision),
        help("Stages run against an exact 40-character commit SHA, never a branch name")
    )]
    InvalidRevision { value: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Command Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Command '{command}' exited with code {exit_code}")]
    #[diagnostic(code(aphex::command_execution))]
    CommandExecution {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Tool '{tool}' not found")]
    #[diagnostic(code(aphex::tool_not_found), help("{suggestion}"))]
    ToolNotFound { tool: String, suggestion: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Artifact Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Artifact transfer failed for '{key}': {message}")]
    #[diagnostic(code(aphex::artifact_transfer))]
    ArtifactTransfer { key: String, message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Cloud Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to assume {role_arn} in account {account}: {code} - {message}")]
    #[diagnostic(
        code(aphex::cross_account_access),
        help("The target account's role must trust the pipeline account")
    )]
    CrossAccountAccess {
        account: String,
        role_arn: String,
        code: String,
        message: String,
    },

    #[error("Synthesis failed for stack '{stack}': {message}")]
    #[diagnostic(code(aphex::stack_synthesis))]
    StackSynthesis { stack: String, message: String },

    #[error("Deployment failed for stack '{stack}': {message}")]
    #[diagnostic(code(aphex::stack_deployment))]
    StackDeployment { stack: String, message: String },

    #[error("Environment '{environment}' has no stacks configured")]
    #[diagnostic(
        code(aphex::no_stacks),
        help("Every environment must list at least one stack to deploy")
    )]
    NoStacksConfigured { environment: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / Topology Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid pipeline configuration: {}", errors.join("; "))]
    #[diagnostic(
        code(aphex::configuration_validation),
        help("Run 'aphex validate' for the full report")
    )]
    ConfigurationValidation { errors: Vec<String> },

    #[error("Topology generation failed: {reason}")]
    #[diagnostic(code(aphex::topology_generation))]
    TopologyGeneration { reason: String },

    #[error("Stage '{stage}' input '{parameter}' could not be resolved")]
    #[diagnostic(
        code(aphex::unresolved_input),
        help("The producing stage has not run or did not emit that output")
    )]
    UnresolvedInput { stage: String, parameter: String },

    #[error("Stage '{stage}' cannot move from {from} to {to}")]
    #[diagnostic(code(aphex::invalid_transition))]
    InvalidTransition {
        stage: String,
        from: String,
        to: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(aphex::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(aphex::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(aphex::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(aphex::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(aphex::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(aphex::toml_error))]
    Toml { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(aphex::glob_error))]
    GlobPattern { message: String },
}

impl From<std::io::Error> for AphexError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for AphexError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for AphexError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for AphexError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<glob::PatternError> for AphexError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

/// Serializable classification of an [`AphexError`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RevisionCheckout,
    CommandExecution,
    ArtifactTransfer,
    CrossAccountAccess,
    StackSynthesis,
    StackDeployment,
    ConfigurationValidation,
    TopologyGeneration,
    Precondition,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RevisionCheckout => "RevisionCheckoutError",
            Self::CommandExecution => "CommandExecutionError",
            Self::ArtifactTransfer => "ArtifactTransferError",
            Self::CrossAccountAccess => "CrossAccountAccessError",
            Self::StackSynthesis => "StackSynthesisError",
            Self::StackDeployment => "StackDeploymentError",
            Self::ConfigurationValidation => "ConfigurationValidationError",
            Self::TopologyGeneration => "TopologyGenerationError",
            Self::Precondition => "PreconditionError",
            Self::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

impl AphexError {
    /// Classify this error for result documents
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RevisionCheckout { .. } | Self::InvalidRevision { .. } => {
                ErrorKind::RevisionCheckout
            }
            Self::CommandExecution { .. } | Self::ToolNotFound { .. } => {
                ErrorKind::CommandExecution
            }
            Self::ArtifactTransfer { .. } => ErrorKind::ArtifactTransfer,
            Self::CrossAccountAccess { .. } => ErrorKind::CrossAccountAccess,
            Self::StackSynthesis { .. } => ErrorKind::StackSynthesis,
            Self::StackDeployment { .. } => ErrorKind::StackDeployment,
            Self::ConfigurationValidation { .. } | Self::Yaml { .. } | Self::Toml { .. } => {
                ErrorKind::ConfigurationValidation
            }
            Self::TopologyGeneration { .. } | Self::UnresolvedInput { .. } => {
                ErrorKind::TopologyGeneration
            }
            Self::NoStacksConfigured { .. } | Self::InvalidTransition { .. } => {
                ErrorKind::Precondition
            }
            Self::FileReadError { .. }
            | Self::FileWriteError { .. }
            | Self::Io { .. }
            | Self::Json { .. }
            | Self::GlobPattern { .. } => ErrorKind::Internal,
        }
    }

    /// Create a tool not found error with installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        let suggestion = match tool {
            "git" => "Install git: https://git-scm.com/downloads".to_string(),
            "npx" => "Install Node.js (npx ships with npm): https://nodejs.org/".to_string(),
            "aws" => "Install the AWS CLI: https://aws.amazon.com/cli/".to_string(),
            "kubectl" => "Install kubectl: https://kubernetes.io/docs/tasks/tools/".to_string(),
            _ => format!("Install {} and ensure it's in your PATH", tool),
        };

        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion,
        }
    }

    /// Create a command failure from captured process output
    pub fn command_failed(command: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self::CommandExecution {
            command: command.to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    /// Full message including captured command output, for logs and error files
    pub fn detailed_message(&self) -> String {
        match self {
            Self::CommandExecution {
                command,
                exit_code,
                stdout,
                stderr,
            } => format!(
                "Command failed: {}\nExit code: {}\nStdout: {}\nStderr: {}",
                command, exit_code, stdout, stderr
            ),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = AphexError::CrossAccountAccess {
            account: "222222222222".into(),
            role_arn: "arn:aws:iam::222222222222:role/Deployer".into(),
            code: "AccessDenied".into(),
            message: "not authorized".into(),
        };
        assert_eq!(err.kind(), ErrorKind::CrossAccountAccess);
        assert_eq!(err.kind().to_string(), "CrossAccountAccessError");

        let err = AphexError::NoStacksConfigured {
            environment: "dev".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn test_detailed_message_includes_output() {
        let err = AphexError::command_failed("make", 2, "building", "no rule");
        let detail = err.detailed_message();
        assert!(detail.contains("Exit code: 2"));
        assert!(detail.contains("no rule"));
        assert_eq!(err.to_string(), "Command 'make' exited with code 2");
    }

    #[test]
    fn test_configuration_errors_are_joined() {
        let err = AphexError::ConfigurationValidation {
            errors: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Invalid pipeline configuration: a; b");
    }
}
