// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Stage lifecycle and result documents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use super::{
    BuildReport, EnvironmentDeploymentResult, PipelineDeploymentReport, TestExecutionResult,
};
use crate::errors::{AphexError, AphexResult, ErrorKind};
use crate::topology::StageKind;

/// Lifecycle state of one stage instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal status of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Structured error carried by a failed stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&AphexError> for StageError {
    fn from(error: &AphexError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

impl From<AphexError> for StageError {
    fn from(error: AphexError) -> Self {
        Self::from(&error)
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Stage-specific part of a result document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageDetails {
    Build(BuildReport),
    PipelineDeployment(PipelineDeploymentReport),
    Deploy(EnvironmentDeploymentResult),
    Test(TestExecutionResult),
}

/// Result document produced by every stage, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_name: String,
    pub kind: StageKind,
    pub commit_sha: String,
    pub status: StageStatus,
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StageDetails>,
}

impl StageResult {
    pub fn succeeded(&self) -> bool {
        self.status.is_success()
    }

    /// Human-readable failure message, if the stage failed
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs.get(name).map(String::as_str)
    }
}

/// A stage instance moving through `Pending → Running → {Succeeded | Failed}`
///
/// Terminal transitions consume the execution, so a result is produced
/// exactly once and nothing can touch the stage afterwards.
#[derive(Debug)]
pub struct StageExecution {
    name: String,
    kind: StageKind,
    commit_sha: String,
    state: StageState,
    outputs: BTreeMap<String, String>,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl StageExecution {
    pub fn new(name: &str, kind: StageKind, commit_sha: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            commit_sha: commit_sha.to_string(),
            state: StageState::Pending,
            outputs: BTreeMap::new(),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Enter `Running`; only valid from `Pending`
    pub fn start(&mut self) -> AphexResult<()> {
        self.transition(StageState::Running)?;
        self.started_at = Utc::now();
        self.clock = Instant::now();
        tracing::info!("Stage {} running", self.name);
        Ok(())
    }

    /// Record a named output; only valid while `Running`
    pub fn set_output(&mut self, name: &str, value: impl Into<String>) -> AphexResult<()> {
        if self.state != StageState::Running {
            return Err(self.invalid(StageState::Running));
        }
        self.outputs.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Finish successfully. A stage that never started cannot succeed and
    /// ends `Failed` instead.
    pub fn succeed(mut self, details: Option<StageDetails>) -> StageResult {
        match self.transition(StageState::Succeeded) {
            Ok(()) => self.finish(None, details),
            Err(e) => {
                self.state = StageState::Failed;
                self.finish(Some(StageError::from(&e)), details)
            }
        }
    }

    /// Finish with an error, from `Pending` or `Running`
    pub fn fail(self, error: &AphexError, details: Option<StageDetails>) -> StageResult {
        self.fail_with(StageError::from(error), details)
    }

    /// Finish with an already classified error
    pub fn fail_with(mut self, error: StageError, details: Option<StageDetails>) -> StageResult {
        self.state = StageState::Failed;
        tracing::error!("Stage {} failed: {}", self.name, error.message);
        self.finish(Some(error), details)
    }

    fn transition(&mut self, to: StageState) -> AphexResult<()> {
        let allowed = matches!(
            (self.state, to),
            (StageState::Pending, StageState::Running)
                | (StageState::Running, StageState::Succeeded)
                | (StageState::Running, StageState::Failed)
                | (StageState::Pending, StageState::Failed)
        );
        if !allowed {
            return Err(self.invalid(to));
        }
        self.state = to;
        Ok(())
    }

    fn invalid(&self, to: StageState) -> AphexError {
        AphexError::InvalidTransition {
            stage: self.name.clone(),
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    fn finish(self, error: Option<StageError>, details: Option<StageDetails>) -> StageResult {
        let status = if error.is_none() {
            StageStatus::Succeeded
        } else {
            StageStatus::Failed
        };

        StageResult {
            stage_name: self.name,
            kind: self.kind,
            commit_sha: self.commit_sha,
            status,
            outputs: self.outputs,
            error,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_seconds: self.clock.elapsed().as_secs_f64(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut exec = StageExecution::new("build", StageKind::Build, "abc");
        assert_eq!(exec.state(), StageState::Pending);
        exec.start().unwrap();
        exec.set_output("artifact-path", "mem://abc/").unwrap();

        let result = exec.succeed(None);
        assert!(result.succeeded());
        assert_eq!(result.output("artifact-path"), Some("mem://abc/"));
        assert!(result.error.is_none());
        assert!(result.finished_at >= result.started_at);
    }

    #[test]
    fn test_double_start_is_rejected() {
        let mut exec = StageExecution::new("build", StageKind::Build, "abc");
        exec.start().unwrap();
        let err = exec.start().unwrap_err();
        assert!(matches!(err, AphexError::InvalidTransition { .. }));
        assert_eq!(err.to_string(), "Stage 'build' cannot move from running to running");
    }

    #[test]
    fn test_output_requires_running() {
        let mut exec = StageExecution::new("build", StageKind::Build, "abc");
        assert!(exec.set_output("artifact-path", "x").is_err());
    }

    #[test]
    fn test_success_without_start_fails() {
        let exec = StageExecution::new("deploy-dev", StageKind::Deploy, "abc");
        let result = exec.succeed(None);
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error.unwrap().kind, ErrorKind::Precondition);
    }

    #[test]
    fn test_failure_carries_kind_and_message() {
        let mut exec = StageExecution::new("deploy-dev", StageKind::Deploy, "abc");
        exec.start().unwrap();
        let result = exec.fail(
            &AphexError::StackDeployment {
                stack: "B".into(),
                message: "rollback".into(),
            },
            None,
        );

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::StackDeployment);
        assert_eq!(
            result.error_message(),
            Some("Deployment failed for stack 'B': rollback")
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "stack_deployment");
        assert_eq!(json["kind"], "deploy");
    }
}
