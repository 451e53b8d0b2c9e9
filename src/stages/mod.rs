// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Stage execution engine
//!
//! One driver per stage kind. Every driver checks out the pinned revision
//! into its own workspace, reads the configuration from that checkout, and
//! always returns a [`StageResult`]: failures are recorded in the result,
//! never thrown past it.

mod access;
mod build;
mod deployer;
mod environment;
mod pipeline_deploy;
mod result;

pub use access::{role_arn, session_name, AccessDecision, CrossAccountResolver};
pub use build::{BuildReport, BuildStage};
pub use deployer::{
    ConsolidatedOutputs, DeploymentStatus, EnvironmentDeploymentResult, OutputValue,
    StackDeployer, StackDeploymentResult,
};
pub use environment::EnvironmentDeployStage;
pub use pipeline_deploy::{InfrastructureOutcome, PipelineDeploymentReport, PipelineDeploymentStage};
pub use result::{StageDetails, StageError, StageExecution, StageResult, StageState, StageStatus};
pub use test::{TestExecutionResult, TestStage, TestStatus};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{Configuration, Environment, RevisionRef};
use crate::errors::{AphexError, AphexResult};
use crate::providers::{CommandOutput, Invocation, Providers};
use crate::run::ResultStore;
use crate::settings::Settings;
use crate::topology::{StageKind, StageNode, OUTPUT_ARTIFACT_PATH, OUTPUT_STACK_OUTPUTS};

// ─────────────────────────────────────────────────────────────────────────────
// Stage context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a stage instance runs against
#[derive(Clone)]
pub struct StageContext {
    pub revision: RevisionRef,
    pub settings: Settings,
    pub providers: Providers,
    pub results: ResultStore,
}

impl StageContext {
    pub fn new(
        revision: RevisionRef,
        settings: Settings,
        providers: Providers,
        results: ResultStore,
    ) -> Self {
        Self {
            revision,
            settings,
            providers,
            results,
        }
    }

    pub fn commit_sha(&self) -> &str {
        &self.revision.commit_sha
    }

    /// Workspace of one stage in this run
    pub fn checkout_dir(&self, stage: &str) -> PathBuf {
        self.settings
            .workspace_dir
            .join(self.results.run_id())
            .join(stage)
    }

    /// Check out the pinned revision for `stage` and verify HEAD
    ///
    /// The workspace is always fresh. When checkout fails or HEAD is not the
    /// pinned commit, the workspace is removed again.
    pub async fn checkout(&self, stage: &str) -> AphexResult<PathBuf> {
        let dest = self.checkout_dir(stage);
        if dest.exists() {
            std::fs::remove_dir_all(&dest)?;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Checking out {} for {}", self.revision, stage);

        let result = self.checkout_verified(&dest).await;
        if result.is_err() && dest.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dest) {
                tracing::warn!("Failed to clean up {}: {}", dest.display(), e);
            }
        }
        result
    }

    async fn checkout_verified(&self, dest: &Path) -> AphexResult<PathBuf> {
        let source = &self.providers.source;
        let path = source.checkout(&self.revision, dest).await?;
        let head = source.head_revision(&path).await?;

        if !head.trim().eq_ignore_ascii_case(&self.revision.commit_sha) {
            return Err(AphexError::RevisionCheckout {
                expected: self.revision.commit_sha.clone(),
                reason: format!("HEAD is {}", head.trim()),
            });
        }

        Ok(path)
    }

    /// Read and schema-check the configuration inside a checkout
    pub fn load_configuration(&self, checkout: &Path) -> AphexResult<Configuration> {
        let path = checkout.join(&self.settings.config_file);
        let raw = std::fs::read_to_string(&path).map_err(|e| AphexError::FileReadError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        self.providers.schema.validate_config(&raw)
    }

    /// A configured command line run through the settings' shell
    pub fn shell(&self, command: &str, cwd: &Path) -> Invocation {
        Invocation::shell(&self.settings.shell, command, cwd)
    }
}

/// Look up an environment the stage was asked to run for
pub(crate) fn find_environment<'c>(
    config: &'c Configuration,
    name: &str,
) -> AphexResult<&'c Environment> {
    config
        .environment(name)
        .ok_or_else(|| AphexError::ConfigurationValidation {
            errors: vec![format!("environment '{}' is not defined", name)],
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Command records
// ─────────────────────────────────────────────────────────────────────────────

/// Exit code recorded for a command whose process never started
pub const NOT_STARTED_EXIT_CODE: i32 = -1;

/// Outcome of one configured command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Passed,
    Failed,
}

/// Recorded execution of one build or test command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub status: CommandStatus,
    pub duration_seconds: f64,
    #[serde(default)]
    pub timed_out: bool,
}

impl CommandResult {
    pub fn from_output(command: &str, output: &CommandOutput) -> Self {
        Self {
            command: command.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            status: if output.success() {
                CommandStatus::Passed
            } else {
                CommandStatus::Failed
            },
            duration_seconds: output.duration.as_secs_f64(),
            timed_out: output.timed_out,
        }
    }

    /// A command whose process could not be started
    pub fn not_started(command: &str, error: &AphexError) -> Self {
        Self {
            command: command.to_string(),
            exit_code: NOT_STARTED_EXIT_CODE,
            stdout: String::new(),
            stderr: error.to_string(),
            status: CommandStatus::Failed,
            duration_seconds: 0.0,
            timed_out: false,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CommandStatus::Passed
    }

    /// Plain-text log of this command
    pub fn log(&self) -> String {
        format!(
            "Command: {}\nExit code: {}\nTimed out: {}\nDuration: {:.2}s\n\n--- stdout ---\n{}\n--- stderr ---\n{}\n",
            self.command,
            self.exit_code,
            self.timed_out,
            self.duration_seconds,
            self.stdout,
            self.stderr
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Run the stage a topology node describes with its resolved inputs
pub async fn run_node(
    ctx: &StageContext,
    node: &StageNode,
    inputs: &BTreeMap<String, String>,
) -> StageResult {
    let environment = || {
        node.environment.clone().ok_or_else(|| AphexError::TopologyGeneration {
            reason: format!("stage '{}' has no environment", node.name),
        })
    };

    match node.kind {
        StageKind::Build => BuildStage::new(ctx).run().await,
        StageKind::PipelineDeployment => PipelineDeploymentStage::new(ctx).run().await,
        StageKind::Deploy => match environment() {
            Ok(env) => {
                EnvironmentDeployStage::new(ctx, &env)
                    .with_artifact_path(inputs.get(OUTPUT_ARTIFACT_PATH).cloned())
                    .run()
                    .await
            }
            Err(e) => StageExecution::new(&node.name, node.kind, ctx.commit_sha()).fail(&e, None),
        },
        StageKind::Test => {
            let stack_outputs =
                inputs
                    .get(OUTPUT_STACK_OUTPUTS)
                    .cloned()
                    .ok_or_else(|| AphexError::UnresolvedInput {
                        stage: node.name.clone(),
                        parameter: OUTPUT_STACK_OUTPUTS.to_string(),
                    });
            match environment().and_then(|env| stack_outputs.map(|o| (env, o))) {
                Ok((env, outputs)) => TestStage::new(ctx, &env, &outputs).run().await,
                Err(e) => {
                    StageExecution::new(&node.name, node.kind, ctx.commit_sha()).fail(&e, None)
                }
            }
        }
    }
}
