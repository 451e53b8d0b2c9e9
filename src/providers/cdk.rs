// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! CDK / CloudFormation stack toolkit
//!
//! Synthesis and deployment shell out to `npx cdk`, descriptions to
//! `aws cloudformation`. Credentials reach the child processes only through
//! their environment.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{CloudContext, CommandRunner, Invocation, StackEvent, StackOutput, StackToolkit};
use crate::errors::{AphexError, AphexResult};

/// Directory under an app directory that receives per-stack cloud assemblies
const ASSEMBLY_ROOT: &str = "cdk.out.aphex";

/// Upper bound on failure events kept for diagnostics
const MAX_FAILURE_EVENTS: usize = 20;

/// `npx cdk` + `aws cloudformation` toolkit
pub struct CdkToolkit {
    runner: Arc<dyn CommandRunner>,
}

impl CdkToolkit {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn cloudformation(
        &self,
        cloud: &CloudContext,
        args: &[&str],
        stack: &str,
    ) -> AphexResult<String> {
        let inv = Invocation::new("aws", Path::new("."))
            .arg("cloudformation")
            .args(args.iter().copied())
            .args(["--region", cloud.region.as_str(), "--output", "json"])
            .envs(&cloud.env());

        let output = self.runner.run(&inv).await?;
        if !output.success() {
            return Err(AphexError::StackDeployment {
                stack: stack.to_string(),
                message: format!("{} failed: {}", args[0], output.stderr.trim()),
            });
        }
        Ok(output.stdout)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacks {
    #[serde(default)]
    stacks: Vec<DescribedStack>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribedStack {
    #[serde(default)]
    outputs: Vec<DescribedOutput>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribedOutput {
    output_key: String,
    output_value: String,
    description: Option<String>,
    export_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeEvents {
    #[serde(default)]
    stack_events: Vec<DescribedEvent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribedEvent {
    timestamp: String,
    #[serde(default)]
    resource_type: String,
    #[serde(default)]
    logical_resource_id: String,
    #[serde(default)]
    resource_status: String,
    #[serde(default)]
    resource_status_reason: String,
}

/// Parse `describe-stacks` output into stack outputs
pub(crate) fn parse_outputs(json: &str) -> AphexResult<Vec<StackOutput>> {
    let described: DescribeStacks = serde_json::from_str(json)?;
    Ok(described
        .stacks
        .into_iter()
        .next()
        .map(|s| s.outputs)
        .unwrap_or_default()
        .into_iter()
        .map(|o| StackOutput {
            key: o.output_key,
            value: o.output_value,
            description: o.description,
            export_name: o.export_name,
        })
        .collect())
}

/// Parse `describe-stack-events` output, keeping failure-class events only
pub(crate) fn parse_failure_events(json: &str) -> AphexResult<Vec<StackEvent>> {
    let described: DescribeEvents = serde_json::from_str(json)?;
    Ok(described
        .stack_events
        .into_iter()
        .filter(|e| e.resource_status.contains("FAILED"))
        .take(MAX_FAILURE_EVENTS)
        .map(|e| StackEvent {
            timestamp: e.timestamp,
            resource_type: e.resource_type,
            logical_resource_id: e.logical_resource_id,
            resource_status: e.resource_status,
            resource_status_reason: e.resource_status_reason,
        })
        .collect())
}

#[async_trait]
impl StackToolkit for CdkToolkit {
    async fn synthesize_stack(
        &self,
        app_dir: &Path,
        stack: &str,
        cloud: &CloudContext,
    ) -> AphexResult<PathBuf> {
        if !app_dir.is_dir() {
            return Err(AphexError::StackSynthesis {
                stack: stack.to_string(),
                message: format!("CDK app directory not found: {}", app_dir.display()),
            });
        }

        if app_dir.join("package.json").exists() {
            tracing::info!("Installing dependencies in {}", app_dir.display());
            let output = self
                .runner
                .run(&Invocation::new("npm", app_dir).arg("install"))
                .await?;
            if !output.success() {
                return Err(AphexError::StackSynthesis {
                    stack: stack.to_string(),
                    message: format!("npm install failed: {}", output.stderr.trim()),
                });
            }
        }

        // Never reuse an assembly from an earlier synthesis
        let assembly = app_dir.join(ASSEMBLY_ROOT).join(stack);
        if assembly.exists() {
            std::fs::remove_dir_all(&assembly)?;
        }

        let inv = Invocation::new("npx", app_dir)
            .args(["cdk", "synth", stack, "--quiet", "--output"])
            .arg(assembly.to_string_lossy())
            .envs(&cloud.env());

        let output = self.runner.run(&inv).await?;
        if !output.success() {
            return Err(AphexError::StackSynthesis {
                stack: stack.to_string(),
                message: output.stderr.trim().to_string(),
            });
        }

        Ok(assembly)
    }

    async fn deploy_stack(
        &self,
        app_dir: &Path,
        assembly: &Path,
        stack: &str,
        cloud: &CloudContext,
        role_arn: Option<&str>,
    ) -> AphexResult<()> {
        let mut inv = Invocation::new("npx", app_dir)
            .args(["cdk", "deploy", stack, "--app"])
            .arg(assembly.to_string_lossy())
            .args(["--require-approval", "never"]);

        if let Some(role_arn) = role_arn {
            inv = inv.args(["--role-arn", role_arn]);
        }

        let output = self.runner.run(&inv.envs(&cloud.env())).await?;
        if !output.success() {
            return Err(AphexError::StackDeployment {
                stack: stack.to_string(),
                message: format!(
                    "cdk deploy exited with code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }

        Ok(())
    }

    async fn describe_stack_outputs(
        &self,
        stack: &str,
        cloud: &CloudContext,
    ) -> AphexResult<Vec<StackOutput>> {
        let json = self
            .cloudformation(cloud, &["describe-stacks", "--stack-name", stack], stack)
            .await?;
        parse_outputs(&json)
    }

    async fn describe_stack_failure_events(
        &self,
        stack: &str,
        cloud: &CloudContext,
    ) -> AphexResult<Vec<StackEvent>> {
        let json = self
            .cloudformation(
                cloud,
                &["describe-stack-events", "--stack-name", stack],
                stack,
            )
            .await?;
        parse_failure_events(&json)
    }
}
