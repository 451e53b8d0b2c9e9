// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Ordered stack deployment
//!
//! Stacks of one environment are synthesized and deployed strictly in list
//! order. The first failure halts the environment; later stacks are never
//! attempted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use super::StageError;
use crate::config::{Environment, Stack};
use crate::errors::{AphexError, AphexResult, ErrorKind};
use crate::providers::{
    emit_metric, CloudContext, MetricsSink, StackEvent, StackOutput, StackToolkit,
};

/// Status of one stack or a whole environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Succeeded,
    Failed,
}

impl DeploymentStatus {
    fn metric_label(self) -> &'static str {
        match self {
            Self::Succeeded => "Success",
            Self::Failed => "Failed",
        }
    }
}

/// One deploy attempt of one stack; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDeploymentResult {
    pub stack_name: String,
    pub status: DeploymentStatus,
    pub outputs: Vec<StackOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_events: Vec<StackEvent>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl StackDeploymentResult {
    pub fn succeeded(&self) -> bool {
        self.status == DeploymentStatus::Succeeded
    }
}

/// Captured output value in the consolidated outputs document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: String,
    pub description: Option<String>,
    pub export_name: Option<String>,
}

/// `stack_name -> output_key -> value`
pub type ConsolidatedOutputs = BTreeMap<String, BTreeMap<String, OutputValue>>;

/// Stack results of one environment, in deployment order
///
/// Fail-fast is part of the type: once a failed stack is recorded, nothing
/// more can be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDeploymentResult {
    environment: String,
    region: String,
    account: String,
    stack_results: Vec<StackDeploymentResult>,
    status: DeploymentStatus,
}

impl EnvironmentDeploymentResult {
    pub fn new(env: &Environment) -> Self {
        Self {
            environment: env.name.clone(),
            region: env.region.clone(),
            account: env.account.clone(),
            stack_results: Vec::new(),
            status: DeploymentStatus::Succeeded,
        }
    }

    /// Append a stack result; rejected once the environment has failed
    pub fn record(&mut self, result: StackDeploymentResult) -> AphexResult<()> {
        if self.status == DeploymentStatus::Failed {
            return Err(AphexError::InvalidTransition {
                stage: self.environment.clone(),
                from: "failed".into(),
                to: format!("deploying {}", result.stack_name),
            });
        }
        if !result.succeeded() {
            self.status = DeploymentStatus::Failed;
        }
        self.stack_results.push(result);
        Ok(())
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn succeeded(&self) -> bool {
        self.status == DeploymentStatus::Succeeded
    }

    pub fn stack_results(&self) -> &[StackDeploymentResult] {
        &self.stack_results
    }

    /// The stack that halted the environment
    pub fn failed_stack(&self) -> Option<&StackDeploymentResult> {
        self.stack_results.iter().find(|r| !r.succeeded())
    }

    /// Outputs of every successfully deployed stack
    pub fn consolidated_outputs(&self) -> ConsolidatedOutputs {
        self.stack_results
            .iter()
            .filter(|r| r.succeeded())
            .map(|r| {
                let outputs = r
                    .outputs
                    .iter()
                    .map(|o| {
                        (
                            o.key.clone(),
                            OutputValue {
                                value: o.value.clone(),
                                description: o.description.clone(),
                                export_name: o.export_name.clone(),
                            },
                        )
                    })
                    .collect();
                (r.stack_name.clone(), outputs)
            })
            .collect()
    }
}

/// Deploys the stacks of one environment
pub struct StackDeployer<'a> {
    toolkit: &'a dyn StackToolkit,
    metrics: &'a dyn MetricsSink,
}

impl<'a> StackDeployer<'a> {
    pub fn new(toolkit: &'a dyn StackToolkit, metrics: &'a dyn MetricsSink) -> Self {
        Self { toolkit, metrics }
    }

    /// Deploy `env.stacks` in order from the checkout at `repo_root`
    ///
    /// Only a precondition violation is an error; stack failures are
    /// reported in the returned result.
    pub async fn deploy_stacks(
        &self,
        env: &Environment,
        repo_root: &Path,
        cloud: &CloudContext,
        role_arn: Option<&str>,
    ) -> AphexResult<EnvironmentDeploymentResult> {
        if env.stacks.is_empty() {
            return Err(AphexError::NoStacksConfigured {
                environment: env.name.clone(),
            });
        }

        let mut outcome = EnvironmentDeploymentResult::new(env);

        for (i, stack) in env.stacks.iter().enumerate() {
            tracing::info!(
                "Deploying stack {}/{}: {} to {}",
                i + 1,
                env.stacks.len(),
                stack.name,
                env.name
            );

            let result = self.deploy_one(stack, repo_root, cloud, role_arn).await;
            self.emit_metrics(env, &result).await;

            let failed = !result.succeeded();
            outcome.record(result)?;

            if failed {
                let remaining = env.stacks.len() - i - 1;
                if remaining > 0 {
                    tracing::warn!(
                        "Halting {}: {} remaining stack(s) not attempted",
                        env.name,
                        remaining
                    );
                }
                break;
            }
        }

        Ok(outcome)
    }

    async fn deploy_one(
        &self,
        stack: &Stack,
        repo_root: &Path,
        cloud: &CloudContext,
        role_arn: Option<&str>,
    ) -> StackDeploymentResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let app_dir = stack.app_dir(repo_root);

        // Fresh synthesis for every deploy; assemblies are never reused
        let attempt = async {
            let assembly = self
                .toolkit
                .synthesize_stack(&app_dir, &stack.name, cloud)
                .await?;
            self.toolkit
                .deploy_stack(&app_dir, &assembly, &stack.name, cloud, role_arn)
                .await
        }
        .await;

        let (status, outputs, error, failure_events) = match attempt {
            Ok(()) => {
                let outputs = match self.toolkit.describe_stack_outputs(&stack.name, cloud).await {
                    Ok(outputs) => outputs,
                    Err(e) => {
                        tracing::warn!("Could not read outputs of {}: {}", stack.name, e);
                        Vec::new()
                    }
                };
                if outputs.is_empty() {
                    tracing::info!("Stack {} has no outputs", stack.name);
                }
                tracing::info!("Stack {} deployed", stack.name);
                (DeploymentStatus::Succeeded, outputs, None, Vec::new())
            }
            Err(e) => {
                tracing::error!("Stack {} failed: {}", stack.name, e);
                let events = if e.kind() == ErrorKind::StackDeployment {
                    self.failure_events(&stack.name, cloud).await
                } else {
                    Vec::new()
                };
                (
                    DeploymentStatus::Failed,
                    Vec::new(),
                    Some(StageError::from(&e)),
                    events,
                )
            }
        };

        StackDeploymentResult {
            stack_name: stack.name.clone(),
            status,
            outputs,
            error,
            failure_events,
            started_at,
            duration_seconds: clock.elapsed().as_secs_f64(),
        }
    }

    async fn failure_events(&self, stack: &str, cloud: &CloudContext) -> Vec<StackEvent> {
        match self.toolkit.describe_stack_failure_events(stack, cloud).await {
            Ok(events) => {
                for event in &events {
                    tracing::error!(
                        "  {} {} {}: {}",
                        event.logical_resource_id,
                        event.resource_type,
                        event.resource_status,
                        event.resource_status_reason
                    );
                }
                events
            }
            Err(e) => {
                tracing::warn!("Could not read failure events of {}: {}", stack, e);
                Vec::new()
            }
        }
    }

    async fn emit_metrics(&self, env: &Environment, result: &StackDeploymentResult) {
        let dimensions = [
            ("StackName", result.stack_name.as_str()),
            ("Status", result.status.metric_label()),
            ("Environment", env.name.as_str()),
        ];
        emit_metric(self.metrics, "DeploymentCount", 1.0, &dimensions).await;
        emit_metric(
            self.metrics,
            "DeploymentDuration",
            result.duration_seconds,
            &dimensions,
        )
        .await;
    }
}
