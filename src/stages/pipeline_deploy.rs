// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Pipeline-deployment stage
//!
//! Updates the pipeline's own infrastructure, regenerates the workflow
//! topology from the configuration at this revision and installs it for the
//! next run. The current run keeps executing the topology it started with.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{StageContext, StageDetails, StageExecution, StageResult};
use crate::config::Configuration;
use crate::errors::{AphexError, AphexResult};
use crate::providers::CloudContext;
use crate::topology::{
    StageKind, TopologyGenerator, WorkflowManifest, OUTPUT_TOPOLOGY_DIGEST,
    PIPELINE_DEPLOYMENT_STAGE,
};

/// Output of the pipeline stack that names the artifact bucket
pub const ARTIFACT_BUCKET_OUTPUT: &str = "ArtifactBucketName";

/// What happened to the pipeline's own infrastructure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InfrastructureOutcome {
    Deployed,
    /// Deployment failed and `continue_on_error` let the stage go on
    Continued { error: String },
}

/// Pipeline-deployment stage report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDeploymentReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<InfrastructureOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_digest: Option<String>,
}

/// Pipeline-deployment stage driver
pub struct PipelineDeploymentStage<'a> {
    ctx: &'a StageContext,
}

impl<'a> PipelineDeploymentStage<'a> {
    pub fn new(ctx: &'a StageContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self) -> StageResult {
        let mut exec = StageExecution::new(
            PIPELINE_DEPLOYMENT_STAGE,
            StageKind::PipelineDeployment,
            self.ctx.commit_sha(),
        );
        let mut report = PipelineDeploymentReport::default();

        match self.execute(&mut exec, &mut report).await {
            Ok(()) => exec.succeed(Some(StageDetails::PipelineDeployment(report))),
            Err(e) => exec.fail(&e, Some(StageDetails::PipelineDeployment(report))),
        }
    }

    async fn execute(
        &self,
        exec: &mut StageExecution,
        report: &mut PipelineDeploymentReport,
    ) -> AphexResult<()> {
        exec.start()?;
        let checkout = self.ctx.checkout(PIPELINE_DEPLOYMENT_STAGE).await?;

        let account = self.ctx.providers.identity.current_account().await?;
        let cloud = CloudContext::new(&self.ctx.settings.pipeline_region, &account);

        match self.deploy_infrastructure(&checkout, &cloud).await {
            Ok(()) => report.infrastructure = Some(InfrastructureOutcome::Deployed),
            Err(e) if self.ctx.settings.continue_on_error => {
                tracing::warn!(
                    "Pipeline infrastructure deployment failed, continuing with the existing topology: {}",
                    e
                );
                report.infrastructure = Some(InfrastructureOutcome::Continued {
                    error: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }

        let config = self.ctx.load_configuration(&checkout)?;
        let bucket = self.artifact_bucket(&cloud).await?;
        report.artifact_bucket = Some(bucket.clone());

        let digest = self.install_topology(&config, &bucket, report).await?;
        exec.set_output(OUTPUT_TOPOLOGY_DIGEST, digest)?;
        Ok(())
    }

    async fn deploy_infrastructure(
        &self,
        checkout: &Path,
        cloud: &CloudContext,
    ) -> AphexResult<()> {
        let settings = &self.ctx.settings;
        let app_dir = checkout.join(&settings.pipeline_stack_dir);
        let toolkit = &self.ctx.providers.toolkit;

        tracing::info!("Deploying pipeline stack {}", settings.pipeline_stack);
        let assembly = toolkit
            .synthesize_stack(&app_dir, &settings.pipeline_stack, cloud)
            .await?;
        toolkit
            .deploy_stack(&app_dir, &assembly, &settings.pipeline_stack, cloud, None)
            .await
    }

    /// Configured bucket, else the pipeline stack's bucket output
    async fn artifact_bucket(&self, cloud: &CloudContext) -> AphexResult<String> {
        if let Some(bucket) = &self.ctx.settings.artifact_bucket {
            return Ok(bucket.clone());
        }

        let outputs = self
            .ctx
            .providers
            .toolkit
            .describe_stack_outputs(&self.ctx.settings.pipeline_stack, cloud)
            .await?;

        outputs
            .into_iter()
            .find(|o| o.key == ARTIFACT_BUCKET_OUTPUT)
            .map(|o| o.value)
            .ok_or_else(|| AphexError::TopologyGeneration {
                reason: format!(
                    "stack {} has no {} output and no artifact bucket is configured",
                    self.ctx.settings.pipeline_stack, ARTIFACT_BUCKET_OUTPUT
                ),
            })
    }

    async fn install_topology(
        &self,
        config: &Configuration,
        bucket: &str,
        report: &mut PipelineDeploymentReport,
    ) -> AphexResult<String> {
        let topology = TopologyGenerator::generate(config, bucket)?;
        report.stages = topology.stage_names().iter().map(|s| s.to_string()).collect();

        let manifest = WorkflowManifest::from_topology(&topology, &self.ctx.settings.manifest);
        let yaml = manifest.to_yaml()?;
        let digest = manifest.digest()?;

        self.ctx.providers.applier.apply_topology(&yaml).await?;
        tracing::info!(
            "Installed topology with {} deploy and {} test stage(s) for the next run",
            topology.deploy_count(),
            topology.test_count()
        );

        self.ctx.results.persist_text("topology.yaml", &yaml);
        report.topology_digest = Some(digest.clone());
        Ok(digest)
    }
}
