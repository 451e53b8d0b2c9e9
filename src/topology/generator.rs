// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Topology generation
//!
//! Compiles a configuration into build → pipeline-deployment →
//! (deploy-<env> → test-<env>?)* in configuration order.

use super::*;
use crate::config::{Configuration, Environment};

/// Compiles configurations into workflow topologies
pub struct TopologyGenerator;

impl TopologyGenerator {
    /// Generate the topology for `config`
    ///
    /// Pure: the same configuration and bucket always yield an equal topology.
    pub fn generate(
        config: &Configuration,
        artifact_bucket: &str,
    ) -> AphexResult<WorkflowTopology> {
        if artifact_bucket.trim().is_empty() {
            return Err(AphexError::TopologyGeneration {
                reason: "artifact bucket reference is empty".into(),
            });
        }

        let revision_inputs = || {
            vec![
                ParameterBinding::workflow(PARAM_COMMIT_SHA),
                ParameterBinding::workflow(PARAM_REPO_URL),
            ]
        };

        let mut groups = vec![
            StepGroup {
                name: BUILD_STAGE.to_string(),
                nodes: vec![StageNode {
                    name: BUILD_STAGE.to_string(),
                    kind: StageKind::Build,
                    environment: None,
                    inputs: revision_inputs(),
                    outputs: vec![OUTPUT_ARTIFACT_PATH.to_string()],
                }],
            },
            StepGroup {
                name: PIPELINE_DEPLOYMENT_STAGE.to_string(),
                nodes: vec![StageNode {
                    name: PIPELINE_DEPLOYMENT_STAGE.to_string(),
                    kind: StageKind::PipelineDeployment,
                    environment: None,
                    inputs: revision_inputs(),
                    outputs: vec![OUTPUT_TOPOLOGY_DIGEST.to_string()],
                }],
            },
        ];

        groups.extend(
            config
                .environments
                .iter()
                .map(|env| Self::environment_group(env, revision_inputs())),
        );

        let topology = WorkflowTopology::validated(
            config,
            artifact_bucket,
            vec![
                PARAM_COMMIT_SHA.to_string(),
                PARAM_BRANCH.to_string(),
                PARAM_REPO_URL.to_string(),
            ],
            groups,
        )?;

        // Rejects cycles
        StageGraph::build(&topology)?;

        tracing::debug!(
            "Generated topology with {} deploy and {} test stages",
            topology.deploy_count(),
            topology.test_count()
        );

        Ok(topology)
    }

    fn environment_group(env: &Environment, revision_inputs: Vec<ParameterBinding>) -> StepGroup {
        let deploy_name = env.deploy_stage_name();

        let mut deploy_inputs = revision_inputs.clone();
        deploy_inputs.push(ParameterBinding::stage_output(OUTPUT_ARTIFACT_PATH, BUILD_STAGE));

        let mut nodes = vec![StageNode {
            name: deploy_name.clone(),
            kind: StageKind::Deploy,
            environment: Some(env.name.clone()),
            inputs: deploy_inputs,
            outputs: vec![OUTPUT_STACK_OUTPUTS.to_string()],
        }];

        if env.tests.is_some() {
            let mut test_inputs = revision_inputs;
            test_inputs.push(ParameterBinding::stage_output(OUTPUT_STACK_OUTPUTS, &deploy_name));

            nodes.push(StageNode {
                name: env.test_stage_name(),
                kind: StageKind::Test,
                environment: Some(env.name.clone()),
                inputs: test_inputs,
                outputs: vec![],
            });
        }

        StepGroup {
            name: format!("environment-{}", env.name),
            nodes,
        }
    }
}
