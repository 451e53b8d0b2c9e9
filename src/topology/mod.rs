// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Workflow topology
//!
//! A topology is the typed stage graph compiled from one configuration:
//! ordered step groups of stage nodes, each node declaring where its inputs
//! come from and which outputs it produces. It is validated when it is built,
//! so anything holding a [`WorkflowTopology`] holds a consistent one.

mod dag;
mod generator;
mod manifest;

pub use dag::StageGraph;
pub use generator::TopologyGenerator;
pub use manifest::WorkflowManifest;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::Configuration;
use crate::errors::{AphexError, AphexResult};

/// Workflow parameter carrying the pinned commit
pub const PARAM_COMMIT_SHA: &str = "commit-sha";
/// Workflow parameter carrying the clone URL
pub const PARAM_REPO_URL: &str = "repo-url";
/// Workflow parameter carrying the pushed branch
pub const PARAM_BRANCH: &str = "branch";

/// Build output: location of published artifacts
pub const OUTPUT_ARTIFACT_PATH: &str = "artifact-path";
/// Deploy output: consolidated stack outputs document
pub const OUTPUT_STACK_OUTPUTS: &str = "stack-outputs";
/// Pipeline-deployment output: digest of the regenerated manifest
pub const OUTPUT_TOPOLOGY_DIGEST: &str = "topology-digest";

/// Name of the build stage
pub const BUILD_STAGE: &str = "build";
/// Name of the pipeline-deployment stage
pub const PIPELINE_DEPLOYMENT_STAGE: &str = "pipeline-deployment";

/// Kind of a stage node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Build,
    PipelineDeployment,
    Deploy,
    Test,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::PipelineDeployment => write!(f, "pipeline-deployment"),
            Self::Deploy => write!(f, "deploy"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Where an input parameter's value comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "from", rename_all = "kebab-case")]
pub enum ParameterSource {
    /// A parameter supplied when the workflow is submitted
    Workflow { parameter: String },
    /// An output of an earlier stage
    StageOutput { stage: String, output: String },
}

impl ParameterSource {
    /// Workflow-engine expression for this source
    pub fn expression(&self) -> String {
        match self {
            Self::Workflow { parameter } => format!("{{{{workflow.parameters.{}}}}}", parameter),
            Self::StageOutput { stage, output } => {
                format!("{{{{steps.{}.outputs.parameters.{}}}}}", stage, output)
            }
        }
    }
}

/// A named input and its source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParameterBinding {
    pub name: String,
    pub source: ParameterSource,
}

impl ParameterBinding {
    pub fn workflow(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: ParameterSource::Workflow {
                parameter: name.to_string(),
            },
        }
    }

    pub fn stage_output(name: &str, stage: &str) -> Self {
        Self {
            name: name.to_string(),
            source: ParameterSource::StageOutput {
                stage: stage.to_string(),
                output: name.to_string(),
            },
        }
    }
}

/// One stage of the workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageNode {
    pub name: String,
    pub kind: StageKind,
    /// Environment a deploy or test node belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub inputs: Vec<ParameterBinding>,
    pub outputs: Vec<String>,
}

impl StageNode {
    /// Binding of a named input
    pub fn input(&self, name: &str) -> Option<&ParameterBinding> {
        self.inputs.iter().find(|b| b.name == name)
    }

    /// Names of stages whose outputs this node consumes
    pub fn upstream_stages(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().filter_map(|b| match &b.source {
            ParameterSource::StageOutput { stage, .. } => Some(stage.as_str()),
            ParameterSource::Workflow { .. } => None,
        })
    }
}

/// Sequential run of stage nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepGroup {
    pub name: String,
    pub nodes: Vec<StageNode>,
}

/// Ordered stage graph compiled from one configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowTopology {
    artifact_bucket: String,
    parameters: Vec<String>,
    groups: Vec<StepGroup>,
}

impl WorkflowTopology {
    /// Assemble a topology, rejecting any that does not match `config`
    pub(crate) fn validated(
        config: &Configuration,
        artifact_bucket: &str,
        parameters: Vec<String>,
        groups: Vec<StepGroup>,
    ) -> AphexResult<Self> {
        let topology = Self {
            artifact_bucket: artifact_bucket.to_string(),
            parameters,
            groups,
        };

        topology.check_bindings()?;
        topology.check_correspondence(config)?;
        Ok(topology)
    }

    /// Every binding must name a workflow parameter or an output declared by
    /// an earlier node; node names must be unique.
    fn check_bindings(&self) -> AphexResult<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut available: HashSet<(&str, &str)> = HashSet::new();

        for node in self.nodes() {
            if !seen.insert(node.name.as_str()) {
                return Err(AphexError::TopologyGeneration {
                    reason: format!("duplicate stage name '{}'", node.name),
                });
            }

            for binding in &node.inputs {
                let resolvable = match &binding.source {
                    ParameterSource::Workflow { parameter } => {
                        self.parameters.iter().any(|p| p == parameter)
                    }
                    ParameterSource::StageOutput { stage, output } => {
                        available.contains(&(stage.as_str(), output.as_str()))
                    }
                };
                if !resolvable {
                    return Err(AphexError::TopologyGeneration {
                        reason: format!(
                            "input '{}' of stage '{}' refers to {:?}, which no earlier stage provides",
                            binding.name, node.name, binding.source
                        ),
                    });
                }
            }

            for output in &node.outputs {
                available.insert((node.name.as_str(), output.as_str()));
            }
        }

        Ok(())
    }

    fn check_correspondence(&self, config: &Configuration) -> AphexResult<()> {
        let deploys = self.count(StageKind::Deploy);
        let tests = self.count(StageKind::Test);
        let builds = self.count(StageKind::Build);
        let pipeline_deployments = self.count(StageKind::PipelineDeployment);

        if builds != 1 || pipeline_deployments != 1 {
            return Err(AphexError::TopologyGeneration {
                reason: format!(
                    "expected one build and one pipeline-deployment stage, found {} and {}",
                    builds, pipeline_deployments
                ),
            });
        }
        if deploys != config.environments.len() {
            return Err(AphexError::TopologyGeneration {
                reason: format!(
                    "{} deploy stages for {} environments",
                    deploys,
                    config.environments.len()
                ),
            });
        }
        if tests != config.tested_environment_count() {
            return Err(AphexError::TopologyGeneration {
                reason: format!(
                    "{} test stages for {} tested environments",
                    tests,
                    config.tested_environment_count()
                ),
            });
        }

        Ok(())
    }

    /// Artifact bucket the build publishes to
    pub fn artifact_bucket(&self) -> &str {
        &self.artifact_bucket
    }

    /// Parameters supplied when the workflow is submitted
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn groups(&self) -> &[StepGroup] {
        &self.groups
    }

    /// All nodes in execution order
    pub fn nodes(&self) -> impl Iterator<Item = &StageNode> {
        self.groups.iter().flat_map(|g| g.nodes.iter())
    }

    pub fn node(&self, name: &str) -> Option<&StageNode> {
        self.nodes().find(|n| n.name == name)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.nodes().map(|n| n.name.as_str()).collect()
    }

    /// Number of nodes of one kind
    pub fn count(&self, kind: StageKind) -> usize {
        self.nodes().filter(|n| n.kind == kind).count()
    }

    pub fn deploy_count(&self) -> usize {
        self.count(StageKind::Deploy)
    }

    pub fn test_count(&self) -> usize {
        self.count(StageKind::Test)
    }
}
