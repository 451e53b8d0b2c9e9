// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Workflow-engine manifest
//!
//! Serializes a topology into an Argo `WorkflowTemplate`. Every container runs
//! `aphex stage <kind>` with the node's inputs as flags and writes each output
//! to a file under [`OUTPUTS_DIR`], which the engine picks up.

use serde::Serialize;

use super::{StageKind, StageNode, WorkflowTopology};
use crate::artifacts::digest_bytes;
use crate::errors::AphexResult;
use crate::settings::ManifestSettings;

/// Directory inside stage containers that receives output parameter files
pub const OUTPUTS_DIR: &str = "/tmp/aphex-outputs";

const API_VERSION: &str = "argoproj.io/v1alpha1";
const KIND: &str = "WorkflowTemplate";
const ENTRYPOINT: &str = "main";

/// Argo `WorkflowTemplate`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: Spec,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    pub service_account_name: String,
    pub entrypoint: String,
    pub arguments: Parameters,
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Parameters {
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFrom>,
}

impl Parameter {
    fn declared(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            value_from: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValueFrom {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Parameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Parameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Vec<Step>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub template: String,
    pub arguments: Parameters,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Container {
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl WorkflowManifest {
    /// Build the manifest of a topology
    pub fn from_topology(topology: &WorkflowTopology, settings: &ManifestSettings) -> Self {
        // One outer step per node: nodes run strictly one after another
        let steps = topology
            .nodes()
            .map(|node| {
                vec![Step {
                    name: node.name.clone(),
                    template: node.name.clone(),
                    arguments: Parameters {
                        parameters: node
                            .inputs
                            .iter()
                            .map(|b| Parameter {
                                name: b.name.clone(),
                                value: Some(b.source.expression()),
                                value_from: None,
                            })
                            .collect(),
                    },
                }]
            })
            .collect();

        let mut templates = vec![Template {
            name: ENTRYPOINT.to_string(),
            inputs: None,
            outputs: None,
            steps: Some(steps),
            container: None,
        }];
        templates.extend(
            topology
                .nodes()
                .map(|node| Self::stage_template(node, topology.artifact_bucket(), settings)),
        );

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: Metadata {
                name: settings.template_name.clone(),
                namespace: settings.namespace.clone(),
            },
            spec: Spec {
                service_account_name: settings.service_account.clone(),
                entrypoint: ENTRYPOINT.to_string(),
                arguments: Parameters {
                    parameters: topology
                        .parameters()
                        .iter()
                        .map(|p| Parameter::declared(p))
                        .collect(),
                },
                templates,
            },
        }
    }

    fn stage_template(node: &StageNode, bucket: &str, settings: &ManifestSettings) -> Template {
        let mut args = vec!["stage".to_string(), node.kind.to_string()];
        if let Some(env) = &node.environment {
            args.push("--environment".into());
            args.push(env.clone());
        }
        for binding in &node.inputs {
            args.push(format!("--{}", binding.name));
            args.push(format!("{{{{inputs.parameters.{}}}}}", binding.name));
        }
        // Deploy reads artifacts from the same store the build published to
        if matches!(
            node.kind,
            StageKind::Build | StageKind::PipelineDeployment | StageKind::Deploy
        ) {
            args.push("--bucket".into());
            args.push(bucket.to_string());
        }
        args.push("--outputs-dir".into());
        args.push(OUTPUTS_DIR.to_string());

        let env = match node.kind {
            StageKind::Build => vec![EnvVar {
                name: "ARTIFACT_BUCKET".into(),
                value: bucket.to_string(),
            }],
            StageKind::Test => vec![EnvVar {
                name: "STACK_OUTPUTS".into(),
                value: "{{inputs.parameters.stack-outputs}}".into(),
            }],
            _ => vec![],
        };

        let outputs = if node.outputs.is_empty() {
            None
        } else {
            Some(Parameters {
                parameters: node
                    .outputs
                    .iter()
                    .map(|name| Parameter {
                        name: name.clone(),
                        value: None,
                        value_from: Some(ValueFrom {
                            path: format!("{}/{}", OUTPUTS_DIR, name),
                        }),
                    })
                    .collect(),
            })
        };

        Template {
            name: node.name.clone(),
            inputs: Some(Parameters {
                parameters: node
                    .inputs
                    .iter()
                    .map(|b| Parameter::declared(&b.name))
                    .collect(),
            }),
            outputs,
            steps: None,
            container: Some(Container {
                image: settings.image.clone(),
                command: vec!["aphex".into()],
                args,
                env,
            }),
        }
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> AphexResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Digest of the rendered manifest
    pub fn digest(&self) -> AphexResult<String> {
        Ok(digest_bytes(self.to_yaml()?.as_bytes()))
    }

    /// Names of the per-stage templates
    pub fn stage_templates(&self) -> Vec<&str> {
        self.spec
            .templates
            .iter()
            .filter(|t| t.container.is_some())
            .map(|t| t.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::topology::TopologyGenerator;

    fn manifest() -> WorkflowManifest {
        let config = Configuration::from_yaml(
            r#"
build:
  commands: [make]
environments:
  - name: dev
    region: us-east-1
    account: "111111111111"
    stacks: [{name: A}]
    tests:
      commands: [make smoke]
"#,
        )
        .unwrap();
        let topology = TopologyGenerator::generate(&config, "my-artifacts").unwrap();
        WorkflowManifest::from_topology(&topology, &ManifestSettings::default())
    }

    #[test]
    fn test_manifest_shape() {
        let m = manifest();
        assert_eq!(m.kind, "WorkflowTemplate");
        assert_eq!(m.metadata.name, "aphex-pipeline-template");
        assert_eq!(m.spec.entrypoint, "main");
        assert_eq!(
            m.stage_templates(),
            vec!["build", "pipeline-deployment", "deploy-dev", "test-dev"]
        );

        let main = &m.spec.templates[0];
        let steps = main.steps.as_ref().unwrap();
        assert_eq!(steps.len(), 4);
        assert!(steps.iter().all(|group| group.len() == 1));
    }

    #[test]
    fn test_yaml_bindings() {
        let yaml = manifest().to_yaml().unwrap();
        assert!(yaml.contains("apiVersion: argoproj.io/v1alpha1"));
        assert!(yaml.contains("serviceAccountName: workflow-executor"));
        assert!(yaml.contains("{{steps.build.outputs.parameters.artifact-path}}"));
        assert!(yaml.contains("{{steps.deploy-dev.outputs.parameters.stack-outputs}}"));
        assert!(yaml.contains("path: /tmp/aphex-outputs/stack-outputs"));
        assert!(yaml.contains("my-artifacts"));
    }

    #[test]
    fn test_digest_is_reproducible() {
        assert_eq!(manifest().digest().unwrap(), manifest().digest().unwrap());
    }

    #[test]
    fn test_container_args() {
        let m = manifest();
        let deploy = m
            .spec
            .templates
            .iter()
            .find(|t| t.name == "deploy-dev")
            .unwrap();
        let args = &deploy.container.as_ref().unwrap().args;
        assert_eq!(&args[..4], &["stage", "deploy", "--environment", "dev"]);
        assert!(args.contains(&"{{inputs.parameters.artifact-path}}".to_string()));
        let bucket = args.iter().position(|a| a == "--bucket").unwrap();
        assert_eq!(args[bucket + 1], "my-artifacts");
    }
}
