// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Run aggregation
//!
//! Collects stage results as a run progresses, resolves the inputs of the
//! next node and rolls everything up into the run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{AphexError, AphexResult};
use crate::stages::{ConsolidatedOutputs, StageDetails, StageResult};
use crate::topology::{ParameterSource, StageKind, StageNode, WorkflowTopology};

/// Roll-up status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What happened to one node of the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Failed,
    /// Never ran because an earlier stage failed
    Skipped,
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub name: String,
    pub kind: StageKind,
    pub outcome: StageOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `run-summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub commit_sha: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub stages: Vec<StageSummary>,
}

impl RunSummary {
    pub fn count(&self, outcome: StageOutcome) -> usize {
        self.stages.iter().filter(|s| s.outcome == outcome).count()
    }
}

/// Stage results of one run, in the order they were recorded
#[derive(Debug, Default)]
pub struct RunAggregator {
    parameters: BTreeMap<String, String>,
    results: Vec<StageResult>,
}

impl RunAggregator {
    /// `parameters` are the workflow parameters the run was submitted with
    pub fn new(parameters: BTreeMap<String, String>) -> Self {
        Self {
            parameters,
            results: Vec::new(),
        }
    }

    /// Record a finished stage; each stage is recorded once
    pub fn record(&mut self, result: StageResult) -> AphexResult<()> {
        if let Some(existing) = self.result(&result.stage_name) {
            return Err(AphexError::InvalidTransition {
                stage: result.stage_name.clone(),
                from: existing.status.to_string(),
                to: result.status.to_string(),
            });
        }
        self.results.push(result);
        Ok(())
    }

    pub fn result(&self, stage: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage_name == stage)
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<StageResult> {
        self.results
    }

    /// Values for every input of `node`
    pub fn resolve_inputs(&self, node: &StageNode) -> AphexResult<BTreeMap<String, String>> {
        let mut inputs = BTreeMap::new();

        for binding in &node.inputs {
            let value = match &binding.source {
                ParameterSource::Workflow { parameter } => self.parameters.get(parameter),
                ParameterSource::StageOutput { stage, output } => self
                    .result(stage)
                    .filter(|r| r.succeeded())
                    .and_then(|r| r.outputs.get(output)),
            };

            let value = value.ok_or_else(|| AphexError::UnresolvedInput {
                stage: node.name.clone(),
                parameter: binding.name.clone(),
            })?;
            inputs.insert(binding.name.clone(), value.clone());
        }

        Ok(inputs)
    }

    /// Status of a run expected to record `expected` stages
    pub fn status(&self, expected: usize) -> RunStatus {
        if self.results.iter().any(|r| !r.succeeded()) {
            RunStatus::Failed
        } else if self.results.is_empty() {
            RunStatus::Pending
        } else if self.results.len() >= expected {
            RunStatus::Succeeded
        } else {
            RunStatus::Running
        }
    }

    /// Stack outputs of every deploy stage, keyed by environment
    pub fn consolidated_outputs(&self) -> BTreeMap<String, ConsolidatedOutputs> {
        self.results
            .iter()
            .filter_map(|r| match &r.details {
                Some(StageDetails::Deploy(deployment)) => Some((
                    deployment.environment().to_string(),
                    deployment.consolidated_outputs(),
                )),
                _ => None,
            })
            .collect()
    }

    /// Summary over every node of `topology`; nodes never recorded are skipped
    pub fn summarize(
        &self,
        topology: &WorkflowTopology,
        run_id: &str,
        commit_sha: &str,
        started_at: DateTime<Utc>,
    ) -> RunSummary {
        let stages: Vec<StageSummary> = topology
            .nodes()
            .map(|node| match self.result(&node.name) {
                Some(result) => StageSummary {
                    name: node.name.clone(),
                    kind: node.kind,
                    outcome: if result.succeeded() {
                        StageOutcome::Succeeded
                    } else {
                        StageOutcome::Failed
                    },
                    duration_seconds: Some(result.duration_seconds),
                    error: result.error_message().map(str::to_string),
                },
                None => StageSummary {
                    name: node.name.clone(),
                    kind: node.kind,
                    outcome: StageOutcome::Skipped,
                    duration_seconds: None,
                    error: None,
                },
            })
            .collect();

        let finished_at = Utc::now();
        RunSummary {
            run_id: run_id.to_string(),
            commit_sha: commit_sha.to_string(),
            status: self.status(stages.len()),
            started_at,
            finished_at,
            duration_seconds: (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
            stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::stages::StageExecution;
    use crate::topology::{
        TopologyGenerator, BUILD_STAGE, OUTPUT_ARTIFACT_PATH, PARAM_COMMIT_SHA, PARAM_REPO_URL,
    };

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    fn topology() -> WorkflowTopology {
        let config = Configuration::from_yaml(
            r#"
environments:
  - name: dev
    region: us-east-1
    account: "111111111111"
    stacks: [{name: App}]
    tests:
      commands: [make smoke]
"#,
        )
        .unwrap();
        TopologyGenerator::generate(&config, "artifacts").unwrap()
    }

    fn aggregator() -> RunAggregator {
        let mut params = BTreeMap::new();
        params.insert(PARAM_COMMIT_SHA.to_string(), SHA.to_string());
        params.insert(PARAM_REPO_URL.to_string(), "https://example.com/app.git".to_string());
        RunAggregator::new(params)
    }

    fn succeeded(name: &str, kind: StageKind, outputs: &[(&str, &str)]) -> StageResult {
        let mut exec = StageExecution::new(name, kind, SHA);
        exec.start().unwrap();
        for (k, v) in outputs {
            exec.set_output(k, *v).unwrap();
        }
        exec.succeed(None)
    }

    #[test]
    fn test_resolves_workflow_and_stage_inputs() {
        let topology = topology();
        let mut agg = aggregator();
        agg.record(succeeded(
            BUILD_STAGE,
            StageKind::Build,
            &[(OUTPUT_ARTIFACT_PATH, "s3://a/sha/")],
        ))
        .unwrap();

        let inputs = agg.resolve_inputs(topology.node("deploy-dev").unwrap()).unwrap();
        assert_eq!(inputs[PARAM_COMMIT_SHA], SHA);
        assert_eq!(inputs[OUTPUT_ARTIFACT_PATH], "s3://a/sha/");
    }

    #[test]
    fn test_missing_output_is_unresolved() {
        let topology = topology();
        let agg = aggregator();

        let err = agg
            .resolve_inputs(topology.node("test-dev").unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            AphexError::UnresolvedInput { ref parameter, .. } if parameter == "stack-outputs"
        ));
    }

    #[test]
    fn test_duplicate_record_is_rejected() {
        let mut agg = aggregator();
        agg.record(succeeded(BUILD_STAGE, StageKind::Build, &[])).unwrap();
        assert!(agg.record(succeeded(BUILD_STAGE, StageKind::Build, &[])).is_err());
        assert_eq!(agg.results().len(), 1);
    }

    #[test]
    fn test_status_roll_up() {
        let mut agg = aggregator();
        assert_eq!(agg.status(2), RunStatus::Pending);

        agg.record(succeeded(BUILD_STAGE, StageKind::Build, &[])).unwrap();
        assert_eq!(agg.status(2), RunStatus::Running);

        let mut exec =
            StageExecution::new("pipeline-deployment", StageKind::PipelineDeployment, SHA);
        exec.start().unwrap();
        agg.record(exec.fail(
            &AphexError::TopologyGeneration {
                reason: "no bucket".into(),
            },
            None,
        ))
        .unwrap();
        assert_eq!(agg.status(2), RunStatus::Failed);
    }

    #[test]
    fn test_summary_marks_unrecorded_stages_skipped() {
        let topology = topology();
        let mut agg = aggregator();
        agg.record(succeeded(BUILD_STAGE, StageKind::Build, &[])).unwrap();

        let summary = agg.summarize(&topology, "run-1", SHA, Utc::now());
        assert_eq!(summary.stages.len(), 4);
        assert_eq!(summary.count(StageOutcome::Succeeded), 1);
        assert_eq!(summary.count(StageOutcome::Skipped), 3);
        assert_eq!(summary.status, RunStatus::Running);
    }
}
