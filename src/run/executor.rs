// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Local pipeline runner
//!
//! Executes a whole topology in-process, group by group, the way the
//! workflow engine would. The run halts at the first failed stage.

use chrono::Utc;
use colored::Colorize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{ResultStore, RunAggregator, RunStatus, RunSummary, StageOutcome, WorkflowMetadata};
use crate::config::RevisionRef;
use crate::errors::AphexResult;
use crate::providers::{emit_metric, notify, Providers};
use crate::settings::Settings;
use crate::stages::{run_node, StageContext, StageExecution, StageResult};
use crate::topology::{
    StageGraph, WorkflowTopology, PARAM_BRANCH, PARAM_COMMIT_SHA, PARAM_REPO_URL,
};

/// Run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only show what would be done
    pub dry_run: bool,
    /// Print stage errors as they happen
    pub verbose: bool,
    /// Branch the revision came from
    pub branch: Option<String>,
    /// Fixed run identifier; a fresh one is generated otherwise
    pub run_id: Option<String>,
}

/// Result of one run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    /// Results of the stages that ran, in order
    pub results: Vec<StageResult>,
    /// Absent for dry runs
    pub summary: Option<RunSummary>,
    pub duration: Duration,
    pub success: bool,
}

/// In-process pipeline runner
pub struct PipelineRunner {
    settings: Settings,
    providers: Providers,
}

impl PipelineRunner {
    pub fn new(settings: Settings, providers: Providers) -> Self {
        Self {
            settings,
            providers,
        }
    }

    /// Run `topology` against `revision`
    pub async fn execute(
        &self,
        topology: &WorkflowTopology,
        revision: &RevisionRef,
        options: &RunOptions,
    ) -> AphexResult<RunReport> {
        let start = Instant::now();
        let started_at = Utc::now();

        let graph = StageGraph::build(topology)?;
        self.print_execution_plan(topology, &graph, revision)?;

        if options.dry_run {
            return Ok(RunReport {
                run_id: String::new(),
                results: Vec::new(),
                summary: None,
                duration: start.elapsed(),
                success: true,
            });
        }

        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let store = ResultStore::new(&self.settings.results_dir, &run_id);
        let ctx = StageContext::new(
            revision.clone(),
            self.settings.clone(),
            self.providers.clone(),
            store.clone(),
        );

        tracing::info!("Run {} started for {}", run_id, revision);
        let mut metadata = WorkflowMetadata::started(&run_id, revision, options.branch.as_deref());
        self.record_metadata(&metadata).await;

        let mut aggregator = RunAggregator::new(Self::parameters(revision, options));

        'groups: for group in topology.groups() {
            for node in &group.nodes {
                println!("  {} {}...", "→".blue(), node.name);

                let result = match aggregator.resolve_inputs(node) {
                    Ok(inputs) => run_node(&ctx, node, &inputs).await,
                    Err(e) => StageExecution::new(&node.name, node.kind, &revision.commit_sha)
                        .fail(&e, None),
                };

                if let Err(e) = store.write_stage_result(&result) {
                    tracing::warn!("Failed to persist result of {}: {}", node.name, e);
                }

                let failed = !result.succeeded();
                if failed {
                    println!("  {} {} failed", "✗".red(), node.name.bold());
                    if options.verbose {
                        if let Some(message) = result.error_message() {
                            eprintln!("{}", message.dimmed());
                        }
                    }
                } else {
                    println!(
                        "  {} {} ({:.2}s)",
                        "✓".green(),
                        node.name.bold(),
                        result.duration_seconds
                    );
                }

                aggregator.record(result)?;
                if failed {
                    break 'groups;
                }
            }
        }

        let summary = aggregator.summarize(topology, &run_id, &revision.commit_sha, started_at);
        for skipped in summary.stages.iter().filter(|s| s.outcome == StageOutcome::Skipped) {
            println!("  {} {} {}", "-".dimmed(), skipped.name, "(skipped)".dimmed());
        }

        store.persist_json("stack-outputs.json", &aggregator.consolidated_outputs());
        store.persist_json("run-summary.json", &summary);

        metadata.finish(&summary);
        self.record_metadata(&metadata).await;
        self.report_completion(&summary).await;

        let duration = start.elapsed();
        let success = summary.status == RunStatus::Succeeded;

        println!();
        if success {
            println!(
                "{}",
                format!("Pipeline completed successfully in {:.2}s", duration.as_secs_f64()).green()
            );
        } else {
            println!(
                "{}",
                format!("Pipeline failed after {:.2}s", duration.as_secs_f64()).red()
            );
        }

        Ok(RunReport {
            run_id,
            results: aggregator.into_results(),
            summary: Some(summary),
            duration,
            success,
        })
    }

    fn parameters(revision: &RevisionRef, options: &RunOptions) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert(PARAM_COMMIT_SHA.to_string(), revision.commit_sha.clone());
        params.insert(PARAM_REPO_URL.to_string(), revision.repo_url.clone());
        if let Some(branch) = &options.branch {
            params.insert(PARAM_BRANCH.to_string(), branch.clone());
        }
        params
    }

    async fn record_metadata(&self, metadata: &WorkflowMetadata) {
        if let Err(e) = metadata.record(self.providers.blobs.as_ref()).await {
            tracing::warn!("Failed to record metadata for run {}: {}", metadata.run_id, e);
        }
    }

    /// Workflow metrics and the completion notification; never fails the run
    async fn report_completion(&self, summary: &RunSummary) {
        let status = if summary.status == RunStatus::Succeeded {
            "Success"
        } else {
            "Failed"
        };
        let metrics = self.providers.metrics.as_ref();
        emit_metric(metrics, "WorkflowCount", 1.0, &[("Status", status)]).await;
        emit_metric(
            metrics,
            "WorkflowDuration",
            summary.duration_seconds,
            &[("Status", status)],
        )
        .await;

        let message = format!(
            "Run {} for {} {}: {} succeeded, {} failed, {} skipped",
            summary.run_id,
            summary.commit_sha,
            summary.status,
            summary.count(StageOutcome::Succeeded),
            summary.count(StageOutcome::Failed),
            summary.count(StageOutcome::Skipped)
        );
        notify(
            self.providers.notifier.as_ref(),
            &self.settings.notification_channel,
            &message,
        )
        .await;
    }

    fn print_execution_plan(
        &self,
        topology: &WorkflowTopology,
        graph: &StageGraph,
        revision: &RevisionRef,
    ) -> AphexResult<()> {
        let count = topology.nodes().count();

        println!();
        println!("{}: {}", "Revision".bold(), revision);
        println!("{}", "═".repeat(50));
        println!(
            "Execution plan ({} stage{}):",
            count,
            if count == 1 { "" } else { "s" }
        );
        println!();
        for line in graph.to_text()?.lines() {
            println!("  {}", line);
        }
        println!();

        Ok(())
    }

    /// External tools the process-backed collaborators need that are not on PATH
    pub fn missing_tools(&self) -> Vec<String> {
        let mut tools = vec!["git", "npx", "aws"];
        if self.settings.apply_with_kubectl {
            tools.push("kubectl");
        }

        tools
            .into_iter()
            .filter(|tool| which::which(tool).is_err())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::providers::fakes::FakeProviders;
    use crate::stages::StageStatus;
    use crate::topology::TopologyGenerator;
    use std::path::Path;

    const SHA: &str = "eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

    const CONFIG: &str = r#"
build:
  commands: ["true"]
environments:
  - name: dev
    region: us-east-1
    account: "111111111111"
    stacks: [{name: App}]
    tests:
      commands: ["true"]
  - name: prod
    region: eu-west-1
    account: "222222222222"
    stacks: [{name: App}]
"#;

    fn setup(root: &Path) -> (FakeProviders, PipelineRunner, WorkflowTopology, RevisionRef) {
        let fakes = FakeProviders::new("111111111111");
        fakes.source.add_revision(SHA, &[("aphex-config.yaml", CONFIG)]);
        fakes.toolkit.with_outputs("App", &[("ApiUrl", "https://api")]);

        let settings = Settings {
            workspace_dir: root.join("work"),
            results_dir: root.join("results"),
            artifact_bucket: Some("artifacts".into()),
            ..Settings::default()
        };
        let runner = PipelineRunner::new(settings, fakes.providers());

        let config = Configuration::from_yaml(CONFIG).unwrap();
        let topology = TopologyGenerator::generate(&config, "artifacts").unwrap();
        let revision = RevisionRef::new(SHA, "https://example.com/app.git").unwrap();
        (fakes, runner, topology, revision)
    }

    fn options() -> RunOptions {
        RunOptions {
            run_id: Some("run-1".into()),
            branch: Some("main".into()),
            ..RunOptions::default()
        }
    }

    #[tokio::test]
    async fn test_full_run() {
        let root = tempfile::tempdir().unwrap();
        let (fakes, runner, topology, revision) = setup(root.path());

        let report = runner.execute(&topology, &revision, &options()).await.unwrap();

        assert!(report.success);
        let names: Vec<&str> = report.results.iter().map(|r| r.stage_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["build", "pipeline-deployment", "deploy-dev", "test-dev", "deploy-prod"]
        );
        assert_eq!(fakes.applier.applied().len(), 1);

        let dir = root.path().join("results/run-1");
        for file in ["build.json", "test-dev.json", "stack-outputs.json", "run-summary.json"] {
            assert!(dir.join(file).exists(), "missing {}", file);
        }
        let outputs: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("stack-outputs.json")).unwrap())
                .unwrap();
        assert_eq!(outputs["prod"]["App"]["ApiUrl"]["value"], "https://api");

        let metadata = WorkflowMetadata::load(fakes.blobs.as_ref(), "run-1").await.unwrap();
        assert_eq!(metadata.status, RunStatus::Succeeded);

        let metrics = fakes.telemetry.metrics();
        assert!(metrics
            .iter()
            .any(|m| m.name == "WorkflowCount" && m.dimensions["Status"] == "Success"));
        assert_eq!(fakes.telemetry.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_stage_halts_run() {
        let root = tempfile::tempdir().unwrap();
        let (fakes, runner, topology, revision) = setup(root.path());
        fakes.toolkit.fail_deploy("App");

        let report = runner.execute(&topology, &revision, &options()).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results[2].status, StageStatus::Failed);
        // Only the dev stack was attempted
        assert_eq!(fakes.toolkit.deployed_stacks(), vec!["AphexPipelineStack", "App"]);

        let summary = report.summary.unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.count(StageOutcome::Skipped), 2);
        assert!(fakes.telemetry.notifications()[0].1.contains("2 skipped"));
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let root = tempfile::tempdir().unwrap();
        let (fakes, runner, topology, revision) = setup(root.path());

        let report = runner
            .execute(
                &topology,
                &revision,
                &RunOptions {
                    dry_run: true,
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(report.success);
        assert!(report.results.is_empty());
        assert!(fakes.source.checkouts().is_empty());
        assert!(fakes.blobs.keys().is_empty());
    }
}
