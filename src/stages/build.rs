// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Build stage
//!
//! Runs the configured build commands in order, stopping at the first
//! failure, then publishes the artifact directory under the commit SHA.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CommandResult, StageContext, StageDetails, StageExecution, StageResult};
use crate::artifacts::{self, diagnostics_key, ArtifactManifest};
use crate::errors::{AphexError, AphexResult};
use crate::topology::{StageKind, BUILD_STAGE, OUTPUT_ARTIFACT_PATH};

/// Build stage report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub commit_sha: String,
    pub timestamp: DateTime<Utc>,
    /// Commands that ran, in order; the last one failed if the build did
    pub commands: Vec<CommandResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactManifest>,
}

impl BuildReport {
    fn new(commit_sha: &str) -> Self {
        Self {
            commit_sha: commit_sha.to_string(),
            timestamp: Utc::now(),
            commands: Vec::new(),
            artifacts: None,
        }
    }
}

/// Build stage driver
pub struct BuildStage<'a> {
    ctx: &'a StageContext,
}

impl<'a> BuildStage<'a> {
    pub fn new(ctx: &'a StageContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self) -> StageResult {
        let mut exec = StageExecution::new(BUILD_STAGE, StageKind::Build, self.ctx.commit_sha());
        let mut report = BuildReport::new(self.ctx.commit_sha());

        match self.execute(&mut exec, &mut report).await {
            Ok(()) => exec.succeed(Some(StageDetails::Build(report))),
            Err(e) => {
                self.persist_diagnostics(&e).await;
                exec.fail(&e, Some(StageDetails::Build(report)))
            }
        }
    }

    async fn execute(
        &self,
        exec: &mut StageExecution,
        report: &mut BuildReport,
    ) -> AphexResult<()> {
        exec.start()?;
        let checkout = self.ctx.checkout(BUILD_STAGE).await?;
        let config = self.ctx.load_configuration(&checkout)?;

        if config.build.commands.is_empty() {
            tracing::warn!("No build commands configured");
        }

        for command in &config.build.commands {
            tracing::info!("Running build command: {}", command);
            let invocation = self.ctx.shell(command, &checkout);
            tracing::debug!("{:?}", invocation);

            let output = self.ctx.providers.runner.run(&invocation).await?;
            report.commands.push(CommandResult::from_output(command, &output));

            if !output.success() {
                return Err(AphexError::command_failed(
                    command,
                    output.exit_code,
                    &output.stdout,
                    &output.stderr,
                ));
            }
        }

        let artifact_dir = checkout.join(&self.ctx.settings.artifacts_dir);
        let manifest = artifacts::publish(
            self.ctx.providers.blobs.as_ref(),
            self.ctx.commit_sha(),
            &artifact_dir,
        )
        .await?;

        exec.set_output(OUTPUT_ARTIFACT_PATH, manifest.location.clone())?;
        report.artifacts = Some(manifest);
        Ok(())
    }

    /// Upload an error log next to (never inside) the artifact prefix
    async fn persist_diagnostics(&self, error: &AphexError) {
        let body = format!(
            "Build failed for commit {}\nTimestamp: {}\n\n{}\n",
            self.ctx.commit_sha(),
            Utc::now().to_rfc3339(),
            error.detailed_message()
        );

        let key = diagnostics_key(self.ctx.commit_sha(), "build-error.log");
        if let Err(e) = self
            .ctx
            .providers
            .blobs
            .put_blob(&key, body.clone().into_bytes())
            .await
        {
            tracing::warn!("Failed to upload build diagnostics: {}", e);
        }

        self.ctx.results.persist_text("build-error.log", &body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RevisionRef;
    use crate::errors::ErrorKind;
    use crate::providers::fakes::FakeProviders;
    use crate::run::ResultStore;
    use crate::settings::Settings;
    use std::path::Path;

    const SHA: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn context(fakes: &FakeProviders, root: &Path) -> StageContext {
        let settings = Settings {
            workspace_dir: root.join("work"),
            results_dir: root.join("results"),
            ..Settings::default()
        };
        let results = ResultStore::new(&settings.results_dir, "run-1");
        StageContext::new(
            RevisionRef::new(SHA, "https://example.com/app.git").unwrap(),
            settings,
            fakes.providers(),
            results,
        )
    }

    fn config(commands: &[&str]) -> String {
        let mut yaml = String::from("build:\n  commands:");
        if commands.is_empty() {
            yaml.push_str(" []\n");
        } else {
            yaml.push('\n');
            for c in commands {
                yaml.push_str(&format!("    - '{}'\n", c));
            }
        }
        yaml.push_str(
            "environments:\n  - name: dev\n    region: us-east-1\n    account: \"111111111111\"\n    stacks: [{name: App}]\n",
        );
        yaml
    }

    #[tokio::test]
    async fn test_build_publishes_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");
        let yaml = config(&["mkdir -p dist && echo built > dist/app.txt"]);
        fakes
            .source
            .add_revision(SHA, &[("aphex-config.yaml", yaml.as_str())]);

        let ctx = context(&fakes, root.path());
        let result = BuildStage::new(&ctx).run().await;

        assert!(result.succeeded(), "{:?}", result.error);
        assert_eq!(result.output(OUTPUT_ARTIFACT_PATH), Some(format!("mem://{}/", SHA).as_str()));
        assert_eq!(fakes.blobs.keys(), vec![format!("{}/app.txt", SHA)]);
    }

    #[tokio::test]
    async fn test_failing_command_writes_diagnostics() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");
        let yaml = config(&["echo oops >&2; exit 4"]);
        fakes
            .source
            .add_revision(SHA, &[("aphex-config.yaml", yaml.as_str())]);

        let ctx = context(&fakes, root.path());
        let result = BuildStage::new(&ctx).run().await;

        assert!(!result.succeeded());
        assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::CommandExecution);
        assert!(result.output(OUTPUT_ARTIFACT_PATH).is_none());
        assert_eq!(
            fakes.blobs.keys(),
            vec![format!("diagnostics/{}/build-error.log", SHA)]
        );

        let log = std::fs::read_to_string(ctx.results.dir().join("build-error.log")).unwrap();
        assert!(log.contains("Exit code: 4"));
        assert!(log.contains("oops"));
    }

    #[tokio::test]
    async fn test_empty_commands_and_empty_artifacts_succeed() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");
        let yaml = config(&[]);
        fakes
            .source
            .add_revision(SHA, &[("aphex-config.yaml", yaml.as_str())]);

        let ctx = context(&fakes, root.path());
        let result = BuildStage::new(&ctx).run().await;

        assert!(result.succeeded());
        match result.details {
            Some(StageDetails::Build(report)) => {
                assert!(report.commands.is_empty());
                assert!(report.artifacts.unwrap().is_empty());
            }
            other => panic!("unexpected details: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_commit_fails_checkout() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");

        let ctx = context(&fakes, root.path());
        let result = BuildStage::new(&ctx).run().await;

        assert_eq!(result.error.unwrap().kind, ErrorKind::RevisionCheckout);
        assert!(fakes
            .blobs
            .keys()
            .iter()
            .all(|k| !k.starts_with(&format!("{}/", SHA))));
    }
}
