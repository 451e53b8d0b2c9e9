// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Environment deploy stage

use chrono::Utc;
use serde_json::json;
use std::path::Path;

use super::{
    find_environment, AccessDecision, CrossAccountResolver, EnvironmentDeploymentResult,
    StackDeployer, StageContext, StageDetails, StageError, StageExecution, StageResult,
};
use crate::artifacts;
use crate::config::Environment;
use crate::errors::{AphexError, AphexResult};
use crate::topology::{StageKind, OUTPUT_STACK_OUTPUTS};

/// Qualifier of the CDK bootstrap roles
const BOOTSTRAP_QUALIFIER: &str = "hnb659fds";

/// CDK bootstrap deploy role of an environment
pub fn bootstrap_deploy_role(env: &Environment) -> String {
    format!(
        "arn:aws:iam::{}:role/cdk-{}-deploy-role-{}-{}",
        env.account, BOOTSTRAP_QUALIFIER, env.account, env.region
    )
}

/// Deploys every stack of one environment
pub struct EnvironmentDeployStage<'a> {
    ctx: &'a StageContext,
    environment: String,
    artifact_path: Option<String>,
}

impl<'a> EnvironmentDeployStage<'a> {
    pub fn new(ctx: &'a StageContext, environment: &str) -> Self {
        Self {
            ctx,
            environment: environment.to_string(),
            artifact_path: None,
        }
    }

    /// Location the build stage reported for its artifacts
    pub fn with_artifact_path(mut self, artifact_path: Option<String>) -> Self {
        self.artifact_path = artifact_path;
        self
    }

    fn stage_name(&self) -> String {
        format!("deploy-{}", self.environment)
    }

    pub async fn run(&self) -> StageResult {
        let mut exec =
            StageExecution::new(&self.stage_name(), StageKind::Deploy, self.ctx.commit_sha());
        let mut deployment = None;

        let outcome = self.execute(&mut exec, &mut deployment).await;
        let details = deployment.map(StageDetails::Deploy);

        match outcome {
            Ok(()) => exec.succeed(details),
            Err(e) => exec.fail_with(e, details),
        }
    }

    async fn execute(
        &self,
        exec: &mut StageExecution,
        deployment: &mut Option<EnvironmentDeploymentResult>,
    ) -> Result<(), StageError> {
        exec.start()?;
        let checkout = self.ctx.checkout(&self.stage_name()).await?;
        let config = self.ctx.load_configuration(&checkout)?;
        let env = find_environment(&config, &self.environment)?;

        // Checked before any cloud call
        if env.stacks.is_empty() {
            return Err(AphexError::NoStacksConfigured {
                environment: env.name.clone(),
            }
            .into());
        }

        self.fetch_artifacts(&checkout).await?;

        let providers = &self.ctx.providers;
        let current_account = providers.identity.current_account().await?;
        let decision = CrossAccountResolver::resolve(
            providers.identity.as_ref(),
            &current_account,
            env,
            &self.ctx.settings.cross_account_role,
        )
        .await?;

        let cloud = decision.cloud_context(env);
        let role_arn = match &decision {
            AccessDecision::Switched { .. } if self.ctx.settings.use_bootstrap_deploy_role => {
                Some(bootstrap_deploy_role(env))
            }
            _ => None,
        };

        let result = StackDeployer::new(providers.toolkit.as_ref(), providers.metrics.as_ref())
            .deploy_stacks(env, &checkout, &cloud, role_arn.as_deref())
            .await?;

        // Outputs of stacks that did deploy stay valid even if a later one failed
        let outputs = result.consolidated_outputs();
        self.ctx
            .results
            .persist_json(&format!("{}-stack-outputs.json", self.stage_name()), &outputs);
        exec.set_output(
            OUTPUT_STACK_OUTPUTS,
            serde_json::to_string(&outputs).map_err(AphexError::from)?,
        )?;

        let failure = result.failed_stack().map(|failed| {
            failed.error.clone().unwrap_or_else(|| {
                StageError::from(&AphexError::StackDeployment {
                    stack: failed.stack_name.clone(),
                    message: "deployment failed".into(),
                })
            })
        });
        if failure.is_some() {
            self.persist_failure(&result);
        }

        *deployment = Some(result);
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Fetch this commit's artifacts from the location the build stage reported
    ///
    /// A location outside this stage's store, or one holding another commit's
    /// artifacts, fails the stage before any cloud call.
    async fn fetch_artifacts(&self, checkout: &Path) -> AphexResult<()> {
        let blobs = self.ctx.providers.blobs.as_ref();
        let commit_sha = self.ctx.commit_sha();

        if let Some(location) = &self.artifact_path {
            tracing::info!("Fetching artifacts from {}", location);

            let prefix = blobs
                .prefix_of(location)
                .ok_or_else(|| AphexError::ArtifactTransfer {
                    key: location.clone(),
                    message: format!("not a location of the artifact store {}", blobs.location("")),
                })?;
            if prefix != artifacts::artifact_prefix(commit_sha) {
                return Err(AphexError::ArtifactTransfer {
                    key: location.clone(),
                    message: format!(
                        "artifacts of '{}' cannot be deployed for commit {}",
                        prefix.trim_end_matches('/'),
                        commit_sha
                    ),
                });
            }
        }

        let dest = checkout.join(&self.ctx.settings.artifacts_dir);
        let files = artifacts::fetch(blobs, commit_sha, &dest).await?;
        if files.is_empty() {
            tracing::warn!("No build artifacts published for {}", commit_sha);
        } else {
            tracing::info!("Fetched {} artifact(s)", files.len());
        }

        Ok(())
    }

    /// Best-effort error document for the stack that halted the environment
    fn persist_failure(&self, result: &EnvironmentDeploymentResult) {
        let failed = result.failed_stack();
        let document = json!({
            "environment": result.environment(),
            "commit_sha": self.ctx.commit_sha(),
            "stack_name": failed.map(|f| f.stack_name.as_str()),
            "timestamp": Utc::now().to_rfc3339(),
            "error": failed.and_then(|f| f.error.as_ref()),
            "failure_events": failed.map(|f| f.failure_events.as_slice()).unwrap_or(&[]),
        });
        self.ctx
            .results
            .persist_json(&format!("{}-error.json", self.stage_name()), &document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RevisionRef;
    use crate::errors::ErrorKind;
    use crate::providers::fakes::{FakeProviders, ToolkitCall};
    use crate::run::ResultStore;
    use crate::settings::Settings;

    const SHA: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    const CONFIG: &str = r#"
build:
  commands: [make]
environments:
  - name: dev
    region: us-east-1
    account: "111111111111"
    stacks:
      - name: Network
      - name: App
        path: app
  - name: prod
    region: eu-west-1
    account: "222222222222"
    stacks:
      - name: App
        path: app
"#;

    fn context(fakes: &FakeProviders, root: &Path, settings: Settings) -> StageContext {
        let settings = Settings {
            workspace_dir: root.join("work"),
            results_dir: root.join("results"),
            ..settings
        };
        let results = ResultStore::new(&settings.results_dir, "run-1");
        fakes.source.add_revision(SHA, &[("aphex-config.yaml", CONFIG)]);
        StageContext::new(
            RevisionRef::new(SHA, "https://example.com/app.git").unwrap(),
            settings,
            fakes.providers(),
            results,
        )
    }

    #[tokio::test]
    async fn test_same_account_deploy() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");
        fakes.toolkit.with_outputs("App", &[("ApiUrl", "https://api")]);
        let ctx = context(&fakes, root.path(), Settings::default());

        let result = EnvironmentDeployStage::new(&ctx, "dev").run().await;

        assert!(result.succeeded(), "{:?}", result.error);
        assert!(fakes.identity.assume_calls().is_empty());
        assert_eq!(fakes.toolkit.deployed_stacks(), vec!["Network", "App"]);

        let outputs: serde_json::Value =
            serde_json::from_str(result.output(OUTPUT_STACK_OUTPUTS).unwrap()).unwrap();
        assert_eq!(outputs["App"]["ApiUrl"]["value"], "https://api");
        assert!(ctx.results.dir().join("deploy-dev-stack-outputs.json").exists());

        // No credentials reach the toolkit
        for call in fakes.toolkit.calls() {
            if let ToolkitCall::Deploy { env, role_arn, .. } = call {
                assert!(!env.contains_key("AWS_ACCESS_KEY_ID"));
                assert!(role_arn.is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_cross_account_deploy_scopes_credentials() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");
        let settings = Settings {
            use_bootstrap_deploy_role: true,
            ..Settings::default()
        };
        let ctx = context(&fakes, root.path(), settings);

        let result = EnvironmentDeployStage::new(&ctx, "prod").run().await;

        assert!(result.succeeded(), "{:?}", result.error);
        assert_eq!(
            fakes.identity.assume_calls(),
            vec![(
                "arn:aws:iam::222222222222:role/AphexPipelineCrossAccountRole".to_string(),
                "AphexPipeline-prod".to_string()
            )]
        );

        match &fakes.toolkit.calls()[1] {
            ToolkitCall::Deploy { env, role_arn, .. } => {
                assert_eq!(env["AWS_SESSION_TOKEN"], "token-for-AphexPipeline-prod");
                assert_eq!(env["AWS_REGION"], "eu-west-1");
                assert_eq!(
                    role_arn.as_deref(),
                    Some("arn:aws:iam::222222222222:role/cdk-hnb659fds-deploy-role-222222222222-eu-west-1")
                );
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_denied_role_fails_before_any_stack() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");
        fakes.identity.deny("AccessDenied", "not authorized");
        let ctx = context(&fakes, root.path(), Settings::default());

        let result = EnvironmentDeployStage::new(&ctx, "prod").run().await;

        assert_eq!(result.error.unwrap().kind, ErrorKind::CrossAccountAccess);
        assert!(fakes.toolkit.calls().is_empty());
        assert!(result.details.is_none());
    }

    #[tokio::test]
    async fn test_stack_failure_persists_diagnostics() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");
        fakes.toolkit.fail_deploy("Network");
        let ctx = context(&fakes, root.path(), Settings::default());

        let result = EnvironmentDeployStage::new(&ctx, "dev").run().await;

        assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::StackDeployment);
        assert_eq!(fakes.toolkit.deployed_stacks(), vec!["Network"]);
        match &result.details {
            Some(StageDetails::Deploy(d)) => assert_eq!(d.stack_results().len(), 1),
            other => panic!("unexpected details: {:?}", other),
        }

        let error_doc: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(ctx.results.dir().join("deploy-dev-error.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(error_doc["stack_name"], "Network");
    }

    #[tokio::test]
    async fn test_fetches_artifacts_from_the_build_location() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");
        let ctx = context(&fakes, root.path(), Settings::default());
        let dist = tempfile::tempdir().unwrap();
        std::fs::write(dist.path().join("app.js"), b"bundle").unwrap();
        let manifest = artifacts::publish(fakes.blobs.as_ref(), SHA, dist.path())
            .await
            .unwrap();

        let result = EnvironmentDeployStage::new(&ctx, "dev")
            .with_artifact_path(Some(manifest.location))
            .run()
            .await;

        assert!(result.succeeded(), "{:?}", result.error);
        let fetched = ctx.checkout_dir("deploy-dev").join("dist/app.js");
        assert_eq!(std::fs::read(fetched).unwrap(), b"bundle");
    }

    #[tokio::test]
    async fn test_artifact_path_of_another_commit_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");
        let ctx = context(&fakes, root.path(), Settings::default());
        let other = "ffffffffffffffffffffffffffffffffffffffff";

        let result = EnvironmentDeployStage::new(&ctx, "dev")
            .with_artifact_path(Some(format!("mem://{}/", other)))
            .run()
            .await;

        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::ArtifactTransfer);
        assert!(error.message.contains(other));
        assert!(fakes.identity.assume_calls().is_empty());
        assert!(fakes.toolkit.calls().is_empty());
    }

    #[tokio::test]
    async fn test_artifact_path_outside_the_store_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");
        let ctx = context(&fakes, root.path(), Settings::default());

        let result = EnvironmentDeployStage::new(&ctx, "dev")
            .with_artifact_path(Some(format!("s3://some-other-bucket/{}/", SHA)))
            .run()
            .await;

        assert_eq!(result.error.unwrap().kind, ErrorKind::ArtifactTransfer);
        assert!(fakes.toolkit.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_environment() {
        let root = tempfile::tempdir().unwrap();
        let fakes = FakeProviders::new("111111111111");
        let ctx = context(&fakes, root.path(), Settings::default());

        let result = EnvironmentDeployStage::new(&ctx, "qa").run().await;
        assert_eq!(
            result.error.unwrap().kind,
            ErrorKind::ConfigurationValidation
        );
    }

    #[test]
    fn test_bootstrap_role() {
        let env = Environment {
            name: "dev".into(),
            region: "us-east-1".into(),
            account: "111111111111".into(),
            stacks: vec![],
            tests: None,
        };
        assert_eq!(
            bootstrap_deploy_role(&env),
            "arn:aws:iam::111111111111:role/cdk-hnb659fds-deploy-role-111111111111-us-east-1"
        );
    }
}
