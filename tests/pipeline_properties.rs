// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Stage-engine properties driven end to end through the in-memory fakes

use std::path::Path;

use aphex::artifacts;
use aphex::errors::ErrorKind;
use aphex::providers::fakes::{FakeProviders, MemoryBlobStore, ToolkitCall};
use aphex::providers::{BlobStore, CloudContext};
use aphex::run::ResultStore;
use aphex::stages::{
    BuildStage, CrossAccountResolver, EnvironmentDeployStage, StackDeployer, StageContext,
    StageDetails, TestStage, TestStatus,
};
use aphex::{Configuration, RevisionRef, Settings, TopologyGenerator};

const SHA: &str = "1111111111111111111111111111111111111111";
const OTHER_SHA: &str = "2222222222222222222222222222222222222222";

fn context(fakes: &FakeProviders, root: &Path, sha: &str) -> StageContext {
    let settings = Settings {
        workspace_dir: root.join("work"),
        results_dir: root.join("results"),
        ..Settings::default()
    };
    let results = ResultStore::new(&settings.results_dir, "run-1");
    StageContext::new(
        RevisionRef::new(sha, "https://example.com/app.git").unwrap(),
        settings,
        fakes.providers(),
        results,
    )
}

/// Configuration with the given build and dev-test commands
fn config_yaml(build: &[&str], tests: &[&str]) -> String {
    let list = |commands: &[&str], indent: &str| -> String {
        if commands.is_empty() {
            " []\n".to_string()
        } else {
            let mut out = String::from("\n");
            for c in commands {
                out.push_str(&format!("{}- '{}'\n", indent, c));
            }
            out
        }
    };

    format!(
        "build:\n  commands:{}environments:\n  - name: dev\n    region: us-east-1\n    account: \"111111111111\"\n    stacks: [{{name: A}}, {{name: B}}, {{name: C}}]\n    tests:\n      commands:{}",
        list(build, "    "),
        list(tests, "        ")
    )
}

fn read(root: &Path, name: &str) -> String {
    std::fs::read_to_string(root.join(name)).unwrap_or_default()
}

// Checkouts live at <root>/work/run-1/<stage>, so ../../../ is <root>

#[tokio::test]
async fn checkout_is_pinned_to_the_exact_commit() {
    let root = tempfile::tempdir().unwrap();
    let fakes = FakeProviders::new("111111111111");
    fakes.source.add_revision(SHA, &[("README", "pinned")]);
    let ctx = context(&fakes, root.path(), SHA);

    let path = ctx.checkout("build").await.unwrap();
    let head = fakes
        .providers()
        .source
        .head_revision(&path)
        .await
        .unwrap();
    assert_eq!(head, SHA);
}

#[tokio::test]
async fn missing_commit_fails_checkout_and_leaves_no_artifacts() {
    let root = tempfile::tempdir().unwrap();
    let fakes = FakeProviders::new("111111111111");
    let ctx = context(&fakes, root.path(), SHA);

    let result = BuildStage::new(&ctx).run().await;

    assert_eq!(result.error.unwrap().kind, ErrorKind::RevisionCheckout);
    assert!(fakes.blobs.list_blobs(&format!("{}/", SHA)).await.unwrap().is_empty());
    assert!(!ctx.checkout_dir("build").exists());
}

#[tokio::test]
async fn build_and_test_commands_run_in_order() {
    let root = tempfile::tempdir().unwrap();
    let fakes = FakeProviders::new("111111111111");
    let yaml = config_yaml(
        &[
            "printf c1 >> ../../../build-trace",
            "printf c2 >> ../../../build-trace",
            "printf c3 >> ../../../build-trace",
        ],
        &[
            "printf c1 >> ../../../test-trace",
            "printf c2 >> ../../../test-trace",
            "printf c3 >> ../../../test-trace",
        ],
    );
    fakes
        .source
        .add_revision(SHA, &[("aphex-config.yaml", yaml.as_str())]);
    let ctx = context(&fakes, root.path(), SHA);

    assert!(BuildStage::new(&ctx).run().await.succeeded());
    assert!(TestStage::new(&ctx, "dev", "{}").run().await.succeeded());

    assert_eq!(read(root.path(), "build-trace"), "c1c2c3");
    assert_eq!(read(root.path(), "test-trace"), "c1c2c3");
}

#[tokio::test]
async fn build_stops_at_the_first_failure() {
    let root = tempfile::tempdir().unwrap();
    let fakes = FakeProviders::new("111111111111");
    let yaml = config_yaml(
        &[
            "printf ok >> ../../../trace",
            "exit 3",
            "printf ok3 >> ../../../trace",
        ],
        &[],
    );
    fakes
        .source
        .add_revision(SHA, &[("aphex-config.yaml", yaml.as_str())]);
    let ctx = context(&fakes, root.path(), SHA);

    let result = BuildStage::new(&ctx).run().await;

    assert!(!result.succeeded());
    assert_eq!(read(root.path(), "trace"), "ok");
    match result.details {
        Some(StageDetails::Build(report)) => assert_eq!(report.commands.len(), 2),
        other => panic!("unexpected details: {:?}", other),
    }
}

#[tokio::test]
async fn rejected_upload_fails_the_build() {
    let root = tempfile::tempdir().unwrap();
    let fakes = FakeProviders::new("111111111111");
    fakes.blobs.fail_writes();
    let yaml = config_yaml(&["mkdir -p dist && printf bundle > dist/app.js"], &[]);
    fakes
        .source
        .add_revision(SHA, &[("aphex-config.yaml", yaml.as_str())]);
    let ctx = context(&fakes, root.path(), SHA);

    let result = BuildStage::new(&ctx).run().await;

    assert_eq!(result.error.unwrap().kind, ErrorKind::ArtifactTransfer);
    assert!(result.outputs.is_empty());
}

#[tokio::test]
async fn test_stage_runs_every_command() {
    let root = tempfile::tempdir().unwrap();
    let fakes = FakeProviders::new("111111111111");
    let yaml = config_yaml(
        &[],
        &[
            "printf ok >> ../../../trace",
            "exit 3",
            "printf ok3 >> ../../../trace",
        ],
    );
    fakes
        .source
        .add_revision(SHA, &[("aphex-config.yaml", yaml.as_str())]);
    let ctx = context(&fakes, root.path(), SHA);

    let result = TestStage::new(&ctx, "dev", "{}").run().await;

    assert!(!result.succeeded());
    assert_eq!(read(root.path(), "trace"), "okok3");
    match result.details {
        Some(StageDetails::Test(report)) => {
            assert_eq!(report.overall_status, TestStatus::Failed);
            assert_eq!(report.test_results.len(), 3);
        }
        other => panic!("unexpected details: {:?}", other),
    }
}

#[tokio::test]
async fn stack_deployment_halts_at_the_failed_stack() {
    let root = tempfile::tempdir().unwrap();
    let fakes = FakeProviders::new("111111111111");
    fakes.toolkit.fail_deploy("B");
    let yaml = config_yaml(&[], &[]);
    fakes
        .source
        .add_revision(SHA, &[("aphex-config.yaml", yaml.as_str())]);
    let ctx = context(&fakes, root.path(), SHA);

    let result = EnvironmentDeployStage::new(&ctx, "dev").run().await;

    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::StackDeployment);
    match &result.details {
        Some(StageDetails::Deploy(deployment)) => {
            assert_eq!(deployment.stack_results().len(), 2)
        }
        other => panic!("unexpected details: {:?}", other),
    }
    assert!(!fakes.toolkit.calls().iter().any(|c| matches!(
        c,
        ToolkitCall::Synthesize { stack, .. } | ToolkitCall::Deploy { stack, .. } if stack == "C"
    )));
}

#[tokio::test]
async fn each_stack_is_synthesized_right_before_its_deploy() {
    let fakes = FakeProviders::new("111111111111");
    let config = Configuration::from_yaml(&config_yaml(&[], &[])).unwrap();
    let env = &config.environments[0];
    let providers = fakes.providers();

    let result = StackDeployer::new(providers.toolkit.as_ref(), providers.metrics.as_ref())
        .deploy_stacks(
            env,
            Path::new("/repo"),
            &CloudContext::new(&env.region, &env.account),
            None,
        )
        .await
        .unwrap();
    assert!(result.succeeded());

    let sequence: Vec<String> = fakes
        .toolkit
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ToolkitCall::Synthesize { stack, .. } => Some(format!("synth {}", stack)),
            ToolkitCall::Deploy { stack, .. } => Some(format!("deploy {}", stack)),
            _ => None,
        })
        .collect();
    assert_eq!(
        sequence,
        vec!["synth A", "deploy A", "synth B", "deploy B", "synth C", "deploy C"]
    );
}

#[test]
fn topology_matches_configuration() {
    let config_for = |envs: usize, tested: usize| -> Configuration {
        let mut yaml = String::from("environments:\n");
        for i in 0..envs {
            yaml.push_str(&format!(
                "  - name: env{}\n    region: us-east-1\n    account: \"{:012}\"\n    stacks: [{{name: App}}]\n",
                i,
                i + 1
            ));
            if i < tested {
                yaml.push_str("    tests:\n      commands: [make check]\n");
            }
        }
        Configuration::from_yaml(&yaml).unwrap()
    };

    for (envs, tested) in [(1, 0), (1, 1), (3, 2), (5, 5)] {
        let topology = TopologyGenerator::generate(&config_for(envs, tested), "bucket").unwrap();
        assert_eq!(topology.deploy_count(), envs);
        assert_eq!(topology.test_count(), tested);
        assert_eq!(topology.nodes().count(), 2 + envs + tested);
    }
}

#[test]
fn topology_generation_is_idempotent() {
    let config = Configuration::from_yaml(&config_yaml(&["make"], &["make check"])).unwrap();
    let first = TopologyGenerator::generate(&config, "bucket").unwrap();
    let second = TopologyGenerator::generate(&config, "bucket").unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn same_account_needs_no_role_switch() {
    let fakes = FakeProviders::new("111111111111");
    let config = Configuration::from_yaml(&config_yaml(&[], &[])).unwrap();
    let env = &config.environments[0];

    let decision =
        CrossAccountResolver::resolve(fakes.identity.as_ref(), "111111111111", env, "Deployer")
            .await
            .unwrap();

    assert!(!decision.is_switched());
    assert!(fakes.identity.assume_calls().is_empty());
    let vars = decision.cloud_context(env).env();
    assert!(!vars.contains_key("AWS_ACCESS_KEY_ID"));
    assert!(!vars.contains_key("AWS_SESSION_TOKEN"));
}

#[tokio::test]
async fn other_account_assumes_exactly_one_role() {
    let fakes = FakeProviders::new("999999999999");
    let config = Configuration::from_yaml(&config_yaml(&[], &[])).unwrap();
    let env = &config.environments[0];

    let decision =
        CrossAccountResolver::resolve(fakes.identity.as_ref(), "999999999999", env, "Deployer")
            .await
            .unwrap();

    assert!(decision.is_switched());
    let calls = fakes.identity.assume_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "arn:aws:iam::111111111111:role/Deployer");
}

#[tokio::test]
async fn artifacts_round_trip_and_stay_isolated() {
    let store = MemoryBlobStore::new();
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    std::fs::write(first.path().join("x"), b"first build").unwrap();
    std::fs::write(second.path().join("x"), b"second build").unwrap();

    artifacts::publish(&store, SHA, first.path()).await.unwrap();
    artifacts::publish(&store, OTHER_SHA, second.path()).await.unwrap();

    assert_eq!(
        store.get_blob(&format!("{}/x", SHA)).await.unwrap(),
        b"first build"
    );

    let dest = tempfile::tempdir().unwrap();
    let written = artifacts::fetch(&store, OTHER_SHA, dest.path()).await.unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(
        std::fs::read(dest.path().join("x")).unwrap(),
        b"second build"
    );
}
