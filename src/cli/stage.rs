// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Stage command - run a single stage
//!
//! This is what every container of the generated workflow runs. Each output
//! lands in its own file under `--outputs-dir` where the workflow engine
//! picks it up.

use colored::Colorize;
use miette::Result;
use std::path::Path;

use super::{StageArgs, StageCommand};
use crate::config::RevisionRef;
use crate::errors::{AphexError, AphexResult};
use crate::providers::Providers;
use crate::run::ResultStore;
use crate::settings::Settings;
use crate::stages::{
    BuildStage, EnvironmentDeployStage, PipelineDeploymentStage, StageContext, StageExecution,
    StageResult, TestStage,
};
use crate::topology::{StageKind, BUILD_STAGE, PIPELINE_DEPLOYMENT_STAGE};

/// Run the stage command
pub async fn run(command: StageCommand, mut settings: Settings, verbose: bool) -> Result<()> {
    let (args, bucket) = match &command {
        StageCommand::Build { args, bucket }
        | StageCommand::PipelineDeployment { args, bucket }
        | StageCommand::Deploy { args, bucket, .. } => (args.clone(), bucket.clone()),
        StageCommand::Test { args, .. } => (args.clone(), None),
    };
    if let Some(bucket) = bucket {
        settings.artifact_bucket = Some(bucket);
    }

    let ctx = match context(&args, settings.clone()) {
        Ok(ctx) => ctx,
        Err(e) => return reject(&command, &args, &settings, e),
    };

    let result = match &command {
        StageCommand::Build { .. } => BuildStage::new(&ctx).run().await,
        StageCommand::PipelineDeployment { .. } => PipelineDeploymentStage::new(&ctx).run().await,
        StageCommand::Deploy {
            environment,
            artifact_path,
            ..
        } => {
            EnvironmentDeployStage::new(&ctx, environment)
                .with_artifact_path(artifact_path.clone())
                .run()
                .await
        }
        StageCommand::Test {
            environment,
            stack_outputs,
            ..
        } => TestStage::new(&ctx, environment, stack_outputs).run().await,
    };

    // The result document is written even when the stage failed
    let path = ctx.results.write_stage_result(&result)?;
    if let Some(dir) = &args.outputs_dir {
        write_outputs(dir, &result)?;
    }

    report(&result, verbose);
    if verbose {
        println!("  Result: {}", path.display());
    }

    if result.succeeded() {
        Ok(())
    } else {
        Err(miette::miette!("Stage '{}' failed", result.stage_name))
    }
}

fn context(args: &StageArgs, settings: Settings) -> AphexResult<StageContext> {
    let revision = RevisionRef::new(&args.revision.commit_sha, &args.revision.repo_url)?;
    let run_id = args
        .run_id
        .clone()
        .unwrap_or_else(|| revision.short_sha().to_string());

    let results = ResultStore::new(&settings.results_dir, &run_id);
    let providers = Providers::local(&settings);
    Ok(StageContext::new(revision, settings, providers, results))
}

/// Name and kind of the stage a command runs
fn identity(command: &StageCommand) -> (String, StageKind) {
    match command {
        StageCommand::Build { .. } => (BUILD_STAGE.to_string(), StageKind::Build),
        StageCommand::PipelineDeployment { .. } => (
            PIPELINE_DEPLOYMENT_STAGE.to_string(),
            StageKind::PipelineDeployment,
        ),
        StageCommand::Deploy { environment, .. } => {
            (format!("deploy-{}", environment), StageKind::Deploy)
        }
        StageCommand::Test { environment, .. } => {
            (format!("test-{}", environment), StageKind::Test)
        }
    }
}

/// Record a failed result for a stage that could not even be set up
fn reject(
    command: &StageCommand,
    args: &StageArgs,
    settings: &Settings,
    error: AphexError,
) -> Result<()> {
    let (name, kind) = identity(command);
    let result = StageExecution::new(&name, kind, &args.revision.commit_sha).fail(&error, None);

    let run_id = args
        .run_id
        .clone()
        .unwrap_or_else(|| fallback_run_id(&args.revision.commit_sha));
    ResultStore::new(&settings.results_dir, &run_id).write_stage_result(&result)?;
    if let Some(dir) = &args.outputs_dir {
        write_outputs(dir, &result)?;
    }

    report(&result, false);
    Err(error.into())
}

/// Directory-safe run id derived from an unvalidated SHA
fn fallback_run_id(commit_sha: &str) -> String {
    let id: String = commit_sha
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(12)
        .collect();
    if id.is_empty() {
        "unknown".to_string()
    } else {
        id
    }
}

/// One file per output, named after the output
pub fn write_outputs(dir: &Path, result: &StageResult) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| AphexError::FileWriteError {
        path: dir.to_path_buf(),
        error: e.to_string(),
    })?;

    for (name, value) in &result.outputs {
        let path = dir.join(name);
        std::fs::write(&path, value).map_err(|e| AphexError::FileWriteError {
            path: path.clone(),
            error: e.to_string(),
        })?;
    }

    Ok(())
}

fn report(result: &StageResult, verbose: bool) {
    if result.succeeded() {
        println!(
            "  {} {} ({:.2}s)",
            "✓".green(),
            result.stage_name.bold(),
            result.duration_seconds
        );
        if verbose {
            for (name, value) in &result.outputs {
                println!("    {} = {}", name, value.dimmed());
            }
        }
    } else {
        println!("  {} {} failed", "✗".red(), result.stage_name.bold());
        if let Some(error) = &result.error {
            eprintln!("{}", error.to_string().dimmed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::RevisionArgs;
    use crate::errors::ErrorKind;
    use crate::stages::StageStatus;
    use crate::topology::OUTPUT_ARTIFACT_PATH;

    fn stage_args(commit_sha: &str, run_id: Option<&str>, outputs: &Path) -> StageArgs {
        StageArgs {
            revision: RevisionArgs {
                commit_sha: commit_sha.into(),
                repo_url: "https://example.com/app.git".into(),
            },
            run_id: run_id.map(str::to_string),
            outputs_dir: Some(outputs.to_path_buf()),
        }
    }

    #[test]
    fn test_outputs_are_written_one_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = StageExecution::new("build", StageKind::Build, "abc");
        exec.start().unwrap();
        exec.set_output(OUTPUT_ARTIFACT_PATH, "file:///blobs/abc/").unwrap();
        let result = exec.succeed(None);

        let outputs = dir.path().join("outputs");
        write_outputs(&outputs, &result).unwrap();
        assert_eq!(
            std::fs::read_to_string(outputs.join("artifact-path")).unwrap(),
            "file:///blobs/abc/"
        );
    }

    #[test]
    fn test_rejected_revision_still_records_a_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            results_dir: dir.path().join("results"),
            ..Settings::default()
        };
        let args = stage_args("abc", None, &dir.path().join("outputs"));
        let command = StageCommand::Deploy {
            args: args.clone(),
            environment: "dev".into(),
            artifact_path: None,
            bucket: None,
        };
        let error = context(&args, settings.clone()).err().unwrap();

        assert!(reject(&command, &args, &settings, error).is_err());

        let store = ResultStore::new(&settings.results_dir, "abc");
        let result = store.read_stage_result("deploy-dev").unwrap();
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.commit_sha, "abc");
        assert_eq!(result.error.unwrap().kind, ErrorKind::RevisionCheckout);
        assert!(dir.path().join("outputs").is_dir());
    }

    #[test]
    fn test_rejected_result_uses_the_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            results_dir: dir.path().join("results"),
            ..Settings::default()
        };
        let args = stage_args("../../etc", Some("run-7"), &dir.path().join("outputs"));
        let command = StageCommand::Build {
            args: args.clone(),
            bucket: None,
        };
        let error = context(&args, settings.clone()).err().unwrap();

        assert!(reject(&command, &args, &settings, error).is_err());
        assert!(settings.results_dir.join("run-7/build.json").exists());
    }

    #[test]
    fn test_fallback_run_id_stays_inside_the_results_dir() {
        assert_eq!(fallback_run_id("../../etc"), "etc");
        assert_eq!(fallback_run_id("abc123"), "abc123");
        assert_eq!(fallback_run_id("///"), "unknown");
    }
}
