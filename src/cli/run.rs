// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Run command - execute every stage locally

use colored::Colorize;
use miette::Result;

use super::validate::load_configuration;
use super::RunArgs;
use crate::config::{PushEvent, RevisionRef};
use crate::errors::AphexError;
use crate::providers::Providers;
use crate::run::{PipelineRunner, RunOptions};
use crate::settings::Settings;
use crate::topology::TopologyGenerator;

/// Run the pipeline
pub async fn run(args: RunArgs, settings: Settings, verbose: bool) -> Result<()> {
    let (revision, branch) = resolve_revision(&args)?;
    let dry_run = args.dry_run;

    // The run executes the topology of the configuration it starts with
    let config = load_configuration(&args.config)?;
    let bucket = args
        .bucket
        .or_else(|| settings.artifact_bucket.clone())
        .unwrap_or_else(|| settings.blob_root.display().to_string());
    let topology = TopologyGenerator::generate(&config, &bucket)?;

    let runner = PipelineRunner::new(settings.clone(), Providers::local(&settings));

    if !dry_run {
        let missing_tools = runner.missing_tools();
        if !missing_tools.is_empty() {
            eprintln!("{}", "Missing required tools:".red().bold());
            for tool in &missing_tools {
                eprintln!("  {} {}", "✗".red(), tool);
            }
            return Err(miette::miette!("Required tools are not installed"));
        }
    }

    let options = RunOptions {
        dry_run,
        verbose,
        branch,
        run_id: None,
    };
    let report = runner.execute(&topology, &revision, &options).await?;

    if dry_run {
        return Ok(());
    }

    println!(
        "  Results: {}",
        settings.results_dir.join(&report.run_id).display().to_string().cyan()
    );

    if !report.success {
        if let Some(failed) = report.results.iter().find(|r| !r.succeeded()) {
            eprintln!();
            eprintln!("{}", format!("Stage '{}' failed:", failed.stage_name).red().bold());
            if let Some(message) = failed.error_message() {
                eprintln!("{}", message.dimmed());
            }
        }
        return Err(miette::miette!("Pipeline execution failed"));
    }

    Ok(())
}

/// Revision and branch from a push payload, or from the explicit flags
fn resolve_revision(args: &RunArgs) -> Result<(RevisionRef, Option<String>)> {
    if let Some(path) = &args.event {
        let payload = std::fs::read_to_string(path).map_err(|e| AphexError::FileReadError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        let event = PushEvent::parse(&payload)?;
        if !event.is_main_branch() {
            tracing::warn!("Push to '{}' is not on the main branch", event.branch);
        }
        let branch = args.branch.clone().or_else(|| Some(event.branch.clone()));
        return Ok((event.revision()?, branch));
    }

    match (&args.commit_sha, &args.repo_url) {
        (Some(sha), Some(url)) => Ok((RevisionRef::new(sha, url)?, args.branch.clone())),
        _ => Err(miette::miette!(
            "Pass --commit-sha and --repo-url, or --event with a push payload"
        )),
    }
}
