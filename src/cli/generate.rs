// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Generate command - render the workflow manifest

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::validate::load_configuration;
use crate::errors::AphexError;
use crate::settings::Settings;
use crate::topology::{TopologyGenerator, WorkflowManifest};

/// Run the generate command
pub async fn run(
    config_path: PathBuf,
    bucket: Option<String>,
    output: Option<PathBuf>,
    settings: Settings,
    verbose: bool,
) -> Result<()> {
    let config = load_configuration(&config_path)?;

    let bucket = bucket.or_else(|| settings.artifact_bucket.clone()).ok_or_else(|| {
        AphexError::TopologyGeneration {
            reason: "no artifact bucket given; pass --bucket or set artifact_bucket".into(),
        }
    })?;

    let topology = TopologyGenerator::generate(&config, &bucket)?;
    let manifest = WorkflowManifest::from_topology(&topology, &settings.manifest);
    let yaml = manifest.to_yaml()?;

    match output {
        Some(path) => {
            std::fs::write(&path, &yaml).map_err(|e| AphexError::FileWriteError {
                path: path.clone(),
                error: e.to_string(),
            })?;
            println!("  {} Wrote {}", "✓".green(), path.display());
            if verbose {
                println!("  Stages: {}", topology.stage_names().join(", "));
                println!("  Digest: {}", manifest.digest()?.dimmed());
            }
        }
        None => print!("{}", yaml),
    }

    Ok(())
}
