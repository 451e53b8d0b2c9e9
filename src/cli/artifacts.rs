// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Artifacts command - inspect published build artifacts

use colored::Colorize;
use miette::Result;

use super::ArtifactsAction;
use crate::artifacts::{self, artifact_prefix};
use crate::config::RevisionRef;
use crate::providers::{BlobStore, FilesystemBlobStore};
use crate::settings::Settings;

/// Run the artifacts command
pub async fn run(action: ArtifactsAction, settings: Settings, _verbose: bool) -> Result<()> {
    let store = FilesystemBlobStore::new(&settings.blob_root, settings.artifact_bucket.as_deref());

    match action {
        ArtifactsAction::List { commit_sha } => {
            let sha = normalize(&commit_sha)?;
            let prefix = artifact_prefix(&sha);
            let keys = store.list_blobs(&prefix).await?;

            println!("{}", "Artifacts".bold());
            println!("{}", "═".repeat(40));
            println!("  Location: {}", store.location(&prefix));
            println!("  Files:    {}", keys.len());

            if keys.is_empty() {
                println!();
                println!("{}", "No artifacts published for this commit.".dimmed());
            } else {
                println!();
                for key in keys {
                    println!("  - {}", &key[prefix.len()..]);
                }
            }

            Ok(())
        }

        ArtifactsAction::Fetch { commit_sha, dest } => {
            let sha = normalize(&commit_sha)?;
            let written = artifacts::fetch(&store, &sha, &dest).await?;

            if written.is_empty() {
                println!("{}", "No artifacts published for this commit.".dimmed());
            } else {
                println!(
                    "  {} Fetched {} file(s) into {}",
                    "✓".green(),
                    written.len(),
                    dest.display()
                );
            }

            Ok(())
        }
    }
}

fn normalize(commit_sha: &str) -> Result<String> {
    // Only the SHA matters for blob keys
    Ok(RevisionRef::new(commit_sha, "")?.commit_sha)
}
