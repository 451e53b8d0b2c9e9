// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for aphex.

pub mod artifacts;
pub mod generate;
pub mod graph;
pub mod init;
pub mod run;
pub mod stage;
pub mod validate;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::config::CONFIG_FILE;
use crate::errors::RecoverySuggestion;
use crate::settings::Settings;

/// Self-describing continuous-delivery pipeline
#[derive(Parser, Debug)]
#[clap(
    name = "aphex",
    version,
    about = "Self-describing continuous-delivery pipeline",
    long_about = None,
    after_help = "Examples:\n\
        aphex init                              Create aphex-config.yaml\n\
        aphex validate                          Check the configuration\n\
        aphex graph --format mermaid            Show the stage graph\n\
        aphex run --commit-sha <sha> --repo-url <url>\n\
                                                Run every stage locally\n\n\
        See 'aphex <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Runner settings file (defaults to .aphex.toml when present)
    #[clap(long, global = true, env = "APHEX_SETTINGS", value_name = "FILE")]
    pub settings: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a starter pipeline configuration
    Init {
        /// Overwrite an existing configuration
        #[clap(long)]
        force: bool,
    },

    /// Validate the pipeline configuration
    Validate {
        /// Configuration file
        #[clap(default_value = CONFIG_FILE)]
        config: PathBuf,

        /// Also check that git, npx and aws are installed
        #[clap(long)]
        check_tools: bool,
    },

    /// Show the stage graph of the configuration
    Graph {
        /// Configuration file
        #[clap(default_value = CONFIG_FILE)]
        config: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: GraphFormat,
    },

    /// Render the workflow manifest of the configuration
    Generate {
        /// Configuration file
        #[clap(default_value = CONFIG_FILE)]
        config: PathBuf,

        /// Artifact bucket the build publishes to
        #[clap(long, env = "APHEX_ARTIFACT_BUCKET")]
        bucket: Option<String>,

        /// Write the manifest here instead of stdout
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Run every stage locally against one commit
    Run {
        #[clap(flatten)]
        args: RunArgs,
    },

    /// Run one stage; the entry point of the workflow containers
    Stage {
        #[clap(subcommand)]
        stage: StageCommand,
    },

    /// Inspect published build artifacts
    Artifacts {
        #[clap(subcommand)]
        action: ArtifactsAction,
    },
}

/// The revision a stage works on
#[derive(Args, Debug, Clone)]
pub struct RevisionArgs {
    /// Exact 40-character commit SHA
    #[clap(long, env = "APHEX_COMMIT_SHA")]
    pub commit_sha: String,

    /// Repository clone URL
    #[clap(long, env = "APHEX_REPO_URL")]
    pub repo_url: String,
}

/// Arguments of `aphex run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Exact 40-character commit SHA
    #[clap(long, env = "APHEX_COMMIT_SHA")]
    pub commit_sha: Option<String>,

    /// Repository clone URL
    #[clap(long, env = "APHEX_REPO_URL")]
    pub repo_url: Option<String>,

    /// Push webhook payload (JSON) to take the commit, repository and branch from
    #[clap(long)]
    pub event: Option<PathBuf>,

    /// Branch the commit came from
    #[clap(long)]
    pub branch: Option<String>,

    /// Configuration file the run's topology is compiled from
    #[clap(long, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    /// Artifact bucket (defaults to the settings, then the local blob root)
    #[clap(long, env = "APHEX_ARTIFACT_BUCKET")]
    pub bucket: Option<String>,

    /// Dry run (show what would be done)
    #[clap(long)]
    pub dry_run: bool,
}

/// Arguments shared by every stage
#[derive(Args, Debug, Clone)]
pub struct StageArgs {
    #[clap(flatten)]
    pub revision: RevisionArgs,

    /// Run the stage belongs to (defaults to the short commit SHA)
    #[clap(long, env = "APHEX_RUN_ID")]
    pub run_id: Option<String>,

    /// Directory that receives one file per stage output
    #[clap(long)]
    pub outputs_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum StageCommand {
    /// Build and publish artifacts
    Build {
        #[clap(flatten)]
        args: StageArgs,

        /// Artifact bucket
        #[clap(long, env = "APHEX_ARTIFACT_BUCKET")]
        bucket: Option<String>,
    },

    /// Update the pipeline itself and install the regenerated topology
    PipelineDeployment {
        #[clap(flatten)]
        args: StageArgs,

        /// Artifact bucket
        #[clap(long, env = "APHEX_ARTIFACT_BUCKET")]
        bucket: Option<String>,
    },

    /// Deploy every stack of one environment
    Deploy {
        #[clap(flatten)]
        args: StageArgs,

        #[clap(long)]
        environment: String,

        /// Location the build stage published artifacts to
        #[clap(long)]
        artifact_path: Option<String>,

        /// Artifact bucket
        #[clap(long, env = "APHEX_ARTIFACT_BUCKET")]
        bucket: Option<String>,
    },

    /// Run the post-deploy tests of one environment
    Test {
        #[clap(flatten)]
        args: StageArgs,

        #[clap(long)]
        environment: String,

        /// Consolidated stack outputs of the environment's deploy stage
        #[clap(long, env = "STACK_OUTPUTS", default_value = "{}")]
        stack_outputs: String,
    },
}

/// Artifact inspection actions
#[derive(Subcommand, Debug, Clone)]
pub enum ArtifactsAction {
    /// List the artifacts of a commit
    List {
        #[clap(long)]
        commit_sha: String,
    },

    /// Download the artifacts of a commit
    Fetch {
        #[clap(long)]
        commit_sha: String,

        /// Destination directory
        #[clap(long, default_value = "dist")]
        dest: PathBuf,
    },
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Runner settings for a command, resolved against the current directory
pub fn load_settings(explicit: Option<&Path>) -> miette::Result<Settings> {
    let cwd = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
    Ok(Settings::load(explicit, &cwd)?)
}

/// Print the recovery suggestion for an error, if there is one
pub fn print_recovery(error: &crate::errors::AphexError) {
    if let Some(suggestion) = RecoverySuggestion::for_error(error) {
        eprintln!();
        eprint!("{}", suggestion);
    }
}
