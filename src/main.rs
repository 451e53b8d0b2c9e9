// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! aphex - self-describing continuous-delivery pipeline

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aphex::cli::{load_settings, print_recovery, Cli, Commands};
use aphex::AphexError;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aphex=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    let settings = load_settings(cli.settings.as_deref())?;

    // Dispatch to command handlers
    let result = match cli.command {
        Commands::Init { force } => aphex::cli::init::run(force, cli.verbose).await,
        Commands::Validate {
            config,
            check_tools,
        } => aphex::cli::validate::run(config, check_tools, settings, cli.verbose).await,
        Commands::Graph { config, format } => {
            aphex::cli::graph::run(config, format, cli.verbose).await
        }
        Commands::Generate {
            config,
            bucket,
            output,
        } => aphex::cli::generate::run(config, bucket, output, settings, cli.verbose).await,
        Commands::Run { args } => aphex::cli::run::run(args, settings, cli.verbose).await,
        Commands::Stage { stage } => aphex::cli::stage::run(stage, settings, cli.verbose).await,
        Commands::Artifacts { action } => {
            aphex::cli::artifacts::run(action, settings, cli.verbose).await
        }
    };

    if let Err(report) = &result {
        if let Some(error) = report.downcast_ref::<AphexError>() {
            print_recovery(error);
        }
    }

    result
}
