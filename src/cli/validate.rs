// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Validate command - check the pipeline configuration

use colored::Colorize;
use miette::Result;
use std::path::{Path, PathBuf};

use crate::config::{ConfigValidator, Configuration};
use crate::errors::AphexError;
use crate::providers::Providers;
use crate::run::PipelineRunner;
use crate::settings::Settings;

/// Read, validate and parse a configuration file, failing on any error
pub fn load_configuration(config_path: &Path) -> Result<Configuration> {
    if !config_path.exists() {
        return Err(miette::miette!(
            "Configuration file not found: {}\n\n\
             Run 'aphex init' to create one.",
            config_path.display()
        ));
    }

    let raw = std::fs::read_to_string(config_path).map_err(|e| AphexError::FileReadError {
        path: config_path.to_path_buf(),
        error: e.to_string(),
    })?;

    let validation = ConfigValidator::validate_raw(&raw);
    if !validation.is_valid() {
        return Err(AphexError::ConfigurationValidation {
            errors: validation.errors,
        }
        .into());
    }
    for warning in &validation.warnings {
        tracing::warn!("{}", warning);
    }

    Ok(Configuration::from_yaml(&raw)?)
}

/// Run the validate command
pub async fn run(
    config_path: PathBuf,
    check_tools: bool,
    settings: Settings,
    verbose: bool,
) -> Result<()> {
    println!("{}", "Validating configuration...".bold());
    println!();

    if !config_path.exists() {
        return Err(miette::miette!(
            "Configuration file not found: {}\n\n\
             Run 'aphex init' to create one.",
            config_path.display()
        ));
    }

    let raw = std::fs::read_to_string(&config_path)
        .map_err(|e| miette::miette!("Failed to read {}: {}", config_path.display(), e))?;

    let validation = ConfigValidator::validate_raw(&raw);

    let mut has_issues = false;

    if !validation.errors.is_empty() {
        has_issues = true;
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    } else {
        println!("  {} Configuration is valid YAML", "✓".green());
    }

    if !validation.warnings.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    let mut missing_tools = Vec::new();
    if check_tools {
        let runner = PipelineRunner::new(settings.clone(), Providers::local(&settings));
        missing_tools = runner.missing_tools();
        if !missing_tools.is_empty() {
            has_issues = true;
            println!();
            println!("{}:", "Missing tools".yellow().bold());
            for tool in &missing_tools {
                println!("  {} {}", "⚠".yellow(), AphexError::tool_not_found(tool));
            }
        }
    }

    if verbose && validation.is_valid() {
        if let Ok(config) = Configuration::from_yaml(&raw) {
            println!();
            println!("{}:", "Environments".bold());
            for env in &config.environments {
                let stacks: Vec<&str> = env.stacks.iter().map(|s| s.name.as_str()).collect();
                let tests = if env.tests.is_some() { " [tested]" } else { "" };
                println!(
                    "    - {} ({} / {}) {}{}",
                    env.name,
                    env.account,
                    env.region,
                    stacks.join(" → "),
                    tests.dimmed()
                );
            }
        }
    }

    println!();

    if has_issues {
        if validation.is_valid() && missing_tools.is_empty() {
            println!("{}", "Configuration is valid but has warnings.".yellow().bold());
            Ok(())
        } else if validation.is_valid() {
            Err(AphexError::tool_not_found(&missing_tools[0]).into())
        } else {
            Err(AphexError::ConfigurationValidation {
                errors: validation.errors,
            }
            .into())
        }
    } else {
        println!("{}", "Configuration is valid!".green().bold());
        Ok(())
    }
}
