// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Init command - create a starter pipeline configuration

use colored::Colorize;
use miette::Result;
use std::path::Path;

use crate::config::CONFIG_FILE;
use crate::settings::SETTINGS_FILE;

const STARTER_CONFIG: &str = r#"# aphex pipeline configuration
#
# Environments deploy in the order listed. Stacks deploy in the order listed
# inside each environment; a failed stack stops the environment.

version: "1.0"

build:
  commands:
    - npm ci
    - npm run build

environments:
  - name: dev
    region: us-east-1
    account: "111111111111"
    stacks:
      - name: AppStack
        path: infra
    tests:
      commands:
        - npm run test:smoke

  - name: prod
    region: us-east-1
    account: "222222222222"
    stacks:
      - name: AppStack
        path: infra
"#;

const STARTER_SETTINGS: &str = r#"# aphex runner settings; every key is optional

# cross_account_role = "AphexPipelineCrossAccountRole"
# artifact_bucket = "my-pipeline-artifacts"
# test_timeout_secs = 3600
# continue_on_error = true

# [manifest]
# namespace = "argo"
"#;

/// Run the init command
pub async fn run(force: bool, verbose: bool) -> Result<()> {
    println!("{}", "Initializing aphex pipeline...".bold());
    println!();

    if Path::new(CONFIG_FILE).exists() && !force {
        return Err(miette::miette!(
            "{} already exists. Use --force to overwrite.",
            CONFIG_FILE
        ));
    }

    std::fs::write(CONFIG_FILE, STARTER_CONFIG)
        .map_err(|e| miette::miette!("Failed to write {}: {}", CONFIG_FILE, e))?;
    println!("  {} Created {}", "✓".green(), CONFIG_FILE);

    if !Path::new(SETTINGS_FILE).exists() {
        std::fs::write(SETTINGS_FILE, STARTER_SETTINGS)
            .map_err(|e| miette::miette!("Failed to write {}: {}", SETTINGS_FILE, e))?;
        println!("  {} Created {}", "✓".green(), SETTINGS_FILE);
    }

    println!();
    println!("{}", "Pipeline initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} with your accounts and stacks", CONFIG_FILE.cyan());
    println!("  2. Run {} to check it", "aphex validate".cyan());
    println!("  3. Run {} to see the stage graph", "aphex graph".cyan());
    println!();

    if verbose {
        println!("{}", "Generated configuration:".dimmed());
        println!("{}", "─".repeat(50).dimmed());
        println!("{}", STARTER_CONFIG.dimmed());
    }

    Ok(())
}
