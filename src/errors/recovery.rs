// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from stage failures.

use super::{AphexError, ErrorKind};

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Pick a suggestion for an error, if one applies
    pub fn for_error(error: &AphexError) -> Option<Self> {
        match error {
            AphexError::RevisionCheckout { expected, .. } => Some(Self::fix_checkout(expected)),
            AphexError::CrossAccountAccess {
                account, role_arn, ..
            } => Some(Self::fix_cross_account(account, role_arn)),
            AphexError::ToolNotFound { tool, .. } => Some(Self::install_tool(tool)),
            AphexError::StackDeployment { stack, .. } => Some(Self::inspect_stack(stack)),
            AphexError::ConfigurationValidation { .. } => Some(Self::fix_configuration()),
            _ => match error.kind() {
                ErrorKind::StackSynthesis => Some(Self::inspect_synthesis()),
                _ => None,
            },
        }
    }

    /// Suggest checking a commit that could not be checked out
    pub fn fix_checkout(expected: &str) -> Self {
        Self {
            action: "Verify the commit is reachable".into(),
            steps: vec![
                format!("The workspace did not end up at {}", expected),
                "The commit may have been force-pushed away or never pushed".into(),
            ],
            commands: vec![
                "# Confirm the commit exists on the remote:".into(),
                format!("git fetch origin && git cat-file -t {}", expected),
            ],
        }
    }

    /// Suggest fixing a denied role assumption
    pub fn fix_cross_account(account: &str, role_arn: &str) -> Self {
        Self {
            action: format!("Grant the pipeline access to account {}", account),
            steps: vec![
                format!("The role {} must exist in the target account", role_arn),
                "Its trust policy must allow sts:AssumeRole from the pipeline account".into(),
            ],
            commands: vec![
                "# Inspect the role's trust policy:".into(),
                format!(
                    "aws iam get-role --role-name {} --query Role.AssumeRolePolicyDocument",
                    role_arn.rsplit('/').next().unwrap_or(role_arn)
                ),
            ],
        }
    }

    /// Suggest installing a missing tool
    pub fn install_tool(tool: &str) -> Self {
        Self {
            action: format!("Install {}", tool),
            steps: vec![format!("Install {} and ensure it's in your PATH", tool)],
            commands: vec![format!("which {}", tool)],
        }
    }

    /// Suggest looking at the failure events of a stack
    pub fn inspect_stack(stack: &str) -> Self {
        Self {
            action: format!("Inspect the failure events of '{}'", stack),
            steps: vec![
                "Stacks after the failed one were not attempted".into(),
                "deploy-<env>-error.json in the results directory lists the failed resources".into(),
            ],
            commands: vec![format!(
                "aws cloudformation describe-stack-events --stack-name {}",
                stack
            )],
        }
    }

    fn inspect_synthesis() -> Self {
        Self {
            action: "Reproduce the synthesis locally".into(),
            steps: vec!["Synthesis runs against the exact commit being deployed".into()],
            commands: vec!["npx cdk synth".into()],
        }
    }

    fn fix_configuration() -> Self {
        Self {
            action: "Fix aphex-config.yaml".into(),
            steps: vec![
                "Every environment needs a name, region, 12-digit account and at least one stack"
                    .into(),
            ],
            commands: vec!["aphex validate".into()],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}
