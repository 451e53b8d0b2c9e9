// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! AWS CLI identity provider

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use super::{CommandRunner, Credentials, IdentityProvider, Invocation, ProviderFailure};
use crate::errors::{AphexError, AphexResult};

/// `aws sts` identity provider
pub struct AwsCliIdentity {
    runner: Arc<dyn CommandRunner>,
}

impl AwsCliIdentity {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentity {
    account: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    credentials: StsCredentials,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
}

/// Pull the provider error code out of CLI stderr, e.g.
/// `An error occurred (AccessDenied) when calling the AssumeRole operation: ...`
pub(crate) fn parse_provider_failure(stderr: &str) -> ProviderFailure {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"An error occurred \(([^)]+)\)[^:]*:\s*(.*)").unwrap());

    match re.captures(stderr) {
        Some(caps) => ProviderFailure {
            code: caps[1].to_string(),
            message: caps[2].trim().to_string(),
        },
        None => ProviderFailure {
            code: "Unknown".to_string(),
            message: stderr.trim().to_string(),
        },
    }
}

#[async_trait]
impl IdentityProvider for AwsCliIdentity {
    async fn current_account(&self) -> AphexResult<String> {
        let output = self
            .runner
            .run(
                &Invocation::new("aws", Path::new("."))
                    .args(["sts", "get-caller-identity", "--output", "json"]),
            )
            .await?;

        if !output.success() {
            return Err(AphexError::command_failed(
                "aws sts get-caller-identity",
                output.exit_code,
                &output.stdout,
                &output.stderr,
            ));
        }

        let identity: CallerIdentity = serde_json::from_str(&output.stdout)?;
        Ok(identity.account)
    }

    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
    ) -> Result<Credentials, ProviderFailure> {
        let inv = Invocation::new("aws", Path::new(".")).args([
            "sts",
            "assume-role",
            "--role-arn",
            role_arn,
            "--role-session-name",
            session_name,
            "--output",
            "json",
        ]);

        let output = self.runner.run(&inv).await.map_err(|e| ProviderFailure {
            code: "ClientError".to_string(),
            message: e.to_string(),
        })?;

        if !output.success() {
            return Err(parse_provider_failure(&output.stderr));
        }

        let response: AssumeRoleResponse =
            serde_json::from_str(&output.stdout).map_err(|e| ProviderFailure {
                code: "MalformedResponse".to_string(),
                message: e.to_string(),
            })?;

        Ok(Credentials {
            access_key_id: response.credentials.access_key_id,
            secret_access_key: response.credentials.secret_access_key,
            session_token: response.credentials.session_token,
        })
    }
}
