// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Cross-account access
//!
//! Decides whether an environment deploy has to switch roles and, if so,
//! obtains credentials scoped to that one stage. Nothing here touches the
//! process environment; credentials travel inside a [`CloudContext`].

use crate::config::Environment;
use crate::errors::{AphexError, AphexResult};
use crate::providers::{CloudContext, Credentials, IdentityProvider};

/// Outcome of access resolution for one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The pipeline already runs in the target account
    NoSwitchNeeded,
    /// Temporary credentials for the target account
    Switched {
        role_arn: String,
        credentials: Credentials,
    },
}

impl AccessDecision {
    pub fn is_switched(&self) -> bool {
        matches!(self, Self::Switched { .. })
    }

    /// Cloud context for the environment under this decision
    pub fn cloud_context(&self, env: &Environment) -> CloudContext {
        let credentials = match self {
            Self::NoSwitchNeeded => None,
            Self::Switched { credentials, .. } => Some(credentials.clone()),
        };
        CloudContext::new(&env.region, &env.account).with_credentials(credentials)
    }
}

/// Role ARN of `role_name` in `account`
pub fn role_arn(account: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account, role_name)
}

/// Session name used when assuming a role for `environment`
pub fn session_name(environment: &str) -> String {
    format!("AphexPipeline-{}", environment)
}

/// Resolves credentials for environment deploys
pub struct CrossAccountResolver;

impl CrossAccountResolver {
    /// Decide whether `target` needs a role switch from `current_account`
    ///
    /// Makes no role-assumption call when the accounts match, and exactly one
    /// otherwise. A denial is fatal and never retried.
    pub async fn resolve(
        identity: &dyn IdentityProvider,
        current_account: &str,
        target: &Environment,
        role_name: &str,
    ) -> AphexResult<AccessDecision> {
        if current_account == target.account {
            tracing::info!(
                "Environment {} is in the pipeline account, no role switch",
                target.name
            );
            return Ok(AccessDecision::NoSwitchNeeded);
        }

        let role_arn = role_arn(&target.account, role_name);
        tracing::info!("Assuming {} for environment {}", role_arn, target.name);

        let credentials = identity
            .assume_role(&role_arn, &session_name(&target.name))
            .await
            .map_err(|failure| AphexError::CrossAccountAccess {
                account: target.account.clone(),
                role_arn: role_arn.clone(),
                code: failure.code,
                message: failure.message,
            })?;

        Ok(AccessDecision::Switched {
            role_arn,
            credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Stack;
    use crate::providers::fakes::FakeIdentity;

    fn env(account: &str) -> Environment {
        Environment {
            name: "prod".into(),
            region: "eu-west-1".into(),
            account: account.into(),
            stacks: vec![Stack {
                name: "App".into(),
                path: ".".into(),
            }],
            tests: None,
        }
    }

    #[tokio::test]
    async fn test_same_account_makes_no_call() {
        let identity = FakeIdentity::new("111111111111");
        let target = env("111111111111");
        let decision =
            CrossAccountResolver::resolve(&identity, "111111111111", &target, "Deployer")
                .await
                .unwrap();

        assert_eq!(decision, AccessDecision::NoSwitchNeeded);
        assert!(identity.assume_calls().is_empty());

        let cloud = decision.cloud_context(&env("111111111111"));
        assert!(!cloud.env().contains_key("AWS_ACCESS_KEY_ID"));
    }

    #[tokio::test]
    async fn test_other_account_assumes_once() {
        let identity = FakeIdentity::new("111111111111");
        let target = env("222222222222");
        let decision =
            CrossAccountResolver::resolve(&identity, "111111111111", &target, "Deployer")
                .await
                .unwrap();

        assert!(decision.is_switched());
        assert_eq!(
            identity.assume_calls(),
            vec![(
                "arn:aws:iam::222222222222:role/Deployer".to_string(),
                "AphexPipeline-prod".to_string()
            )]
        );

        let cloud = decision.cloud_context(&env("222222222222"));
        assert_eq!(cloud.env()["AWS_SESSION_TOKEN"], "token-for-AphexPipeline-prod");
    }

    #[tokio::test]
    async fn test_denial_is_cross_account_error() {
        let identity = FakeIdentity::new("111111111111");
        identity.deny("AccessDenied", "not authorized to perform sts:AssumeRole");

        let target = env("222222222222");
        let err =
            CrossAccountResolver::resolve(&identity, "111111111111", &target, "Deployer")
                .await
                .unwrap_err();

        match err {
            AphexError::CrossAccountAccess { account, code, .. } => {
                assert_eq!(account, "222222222222");
                assert_eq!(code, "AccessDenied");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(identity.assume_calls().len(), 1);
    }
}
