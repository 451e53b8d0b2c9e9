// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Collaborator capabilities
//!
//! The engine never talks to git, the blob store, the cloud or the workflow
//! engine directly. Each of those is a trait here, with a process-backed
//! adapter for real runs and an in-memory fake for tests.

mod apply;
mod aws;
mod blob;
mod cdk;
pub mod fakes;
mod git;
mod shell;
mod telemetry;

pub use apply::{FileApplier, KubectlApplier};
pub use aws::AwsCliIdentity;
pub use blob::FilesystemBlobStore;
pub use cdk::CdkToolkit;
pub use git::GitSource;
pub use shell::{ShellRunner, TIMEOUT_EXIT_CODE};
pub use telemetry::{emit_metric, notify, StructuralSchema, TracingTelemetry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Configuration, RevisionRef};
use crate::errors::AphexResult;
use crate::settings::Settings;

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// A process to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: &Path) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.to_path_buf(),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    /// A command line run through a shell
    pub fn shell(shell: &str, command: &str, cwd: &Path) -> Self {
        Self::new(shell, cwd).arg("-c").arg(command)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Human-readable command line
    pub fn display(&self) -> String {
        if self.args.first().map(String::as_str) == Some("-c") && self.args.len() == 2 {
            return self.args[1].clone();
        }
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished (or timed out) process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Runs external processes
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a process to completion. A nonzero exit is not an error; failing
    /// to start the process is.
    async fn run(&self, invocation: &Invocation) -> AphexResult<CommandOutput>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Source control
// ─────────────────────────────────────────────────────────────────────────────

/// Clones repositories at an exact revision
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Clone `revision.repo_url` into `dest` and check out `revision.commit_sha`
    async fn checkout(&self, revision: &RevisionRef, dest: &Path) -> AphexResult<PathBuf>;

    /// Revision currently checked out at `path`
    async fn head_revision(&self, path: &Path) -> AphexResult<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Blob storage
// ─────────────────────────────────────────────────────────────────────────────

/// Content-addressed blob storage keyed by `<commit_sha>/<relative_path>`
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> AphexResult<()>;

    async fn get_blob(&self, key: &str) -> AphexResult<Vec<u8>>;

    /// Keys under `prefix`, sorted
    async fn list_blobs(&self, prefix: &str) -> AphexResult<Vec<String>>;

    /// External location of a prefix, as handed to downstream stages
    fn location(&self, prefix: &str) -> String;

    /// Prefix behind a location this store handed out; `None` for foreign locations
    fn prefix_of(&self, location: &str) -> Option<String> {
        location
            .strip_prefix(&self.location(""))
            .map(str::to_string)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cloud
// ─────────────────────────────────────────────────────────────────────────────

/// Temporary credentials for one account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .finish()
    }
}

/// Region, account and optional scoped credentials for cloud calls of one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudContext {
    pub region: String,
    pub account: String,
    pub credentials: Option<Credentials>,
}

impl CloudContext {
    pub fn new(region: &str, account: &str) -> Self {
        Self {
            region: region.to_string(),
            account: account.to_string(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Variables handed to child processes that talk to the cloud
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("AWS_REGION".to_string(), self.region.clone());
        env.insert("AWS_DEFAULT_REGION".to_string(), self.region.clone());
        env.insert("CDK_DEFAULT_REGION".to_string(), self.region.clone());
        env.insert("CDK_DEFAULT_ACCOUNT".to_string(), self.account.clone());

        if let Some(creds) = &self.credentials {
            env.insert("AWS_ACCESS_KEY_ID".to_string(), creds.access_key_id.clone());
            env.insert(
                "AWS_SECRET_ACCESS_KEY".to_string(),
                creds.secret_access_key.clone(),
            );
            env.insert("AWS_SESSION_TOKEN".to_string(), creds.session_token.clone());
        }

        env
    }
}

/// One output of a deployed stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_name: Option<String>,
}

/// A failure-class stack event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEvent {
    pub timestamp: String,
    pub resource_type: String,
    pub logical_resource_id: String,
    pub resource_status: String,
    #[serde(default)]
    pub resource_status_reason: String,
}

/// Synthesizes, deploys and describes infrastructure stacks
#[async_trait]
pub trait StackToolkit: Send + Sync {
    /// Synthesize a stack into a fresh cloud assembly, returning its directory
    async fn synthesize_stack(
        &self,
        app_dir: &Path,
        stack: &str,
        cloud: &CloudContext,
    ) -> AphexResult<PathBuf>;

    /// Deploy a synthesized stack
    async fn deploy_stack(
        &self,
        app_dir: &Path,
        assembly: &Path,
        stack: &str,
        cloud: &CloudContext,
        role_arn: Option<&str>,
    ) -> AphexResult<()>;

    async fn describe_stack_outputs(
        &self,
        stack: &str,
        cloud: &CloudContext,
    ) -> AphexResult<Vec<StackOutput>>;

    /// Most recent failure-class events, newest first
    async fn describe_stack_failure_events(
        &self,
        stack: &str,
        cloud: &CloudContext,
    ) -> AphexResult<Vec<StackEvent>>;
}

/// Error reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ProviderFailure {
    pub code: String,
    pub message: String,
}

/// Cloud identity and role assumption
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Account of the credentials the pipeline runs with
    async fn current_account(&self) -> AphexResult<String>;

    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
    ) -> Result<Credentials, ProviderFailure>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration, topology, telemetry
// ─────────────────────────────────────────────────────────────────────────────

/// Schema-checks raw configuration text
pub trait SchemaValidator: Send + Sync {
    fn validate_config(&self, raw: &str) -> AphexResult<Configuration>;
}

/// Installs a generated workflow manifest for future runs
#[async_trait]
pub trait TopologyApplier: Send + Sync {
    async fn apply_topology(&self, manifest: &str) -> AphexResult<()>;
}

/// Metric sink
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn emit_metric(
        &self,
        name: &str,
        value: f64,
        dimensions: &BTreeMap<String, String>,
    ) -> AphexResult<()>;
}

/// Notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, channel: &str, message: &str) -> AphexResult<()>;
}

/// Every collaborator one stage may need
#[derive(Clone)]
pub struct Providers {
    pub source: Arc<dyn SourceControl>,
    pub runner: Arc<dyn CommandRunner>,
    pub blobs: Arc<dyn BlobStore>,
    pub toolkit: Arc<dyn StackToolkit>,
    pub identity: Arc<dyn IdentityProvider>,
    pub schema: Arc<dyn SchemaValidator>,
    pub applier: Arc<dyn TopologyApplier>,
    pub metrics: Arc<dyn MetricsSink>,
    pub notifier: Arc<dyn Notifier>,
}

impl Providers {
    /// Process-backed collaborators for a real run
    pub fn local(settings: &Settings) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new());
        let telemetry = Arc::new(TracingTelemetry);

        let applier: Arc<dyn TopologyApplier> = if settings.apply_with_kubectl {
            Arc::new(KubectlApplier::new(
                runner.clone(),
                &settings.manifest.namespace,
            ))
        } else {
            Arc::new(FileApplier::new(&settings.topology_file))
        };

        Self {
            source: Arc::new(GitSource::new(runner.clone())),
            blobs: Arc::new(FilesystemBlobStore::new(
                &settings.blob_root,
                settings.artifact_bucket.as_deref(),
            )),
            toolkit: Arc::new(CdkToolkit::new(runner.clone())),
            identity: Arc::new(AwsCliIdentity::new(runner.clone())),
            schema: Arc::new(StructuralSchema),
            applier,
            metrics: telemetry.clone(),
            notifier: telemetry,
            runner,
        }
    }
}
