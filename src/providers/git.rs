// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Git checkout at an exact revision

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{CommandRunner, Invocation, SourceControl};
use crate::config::RevisionRef;
use crate::errors::{AphexError, AphexResult};

/// `git` CLI source control
pub struct GitSource {
    runner: Arc<dyn CommandRunner>,
}

impl GitSource {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn git(&self, cwd: &Path, args: &[&str], expected: &str) -> AphexResult<String> {
        let output = self
            .runner
            .run(&Invocation::new("git", cwd).args(args.iter().copied()))
            .await?;

        if !output.success() {
            return Err(AphexError::RevisionCheckout {
                expected: expected.to_string(),
                reason: format!("git {} failed: {}", args[0], output.stderr.trim()),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl SourceControl for GitSource {
    async fn checkout(&self, revision: &RevisionRef, dest: &Path) -> AphexResult<PathBuf> {
        let parent = dest.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;

        let dest_str = dest.to_string_lossy();
        tracing::info!("Cloning {} into {}", revision.repo_url, dest.display());
        self.git(
            Path::new("."),
            &["clone", "--quiet", &revision.repo_url, &dest_str],
            &revision.commit_sha,
        )
        .await?;

        tracing::info!("Checking out {}", revision.commit_sha);
        self.git(
            dest,
            &["checkout", "--quiet", "--detach", &revision.commit_sha],
            &revision.commit_sha,
        )
        .await?;

        Ok(dest.to_path_buf())
    }

    async fn head_revision(&self, path: &Path) -> AphexResult<String> {
        let stdout = self.git(path, &["rev-parse", "HEAD"], "HEAD").await?;
        Ok(stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ShellRunner;

    async fn init_repo(dir: &Path) -> String {
        let sh = |cmd: &str| {
            std::process::Command::new("bash")
                .arg("-c")
                .arg(cmd)
                .current_dir(dir)
                .output()
                .unwrap()
        };
        sh("git init --quiet . && git config user.email t@example.com && git config user.name t");
        sh("echo one > file.txt && git add . && git commit --quiet -m one");
        let out = sh("git rev-parse HEAD");
        sh("echo two > file.txt && git commit --quiet -am two");
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    #[tokio::test]
    async fn test_checkout_pins_exact_commit() {
        let origin = tempfile::tempdir().unwrap();
        let first = init_repo(origin.path()).await;
        let work = tempfile::tempdir().unwrap();

        let git = GitSource::new(Arc::new(ShellRunner::new()));
        let revision = RevisionRef::new(&first, &origin.path().to_string_lossy()).unwrap();
        let path = git
            .checkout(&revision, &work.path().join("checkout"))
            .await
            .unwrap();

        assert_eq!(git.head_revision(&path).await.unwrap(), first);
        let content = std::fs::read_to_string(path.join("file.txt")).unwrap();
        assert_eq!(content.trim(), "one");
    }

    #[tokio::test]
    async fn test_checkout_unknown_commit_fails() {
        let origin = tempfile::tempdir().unwrap();
        init_repo(origin.path()).await;
        let work = tempfile::tempdir().unwrap();

        let git = GitSource::new(Arc::new(ShellRunner::new()));
        let revision = RevisionRef::new(
            "ffffffffffffffffffffffffffffffffffffffff",
            &origin.path().to_string_lossy(),
        )
        .unwrap();
        let err = git
            .checkout(&revision, &work.path().join("checkout"))
            .await
            .unwrap_err();

        assert!(matches!(err, AphexError::RevisionCheckout { .. }));
    }
}
