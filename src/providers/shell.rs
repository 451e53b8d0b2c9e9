// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 aphex contributors

//! Process runner
//!
//! Runs build, test and tool commands with `tokio::process`.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use super::{CommandOutput, CommandRunner, Invocation};
use crate::errors::{AphexError, AphexResult};

/// Exit code recorded for a process that was killed on timeout
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Process-backed command runner
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

impl ShellRunner {
    /// Create a new runner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, invocation: &Invocation) -> AphexResult<CommandOutput> {
        tracing::debug!("Running: {}", invocation.display());

        if which::which(&invocation.program).is_err() && !invocation.program.contains('/') {
            return Err(AphexError::tool_not_found(&invocation.program));
        }

        let start = Instant::now();

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.current_dir(&invocation.cwd);
        cmd.envs(&invocation.env);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        let output = cmd.output();

        let output = match invocation.timeout {
            Some(limit) => match tokio::time::timeout(limit, output).await {
                Ok(result) => result,
                Err(_) => {
                    // The child is killed when the timed-out future is dropped
                    return Ok(CommandOutput {
                        exit_code: TIMEOUT_EXIT_CODE,
                        stdout: String::new(),
                        stderr: format!("Command timed out after {} seconds", limit.as_secs()),
                        duration: start.elapsed(),
                        timed_out: true,
                    });
                }
            },
            None => output.await,
        };

        let output = output.map_err(|e| AphexError::CommandExecution {
            command: invocation.display(),
            exit_code: -1,
            stdout: String::new(),
            stderr: e.to_string(),
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    #[tokio::test]
    async fn test_execute_simple_command() {
        let runner = ShellRunner::new();
        let output = runner
            .run(&Invocation::shell("bash", "echo hello", Path::new(".")))
            .await
            .unwrap();

        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_captured() {
        let runner = ShellRunner::new();
        let output = runner
            .run(&Invocation::shell("bash", "echo oops >&2; exit 3", Path::new(".")))
            .await
            .unwrap();

        assert!(!output.success());
        assert_eq!(output.exit_code, 3);
        assert!(output.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_timeout_marks_output() {
        let runner = ShellRunner::new();
        let inv = Invocation::shell("bash", "sleep 5", Path::new("."))
            .timeout(Duration::from_millis(100));
        let output = runner.run(&inv).await.unwrap();

        assert!(output.timed_out);
        assert_eq!(output.exit_code, TIMEOUT_EXIT_CODE);
        assert!(output.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_environment_is_passed() {
        let runner = ShellRunner::new();
        let mut env = std::collections::BTreeMap::new();
        env.insert("APHEX_TEST_VAR".to_string(), "value-42".to_string());
        let inv = Invocation::shell("bash", "echo $APHEX_TEST_VAR", Path::new(".")).envs(&env);
        let output = runner.run(&inv).await.unwrap();
        assert_eq!(output.stdout.trim(), "value-42");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = ShellRunner::new();
        let err = runner
            .run(&Invocation::new("definitely-not-a-real-tool-xyz", Path::new(".")))
            .await
            .unwrap_err();
        assert!(matches!(err, AphexError::ToolNotFound { .. }));
    }
}
