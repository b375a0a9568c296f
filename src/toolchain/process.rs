//! External process invocation seam
//!
//! All external tools are dispatched through the [`CommandRunner`] trait so
//! tests can substitute a scripted runner and assert on what would have been
//! executed, without any toolchain installed.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use crate::errors::{PipelineError, Result};

/// One external command to run, captured by value before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Render for logs and the detail panel.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Captured output of a finished external tool.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Dispatches external commands without blocking the caller.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion, capturing stdout and stderr.
    ///
    /// Returns `ToolInvocation` when the executable is missing or cannot be
    /// started at all; a started tool that exits non-zero is reported as a
    /// non-`success` [`ToolOutput`], not an error.
    async fn run(&self, spec: &CommandSpec) -> Result<ToolOutput>;
}

/// Production runner on top of `tokio::process`.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ToolOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        log::debug!("Executing: {}", spec.display());
        let output = cmd
            .output()
            .await
            .map_err(|e| PipelineError::ToolInvocation {
                tool: spec.program.clone(),
                detail: e.to_string(),
            })?;

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
