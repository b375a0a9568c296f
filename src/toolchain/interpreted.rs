//! Interpreted-language family (serial targets)
//!
//! Verify is a lint pass over the staged source; flash pushes the script to
//! the on-device interpreter through its serial runner at the profile's
//! baud rate.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::bootstrap::Environment;
use crate::diagnostics::ToolKind;
use crate::errors::{PipelineError, Result};
use crate::models::{BoardProfile, CompilerKind};
use crate::toolchain::{Invocation, ToolchainHandler, CommandSpec, ToolOutput, stage_source};

/// Interpreter binary to drive lint and upload with. Prefers `python3`,
/// falling back to `python` when only that is on PATH.
pub(crate) fn python_program() -> String {
    which::which("python3")
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "python".to_string())
}

/// Lint the staged source. Shared with the memory-mapped handler, whose
/// verify step is identical.
pub(crate) async fn lint_source(ctx: &Invocation<'_>, staging: &PathBuf) -> Result<ToolOutput> {
    stage_source(staging, ctx.source)?;

    let staged = staging.to_string_lossy();
    let spec = CommandSpec::new(python_program(), &["-m", "pyflakes", staged.as_ref()])
        .with_cwd(ctx.env.root());
    ctx.runner.run(&spec).await
}

pub struct InterpretedHandler;

#[async_trait]
impl ToolchainHandler for InterpretedHandler {
    fn can_handle(&self, profile: &BoardProfile) -> bool {
        profile.compiler_kind == CompilerKind::Interpreted && !profile.is_memory_mapped()
    }

    fn staging_path(&self, env: &Environment) -> PathBuf {
        env.interpreted_sketch_path()
    }

    fn verify_kind(&self) -> ToolKind {
        ToolKind::InterpreterLint
    }

    fn flash_kind(&self) -> ToolKind {
        ToolKind::InterpreterRun
    }

    async fn verify(&self, ctx: &Invocation<'_>) -> Result<ToolOutput> {
        lint_source(ctx, &self.staging_path(ctx.env)).await
    }

    async fn flash(&self, ctx: &Invocation<'_>) -> Result<ToolOutput> {
        let staging = self.staging_path(ctx.env);
        stage_source(&staging, ctx.source)?;

        let port = ctx
            .port
            .device_id()
            .ok_or(PipelineError::NoPortSelected)?;
        let baud = ctx.profile.upload_speed.to_string();
        let staged = staging.to_string_lossy();

        let spec = CommandSpec::new(
            python_program(),
            &[
                "-m", "ampy", "-p", port, "-b", baud.as_str(), "-d", "1", "run",
                "--no-output", staged.as_ref(),
            ],
        )
        .with_cwd(ctx.env.root());
        ctx.runner.run(&spec).await
    }
}
