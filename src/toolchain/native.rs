//! Generic native toolchain family
//!
//! The default for compiled boards: stage the sketch, then drive the
//! environment's `verify.sh`/`flash.sh` wrapper scripts with the board id.
//! Flash additionally gets the captured port.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::bootstrap::Environment;
use crate::diagnostics::ToolKind;
use crate::errors::{PipelineError, Result};
use crate::models::{BoardProfile, CompilerKind};
use crate::toolchain::{Invocation, ToolchainHandler, CommandSpec, ToolOutput, stage_source};

pub struct NativeHandler;

#[async_trait]
impl ToolchainHandler for NativeHandler {
    fn can_handle(&self, profile: &BoardProfile) -> bool {
        profile.compiler_kind == CompilerKind::Native
    }

    fn staging_path(&self, env: &Environment) -> PathBuf {
        env.native_sketch_path()
    }

    fn verify_kind(&self) -> ToolKind {
        ToolKind::NativeVerify
    }

    fn flash_kind(&self) -> ToolKind {
        ToolKind::Uploader
    }

    async fn verify(&self, ctx: &Invocation<'_>) -> Result<ToolOutput> {
        stage_source(&self.staging_path(ctx.env), ctx.source)?;

        let script = ctx.env.script_path("verify.sh");
        let spec = CommandSpec::new(script.to_string_lossy(), &[ctx.profile.id.as_str()])
            .with_cwd(ctx.env.root());
        ctx.runner.run(&spec).await
    }

    async fn flash(&self, ctx: &Invocation<'_>) -> Result<ToolOutput> {
        stage_source(&self.staging_path(ctx.env), ctx.source)?;

        let port = ctx
            .port
            .device_id()
            .ok_or(PipelineError::NoPortSelected)?;
        let script = ctx.env.script_path("flash.sh");
        let spec = CommandSpec::new(
            script.to_string_lossy(),
            &[port, ctx.profile.id.as_str()],
        )
        .with_cwd(ctx.env.root());
        ctx.runner.run(&spec).await
    }
}
