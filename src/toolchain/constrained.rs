//! Constrained native family (cortex-M0 class targets)
//!
//! These boards ship family-specific batch scripts taking the board id as
//! sole argument. The flash tool auto-discovers the attached target, so no
//! port is passed even though one must be selected.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::bootstrap::Environment;
use crate::diagnostics::ToolKind;
use crate::errors::Result;
use crate::models::BoardProfile;
use crate::toolchain::{Invocation, ToolchainHandler, CommandSpec, ToolOutput, stage_source};

pub struct ConstrainedHandler;

impl ConstrainedHandler {
    fn script_name(profile: &BoardProfile, action: &str) -> String {
        format!("{}_{}.bat", action, profile.mcu_family.slug())
    }
}

#[async_trait]
impl ToolchainHandler for ConstrainedHandler {
    fn can_handle(&self, profile: &BoardProfile) -> bool {
        profile.is_constrained()
    }

    fn staging_path(&self, env: &Environment) -> PathBuf {
        env.native_sketch_path()
    }

    fn verify_kind(&self) -> ToolKind {
        ToolKind::ConstrainedVerify
    }

    fn flash_kind(&self) -> ToolKind {
        ToolKind::Uploader
    }

    async fn verify(&self, ctx: &Invocation<'_>) -> Result<ToolOutput> {
        stage_source(&self.staging_path(ctx.env), ctx.source)?;

        let script = ctx.env.script_path(&Self::script_name(ctx.profile, "verify"));
        let spec = CommandSpec::new(script.to_string_lossy(), &[ctx.profile.id.as_str()])
            .with_cwd(ctx.env.root());
        ctx.runner.run(&spec).await
    }

    async fn flash(&self, ctx: &Invocation<'_>) -> Result<ToolOutput> {
        stage_source(&self.staging_path(ctx.env), ctx.source)?;

        let script = ctx.env.script_path(&Self::script_name(ctx.profile, "flash"));
        let spec = CommandSpec::new(script.to_string_lossy(), &[ctx.profile.id.as_str()])
            .with_cwd(ctx.env.root());
        ctx.runner.run(&spec).await
    }
}
