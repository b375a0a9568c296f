//! Toolchain dispatch
//!
//! Given a board profile and the current source text, selects the handler
//! for the board's family/language, stages the source, invokes the external
//! compiler or uploader, and normalizes the outcome into a [`BuildResult`].

pub mod constrained;
pub mod hex;
pub mod interpreted;
pub mod native;
pub mod process;
pub mod volume;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bootstrap::Environment;
use crate::diagnostics::{self, ToolKind};
use crate::errors::{PipelineError, Result};
use crate::models::{BoardProfile, BuildResult, PortSelection};

pub use process::{CommandRunner, CommandSpec, SystemRunner, ToolOutput};

/// Everything a handler needs for one invocation, captured by value at
/// dispatch time (notably the port selection).
pub struct Invocation<'a> {
    pub profile: &'a BoardProfile,
    pub env: &'a Environment,
    pub source: &'a str,
    pub port: PortSelection,
    pub runner: &'a dyn CommandRunner,
}

/// One board family's way of verifying and flashing.
#[async_trait]
pub trait ToolchainHandler: Send + Sync {
    /// Whether this handler covers the given profile. The dispatcher asks
    /// handlers in registration order; the native handler is the fallback.
    fn can_handle(&self, profile: &BoardProfile) -> bool;

    /// Fixed staging path the source is written to before invocation.
    fn staging_path(&self, env: &Environment) -> PathBuf;

    /// Tool kinds for diagnostic normalization.
    fn verify_kind(&self) -> ToolKind;
    fn flash_kind(&self) -> ToolKind;

    async fn verify(&self, ctx: &Invocation<'_>) -> Result<ToolOutput>;
    async fn flash(&self, ctx: &Invocation<'_>) -> Result<ToolOutput>;
}

/// Write the in-memory program to its staging path. Always re-written
/// immediately before each invocation; the external tool reads this file,
/// never an in-memory buffer.
pub(crate) fn stage_source(path: &Path, source: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, source)?;
    Ok(())
}

/// Selects and invokes the correct external tool for a board profile.
pub struct Dispatcher {
    env: Environment,
    runner: Arc<dyn CommandRunner>,
    handlers: Vec<Box<dyn ToolchainHandler>>,
}

impl Dispatcher {
    pub fn new(env: Environment, runner: Arc<dyn CommandRunner>) -> Self {
        // Most specific first; the generic native handler is the fallback.
        let handlers: Vec<Box<dyn ToolchainHandler>> = vec![
            Box::new(volume::VolumeHandler),
            Box::new(interpreted::InterpretedHandler),
            Box::new(constrained::ConstrainedHandler),
            Box::new(native::NativeHandler),
        ];
        Self {
            env,
            runner,
            handlers,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    fn handler_for(&self, profile: &BoardProfile) -> &dyn ToolchainHandler {
        self.handlers
            .iter()
            .find(|h| h.can_handle(profile))
            .map(|h| h.as_ref())
            .unwrap_or_else(|| self.handlers.last().expect("handler list is non-empty").as_ref())
    }

    /// Compile-only step producing diagnostics without touching hardware.
    pub async fn verify(&self, profile: &BoardProfile, source: &str) -> Result<BuildResult> {
        if !self.env.is_ready() {
            return Err(PipelineError::EnvironmentNotReady);
        }

        let handler = self.handler_for(profile);
        let ctx = Invocation {
            profile,
            env: &self.env,
            source,
            port: PortSelection::Sentinel,
            runner: self.runner.as_ref(),
        };

        let output = handler.verify(&ctx).await?;
        if output.success {
            return Ok(BuildResult::success(output.stdout));
        }

        let staging = handler.staging_path(&self.env);
        let diagnostics =
            diagnostics::parse(&output.stderr, handler.verify_kind(), Some(&staging));
        Err(PipelineError::Compilation {
            diagnostics,
            raw: output.stderr,
        })
    }

    /// Upload step writing compiled output to the attached device.
    ///
    /// `NotVerified` gating happens in the session state machine before the
    /// dispatcher is reached; the port and environment preconditions live
    /// here.
    pub async fn flash(
        &self,
        profile: &BoardProfile,
        source: &str,
        port: &PortSelection,
    ) -> Result<BuildResult> {
        if !self.env.is_ready() {
            return Err(PipelineError::EnvironmentNotReady);
        }
        if port.is_sentinel() {
            return Err(PipelineError::NoPortSelected);
        }

        let handler = self.handler_for(profile);
        let ctx = Invocation {
            profile,
            env: &self.env,
            source,
            port: port.clone(),
            runner: self.runner.as_ref(),
        };

        let output = handler.flash(&ctx).await?;
        if output.success {
            return Ok(BuildResult::success(output.stdout));
        }

        let staging = handler.staging_path(&self.env);
        let diagnostics = diagnostics::parse(&output.stderr, handler.flash_kind(), Some(&staging));
        Err(PipelineError::Upload {
            diagnostics,
            raw: output.stderr,
        })
    }
}
