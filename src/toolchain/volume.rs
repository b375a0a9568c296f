//! Memory-mapped interpreted family
//!
//! These boards mount as a small mass-storage volume; flashing means
//! merging the staged script into the bundled prebuilt firmware image and
//! copying the result onto the volume, discovered by label. No serial port
//! or external process is involved in the copy.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::bootstrap::Environment;
use crate::diagnostics::ToolKind;
use crate::errors::{PipelineError, Result};
use crate::models::BoardProfile;
use crate::toolchain::{hex, interpreted, Invocation, ToolchainHandler, ToolOutput, stage_source};

const DEFAULT_VOLUME_LABEL: &str = "MICROBIT";
const TARGET_FILE: &str = "sketch.hex";

pub struct VolumeHandler;

/// Find a mounted volume carrying the given label among the usual mount
/// points.
pub fn find_volume(label: &str) -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/Volumes").join(label), // macOS
        PathBuf::from("/media").join(label),   // Linux
        PathBuf::from("/mnt").join(label),     // Linux alternative
    ];

    // Per-user automount points: /media/<user>/<label>
    if let Ok(entries) = std::fs::read_dir("/media") {
        for entry in entries.flatten() {
            candidates.push(entry.path().join(label));
        }
    }

    candidates.into_iter().find(|p| p.is_dir())
}

impl VolumeHandler {
    fn label(profile: &BoardProfile) -> &str {
        profile
            .volume_label
            .as_deref()
            .unwrap_or(DEFAULT_VOLUME_LABEL)
    }

    fn copy_merged_image(volume: &Path, merged: &str) -> ToolOutput {
        let target = volume.join(TARGET_FILE);
        match std::fs::write(&target, merged) {
            Ok(()) => ToolOutput {
                success: true,
                stdout: format!("Copied merged image to {}", target.display()),
                stderr: String::new(),
            },
            Err(e) => ToolOutput {
                success: false,
                stdout: String::new(),
                stderr: format!("writing {}: {}", target.display(), e),
            },
        }
    }
}

#[async_trait]
impl ToolchainHandler for VolumeHandler {
    fn can_handle(&self, profile: &BoardProfile) -> bool {
        profile.is_memory_mapped()
    }

    fn staging_path(&self, env: &Environment) -> PathBuf {
        env.interpreted_sketch_path()
    }

    fn verify_kind(&self) -> ToolKind {
        ToolKind::InterpreterLint
    }

    fn flash_kind(&self) -> ToolKind {
        ToolKind::Uploader
    }

    async fn verify(&self, ctx: &Invocation<'_>) -> Result<ToolOutput> {
        interpreted::lint_source(ctx, &self.staging_path(ctx.env)).await
    }

    async fn flash(&self, ctx: &Invocation<'_>) -> Result<ToolOutput> {
        stage_source(&self.staging_path(ctx.env), ctx.source)?;

        let firmware = std::fs::read_to_string(ctx.env.firmware_path())?;
        let merged = hex::inject_script(&firmware, ctx.source)?;

        let label = Self::label(ctx.profile);
        let volume = find_volume(label).ok_or_else(|| PipelineError::DeviceNotFound {
            label: label.to_string(),
        })?;

        Ok(Self::copy_merged_image(&volume, &merged))
    }
}
