//! Build phases, bootstrap stages and per-attempt results

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// Where the current program sits in the verify/flash lifecycle.
///
/// `VerifyFailed` and `FlashFailed` persist until the failure is
/// acknowledged; acknowledging collapses both back to `Unverified`, so a
/// failed flash always forces a fresh verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildPhase {
    Unverified,
    Verifying,
    VerifyFailed,
    Verified,
    Flashing,
    FlashFailed,
    Flashed,
}

impl BuildPhase {
    /// An external operation is in flight; new requests are rejected.
    pub fn is_busy(&self) -> bool {
        matches!(self, BuildPhase::Verifying | BuildPhase::Flashing)
    }

    /// A failure is waiting for explicit acknowledgement.
    pub fn needs_acknowledge(&self) -> bool {
        matches!(self, BuildPhase::VerifyFailed | BuildPhase::FlashFailed)
    }
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BuildPhase::Unverified => "unverified",
            BuildPhase::Verifying => "verifying",
            BuildPhase::VerifyFailed => "verify-failed",
            BuildPhase::Verified => "verified",
            BuildPhase::Flashing => "flashing",
            BuildPhase::FlashFailed => "flash-failed",
            BuildPhase::Flashed => "flashed",
        };
        write!(f, "{}", name)
    }
}

/// The five ordered stages of the first-run environment install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapStage {
    CreateRoot,
    CopyAssets,
    InstallBoardSupport,
    ExtractLibraries,
    WriteMarker,
}

impl BootstrapStage {
    /// Stages in execution order.
    pub fn all() -> [BootstrapStage; 5] {
        [
            BootstrapStage::CreateRoot,
            BootstrapStage::CopyAssets,
            BootstrapStage::InstallBoardSupport,
            BootstrapStage::ExtractLibraries,
            BootstrapStage::WriteMarker,
        ]
    }
}

impl std::fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BootstrapStage::CreateRoot => "create-root",
            BootstrapStage::CopyAssets => "copy-assets",
            BootstrapStage::InstallBoardSupport => "install-board-support",
            BootstrapStage::ExtractLibraries => "extract-libraries",
            BootstrapStage::WriteMarker => "write-marker",
        };
        write!(f, "{}", name)
    }
}

/// Coarse failure classification carried on a [`BuildResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    EnvironmentNotReady,
    BootstrapStageFailed,
    ToolInvocation,
    Compilation,
    Upload,
    NoPortSelected,
    NotVerified,
    DeviceNotFound,
    OperationInFlight,
    FailureNotAcknowledged,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::EnvironmentNotReady => "environment not ready",
            ErrorKind::BootstrapStageFailed => "bootstrap stage failed",
            ErrorKind::ToolInvocation => "tool could not be started",
            ErrorKind::Compilation => "compilation error",
            ErrorKind::Upload => "upload error",
            ErrorKind::NoPortSelected => "no port selected",
            ErrorKind::NotVerified => "not verified",
            ErrorKind::DeviceNotFound => "device not found",
            ErrorKind::OperationInFlight => "operation in flight",
            ErrorKind::FailureNotAcknowledged => "failure not acknowledged",
            ErrorKind::Io => "i/o error",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a single verify or flash attempt.
///
/// Held for the current session only; `raw_detail` backs the expandable
/// "show details" panel in the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub verified: bool,
    pub error_kind: Option<ErrorKind>,
    pub diagnostics: Vec<String>,
    pub raw_detail: String,
    pub finished_at: DateTime<Local>,
}

impl BuildResult {
    /// Successful attempt; `raw_detail` keeps the tool's stdout for the
    /// detail panel.
    pub fn success(raw_detail: String) -> Self {
        Self {
            verified: true,
            error_kind: None,
            diagnostics: Vec::new(),
            raw_detail,
            finished_at: Local::now(),
        }
    }

    /// Recover a pipeline error into a displayable result.
    pub fn from_error(err: &PipelineError) -> Self {
        let (diagnostics, raw_detail) = match err {
            PipelineError::Compilation { diagnostics, raw }
            | PipelineError::Upload { diagnostics, raw } => (diagnostics.clone(), raw.clone()),
            other => (Vec::new(), other.to_string()),
        };
        Self {
            verified: false,
            error_kind: Some(err.kind()),
            diagnostics,
            raw_detail,
            finished_at: Local::now(),
        }
    }

    /// Short one-line status for the message area.
    pub fn headline(&self) -> String {
        match self.error_kind {
            None => "OK".to_string(),
            Some(kind) => kind.to_string(),
        }
    }
}
