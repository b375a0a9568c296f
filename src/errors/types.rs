//! Custom error types for the sketchforge pipeline

use std::fmt;

use crate::models::BootstrapStage;

/// Main error type for pipeline operations
#[derive(Debug)]
pub enum PipelineError {
    /// The local toolchain environment has not been bootstrapped yet
    EnvironmentNotReady,
    /// A bootstrap stage failed; later stages were not attempted
    BootstrapStageFailed { stage: BootstrapStage, detail: String },
    /// The external tool could not be found or failed to start at all
    ToolInvocation { tool: String, detail: String },
    /// The compiler ran and rejected the program
    Compilation {
        diagnostics: Vec<String>,
        raw: String,
    },
    /// The uploader ran during flashing and failed
    Upload {
        diagnostics: Vec<String>,
        raw: String,
    },
    /// No serial device is selected (the selection is the sentinel)
    NoPortSelected,
    /// Flash requested while the program has not been verified since last edit
    NotVerified,
    /// No mounted volume with the expected label was found
    DeviceNotFound { label: String },
    /// A verify or flash operation is already in flight
    OperationInFlight,
    /// A previous failure has not been acknowledged yet
    FailureNotAcknowledged,
    /// General I/O errors
    Io(std::io::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::EnvironmentNotReady => {
                write!(f, "Toolchain environment is not ready; bootstrap required")
            }
            PipelineError::BootstrapStageFailed { stage, detail } => {
                write!(f, "Bootstrap stage {} failed: {}", stage, detail)
            }
            PipelineError::ToolInvocation { tool, detail } => {
                write!(f, "Could not start {}: {}", tool, detail)
            }
            PipelineError::Compilation { diagnostics, .. } => {
                write!(f, "Compilation failed ({} diagnostic(s))", diagnostics.len())
            }
            PipelineError::Upload { diagnostics, .. } => {
                write!(f, "Upload failed ({} diagnostic(s))", diagnostics.len())
            }
            PipelineError::NoPortSelected => write!(f, "No serial device selected"),
            PipelineError::NotVerified => {
                write!(f, "Program has not been verified since the last edit")
            }
            PipelineError::DeviceNotFound { label } => {
                write!(f, "No mounted volume labelled {} was found", label)
            }
            PipelineError::OperationInFlight => {
                write!(f, "A verify or flash operation is already running")
            }
            PipelineError::FailureNotAcknowledged => {
                write!(f, "Previous failure must be acknowledged first")
            }
            PipelineError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        ))
    }
}

impl PipelineError {
    /// Classify into the coarse kind surfaced on a [`crate::models::BuildResult`].
    pub fn kind(&self) -> crate::models::ErrorKind {
        use crate::models::ErrorKind;
        match self {
            PipelineError::EnvironmentNotReady => ErrorKind::EnvironmentNotReady,
            PipelineError::BootstrapStageFailed { .. } => ErrorKind::BootstrapStageFailed,
            PipelineError::ToolInvocation { .. } => ErrorKind::ToolInvocation,
            PipelineError::Compilation { .. } => ErrorKind::Compilation,
            PipelineError::Upload { .. } => ErrorKind::Upload,
            PipelineError::NoPortSelected => ErrorKind::NoPortSelected,
            PipelineError::NotVerified => ErrorKind::NotVerified,
            PipelineError::DeviceNotFound { .. } => ErrorKind::DeviceNotFound,
            PipelineError::OperationInFlight => ErrorKind::OperationInFlight,
            PipelineError::FailureNotAcknowledged => ErrorKind::FailureNotAcknowledged,
            PipelineError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
