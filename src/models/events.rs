//! Application events surfaced to the UI collaborator

use crate::models::{BootstrapStage, BuildPhase, BuildResult, PortSnapshot};

/// Events emitted by the pipeline for the UI layer to render.
#[derive(Debug, Clone)]
pub enum AppEvent {
    // Build lifecycle
    PhaseChanged(BuildPhase),
    BuildFinished(BuildResult),

    // Bootstrap lifecycle
    FirstRunNotice(String),                // "first run, please wait"
    BootstrapStageStarted(BootstrapStage),
    BootstrapStageFinished(BootstrapStage),
    BootstrapFinished(bool),               // success

    // Port monitor
    PortsChanged(PortSnapshot),
    PortAutoSelected(String),  // device_id
    PortSelectionCleared,

    // User feedback
    Info(String),
    Warning(String),
    Error(String),
}
