//! First-run environment bootstrap
//!
//! Ensures a working local toolchain directory exists. The install runs five
//! stages strictly in sequence; each stage depends on the previous stage's
//! side effect being durable, so a stage failure aborts the remainder and is
//! reported as `BootstrapStageFailed`. Readiness is recorded by an explicit
//! marker file written only after every install stage succeeded - a
//! half-finished install is never mistaken for a ready environment.

use chrono::{DateTime, Utc};
use include_dir::{Dir, DirEntry, include_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::errors::{PipelineError, Result};
use crate::models::{AppEvent, BootstrapStage};
use crate::toolchain::{CommandRunner, CommandSpec};

/// Bundled compilation assets: toolchain scripts, the sketch skeleton, the
/// prebuilt interpreter firmware image and the library archive. Unpacked
/// into the environment root by the copy-assets stage.
static COMPILATION_ASSETS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/assets/compilation");

/// Bump when the layout of the bootstrapped assets changes; a marker with an
/// older schema forces a fresh install.
pub const MARKER_SCHEMA_VERSION: u32 = 1;

/// Board-support package installed for the default architecture.
pub const BOARD_SUPPORT_PACKAGE: &str = "arduino:avr";

const MARKER_FILE: &str = "ready.json";

/// Readiness record written after the final install stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyMarker {
    pub schema_version: u32,
    pub board_support_version: String,
    pub completed_at: DateTime<Utc>,
}

/// Paths of the local toolchain environment. Lives for the process lifetime.
#[derive(Debug, Clone)]
pub struct Environment {
    root: PathBuf,
    library_dir: PathBuf,
}

impl Environment {
    pub fn new(root: impl Into<PathBuf>, library_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            library_dir: library_dir.into(),
        }
    }

    /// Resolve the environment from the user config, defaulting to
    /// `~/.sketchforge` and `~/Arduino`.
    pub fn from_config(config: &AppConfig) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let root = config
            .env_root
            .clone()
            .unwrap_or_else(|| home.join(".sketchforge"));
        let library_dir = config
            .library_dir
            .clone()
            .unwrap_or_else(|| home.join("Arduino"));
        Self { root, library_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sketch-library directory the bundled libraries are extracted into.
    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    pub fn marker_path(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    /// Staging path for native sources; re-written before every invocation.
    pub fn native_sketch_path(&self) -> PathBuf {
        self.root.join("sketch").join("sketch.ino")
    }

    /// Staging path for interpreted sources.
    pub fn interpreted_sketch_path(&self) -> PathBuf {
        self.root.join("py").join("sketch.py")
    }

    /// Path of a toolchain script inside the environment root.
    pub fn script_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Prebuilt interpreter firmware image for memory-mapped flashing.
    pub fn firmware_path(&self) -> PathBuf {
        self.root.join("firmware.hex")
    }

    pub fn libraries_archive_path(&self) -> PathBuf {
        self.root.join("libraries.zip")
    }

    /// Whether the environment finished bootstrapping. Only a marker with
    /// the current schema version counts; anything else needs a re-install.
    pub fn is_ready(&self) -> bool {
        self.read_marker()
            .map(|m| m.schema_version == MARKER_SCHEMA_VERSION)
            .unwrap_or(false)
    }

    pub fn read_marker(&self) -> Result<ReadyMarker> {
        let content = std::fs::read_to_string(self.marker_path())?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Outcome of an `ensure_environment` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The environment was already ready; nothing was done.
    AlreadyReady,
    /// A bootstrap is currently running; this request was ignored.
    AlreadyRunning,
    /// All stages ran and the environment is now ready.
    Installed,
}

/// Runs the first-run install. Safe to call repeatedly; concurrent calls
/// collapse into one running install.
pub struct Bootstrapper {
    env: Environment,
    runner: Arc<dyn CommandRunner>,
    events: mpsc::UnboundedSender<AppEvent>,
    in_progress: AtomicBool,
}

impl Bootstrapper {
    pub fn new(
        env: Environment,
        runner: Arc<dyn CommandRunner>,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            env,
            runner,
            events,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Ensure a ready environment, installing it if necessary.
    pub async fn ensure_environment(&self) -> Result<BootstrapOutcome> {
        if self.env.is_ready() {
            return Ok(BootstrapOutcome::AlreadyReady);
        }
        if self.in_progress.swap(true, Ordering::SeqCst) {
            log::info!("Bootstrap already in progress, ignoring request");
            return Ok(BootstrapOutcome::AlreadyRunning);
        }

        let result = self.run_stages().await;
        self.in_progress.store(false, Ordering::SeqCst);
        result.map(|_| BootstrapOutcome::Installed)
    }

    async fn run_stages(&self) -> Result<()> {
        for stage in BootstrapStage::all() {
            let _ = self.events.send(AppEvent::BootstrapStageStarted(stage));
            log::info!("Bootstrap stage {} started", stage);

            if let Err(detail) = self.run_stage(stage).await {
                log::error!("Bootstrap stage {} failed: {}", stage, detail);
                let _ = self.events.send(AppEvent::BootstrapFinished(false));
                return Err(PipelineError::BootstrapStageFailed { stage, detail });
            }

            let _ = self.events.send(AppEvent::BootstrapStageFinished(stage));
        }

        let _ = self.events.send(AppEvent::BootstrapFinished(true));
        log::info!("Bootstrap finished, environment ready at {}", self.env.root().display());
        Ok(())
    }

    async fn run_stage(&self, stage: BootstrapStage) -> std::result::Result<(), String> {
        match stage {
            BootstrapStage::CreateRoot => self.stage_create_root(),
            BootstrapStage::CopyAssets => self.stage_copy_assets(),
            BootstrapStage::InstallBoardSupport => self.stage_install_board_support().await,
            BootstrapStage::ExtractLibraries => self.stage_extract_libraries(),
            BootstrapStage::WriteMarker => self.stage_write_marker(),
        }
    }

    fn stage_create_root(&self) -> std::result::Result<(), String> {
        let _ = self.events.send(AppEvent::FirstRunNotice(
            "First run: installing the board toolchain. This takes a moment; \
             retry your request once it finishes."
                .to_string(),
        ));
        std::fs::create_dir_all(self.env.root()).map_err(|e| e.to_string())
    }

    fn stage_copy_assets(&self) -> std::result::Result<(), String> {
        unpack_assets(&COMPILATION_ASSETS, self.env.root()).map_err(|e| e.to_string())
    }

    async fn stage_install_board_support(&self) -> std::result::Result<(), String> {
        let cli = self.env.script_path("arduino-cli");
        let cli = cli.to_string_lossy().into_owned();

        let commands = [
            CommandSpec::new(cli.clone(), &["core", "update-index"]).with_cwd(self.env.root()),
            CommandSpec::new(cli, &["core", "install", BOARD_SUPPORT_PACKAGE])
                .with_cwd(self.env.root()),
        ];

        for spec in commands {
            let output = self.runner.run(&spec).await.map_err(|e| e.to_string())?;
            if !output.success {
                return Err(format!("{}: {}", spec.display(), output.stderr.trim()));
            }
        }
        Ok(())
    }

    fn stage_extract_libraries(&self) -> std::result::Result<(), String> {
        let archive_path = self.env.libraries_archive_path();
        let file = std::fs::File::open(&archive_path).map_err(|e| {
            format!("open {}: {}", archive_path.display(), e)
        })?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
        std::fs::create_dir_all(self.env.library_dir()).map_err(|e| e.to_string())?;
        archive
            .extract(self.env.library_dir())
            .map_err(|e| e.to_string())
    }

    fn stage_write_marker(&self) -> std::result::Result<(), String> {
        let marker = ReadyMarker {
            schema_version: MARKER_SCHEMA_VERSION,
            board_support_version: BOARD_SUPPORT_PACKAGE.to_string(),
            completed_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&marker).map_err(|e| e.to_string())?;
        std::fs::write(self.env.marker_path(), content).map_err(|e| e.to_string())
    }
}

/// Write an embedded asset tree to disk, marking shell scripts executable.
fn unpack_assets(dir: &Dir<'_>, dest: &Path) -> std::io::Result<()> {
    for entry in dir.entries() {
        match entry {
            DirEntry::Dir(sub) => {
                std::fs::create_dir_all(dest.join(sub.path()))?;
                unpack_assets(sub, dest)?;
            }
            DirEntry::File(file) => {
                let target = dest.join(file.path());
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, file.contents())?;
                mark_executable(&target)?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let is_script = path
        .extension()
        .map(|ext| ext == "sh" || ext == "bat")
        .unwrap_or(false);
    if is_script {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
