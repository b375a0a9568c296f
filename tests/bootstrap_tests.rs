//! First-run environment install

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;

use sketchforge::bootstrap::{
    BootstrapOutcome, Bootstrapper, Environment, MARKER_SCHEMA_VERSION,
};
use sketchforge::errors::{PipelineError, Result};
use sketchforge::models::{AppEvent, BootstrapStage};
use sketchforge::toolchain::{CommandRunner, CommandSpec, ToolOutput};

struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    respond: Box<dyn Fn(&CommandSpec) -> Result<ToolOutput> + Send + Sync>,
}

impl ScriptedRunner {
    fn new(
        respond: impl Fn(&CommandSpec) -> Result<ToolOutput> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        (self.respond)(spec)
    }
}

fn ok_output() -> ToolOutput {
    ToolOutput {
        success: true,
        stdout: String::new(),
        stderr: String::new(),
    }
}

struct Fixture {
    bootstrapper: Arc<Bootstrapper>,
    runner: Arc<ScriptedRunner>,
    events: mpsc::UnboundedReceiver<AppEvent>,
    env: Environment,
    _dir: TempDir,
}

fn fixture_with(runner: Arc<ScriptedRunner>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let env = Environment::new(dir.path().join("env"), dir.path().join("libraries"));
    let (tx, events) = mpsc::unbounded_channel();
    let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
    let bootstrapper = Arc::new(Bootstrapper::new(env.clone(), dyn_runner, tx));
    Fixture {
        bootstrapper,
        runner,
        events,
        env,
        _dir: dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(ScriptedRunner::new(|_| Ok(ok_output())))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn full_install_writes_marker_and_unpacks_assets() {
    let mut f = fixture();

    let outcome = f.bootstrapper.ensure_environment().await.unwrap();
    assert_eq!(outcome, BootstrapOutcome::Installed);

    // Marker carries the schema version
    let marker = f.env.read_marker().unwrap();
    assert_eq!(marker.schema_version, MARKER_SCHEMA_VERSION);
    assert!(f.env.is_ready());

    // Toolchain scripts landed in the root
    assert!(f.env.script_path("verify.sh").is_file());
    assert!(f.env.script_path("flash.sh").is_file());
    assert!(f.env.script_path("verify_cortexm0.bat").is_file());
    assert!(f.env.firmware_path().is_file());

    // Bundled libraries were extracted into the sketch-library directory
    assert!(f
        .env
        .library_dir()
        .join("BlockRuntime")
        .join("library.properties")
        .is_file());

    // Board support install ran update-index first, then the core install
    let calls = f.runner.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].args, vec!["core", "update-index"]);
    assert_eq!(calls[1].args, vec!["core", "install", "arduino:avr"]);

    // Stages were reported in order
    let events = drain(&mut f.events);
    let started: Vec<BootstrapStage> = events
        .iter()
        .filter_map(|e| match e {
            AppEvent::BootstrapStageStarted(stage) => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(started, BootstrapStage::all().to_vec());
    assert!(events
        .iter()
        .any(|e| matches!(e, AppEvent::FirstRunNotice(_))));
    assert!(events
        .iter()
        .any(|e| matches!(e, AppEvent::BootstrapFinished(true))));
}

#[tokio::test]
async fn second_call_is_a_no_op() {
    let f = fixture();

    let first = f.bootstrapper.ensure_environment().await.unwrap();
    assert_eq!(first, BootstrapOutcome::Installed);
    let calls_after_install = f.runner.call_count();

    let second = f.bootstrapper.ensure_environment().await.unwrap();
    assert_eq!(second, BootstrapOutcome::AlreadyReady);
    assert_eq!(f.runner.call_count(), calls_after_install);
}

#[tokio::test]
async fn failed_stage_short_circuits_the_remainder() {
    let runner = ScriptedRunner::new(|spec| {
        if spec.args.contains(&"update-index".to_string()) {
            Ok(ToolOutput {
                success: false,
                stdout: String::new(),
                stderr: "no network route to package index".to_string(),
            })
        } else {
            Ok(ok_output())
        }
    });
    let mut f = fixture_with(runner);

    let err = f.bootstrapper.ensure_environment().await.unwrap_err();
    match err {
        PipelineError::BootstrapStageFailed { stage, detail } => {
            assert_eq!(stage, BootstrapStage::InstallBoardSupport);
            assert!(detail.contains("no network route"));
        }
        other => panic!("expected BootstrapStageFailed, got {:?}", other),
    }

    // Later stages never ran: no library extraction, no readiness marker
    assert!(!f.env.library_dir().join("BlockRuntime").exists());
    assert!(!f.env.marker_path().exists());
    assert!(!f.env.is_ready());

    // Only the failing command was attempted from the install stage
    assert_eq!(f.runner.call_count(), 1);

    let events = drain(&mut f.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, AppEvent::BootstrapFinished(false))));
}

#[tokio::test]
async fn concurrent_bootstrap_requests_collapse_into_one() {
    struct GatedRunner {
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl CommandRunner for GatedRunner {
        async fn run(&self, _spec: &CommandSpec) -> Result<ToolOutput> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(ToolOutput {
                success: true,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    let dir = TempDir::new().unwrap();
    let env = Environment::new(dir.path().join("env"), dir.path().join("libraries"));
    let (tx, _events) = mpsc::unbounded_channel();
    let runner = Arc::new(GatedRunner {
        started: tokio::sync::Notify::new(),
        release: tokio::sync::Notify::new(),
    });
    let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
    let bootstrapper = Arc::new(Bootstrapper::new(env, dyn_runner, tx));

    let task = {
        let bootstrapper = bootstrapper.clone();
        tokio::spawn(async move { bootstrapper.ensure_environment().await })
    };

    // Wait until the first install is inside the board-support stage
    runner.started.notified().await;

    let second = bootstrapper.ensure_environment().await.unwrap();
    assert_eq!(second, BootstrapOutcome::AlreadyRunning);

    runner.release.notify_one();
    runner.release.notify_one(); // two sequential install commands
    let first = task.await.unwrap().unwrap();
    assert_eq!(first, BootstrapOutcome::Installed);
}
