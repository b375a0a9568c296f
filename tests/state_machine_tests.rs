//! Verify/flash state machine and gating behavior
//!
//! Runs the whole pipeline against scripted command runners and throwaway
//! environments; no toolchain or hardware is required.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;

use sketchforge::bootstrap::{Bootstrapper, Environment, MARKER_SCHEMA_VERSION};
use sketchforge::errors::Result;
use sketchforge::models::{
    AppEvent, BuildPhase, ErrorKind, PortEntry, PortSnapshot, board_catalog, board_profile,
};
use sketchforge::ports::PortMonitor;
use sketchforge::session::BuildSession;
use sketchforge::toolchain::{CommandRunner, CommandSpec, Dispatcher, ToolOutput};

/// Records every invocation and answers with a scripted response.
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

    fn all_ok() -> Arc<Self> {
        Self::new(|_| Ok(ok_output("")))
    }

    fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_matching(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.program.contains(needle))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        (self.respond)(spec)
    }
}

fn ok_output(stdout: &str) -> ToolOutput {
    ToolOutput {
        success: true,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn failed_output(stderr: &str) -> ToolOutput {
    ToolOutput {
        success: false,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

const FIRMWARE: &str = ":020000040000FA\n:1000000000400020F1010000D5010000D7010000F0\n:04000005000001C135\n:00000001FF\n";

/// A fully bootstrapped throwaway environment.
fn ready_environment(dir: &TempDir) -> Environment {
    let root = dir.path().join("env");
    let library_dir = dir.path().join("libraries");
    std::fs::create_dir_all(&root).unwrap();
    let marker = format!(
        r#"{{"schema_version":{},"board_support_version":"arduino:avr","completed_at":"2026-01-01T00:00:00Z"}}"#,
        MARKER_SCHEMA_VERSION
    );
    std::fs::write(root.join("ready.json"), marker).unwrap();
    std::fs::write(root.join("firmware.hex"), FIRMWARE).unwrap();
    Environment::new(root, library_dir)
}

/// An environment that was never bootstrapped.
fn missing_environment(dir: &TempDir) -> Environment {
    Environment::new(dir.path().join("env"), dir.path().join("libraries"))
}

struct Fixture {
    session: Arc<BuildSession>,
    runner: Arc<ScriptedRunner>,
    events: mpsc::UnboundedReceiver<AppEvent>,
    _dir: TempDir,
}

fn fixture_with(env_ready: bool, runner: Arc<ScriptedRunner>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let env = if env_ready {
        ready_environment(&dir)
    } else {
        missing_environment(&dir)
    };

    let (tx, events) = mpsc::unbounded_channel();
    let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
    let bootstrapper = Arc::new(Bootstrapper::new(env.clone(), dyn_runner.clone(), tx.clone()));
    let dispatcher = Arc::new(Dispatcher::new(env, dyn_runner));
    let monitor = Arc::new(Mutex::new(PortMonitor::new(tx.clone())));
    let session = Arc::new(BuildSession::new(dispatcher, bootstrapper, monitor, tx));

    Fixture {
        session,
        runner,
        events,
        _dir: dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(true, ScriptedRunner::all_ok())
}

fn select_port(fixture: &Fixture, port: &str) {
    fixture
        .session
        .port_monitor()
        .lock()
        .unwrap()
        .select(port);
}

fn snapshot(ids: &[(&str, bool)]) -> PortSnapshot {
    PortSnapshot::new(
        ids.iter()
            .map(|(id, vendor)| PortEntry {
                device_id: id.to_string(),
                has_vendor_id: *vendor,
            })
            .collect(),
    )
}

#[tokio::test]
async fn flash_without_verify_is_rejected_for_every_board() {
    for profile in board_catalog().values() {
        let f = fixture();
        select_port(&f, "/dev/ttyACM0");

        let result = f.session.flash(profile, "void loop() {}").await;

        assert!(!result.verified, "board {}", profile.id);
        assert_eq!(result.error_kind, Some(ErrorKind::NotVerified));
        assert!(
            f.runner.calls().is_empty(),
            "no external process may run for board {}",
            profile.id
        );
        assert_eq!(f.session.phase(), BuildPhase::Unverified);
    }
}

#[tokio::test]
async fn edit_resets_to_unverified_from_any_phase() {
    let f = fixture();
    let uno = board_profile("uno").unwrap();

    let result = f.session.verify(uno, "void loop() {}").await;
    assert!(result.verified);
    assert_eq!(f.session.phase(), BuildPhase::Verified);

    f.session.notify_edit();
    assert_eq!(f.session.phase(), BuildPhase::Unverified);

    // Also from Flashed
    let f = fixture();
    select_port(&f, "/dev/ttyACM0");
    f.session.verify(uno, "void loop() {}").await;
    f.session.flash(uno, "void loop() {}").await;
    assert_eq!(f.session.phase(), BuildPhase::Flashed);
    f.session.notify_edit();
    assert_eq!(f.session.phase(), BuildPhase::Unverified);
}

#[tokio::test]
async fn verify_then_flash_invokes_exactly_one_uploader() {
    let mut f = fixture();
    let uno = board_profile("uno").unwrap();
    select_port(&f, "/dev/ttyUSB1");

    let verify = f.session.verify(uno, "void loop() {}").await;
    assert!(verify.verified);

    let flash = f.session.flash(uno, "void loop() {}").await;
    assert!(flash.verified);
    assert_eq!(f.session.phase(), BuildPhase::Flashed);

    assert_eq!(f.runner.calls_matching("verify.sh"), 1);
    assert_eq!(f.runner.calls_matching("flash.sh"), 1);
    let uploads: Vec<_> = f
        .runner
        .calls()
        .into_iter()
        .filter(|c| c.program.contains("flash.sh"))
        .collect();
    assert_eq!(uploads[0].args, vec!["/dev/ttyUSB1", "uno"]);

    // The UI saw the phase walk through the whole lifecycle
    let mut phases = Vec::new();
    while let Ok(event) = f.events.try_recv() {
        if let AppEvent::PhaseChanged(phase) = event {
            phases.push(phase);
        }
    }
    assert_eq!(
        phases,
        vec![
            BuildPhase::Verifying,
            BuildPhase::Verified,
            BuildPhase::Flashing,
            BuildPhase::Flashed,
        ]
    );
}

#[tokio::test]
async fn port_count_decrease_resets_selection_and_flash_fails() {
    let f = fixture();
    let uno = board_profile("uno").unwrap();

    {
        let mut monitor = f.session.port_monitor().lock().unwrap();
        monitor.apply(&snapshot(&[("/dev/ttyACM0", true), ("/dev/ttyUSB0", true)]));
        monitor.select("/dev/ttyACM0");
        // Device disappears: count decreased, selection must reset
        monitor.apply(&snapshot(&[("/dev/ttyUSB0", true)]));
        assert!(monitor.selection().is_sentinel());
    }

    let verify = f.session.verify(uno, "void loop() {}").await;
    assert!(verify.verified);

    let flash = f.session.flash(uno, "void loop() {}").await;
    assert_eq!(flash.error_kind, Some(ErrorKind::NoPortSelected));
    // No upload attempt reached hardware, the verify still stands
    assert_eq!(f.session.phase(), BuildPhase::Verified);
    assert_eq!(f.runner.calls_matching("flash.sh"), 0);
}

#[tokio::test]
async fn missing_environment_triggers_bootstrap_without_retry() {
    let f = fixture_with(false, ScriptedRunner::all_ok());
    let uno = board_profile("uno").unwrap();

    let result = f.session.verify(uno, "void loop() {}").await;

    assert_eq!(result.error_kind, Some(ErrorKind::EnvironmentNotReady));
    assert_eq!(f.session.phase(), BuildPhase::Unverified);

    // Bootstrap ran to completion: board-support install invoked, marker on disk
    assert_eq!(f.runner.calls_matching("arduino-cli"), 2);
    let calls = f.runner.calls();
    assert_eq!(calls[0].args, vec!["core", "update-index"]);
    assert_eq!(calls[1].args, vec!["core", "install", "arduino:avr"]);

    // The aborted verify was not retried automatically
    assert_eq!(f.runner.calls_matching("verify.sh"), 0);

    // A manual retry now succeeds against the installed environment
    f.session.acknowledge();
    let retry = f.session.verify(uno, "void loop() {}").await;
    assert!(retry.verified);
}

#[tokio::test]
async fn compilation_failure_needs_acknowledge_before_next_attempt() {
    let runner = ScriptedRunner::new(|spec| {
        if spec.program.contains("verify.sh") {
            Ok(failed_output("sketch.ino:3: something is wrong"))
        } else {
            Ok(ok_output(""))
        }
    });
    let f = fixture_with(true, runner);
    let uno = board_profile("uno").unwrap();

    let result = f.session.verify(uno, "void loop() {").await;
    assert_eq!(result.error_kind, Some(ErrorKind::Compilation));
    assert_eq!(f.session.phase(), BuildPhase::VerifyFailed);
    assert!(f.session.last_result().is_some());

    // Gated until acknowledged
    let rejected = f.session.verify(uno, "void loop() {").await;
    assert_eq!(
        rejected.error_kind,
        Some(ErrorKind::FailureNotAcknowledged)
    );

    f.session.acknowledge();
    assert_eq!(f.session.phase(), BuildPhase::Unverified);
    assert!(f.session.last_result().is_none());
}

#[tokio::test]
async fn upload_failure_forces_reverification() {
    let runner = ScriptedRunner::new(|spec| {
        if spec.program.contains("flash.sh") {
            Ok(failed_output("avrdude: stk500_recv(): not in sync"))
        } else {
            Ok(ok_output(""))
        }
    });
    let f = fixture_with(true, runner);
    let uno = board_profile("uno").unwrap();
    select_port(&f, "/dev/ttyACM0");

    f.session.verify(uno, "void loop() {}").await;
    let flash = f.session.flash(uno, "void loop() {}").await;

    assert_eq!(flash.error_kind, Some(ErrorKind::Upload));
    assert_eq!(f.session.phase(), BuildPhase::FlashFailed);

    f.session.acknowledge();
    assert_eq!(f.session.phase(), BuildPhase::Unverified);

    // Flash is unreachable until a fresh verify happened
    let again = f.session.flash(uno, "void loop() {}").await;
    assert_eq!(again.error_kind, Some(ErrorKind::NotVerified));
}

#[tokio::test]
async fn memory_mapped_flash_without_volume_keeps_verified_phase() {
    let f = fixture();
    let microbit_py = board_profile("microbit-py").unwrap();
    select_port(&f, "/dev/ttyACM0");

    let verify = f.session.verify(microbit_py, "print('hi')").await;
    assert!(verify.verified);

    // No MICROBIT volume is mounted on the test host
    let flash = f.session.flash(microbit_py, "print('hi')").await;
    assert_eq!(flash.error_kind, Some(ErrorKind::DeviceNotFound));
    assert_eq!(f.session.phase(), BuildPhase::Verified);
}

#[tokio::test]
async fn constrained_verify_failure_keeps_board_id_in_diagnostics() {
    let dir = TempDir::new().unwrap();
    let env = ready_environment(&dir);
    let staging = env.native_sketch_path();
    let staging_str = staging.to_string_lossy().into_owned();

    let runner = ScriptedRunner::new(move |spec| {
        if spec.program.contains("verify_cortexm0.bat") {
            Ok(failed_output(&format!(
                "{}:4:1: unknown identifier, board microbit\n{}:9:3: missing bracket, board microbit\nexit status 1",
                staging_str, staging_str
            )))
        } else {
            Ok(ok_output(""))
        }
    });

    let (tx, _events) = mpsc::unbounded_channel();
    let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
    let bootstrapper = Arc::new(Bootstrapper::new(env.clone(), dyn_runner.clone(), tx.clone()));
    let dispatcher = Arc::new(Dispatcher::new(env, dyn_runner));
    let monitor = Arc::new(Mutex::new(PortMonitor::new(tx.clone())));
    let session = BuildSession::new(dispatcher, bootstrapper, monitor, tx);

    let microbit = board_profile("microbit").unwrap();
    let result = session.verify(microbit, "void loop() {").await;

    assert_eq!(result.error_kind, Some(ErrorKind::Compilation));
    assert_eq!(result.diagnostics.len(), 2);
    for line in &result.diagnostics {
        assert!(line.contains("microbit"), "board id echo lost: {}", line);
        assert!(!line.contains("exit status 1"));
    }
}

#[tokio::test]
async fn edit_during_inflight_verify_discards_the_completion() {
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
    let env = ready_environment(&dir);
    let runner = Arc::new(GatedRunner {
        started: tokio::sync::Notify::new(),
        release: tokio::sync::Notify::new(),
    });

    let (tx, _events) = mpsc::unbounded_channel();
    let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
    let bootstrapper = Arc::new(Bootstrapper::new(env.clone(), dyn_runner.clone(), tx.clone()));
    let dispatcher = Arc::new(Dispatcher::new(env, dyn_runner));
    let monitor = Arc::new(Mutex::new(PortMonitor::new(tx.clone())));
    let session = Arc::new(BuildSession::new(dispatcher, bootstrapper, monitor, tx));

    let uno = board_profile("uno").unwrap();
    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.verify(uno, "void loop() {}").await })
    };

    runner.started.notified().await;
    assert_eq!(session.phase(), BuildPhase::Verifying);

    // A second request while one is in flight is rejected, not queued
    let busy = session.verify(uno, "void loop() {}").await;
    assert_eq!(busy.error_kind, Some(ErrorKind::OperationInFlight));

    // The user edits while the tool is still running
    session.notify_edit();
    runner.release.notify_one();

    let result = task.await.unwrap();
    assert!(result.verified, "the tool itself reported success");
    // ...but the edit made that result stale
    assert_eq!(session.phase(), BuildPhase::Unverified);
}
