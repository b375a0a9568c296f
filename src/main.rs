use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use sketchforge::bootstrap::{BootstrapOutcome, Bootstrapper, Environment};
use sketchforge::config::AppConfig;
use sketchforge::models::{AppEvent, board_catalog, board_profile};
use sketchforge::ports::PortMonitor;
use sketchforge::session::BuildSession;
use sketchforge::toolchain::{CommandRunner, Dispatcher, SystemRunner};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "sketchforge")]
#[command(about = "Board toolchain orchestration for block-based sketch editors")]
struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the supported boards
    Boards,
    /// List attached serial devices
    Ports,
    /// Install the local toolchain environment now
    Bootstrap,
    /// Compile the given source for a board without touching hardware
    Verify {
        /// Board id from the catalog
        #[arg(long)]
        board: Option<String>,
        /// Source file to verify
        source: PathBuf,
    },
    /// Verify, then upload to the attached device
    Flash {
        /// Board id from the catalog
        #[arg(long)]
        board: Option<String>,
        /// Serial device to flash through (auto-selected when omitted)
        #[arg(long)]
        port: Option<String>,
        /// Source file to flash
        source: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    sketchforge::logging::init_cli_logging(cli.verbose, cli.quiet);

    let config = AppConfig::load();
    let env = Environment::from_config(&config);

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(rx));

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let bootstrapper = Arc::new(Bootstrapper::new(env.clone(), runner.clone(), tx.clone()));
    let dispatcher = Arc::new(Dispatcher::new(env, runner));
    let monitor = Arc::new(Mutex::new(PortMonitor::new(tx.clone())));
    let session = BuildSession::new(
        dispatcher,
        bootstrapper.clone(),
        monitor.clone(),
        tx.clone(),
    );

    let ok = run_command(cli.command, &config, &session, &bootstrapper, &monitor).await?;

    drop(session);
    drop(bootstrapper);
    drop(monitor);
    drop(tx);
    let _ = printer.await;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_command(
    command: Commands,
    config: &AppConfig,
    session: &BuildSession,
    bootstrapper: &Bootstrapper,
    monitor: &Arc<Mutex<PortMonitor>>,
) -> Result<bool> {
    match command {
        Commands::Boards => {
            let mut boards: Vec<_> = board_catalog().values().collect();
            boards.sort_by(|a, b| a.id.cmp(&b.id));
            for board in boards {
                println!(
                    "{:<14} {:<12} {:<9} {:>7}  {}",
                    board.id,
                    format!("{:?}", board.compiler_kind).to_lowercase(),
                    board.mcu_family,
                    board.upload_speed,
                    board.build_target
                );
            }
            Ok(true)
        }
        Commands::Ports => {
            let snapshot = {
                let mut guard = monitor.lock().expect("port monitor lock");
                guard.poll().context("serial enumeration failed")?
            };
            if snapshot.entries.is_empty() {
                println!("No serial devices found");
            }
            for entry in &snapshot.entries {
                let marker = if entry.has_vendor_id { "*" } else { " " };
                println!("{} {}", marker, entry.device_id);
            }
            let guard = monitor.lock().expect("port monitor lock");
            println!("Selected: {}", guard.selection());
            Ok(true)
        }
        Commands::Bootstrap => {
            match bootstrapper.ensure_environment().await? {
                BootstrapOutcome::AlreadyReady => println!(
                    "Environment already ready at {}",
                    bootstrapper.environment().root().display()
                ),
                BootstrapOutcome::Installed => println!(
                    "Environment installed at {}",
                    bootstrapper.environment().root().display()
                ),
                BootstrapOutcome::AlreadyRunning => println!("Bootstrap already in progress"),
            }
            Ok(true)
        }
        Commands::Verify { board, source } => {
            let profile = lookup_board(board.as_deref(), config)?;
            let code = read_source(&source)?;
            let result = session.verify(profile, &code).await;
            print_result(&result);
            Ok(result.verified)
        }
        Commands::Flash {
            board,
            port,
            source,
        } => {
            let profile = lookup_board(board.as_deref(), config)?;
            let code = read_source(&source)?;

            {
                let mut guard = monitor.lock().expect("port monitor lock");
                guard.poll().context("serial enumeration failed")?;
                if let Some(port) = port {
                    guard.select(port);
                }
            }

            // Background polling keeps running while the build is in
            // flight; the dispatcher captured its selection already.
            let poller = sketchforge::ports::spawn_polling(
                monitor.clone(),
                std::time::Duration::from_secs(config.ports.poll_interval_secs.max(1)),
            );

            let verify = session.verify(profile, &code).await;
            if !verify.verified {
                poller.abort();
                print_result(&verify);
                return Ok(false);
            }

            let result = session.flash(profile, &code).await;
            poller.abort();
            print_result(&result);
            Ok(result.verified)
        }
    }
}

fn lookup_board(
    id: Option<&str>,
    config: &AppConfig,
) -> Result<&'static sketchforge::models::BoardProfile> {
    let id = id
        .or(config.build.default_board.as_deref())
        .ok_or_else(|| anyhow!("no board given; pass --board or set build.default_board"))?;
    board_profile(id)
        .ok_or_else(|| anyhow!("unknown board '{}' (see `sketchforge boards`)", id))
}

fn read_source(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn print_result(result: &sketchforge::models::BuildResult) {
    println!("{}", result.headline());
    for line in &result.diagnostics {
        println!("  {}", line);
    }
    if !result.verified && result.diagnostics.is_empty() && !result.raw_detail.is_empty() {
        println!("  {}", result.raw_detail);
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<AppEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            AppEvent::PhaseChanged(phase) => log::debug!("Phase: {}", phase),
            AppEvent::BuildFinished(result) => {
                log::info!("Build finished: {}", result.headline())
            }
            AppEvent::FirstRunNotice(msg) => log::warn!("{}", msg),
            AppEvent::BootstrapStageStarted(stage) => log::info!("Bootstrap: {} ...", stage),
            AppEvent::BootstrapStageFinished(stage) => log::info!("Bootstrap: {} done", stage),
            AppEvent::BootstrapFinished(true) => log::info!("Bootstrap finished"),
            AppEvent::BootstrapFinished(false) => log::error!("Bootstrap failed"),
            AppEvent::PortsChanged(snapshot) => {
                log::debug!("Ports changed: {} device(s)", snapshot.device_count())
            }
            AppEvent::PortAutoSelected(port) => log::info!("Auto-selected port {}", port),
            AppEvent::PortSelectionCleared => log::info!("Port selection cleared"),
            AppEvent::Info(msg) => log::info!("{}", msg),
            AppEvent::Warning(msg) => log::warn!("{}", msg),
            AppEvent::Error(msg) => log::error!("{}", msg),
        }
    }
}
