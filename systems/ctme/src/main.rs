//! MeterEye service binary.
use clap::{Parser, Subcommand};
use metereye::components::prelude::*;
use metereye::config::{loader, migrate};
use metereye::devices::hardware::rtsp::RtspSourceFactory;
use metereye::errors::ConfigError;
use metereye::registry::Registry;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG: i32 = 1;
const EXIT_IO: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
#[command(name = "ctme", about = "Seven segment meter monitoring over RTSP")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
    /// Path to the configuration file. Defaults to
    /// $XDG_CONFIG_HOME/ctme/config.yaml, then ./config.yaml, then
    /// ./config.example.yaml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the monitoring service. This is the default.
    Run,
    /// Convert a legacy JSON configuration into canonical YAML.
    Migrate {
        /// Path of the legacy JSON document.
        #[arg(long, default_value = "config.json")]
        json: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let code = match args.command.unwrap_or(Command::Run) {
        Command::Run => run(args.config),
        Command::Migrate { json } => run_migration(json, args.config),
    };
    std::process::exit(code);
}

fn exit_code_for(error: &ConfigError) -> i32 {
    match error {
        ConfigError::Io { .. } => EXIT_IO,
        _ => EXIT_CONFIG,
    }
}

fn run(config: Option<PathBuf>) -> i32 {
    let path = match loader::resolve_path(config) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "no configuration found");
            return EXIT_CONFIG;
        }
    };
    let snapshot = match loader::load(&path) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            error!(error = %err, path = %path.display(), "failed to load configuration");
            return exit_code_for(&err);
        }
    };
    info!(
        path = %path.display(),
        cameras = snapshot.cameras.len(),
        "configuration loaded"
    );

    let registry = Arc::new(Registry::new(snapshot.clone()));
    let exporter = ExporterController::start(&snapshot.export);
    let mut supervisor = Supervisor::new(
        registry.clone(),
        exporter.submitter(),
        Arc::new(RtspSourceFactory),
    );
    supervisor.reconcile();

    let (signal_sender, signal_receiver) = mpsc::channel();
    if let Err(err) = ctrlc::set_handler(move || {
        let _ = signal_sender.send(());
    }) {
        error!(error = %err, "failed to install the interrupt handler");
        supervisor.shutdown();
        exporter.shutdown();
        return EXIT_IO;
    }

    info!("service running, interrupt to stop");
    let _ = signal_receiver.recv();
    info!("interrupt received, shutting down");
    supervisor.shutdown();
    exporter.shutdown();
    EXIT_INTERRUPTED
}

fn run_migration(json: PathBuf, output: Option<PathBuf>) -> i32 {
    let yaml = output.unwrap_or_else(|| PathBuf::from("config.yaml"));
    match migrate::migrate(&json, &yaml) {
        Ok(config) => {
            info!(
                cameras = config.cameras.len(),
                output = %yaml.display(),
                "migration complete"
            );
            0
        }
        Err(err) => {
            error!(error = %err, "migration failed");
            exit_code_for(&err)
        }
    }
}
