//! Daemon entry point: loads a YAML process list, registers it with the supervisor,
//! starts everything, and blocks until SIGINT before draining down cleanly.

use clap::Parser;
use fs::directory_manager::{DirectoryManager, DirectoryManagerFs};
use fs::file::{FileDeleter, FileReader, FileWriter};
use fs::LocalFile;
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tspm::event::channel::pub_sub;
use tspm::event::{EventBus, EventType};
use tspm::logging::LoggingConfig;
use tspm::spec::ProcessSpec;
use tspm::state_store::StateStore;
use tspm::supervisor::Supervisor;
use tspm::webhook::{WebhookConfig, WebhookDispatcher};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tspmd", about = "Runs the process supervisor engine in the foreground")]
struct Cli {
    /// Path to the YAML file listing the processes (and optional logging/webhooks) to run.
    #[arg(long, env = "TSPM_CONFIG")]
    config: PathBuf,

    /// State directory for the pid file, `status.json`, and per-process logs. Defaults
    /// to `$TSPM_HOME`, then `$HOME/.tspm`.
    #[arg(long, env = "TSPM_HOME")]
    home: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DaemonConfig {
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    webhooks: Vec<WebhookSpec>,
    #[serde(default)]
    processes: Vec<ProcessSpec>,
}

#[derive(Debug, Deserialize, Clone)]
struct WebhookSpec {
    url: String,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

impl From<WebhookSpec> for WebhookConfig {
    fn from(spec: WebhookSpec) -> Self {
        WebhookConfig {
            url: spec.url,
            events: spec.events.iter().filter_map(|wire| EventType::from_wire(wire)).collect(),
            headers: spec.headers,
            enabled: spec.enabled,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let home = resolve_home(cli.home);

    if let Err(err) = prepare_state_dir(&home) {
        eprintln!("failed to prepare state directory {}: {err}", home.display());
        return ExitCode::FAILURE;
    }

    let pid_path = home.join("daemon.pid");
    if let Err(err) = acquire_pid_lock(&pid_path, &cli.config) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config {}: {err}", cli.config.display());
            let _ = LocalFile.delete(&pid_path);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = config.logging.clone().try_init() {
        eprintln!("failed to initialize logging: {err}");
    }

    let outcome = run(config, &home);
    let _ = LocalFile.delete(&pid_path);

    match outcome {
        Ok(()) => {
            info!("tspmd exited successfully");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "tspmd exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn run(config: DaemonConfig, home: &Path) -> Result<(), Box<dyn Error>> {
    let event_bus = Arc::new(EventBus::new());
    let state_store = StateStore::new(home.join("status.json"));
    let supervisor = Supervisor::new(event_bus.clone(), Some(state_store));

    if !config.webhooks.is_empty() {
        let webhooks: Vec<WebhookConfig> = config.webhooks.into_iter().map(WebhookConfig::from).collect();
        Arc::new(WebhookDispatcher::new()).spawn(event_bus.clone(), webhooks);
    }

    for spec in config.processes {
        let name = spec.name.clone();
        if let Err(err) = supervisor.add_process(spec) {
            error!(process = %name, error = %err, "failed to register process from config");
        }
    }

    for (name, result) in supervisor.start_all() {
        if let Err(err) = result {
            error!(process = %name, error = %err, "failed to start process");
        }
    }

    let (stop_publisher, stop_consumer) = pub_sub::<()>();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        let _ = stop_publisher.publish(());
    })?;

    let _ = stop_consumer.as_ref().recv();

    info!("shutting down");
    supervisor.shutdown();
    Ok(())
}

fn resolve_home(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os("TSPM_HOME").map(PathBuf::from))
        .unwrap_or_else(|| {
            let base = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            base.join(".tspm")
        })
}

fn prepare_state_dir(home: &Path) -> std::io::Result<()> {
    let manager = DirectoryManagerFs;
    manager.create(home)?;
    manager.create(&home.join("logs"))?;
    manager.create(&home.join(".pids"))?;
    manager.create(&home.join("startup"))?;
    Ok(())
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct PidFile {
    pid: u32,
    #[serde(rename = "startedAt")]
    started_at: String,
    #[serde(rename = "configFile")]
    config_file: PathBuf,
}

/// Refuses to start a second daemon against the same state directory: a `daemon.pid`
/// naming a still-alive process is treated as a live lock.
fn acquire_pid_lock(pid_path: &Path, config_path: &Path) -> Result<(), String> {
    if let Ok(existing) = LocalFile.read(pid_path) {
        if let Ok(lock) = serde_json::from_str::<PidFile>(&existing) {
            if process_is_alive(lock.pid as i32) {
                return Err(format!(
                    "tspmd is already running with pid {} ({})",
                    lock.pid,
                    pid_path.display()
                ));
            }
        }
    }

    let lock = PidFile {
        pid: std::process::id(),
        started_at: chrono::Local::now().to_rfc3339(),
        config_file: config_path.to_path_buf(),
    };
    let contents = serde_json::to_string_pretty(&lock).map_err(|err| err.to_string())?;
    LocalFile.write(pid_path, contents).map_err(|err| err.to_string())
}

#[cfg(unix)]
fn process_is_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn process_is_alive(_pid: i32) -> bool {
    false
}

fn load_config(path: &Path) -> Result<DaemonConfig, Box<dyn Error>> {
    let contents = LocalFile.read(path)?;
    let config: DaemonConfig = serde_yaml::from_str(&contents)?;
    for spec in &config.processes {
        spec.validate()?;
    }
    Ok(config)
}
