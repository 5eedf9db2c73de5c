use crate::process::log_writer::{spawn_log_pump, LogTargets};
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("failed to spawn child process: {0}")]
    Spawn(#[from] io::Error),
    #[error("failed to take {0} pipe from child")]
    StreamPipe(&'static str),
    #[error("failed to signal child: {0}")]
    Signal(String),
}

/// One OS child, not yet spawned.
pub struct InstanceNotStarted {
    instance_id: u32,
    process_name: String,
    cmd: Command,
    kill_timeout: Duration,
    priority: Option<i32>,
}

impl InstanceNotStarted {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        process_name: impl Into<String>,
        instance_id: u32,
        script: &Path,
        args: &[String],
        cwd: Option<&Path>,
        env: impl IntoIterator<Item = (String, String)>,
        priority: Option<i32>,
        kill_timeout: Duration,
    ) -> Self {
        let mut cmd = Command::new(script);
        cmd.args(args).envs(env).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        Self { instance_id, process_name: process_name.into(), cmd, kill_timeout, priority }
    }

    pub fn start(mut self) -> Result<InstanceStarted, InstanceError> {
        let child = self.cmd.spawn()?;
        info!(
            process = %self.process_name,
            instance_id = self.instance_id,
            pid = child.id(),
            "instance spawned"
        );

        if let Some(priority) = self.priority {
            apply_priority(&self.process_name, self.instance_id, child.id(), priority);
        }

        Ok(InstanceStarted {
            instance_id: self.instance_id,
            process_name: self.process_name,
            child,
            started_at: Instant::now(),
            kill_timeout: self.kill_timeout,
            log_pumps: Vec::new(),
        })
    }
}

/// Applies a nice value to a freshly spawned child. Best-effort: a failure is logged,
/// never surfaced, since a denied priority change must not fail the whole spawn.
#[cfg(target_family = "unix")]
fn apply_priority(process_name: &str, instance_id: u32, pid: u32, priority: i32) {
    use libc::{setpriority, PRIO_PROCESS};

    let result = unsafe { setpriority(PRIO_PROCESS, pid, priority) };
    if result != 0 {
        tracing::warn!(
            process = %process_name,
            instance_id,
            pid,
            priority,
            "failed to apply nice value to instance"
        );
    }
}

#[cfg(not(target_family = "unix"))]
fn apply_priority(_process_name: &str, _instance_id: u32, _pid: u32, _priority: i32) {}

/// One OS child that has been spawned and not yet reaped.
pub struct InstanceStarted {
    instance_id: u32,
    process_name: String,
    child: Child,
    started_at: Instant,
    kill_timeout: Duration,
    log_pumps: Vec<JoinHandle<()>>,
}

impl InstanceStarted {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().is_ok_and(|status| status.is_none())
    }

    /// Takes ownership of the child's stdout/stderr pipes and starts the log pump
    /// threads. Must be called at most once.
    pub fn stream(
        &mut self,
        targets: LogTargets,
        on_line: Arc<dyn Fn(LogStream, String) + Send + Sync>,
    ) -> Result<(), InstanceError> {
        let stdout = self.child.stdout.take().ok_or(InstanceError::StreamPipe("stdout"))?;
        let stderr = self.child.stderr.take().ok_or(InstanceError::StreamPipe("stderr"))?;

        self.log_pumps.push(spawn_log_pump(stdout, LogStream::Stdout, targets.clone(), on_line.clone()));
        self.log_pumps.push(spawn_log_pump(stderr, LogStream::Stderr, targets, on_line));

        Ok(())
    }

    /// Blocks until the child exits, reaping it. Idempotent only in the sense that
    /// the caller must not call this (or any other reaping method) twice.
    pub fn wait(mut self) -> Result<ExitStatus, InstanceError> {
        let status = self.child.wait()?;
        for pump in self.log_pumps.drain(..) {
            let _ = pump.join();
        }
        Ok(status)
    }

    #[cfg(target_family = "unix")]
    pub fn shutdown(&mut self) -> Result<(), InstanceError> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let pid = self.pid() as i32;
        let graceful = signal::kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|err| InstanceError::Signal(err.to_string()));

        if graceful.is_err() || self.is_running_after_timeout(self.kill_timeout) {
            self.child.kill()?;
        }
        Ok(())
    }

    #[cfg(target_family = "unix")]
    fn is_running_after_timeout(&mut self, timeout: Duration) -> bool {
        const POLL_INTERVAL: Duration = Duration::from_millis(100);
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if self.is_running() {
                std::thread::sleep(POLL_INTERVAL);
            } else {
                return false;
            }
        }
        true
    }

    #[cfg(target_family = "windows")]
    pub fn shutdown(&mut self) -> Result<(), InstanceError> {
        self.child.kill().map_err(InstanceError::from)
    }
}
