//! The state machine owning one process definition's running instances. Each instance
//! is supervised by its own named thread; `ManagedProcess` itself only holds the
//! registry and serializes the start/stop/restart/scale boundary operations.

use crate::event::record::EventData;
use crate::event::{Event, EventBus};
use crate::process::instance::{InstanceError, InstanceNotStarted, LogStream};
use crate::process::log_writer::LogTargets;
use crate::process::restart_policy::{self, Backoff, Decision, RestartReason};
use crate::process::ProcessState;
use crate::spec::{ProcessSpec, MAX_INSTANCES};
use crate::util::thread_context::{NotStartedThreadContext, StartedThreadContext};
use crossbeam_channel::{bounded, Sender};
use fs::file::FileReader;
use fs::LocalFile;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, warn};

/// Deadline applied to `preStart`/`postStart` hook commands.
const HOOK_TIMEOUT: Duration = Duration::from_secs(30);
const HOOK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How often a supervisor thread wakes to re-check liveness while an instance runs.
/// Doubles as the interruptible-sleep granularity for cancellation.
const INSTANCE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default rotation threshold applied to an instance's stdout/stderr files when the
/// process definition doesn't otherwise bound log growth.
const DEFAULT_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ManagedProcessError {
    #[error("process `{0}` is already running")]
    AlreadyRunning(String),
    #[error("instance count must be between 1 and {MAX_INSTANCES}, got {0}")]
    InvalidScale(u32),
    #[error("scale is only valid while the process is running, current state is `{0}`")]
    NotRunning(ProcessState),
    #[error("preStart hook failed: {0}")]
    PreStartFailed(String),
    #[error("instance failed to reach a stable start: {0}")]
    SpawnFailed(String),
}

struct InstanceSlot {
    pid: Arc<AtomicU32>,
    thread: StartedThreadContext,
}

/// Owns the running instances of a single [`ProcessSpec`] and exposes the boundary
/// operations a supervisor registry drives: `start`, `stop`, `restart`, `scale`.
pub struct ManagedProcess {
    name: String,
    spec: Arc<ProcessSpec>,
    event_bus: Arc<EventBus>,
    state: Arc<Mutex<ProcessState>>,
    instances: Mutex<HashMap<u32, InstanceSlot>>,
    next_instance_id: AtomicU32,
    /// Process-level restart count: one shared counter across every instance, never
    /// reset for the lifetime of this entry. Incremented once per respawn event,
    /// regardless of how many instances this process runs.
    restart_count: Arc<AtomicU32>,
}

impl ManagedProcess {
    pub fn new(spec: ProcessSpec, event_bus: Arc<EventBus>) -> Self {
        Self {
            name: spec.name.clone(),
            spec: Arc::new(spec),
            event_bus,
            state: Arc::new(Mutex::new(ProcessState::Stopped)),
            instances: Mutex::new(HashMap::new()),
            next_instance_id: AtomicU32::new(0),
            restart_count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock().expect("managed process state mutex poisoned")
    }

    /// Process-level restart count. Monotonically non-decreasing across the lifetime
    /// of this entry: shared by every instance, never reset by a stable uptime window.
    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(AtomicOrdering::SeqCst)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.instances
            .lock()
            .expect("managed process instances mutex poisoned")
            .values()
            .map(|slot| slot.pid.load(AtomicOrdering::SeqCst))
            .filter(|&pid| pid != 0)
            .collect()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().expect("managed process instances mutex poisoned").len()
    }

    /// Spawns `spec.instances` supervised instances and blocks until every one of them
    /// has either lived `spec.minUptime` without exiting (transitioning to `Running`),
    /// or the restart policy has given up on one of them (transitioning to `Errored`
    /// and terminating whichever siblings did spawn). No-op error if any instance is
    /// already live; callers that want a clean restart should call `stop` first.
    pub fn start(&self) -> Result<(), ManagedProcessError> {
        {
            let mut state = self.state.lock().expect("managed process state mutex poisoned");
            if state.has_live_instances() {
                return Err(ManagedProcessError::AlreadyRunning(self.name.clone()));
            }
            self.transition(&mut state, ProcessState::Starting);
        }

        if let Some(cmd) = &self.spec.pre_start {
            if let Err(err) = run_hook_with_timeout(cmd, HOOK_TIMEOUT) {
                error!(process = %self.name, error = %err, "preStart hook failed, not spawning instances");
                let mut state = self.state.lock().expect("managed process state mutex poisoned");
                self.transition(&mut state, ProcessState::Errored);
                self.event_bus.emit(Event::high(
                    &self.name,
                    EventData::ProcessError { name: self.name.clone(), message: err.clone() },
                ));
                return Err(ManagedProcessError::PreStartFailed(err));
            }
        }

        let mut ready_rxs = Vec::with_capacity(self.spec.instances as usize);
        {
            let mut instances = self.instances.lock().expect("managed process instances mutex poisoned");
            for _ in 0..self.spec.instances {
                let id = self.next_instance_id.fetch_add(1, AtomicOrdering::SeqCst);
                let (ready_tx, ready_rx) = bounded(1);
                instances.insert(id, self.spawn_instance(id, Some(ready_tx)));
                ready_rxs.push(ready_rx);
            }
        }

        for ready_rx in ready_rxs {
            let failure = match ready_rx.recv() {
                Ok(Ok(())) => None,
                Ok(Err(message)) => Some(message),
                Err(_) => Some("instance supervisor thread ended before confirming a stable start".to_string()),
            };

            if let Some(message) = failure {
                error!(process = %self.name, error = %message, "instance failed to reach a stable start");
                self.drain_and_stop_instances();
                let mut state = self.state.lock().expect("managed process state mutex poisoned");
                if *state != ProcessState::Stopped {
                    self.transition(&mut state, ProcessState::Errored);
                }
                drop(state);
                self.event_bus.emit(Event::high(
                    &self.name,
                    EventData::ProcessError { name: self.name.clone(), message: message.clone() },
                ));
                return Err(ManagedProcessError::SpawnFailed(message));
            }
        }

        let mut state = self.state.lock().expect("managed process state mutex poisoned");
        self.transition(&mut state, ProcessState::Running);
        drop(state);

        if let Some(cmd) = &self.spec.post_start {
            if let Err(err) = run_hook_with_timeout(cmd, HOOK_TIMEOUT) {
                warn!(process = %self.name, error = %err, "postStart hook failed");
            }
        }

        Ok(())
    }

    /// Signals every running instance's supervisor thread to shut its child down and
    /// stop supervising it, then joins all of them.
    pub fn stop(&self, reason: RestartReason) -> Result<(), ManagedProcessError> {
        {
            let mut state = self.state.lock().expect("managed process state mutex poisoned");
            if *state == ProcessState::Stopped {
                return Ok(());
            }
            self.transition(&mut state, ProcessState::Stopping);
        }

        self.drain_and_stop_instances();

        let mut state = self.state.lock().expect("managed process state mutex poisoned");
        self.transition(&mut state, ProcessState::Stopped);
        self.event_bus.emit(Event::normal(
            &self.name,
            EventData::ProcessStop { name: self.name.clone(), reason: reason.wire().to_string() },
        ));
        Ok(())
    }

    /// Drains the instance registry and stops every supervisor thread in it. Used both
    /// by a normal `stop()` and by `start()` unwinding a partially spawned batch.
    fn drain_and_stop_instances(&self) {
        let slots: Vec<(u32, InstanceSlot)> =
            self.instances.lock().expect("managed process instances mutex poisoned").drain().collect();
        for (instance_id, slot) in slots {
            if let Err(err) = slot.thread.stop() {
                warn!(
                    process = %self.name,
                    instance_id,
                    error = %err,
                    "instance supervisor thread did not stop cleanly"
                );
            }
        }
    }

    pub fn restart(&self, reason: RestartReason) -> Result<(), ManagedProcessError> {
        self.stop(reason)?;
        self.start()
    }

    /// Adjusts the live instance count to `desired`, spawning or tearing down
    /// instances as needed. Does not mutate the underlying spec's `instances` field.
    pub fn scale(&self, desired: u32) -> Result<(), ManagedProcessError> {
        if desired == 0 || desired > MAX_INSTANCES {
            return Err(ManagedProcessError::InvalidScale(desired));
        }
        if self.state() != ProcessState::Running {
            return Err(ManagedProcessError::NotRunning(self.state()));
        }

        let mut instances = self.instances.lock().expect("managed process instances mutex poisoned");
        let current = instances.len() as u32;

        match desired.cmp(&current) {
            Ordering::Greater => {
                for _ in 0..(desired - current) {
                    let id = self.next_instance_id.fetch_add(1, AtomicOrdering::SeqCst);
                    instances.insert(id, self.spawn_instance(id, None));
                }
            }
            Ordering::Less => {
                let remove_ids: Vec<u32> =
                    instances.keys().copied().collect::<Vec<_>>().into_iter().rev().take((current - desired) as usize).collect();
                for id in remove_ids {
                    if let Some(slot) = instances.remove(&id) {
                        if let Err(err) = slot.thread.stop() {
                            warn!(
                                process = %self.name,
                                instance_id = id,
                                error = %err,
                                "instance supervisor thread did not stop cleanly during scale-down"
                            );
                        }
                    }
                }
            }
            Ordering::Equal => {}
        }

        Ok(())
    }

    fn transition(&self, state: &mut ProcessState, to: ProcessState) {
        apply_transition(&self.name, &self.event_bus, state, to);
    }

    fn spawn_instance(&self, instance_id: u32, ready_tx: Option<Sender<Result<(), String>>>) -> InstanceSlot {
        let spec = self.spec.clone();
        let name = self.name.clone();
        let event_bus = self.event_bus.clone();
        let pid = Arc::new(AtomicU32::new(0));
        let pid_for_thread = pid.clone();
        let restart_count = self.restart_count.clone();
        let state = self.state.clone();

        let thread_name = format!("proc-{}-{}", self.name, instance_id);
        let thread = NotStartedThreadContext::new(thread_name, move |stop_consumer| {
            supervise_instance(
                spec,
                name,
                instance_id,
                event_bus,
                pid_for_thread,
                restart_count,
                state,
                ready_tx,
                stop_consumer,
            );
        })
        .start();

        InstanceSlot { pid, thread }
    }
}

fn apply_transition(name: &str, event_bus: &EventBus, state: &mut ProcessState, to: ProcessState) {
    if *state == to {
        return;
    }
    let from = *state;
    *state = to;
    event_bus.emit(Event::normal(name, EventData::ProcessStateChange { name: name.to_string(), from, to }));
}

/// Runs a `preStart`/`postStart` hook via `/bin/sh -c`, killing it if it outruns
/// `timeout`. Success is exit code zero.
fn run_hook_with_timeout(cmd: &str, timeout: Duration) -> Result<(), String> {
    let mut child = Command::new("/bin/sh").arg("-c").arg(cmd).spawn().map_err(|err| err.to_string())?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return if status.success() {
                    Ok(())
                } else {
                    Err(format!("hook exited with {status}"))
                };
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("hook timed out after {timeout:?}"));
                }
                std::thread::sleep(HOOK_POLL_INTERVAL);
            }
            Err(err) => return Err(err.to_string()),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn supervise_instance(
    spec: Arc<ProcessSpec>,
    name: String,
    instance_id: u32,
    event_bus: Arc<EventBus>,
    pid_slot: Arc<AtomicU32>,
    restart_count: Arc<AtomicU32>,
    state: Arc<Mutex<ProcessState>>,
    mut ready_tx: Option<Sender<Result<(), String>>>,
    stop_consumer: crate::event::channel::EventConsumer<crate::event::cancellation::CancellationMessage>,
) {
    let mut backoff = Backoff::default();
    // Confirmed once this instance has either reported a stable start to `ready_tx`,
    // or never needed to (e.g. it was spawned by `scale()`, not the initial `start()`).
    let mut confirmed = ready_tx.is_none();

    loop {
        let targets = LogTargets {
            stdout_path: spec.stdout.clone(),
            stderr_path: spec.stderr.clone(),
            combine: spec.combine_logs,
            max_file_size: DEFAULT_LOG_FILE_SIZE,
        };

        let env = build_env(&spec, &name, instance_id);

        let mut instance = match InstanceNotStarted::new(
            name.clone(),
            instance_id,
            &spec.script,
            &spec.args,
            spec.cwd.as_deref(),
            env,
            spec.priority,
            Duration::from(spec.kill_timeout),
        )
        .start()
        {
            Ok(instance) => instance,
            Err(err) => {
                event_bus.emit(Event::high(
                    &name,
                    EventData::ProcessError { name: name.clone(), message: err.to_string() },
                ));
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err(err.to_string()));
                } else {
                    let mut state = state.lock().expect("managed process state mutex poisoned");
                    if *state != ProcessState::Stopped {
                        apply_transition(&name, &event_bus, &mut state, ProcessState::Errored);
                    }
                }
                break;
            }
        };

        pid_slot.store(instance.pid(), AtomicOrdering::SeqCst);
        event_bus.emit(Event::normal(&name, EventData::InstanceAdd { name: name.clone(), instance_id }));
        event_bus.emit(Event::normal(&name, EventData::ProcessStart { name: name.clone(), instance_id }));

        let log_name = name.clone();
        let log_bus = event_bus.clone();
        let on_line: Arc<dyn Fn(LogStream, String) + Send + Sync> = Arc::new(move |stream, line| {
            log_bus.emit(Event::low(
                &log_name,
                EventData::ProcessLog { name: log_name.clone(), instance_id, stream, line },
            ));
        });

        if let Err(err) = instance.stream(targets, on_line) {
            event_bus.emit(Event::high(
                &name,
                EventData::ProcessError { name: name.clone(), message: err.to_string() },
            ));
        }

        let started_at = Instant::now();
        let min_uptime = Duration::from(spec.min_uptime);
        let status: Result<ExitStatus, InstanceError> = loop {
            if !confirmed && started_at.elapsed() >= min_uptime {
                confirmed = true;
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            if stop_consumer.is_cancelled(INSTANCE_POLL_INTERVAL) {
                let _ = instance.shutdown();
                break instance.wait();
            }
            if !instance.is_running() {
                break instance.wait();
            }
        };

        pid_slot.store(0, AtomicOrdering::SeqCst);
        event_bus.emit(Event::normal(&name, EventData::InstanceRemove { name: name.clone(), instance_id }));

        let (exit_code, signal) = exit_parts(&status);
        event_bus.emit(Event::normal(
            &name,
            EventData::ProcessExit { name: name.clone(), instance_id, exit_code, signal },
        ));

        if stop_consumer.is_cancelled(Duration::default()) {
            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(Err("instance stopped before reaching a stable start".to_string()));
            }
            break;
        }

        let uptime = started_at.elapsed();
        let current_restart_count = restart_count.load(AtomicOrdering::SeqCst);

        match restart_policy::decide(&spec, current_restart_count, uptime, &mut backoff) {
            Decision::Respawn { delay, reason } => {
                let reported = restart_count.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                event_bus.emit(Event::normal(
                    &name,
                    EventData::ProcessRestart { name: name.clone(), reason, restart_count: reported },
                ));
                if stop_consumer.is_cancelled(delay) {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Err("instance stopped before reaching a stable start".to_string()));
                    }
                    break;
                }
            }
            Decision::GiveUp { reason } => {
                event_bus.emit(Event::high(
                    &name,
                    EventData::ProcessError { name: name.clone(), message: reason.to_string() },
                ));
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err(reason.to_string()));
                } else {
                    let mut state = state.lock().expect("managed process state mutex poisoned");
                    if *state != ProcessState::Stopped {
                        apply_transition(&name, &event_bus, &mut state, ProcessState::Errored);
                    }
                }
                break;
            }
            Decision::NoAction => {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err("instance exited and autorestart is disabled".to_string()));
                }
                break;
            }
        }
    }
}

/// Builds the spawn environment for one instance: the daemon's own process
/// environment, overlaid by `spec.dotEnv` (if present), overlaid by `spec.env`,
/// overlaid by the instance identity variables. Each layer wins over the last.
fn build_env(spec: &ProcessSpec, name: &str, instance_id: u32) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();

    if let Some(dot_env_path) = &spec.dot_env {
        match parse_dotenv(dot_env_path) {
            Ok(parsed) => env.extend(parsed),
            Err(err) => {
                warn!(process = %name, path = %dot_env_path.display(), error = %err, "failed to read dotEnv file");
            }
        }
    }

    env.extend(spec.env.clone());
    env.insert("TSPM_PROCESS_NAME".to_string(), name.to_string());
    env.insert("TSPM_INSTANCE_ID".to_string(), instance_id.to_string());
    env
}

/// Parses a `KEY=VALUE` per line dotenv file. Blank lines and `#`-comments are
/// skipped; surrounding single or double quotes around a value are stripped.
fn parse_dotenv(path: &Path) -> io::Result<HashMap<String, String>> {
    let contents = LocalFile.read(path)?;
    let mut vars = HashMap::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }

    Ok(vars)
}

fn exit_parts(status: &Result<ExitStatus, InstanceError>) -> (Option<i32>, Option<i32>) {
    match status {
        Ok(status) => {
            #[cfg(target_family = "unix")]
            {
                use std::os::unix::process::ExitStatusExt;
                (status.code(), status.signal())
            }
            #[cfg(not(target_family = "unix"))]
            {
                (status.code(), None)
            }
        }
        Err(_) => (None, None),
    }
}
