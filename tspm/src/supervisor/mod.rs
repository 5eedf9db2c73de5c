//! The registry the rest of the engine is built around. Owns every [`ManagedProcess`],
//! the shared [`EventBus`], and the ambient workers (`Monitor`, `HealthScheduler`,
//! `ProcessWatcher`) that report on them. A dedicated actor thread per process serializes
//! its boundary operations so a slow `stop` never blocks a concurrent `start` on a
//! different process, while `addProcess`/`removeProcess` take the registry write lock
//! only for the bookkeeping itself.

mod actor;

use crate::event::cancellation::CancellationMessage;
use crate::event::channel::EventConsumer;
use crate::event::record::EventData;
use crate::event::{Event, EventBus, EventPriority, EventType, ListenerId};
use crate::health::HealthScheduler;
use crate::lb::{LoadBalancer, Strategy};
use crate::monitor::{Monitor, MonitorTarget, DEFAULT_TICK_INTERVAL};
use crate::process::managed_process::{ManagedProcess, ManagedProcessError};
use crate::process::restart_policy::RestartReason;
use crate::process::ProcessState;
use crate::spec::{ProcessSpec, SpecError};
use crate::state_store::{ProcessSnapshot, StateSnapshot, StateStore, StateStoreError};
use crate::util::thread_context::{NotStartedThreadContext, StartedThreadContext};
use crate::watcher::ProcessWatcher;
use actor::ProcessActor;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// How many processes `start_all`/`stop_all` act on concurrently.
const MAX_FANOUT_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("a process named `{0}` already exists")]
    DuplicateName(String),
    #[error("no process named `{0}` is registered")]
    NotFound(String),
    #[error("process `{0}` failed validation: {1}")]
    InvalidSpec(String, SpecError),
    #[error(transparent)]
    Process(#[from] ManagedProcessError),
    #[error("process actor is not accepting commands")]
    ActorUnavailable,
    #[error("failed to write state snapshot: {0}")]
    Snapshot(#[from] StateStoreError),
}

#[derive(Debug, Clone)]
pub struct ProcessStatus {
    pub name: String,
    pub state: ProcessState,
    pub instance_count: usize,
    pub pids: Vec<u32>,
    pub namespace: Option<String>,
    pub cluster_group: Option<String>,
    pub restart_count: u32,
}

#[derive(Debug, Clone)]
pub struct ProcessDetail {
    pub status: ProcessStatus,
    pub spec: ProcessSpec,
}

struct ProcessEntry {
    managed: Arc<ManagedProcess>,
    actor: ProcessActor,
    lb: Arc<LoadBalancer>,
    namespace: Option<String>,
    cluster_group: Option<String>,
    watch_thread: Mutex<Option<StartedThreadContext>>,
    health_threads: Mutex<Vec<StartedThreadContext>>,
    cron_thread: Mutex<Option<StartedThreadContext>>,
}

/// Owns the process registry and every ambient worker that reports on it. Construct via
/// [`Supervisor::new`], which returns an `Arc` since the monitor/restart-driver threads
/// each hold a clone of it for their lifetime.
pub struct Supervisor {
    event_bus: Arc<EventBus>,
    monitor: Arc<Monitor>,
    health: Arc<HealthScheduler>,
    watcher: Arc<ProcessWatcher>,
    state_store: Option<StateStore>,
    registry: RwLock<HashMap<String, ProcessEntry>>,
    monitor_thread: Mutex<Option<StartedThreadContext>>,
    restart_driver: Mutex<Option<StartedThreadContext>>,
    restarting: Mutex<std::collections::HashSet<String>>,
}

impl Supervisor {
    pub fn new(event_bus: Arc<EventBus>, state_store: Option<StateStore>) -> Arc<Self> {
        let monitor = Monitor::new(event_bus.clone(), DEFAULT_TICK_INTERVAL);
        let health = HealthScheduler::new(event_bus.clone());
        let watcher = ProcessWatcher::new(event_bus.clone());

        let supervisor = Arc::new(Self {
            event_bus,
            monitor: monitor.clone(),
            health,
            watcher,
            state_store,
            registry: RwLock::new(HashMap::new()),
            monitor_thread: Mutex::new(None),
            restart_driver: Mutex::new(None),
            restarting: Mutex::new(std::collections::HashSet::new()),
        });

        *supervisor.monitor_thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(monitor.spawn());
        let driver = supervisor.clone().spawn_restart_driver();
        *supervisor.restart_driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(driver);

        supervisor
    }

    // -- registry mutation ---------------------------------------------------------

    pub fn add_process(self: &Arc<Self>, spec: ProcessSpec) -> Result<(), SupervisorError> {
        spec.validate().map_err(|err| SupervisorError::InvalidSpec(spec.name.clone(), err))?;

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.contains_key(&spec.name) {
            return Err(SupervisorError::DuplicateName(spec.name.clone()));
        }

        let name = spec.name.clone();
        let namespace = spec.namespace.clone();
        let cluster_group = spec.cluster_group.clone();
        let lb_strategy: Strategy = spec.lb_strategy.into();
        let cron = spec.cron.clone();

        let managed = Arc::new(ManagedProcess::new(spec, self.event_bus.clone()));
        let actor = ProcessActor::spawn(managed.clone());
        let lb = Arc::new(LoadBalancer::new(lb_strategy));

        registry.insert(
            name.clone(),
            ProcessEntry {
                managed,
                actor,
                lb,
                namespace,
                cluster_group,
                watch_thread: Mutex::new(None),
                health_threads: Mutex::new(Vec::new()),
                cron_thread: Mutex::new(None),
            },
        );
        drop(registry);

        // A cron-scheduled process does not auto-start at registration; the scheduler
        // thread issues `start` requests on its own.
        if let Some(expr) = cron {
            match self.spawn_cron_scheduler(name.clone(), expr) {
                Ok(thread) => {
                    let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
                    if let Some(entry) = registry.get(&name) {
                        *entry.cron_thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread);
                    }
                }
                Err(err) => warn!(process = %name, error = %err, "failed to start cron scheduler"),
            }
        }

        self.snapshot_best_effort();
        Ok(())
    }

    /// Removes a process, stopping it first. `if_exists` makes a missing name a no-op
    /// instead of an error.
    pub fn remove_process(&self, name: &str, if_exists: bool) -> Result<(), SupervisorError> {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = registry.remove(name) else {
            return if if_exists { Ok(()) } else { Err(SupervisorError::NotFound(name.to_string())) };
        };
        drop(registry);

        let _ = entry.actor.stop(RestartReason::Manual);
        self.monitor.unregister_all(name);

        for thread in entry.health_threads.into_inner().unwrap_or_else(PoisonError::into_inner) {
            let _ = thread.stop();
        }
        if let Some(thread) = entry.watch_thread.into_inner().unwrap_or_else(PoisonError::into_inner) {
            let _ = thread.stop();
        }
        if let Some(thread) = entry.cron_thread.into_inner().unwrap_or_else(PoisonError::into_inner) {
            let _ = thread.stop();
        }
        entry.actor.shutdown();

        self.snapshot_best_effort();
        Ok(())
    }

    // -- boundary operations --------------------------------------------------------

    pub fn start_process(&self, name: &str) -> Result<(), SupervisorError> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let entry = registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        entry.actor.start()?;
        self.sync_ambient_workers(name, entry);
        drop(registry);
        self.snapshot_best_effort();
        Ok(())
    }

    pub fn stop_process(&self, name: &str, reason: RestartReason) -> Result<(), SupervisorError> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let entry = registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        entry.actor.stop(reason)?;
        self.teardown_ambient_workers(entry);
        self.monitor.unregister_all(name);
        drop(registry);
        self.snapshot_best_effort();
        Ok(())
    }

    pub fn restart_process(&self, name: &str, reason: RestartReason) -> Result<(), SupervisorError> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let entry = registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        self.teardown_ambient_workers(entry);
        self.monitor.unregister_all(name);
        entry.actor.restart(reason)?;
        self.sync_ambient_workers(name, entry);
        drop(registry);
        self.snapshot_best_effort();
        Ok(())
    }

    /// Stops the running instances and re-registers the process under a freshly
    /// validated spec, preserving its actor thread and load balancer bookkeeping.
    pub fn reload_process(self: &Arc<Self>, name: &str, spec: ProcessSpec) -> Result<(), SupervisorError> {
        if spec.name != name {
            return Err(SupervisorError::InvalidSpec(
                spec.name.clone(),
                SpecError::InvalidName(format!("reload target `{name}` does not match spec name `{}`", spec.name)),
            ));
        }
        spec.validate().map_err(|err| SupervisorError::InvalidSpec(spec.name.clone(), err))?;

        let was_running = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            let entry = registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
            let running = entry.managed.state() == ProcessState::Running;
            if running {
                entry.actor.stop(RestartReason::Manual)?;
                self.teardown_ambient_workers(entry);
                self.monitor.unregister_all(name);
            }
            running
        };

        self.remove_process(name, true)?;
        self.add_process(spec)?;

        if was_running {
            self.start_process(name)?;
        }

        self.event_bus.emit(Event::normal(name, EventData::ConfigReload));
        Ok(())
    }

    pub fn scale_process(&self, name: &str, desired: u32) -> Result<(), SupervisorError> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let entry = registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        entry.actor.scale(desired)?;
        self.sync_monitor_targets(name, entry);
        drop(registry);
        self.snapshot_best_effort();
        Ok(())
    }

    // -- reads ------------------------------------------------------------------

    pub fn list_processes(&self) -> Vec<ProcessStatus> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.values().map(Self::status_of).collect()
    }

    pub fn list_by_namespace(&self, namespace: &str) -> Vec<ProcessStatus> {
        self.list_processes().into_iter().filter(|s| s.namespace.as_deref() == Some(namespace)).collect()
    }

    pub fn list_by_cluster_group(&self, group: &str) -> Vec<ProcessStatus> {
        self.list_processes().into_iter().filter(|s| s.cluster_group.as_deref() == Some(group)).collect()
    }

    pub fn describe_process(&self, name: &str) -> Result<ProcessDetail, SupervisorError> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let entry = registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        Ok(ProcessDetail { status: Self::status_of(entry), spec: entry.managed.spec().clone() })
    }

    pub fn load_balancer(&self, name: &str) -> Option<Arc<LoadBalancer>> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.get(name).map(|entry| entry.lb.clone())
    }

    fn status_of(entry: &ProcessEntry) -> ProcessStatus {
        ProcessStatus {
            name: entry.managed.name().to_string(),
            state: entry.managed.state(),
            instance_count: entry.managed.instance_count(),
            pids: entry.managed.pids(),
            namespace: entry.namespace.clone(),
            cluster_group: entry.cluster_group.clone(),
            restart_count: entry.managed.restart_count(),
        }
    }

    // -- events -------------------------------------------------------------------

    pub fn subscribe(&self, event_type: Option<EventType>, priority: EventPriority) -> (ListenerId, EventConsumer<Event>) {
        match event_type {
            Some(t) => self.event_bus.on(t, priority),
            None => self.event_bus.on_any(priority),
        }
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.event_bus.off(id);
    }

    pub fn event_history(&self, limit: Option<usize>) -> Vec<Event> {
        self.event_bus.history(limit)
    }

    // -- fan-out --------------------------------------------------------------------

    pub fn start_all(&self) -> Vec<(String, Result<(), SupervisorError>)> {
        let names = self.registered_names();
        self.fan_out(names, |name| self.start_process(name))
    }

    /// Stops every registered process. Each `stop_process` call already blocks on that
    /// process's own `killTimeout`, so fanning out bounds total wall time to roughly the
    /// slowest process rather than their sum.
    pub fn stop_all(&self) -> Vec<(String, Result<(), SupervisorError>)> {
        let names = self.registered_names();
        self.fan_out(names, |name| self.stop_process(name, RestartReason::Manual))
    }

    fn registered_names(&self) -> Vec<String> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }

    fn fan_out(
        &self,
        names: Vec<String>,
        op: impl Fn(&str) -> Result<(), SupervisorError> + Sync,
    ) -> Vec<(String, Result<(), SupervisorError>)> {
        let workers = MAX_FANOUT_CONCURRENCY.min(names.len().max(1));
        let queue = Mutex::new(names.into_iter());
        let results = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                    let Some(name) = next else { break };
                    let result = op(&name);
                    results.lock().unwrap_or_else(PoisonError::into_inner).push((name, result));
                });
            }
        });

        results.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    // -- snapshotting -----------------------------------------------------------

    pub fn snapshot_to_disk(&self) -> Result<(), SupervisorError> {
        let Some(store) = &self.state_store else { return Ok(()) };
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);

        let mut snapshot = StateSnapshot::new();
        for entry in registry.values() {
            let managed = &entry.managed;
            let pids = managed.pids();
            let spec = managed.spec();
            snapshot.insert(
                managed.name().to_string(),
                ProcessSnapshot {
                    pid: pids.first().copied(),
                    started_at: None,
                    config: serde_json::json!({
                        "script": spec.script,
                        "args": spec.args,
                        "instances": spec.instances,
                        "autorestart": spec.autorestart,
                        "namespace": spec.namespace,
                        "clusterGroup": spec.cluster_group,
                    }),
                    state: managed.state(),
                    restarts: managed.restart_count(),
                    uptime_ms: 0,
                    healthy: None,
                },
            );
        }
        drop(registry);

        store.write(&snapshot).map_err(SupervisorError::from)
    }

    fn snapshot_best_effort(&self) {
        if let Err(err) = self.snapshot_to_disk() {
            warn!(error = %err, "failed to write state snapshot");
        }
    }

    // -- shutdown -----------------------------------------------------------------

    /// Cancels the monitor, restart driver, and every per-process watcher/health
    /// thread first, then issues `stop_all`. Call once, at daemon shutdown.
    pub fn shutdown(&self) {
        if let Some(thread) = self.restart_driver.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = thread.stop();
        }
        if let Some(thread) = self.monitor_thread.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = thread.stop();
        }

        {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            for entry in registry.values() {
                self.teardown_ambient_workers(entry);
            }
        }

        self.stop_all();
    }

    // -- ambient worker wiring --------------------------------------------------

    fn sync_ambient_workers(&self, name: &str, entry: &ProcessEntry) {
        self.sync_monitor_targets(name, entry);
        self.spawn_watch_thread(name, entry);
        self.spawn_health_threads(name, entry);
        self.seed_weighted_lb(entry);
    }

    fn teardown_ambient_workers(&self, entry: &ProcessEntry) {
        for thread in entry.health_threads.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            let _ = thread.stop();
        }
        if let Some(thread) = entry.watch_thread.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = thread.stop();
        }
    }

    /// Re-derives the monitor's `(name, instanceId, pid)` targets from the process's
    /// current pid list. `instanceId` here is positional (index into `pids()`), since
    /// `ManagedProcess` does not expose its internal instance ids externally.
    fn sync_monitor_targets(&self, name: &str, entry: &ProcessEntry) {
        self.monitor.unregister_all(name);
        let spec = entry.managed.spec();
        let max_memory = spec.max_memory;
        let cpu_threshold = spec.cpu_threshold;
        let memory_threshold = spec.memory_threshold;
        for (idx, pid) in entry.managed.pids().into_iter().enumerate() {
            self.monitor.register(MonitorTarget {
                name: name.to_string(),
                instance_id: idx as u32,
                pid,
                cpu_threshold,
                memory_threshold,
                max_memory,
                started_at: Instant::now(),
            });
        }
    }

    fn spawn_watch_thread(&self, name: &str, entry: &ProcessEntry) {
        let spec = entry.managed.spec();
        if !spec.watch.is_enabled() {
            return;
        }
        let root = spec.cwd.clone().unwrap_or_else(|| PathBuf::from("."));
        match self.watcher.spawn(name.to_string(), &root, spec.watch.globs(), &spec.ignore_watch, Duration::from(spec.watch_delay)) {
            Ok(thread) => *entry.watch_thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread),
            Err(err) => warn!(process = %name, error = %err, "failed to start file watcher"),
        }
    }

    /// Spawns one health-probe thread per instance at `spec.instances`. Health-check
    /// coverage follows the spec's static instance count rather than a live `scale()`
    /// call; scaling a running process does not grow or shrink its probe set.
    fn spawn_health_threads(&self, name: &str, entry: &ProcessEntry) {
        let spec = entry.managed.spec();
        let Some(check) = spec.health_check.clone() else { return };
        if check.protocol == crate::spec::HealthProtocol::None {
            return;
        }
        let mut threads = entry.health_threads.lock().unwrap_or_else(PoisonError::into_inner);
        for idx in 0..spec.instances {
            if let Some(thread) = self.health.spawn(name.to_string(), idx, check.clone()) {
                threads.push(thread);
            }
        }
    }

    fn seed_weighted_lb(&self, entry: &ProcessEntry) {
        let spec = entry.managed.spec();
        if entry.lb.strategy() != Strategy::Weighted {
            return;
        }
        let weights: HashMap<u32, u32> = (0..entry.managed.instance_count() as u32).map(|idx| (idx, spec.instance_weight)).collect();
        entry.lb.set_weights(&weights);
    }

    // -- cron -----------------------------------------------------------------------

    fn spawn_cron_scheduler(self: &Arc<Self>, name: String, expr: String) -> Result<StartedThreadContext, SupervisorError> {
        let schedule = cron::Schedule::from_str(&expr)
            .map_err(|err| SupervisorError::InvalidSpec(name.clone(), SpecError::InvalidCron(expr.clone(), err.to_string())))?;
        let supervisor = self.clone();
        let thread_name = format!("cron-{name}");
        Ok(NotStartedThreadContext::new(thread_name, move |stop_consumer| {
            supervisor.run_cron(name, schedule, stop_consumer);
        })
        .start())
    }

    fn run_cron(&self, name: String, schedule: cron::Schedule, stop_consumer: EventConsumer<CancellationMessage>) {
        loop {
            let now = chrono::Local::now();
            let Some(next) = schedule.after(&now).next() else {
                info!(process = %name, "cron schedule has no further fire times, stopping scheduler");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::from_secs(0));
            info!(process = %name, next_fire = %next, "cron scheduler waiting");

            if stop_consumer.is_cancelled(wait) {
                break;
            }

            if let Err(err) = self.start_process(&name) {
                warn!(process = %name, error = %err, "cron-triggered start failed");
            }
        }
    }

    // -- restart driver ---------------------------------------------------------

    /// Subscribes to the events that ask for a restart and drives `ManagedProcess::restart`
    /// on the actor thread. `supervise_instance`'s own crash-backoff loop already respawns
    /// a crashed instance internally and only *reports* via `ProcessRestart{reason:
    /// Crash}` — acting on that here too would double-restart, so this driver ignores it.
    /// The watcher, by contrast, has no internal restart loop of its own: its
    /// `ProcessRestart{reason: Watch}` is a genuine request this driver must execute.
    fn spawn_restart_driver(self: Arc<Self>) -> StartedThreadContext {
        let (_id, consumer) = self.event_bus.on_any(EventPriority::High);
        NotStartedThreadContext::new("restart-driver", move |stop_consumer| {
            self.run_restart_driver(consumer, stop_consumer);
        })
        .start()
    }

    fn run_restart_driver(&self, events: EventConsumer<Event>, stop_consumer: EventConsumer<CancellationMessage>) {
        loop {
            if stop_consumer.is_cancelled(Duration::from_millis(0)) {
                break;
            }
            match events.as_ref().recv_timeout(Duration::from_millis(200)) {
                Ok(event) => self.handle_driver_event(event),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn handle_driver_event(&self, event: Event) {
        let (name, reason) = match &event.data {
            EventData::ProcessOom { name, .. } => (name.clone(), RestartReason::Oom),
            EventData::InstanceHealthChange { name, healthy: false, .. } => (name.clone(), RestartReason::Health),
            EventData::ProcessRestart { name, reason: RestartReason::Watch, .. } => (name.clone(), RestartReason::Watch),
            _ => return,
        };

        {
            let mut restarting = self.restarting.lock().unwrap_or_else(PoisonError::into_inner);
            if !restarting.insert(name.clone()) {
                return;
            }
        }

        let outcome = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            match registry.get(&name) {
                Some(entry) if entry.managed.state() == ProcessState::Running => {
                    self.teardown_ambient_workers(entry);
                    self.monitor.unregister_all(&name);
                    let result = entry.actor.restart(reason);
                    if result.is_ok() {
                        self.sync_ambient_workers(&name, entry);
                    }
                    Some(result)
                }
                _ => None,
            }
        };

        self.restarting.lock().unwrap_or_else(PoisonError::into_inner).remove(&name);

        if let Some(Err(err)) = outcome {
            warn!(process = %name, reason = ?reason, error = %err, "driver-triggered restart failed");
        }
        self.snapshot_best_effort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, script: &str, args: &[&str]) -> ProcessSpec {
        let yaml = format!(
            "name: {name}\nscript: {script}\nargs: [{}]\nautorestart: false\n",
            args.iter().map(|a| format!("\"{a}\"")).collect::<Vec<_>>().join(", ")
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn supervisor() -> Arc<Supervisor> {
        Supervisor::new(Arc::new(EventBus::new()), None)
    }

    #[test]
    fn adding_the_same_name_twice_is_rejected() {
        let supervisor = supervisor();
        supervisor.add_process(spec("web", "/bin/sh", &["-c", "sleep 5"])).unwrap();
        assert!(matches!(
            supervisor.add_process(spec("web", "/bin/sh", &["-c", "sleep 5"])),
            Err(SupervisorError::DuplicateName(_))
        ));
        supervisor.remove_process("web", false).unwrap();
    }

    #[test]
    fn start_stop_round_trip_updates_status() {
        let supervisor = supervisor();
        supervisor.add_process(spec("web", "/bin/sh", &["-c", "sleep 5"])).unwrap();

        supervisor.start_process("web").unwrap();
        let status = supervisor.describe_process("web").unwrap().status;
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(status.instance_count, 1);

        supervisor.stop_process("web", RestartReason::Manual).unwrap();
        let status = supervisor.describe_process("web").unwrap().status;
        assert_eq!(status.state, ProcessState::Stopped);

        supervisor.remove_process("web", false).unwrap();
    }

    #[test]
    fn removing_a_missing_process_is_an_error_unless_if_exists() {
        let supervisor = supervisor();
        assert!(matches!(supervisor.remove_process("ghost", false), Err(SupervisorError::NotFound(_))));
        assert!(supervisor.remove_process("ghost", true).is_ok());
    }

    #[test]
    fn operating_on_an_unregistered_process_returns_not_found() {
        let supervisor = supervisor();
        assert!(matches!(supervisor.start_process("ghost"), Err(SupervisorError::NotFound(_))));
        assert!(matches!(supervisor.stop_process("ghost", RestartReason::Manual), Err(SupervisorError::NotFound(_))));
        assert!(matches!(supervisor.scale_process("ghost", 2), Err(SupervisorError::NotFound(_))));
    }

    #[test]
    fn namespace_and_cluster_group_filters_only_return_matching_processes() {
        let supervisor = supervisor();
        let mut web = spec("web", "/bin/sh", &["-c", "sleep 5"]);
        web.namespace = Some("prod".to_string());
        let mut worker = spec("worker", "/bin/sh", &["-c", "sleep 5"]);
        worker.namespace = Some("staging".to_string());

        supervisor.add_process(web).unwrap();
        supervisor.add_process(worker).unwrap();

        let prod = supervisor.list_by_namespace("prod");
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].name, "web");

        supervisor.remove_process("web", false).unwrap();
        supervisor.remove_process("worker", false).unwrap();
    }

    #[test]
    fn start_all_and_stop_all_cover_every_registered_process() {
        let supervisor = supervisor();
        supervisor.add_process(spec("a", "/bin/sh", &["-c", "sleep 5"])).unwrap();
        supervisor.add_process(spec("b", "/bin/sh", &["-c", "sleep 5"])).unwrap();

        let started = supervisor.start_all();
        assert_eq!(started.len(), 2);
        assert!(started.iter().all(|(_, result)| result.is_ok()));

        let stopped = supervisor.stop_all();
        assert_eq!(stopped.len(), 2);
        assert!(stopped.iter().all(|(_, result)| result.is_ok()));

        supervisor.remove_process("a", false).unwrap();
        supervisor.remove_process("b", false).unwrap();
    }

    #[test]
    fn a_file_watch_restart_request_is_executed_by_the_driver() {
        let supervisor = supervisor();
        supervisor.add_process(spec("watched", "/bin/sh", &["-c", "sleep 5"])).unwrap();
        supervisor.start_process("watched").unwrap();

        supervisor.event_bus.emit(Event::normal(
            "watched",
            EventData::ProcessRestart { name: "watched".to_string(), reason: RestartReason::Watch, restart_count: 0 },
        ));

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut restarted = false;
        while Instant::now() < deadline {
            let history = supervisor.event_history(None);
            if history.iter().any(|e| matches!(&e.data, EventData::ProcessStop { name, .. } if name == "watched")) {
                restarted = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(restarted, "expected the watch-triggered restart to have stopped and restarted the process");

        supervisor.shutdown();
    }
}
