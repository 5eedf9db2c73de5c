//! Periodic CPU/memory sampling for every registered `(name, instanceId, pid)`,
//! dispatching threshold-crossing events onto the shared [`EventBus`]. Mirrors the
//! teacher's own `sysinfo`-based sampling loop, generalized from a single
//! self-monitoring process to an arbitrary registered set.

use crate::event::cancellation::CancellationMessage;
use crate::event::channel::EventConsumer;
use crate::event::record::EventData;
use crate::event::{Event, EventBus};
use crate::util::thread_context::{NotStartedThreadContext, StartedThreadContext};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tracing::warn;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MonitorTarget {
    pub name: String,
    pub instance_id: u32,
    pub pid: u32,
    pub cpu_threshold: Option<f32>,
    pub memory_threshold: Option<u64>,
    /// Bytes; 0 disables OOM-kill.
    pub max_memory: u64,
    pub started_at: Instant,
}

/// Periodic sampler. Owns no process lifecycle decisions of its own — it only reports;
/// the supervisor subscribes to `ProcessOom`/`MetricsCpuHigh`/`MetricsMemoryHigh` and
/// decides whether to request a restart.
pub struct Monitor {
    event_bus: Arc<EventBus>,
    targets: Mutex<HashMap<(String, u32), MonitorTarget>>,
    tick_interval: Duration,
}

impl Monitor {
    pub fn new(event_bus: Arc<EventBus>, tick_interval: Duration) -> Arc<Self> {
        Arc::new(Self { event_bus, targets: Mutex::new(HashMap::new()), tick_interval })
    }

    pub fn register(&self, target: MonitorTarget) {
        let key = (target.name.clone(), target.instance_id);
        self.targets.lock().expect("monitor targets mutex poisoned").insert(key, target);
    }

    pub fn unregister(&self, name: &str, instance_id: u32) {
        self.targets
            .lock()
            .expect("monitor targets mutex poisoned")
            .remove(&(name.to_string(), instance_id));
    }

    /// Drops every target registered for `name`, regardless of instance id. Used when a
    /// process stops or is removed and its instance ids are no longer known to the caller.
    pub fn unregister_all(&self, name: &str) {
        self.targets.lock().expect("monitor targets mutex poisoned").retain(|(n, _), _| n != name);
    }

    pub fn target_count(&self) -> usize {
        self.targets.lock().expect("monitor targets mutex poisoned").len()
    }

    /// Spawns the sampling thread. The returned context must be stopped during
    /// shutdown alongside every other supervised worker.
    pub fn spawn(self: &Arc<Self>) -> StartedThreadContext {
        let monitor = self.clone();
        NotStartedThreadContext::new("monitor", move |stop_consumer| monitor.run(stop_consumer)).start()
    }

    fn run(&self, stop_consumer: EventConsumer<CancellationMessage>) {
        let mut sys = System::new_all();

        loop {
            if stop_consumer.is_cancelled(self.tick_interval) {
                break;
            }
            self.tick(&mut sys);
        }
    }

    fn tick(&self, sys: &mut System) {
        sys.refresh_all();

        let snapshot: Vec<MonitorTarget> =
            self.targets.lock().expect("monitor targets mutex poisoned").values().cloned().collect();

        for target in snapshot {
            let Some(process) = sys.process(Pid::from_u32(target.pid)) else {
                warn!(process = %target.name, instance_id = target.instance_id, pid = target.pid, "process vanished from process table");
                self.event_bus.emit(Event::high(
                    &target.name,
                    EventData::ProcessError {
                        name: target.name.clone(),
                        message: format!("instance {} (pid {}) no longer present", target.instance_id, target.pid),
                    },
                ));
                self.unregister(&target.name, target.instance_id);
                continue;
            };

            let cpu_percent = process.cpu_usage();
            let memory_bytes = process.memory();
            let uptime_ms = target.started_at.elapsed().as_millis() as u64;

            self.event_bus.emit(Event::low(
                &target.name,
                EventData::MetricsUpdate {
                    name: target.name.clone(),
                    instance_id: target.instance_id,
                    cpu_percent,
                    memory_bytes,
                    uptime_ms,
                },
            ));

            if let Some(threshold) = target.cpu_threshold {
                if cpu_percent > threshold {
                    self.event_bus.emit(Event::high(
                        &target.name,
                        EventData::MetricsCpuHigh { name: target.name.clone(), instance_id: target.instance_id, cpu_percent },
                    ));
                }
            }

            if let Some(threshold) = target.memory_threshold {
                if memory_bytes > threshold {
                    self.event_bus.emit(Event::high(
                        &target.name,
                        EventData::MetricsMemoryHigh { name: target.name.clone(), instance_id: target.instance_id, memory_bytes },
                    ));
                }
            }

            if target.max_memory > 0 && memory_bytes > target.max_memory {
                self.event_bus.emit(Event::high(
                    &target.name,
                    EventData::ProcessOom { name: target.name.clone(), instance_id: target.instance_id, memory_bytes },
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPriority, EventType};

    #[test]
    fn registering_and_unregistering_changes_target_count() {
        let bus = Arc::new(EventBus::new());
        let monitor = Monitor::new(bus, DEFAULT_TICK_INTERVAL);

        monitor.register(MonitorTarget {
            name: "web".into(),
            instance_id: 0,
            pid: std::process::id(),
            cpu_threshold: None,
            memory_threshold: None,
            max_memory: 0,
            started_at: Instant::now(),
        });
        assert_eq!(monitor.target_count(), 1);

        monitor.unregister("web", 0);
        assert_eq!(monitor.target_count(), 0);
    }

    #[test]
    fn a_vanished_pid_is_reported_and_dropped() {
        let bus = Arc::new(EventBus::new());
        let (_id, error_rx) = bus.on(EventType::ProcessError, EventPriority::High);
        let monitor = Monitor::new(bus, DEFAULT_TICK_INTERVAL);

        // pid 1 is always present on a real host; use an implausible pid instead.
        monitor.register(MonitorTarget {
            name: "ghost".into(),
            instance_id: 0,
            pid: u32::MAX,
            cpu_threshold: None,
            memory_threshold: None,
            max_memory: 0,
            started_at: Instant::now(),
        });

        let mut sys = System::new_all();
        monitor.tick(&mut sys);

        assert_eq!(monitor.target_count(), 0);
        assert!(error_rx.as_ref().recv_timeout(Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn metrics_update_is_emitted_for_a_live_pid() {
        let bus = Arc::new(EventBus::new());
        let (_id, metrics_rx) = bus.on(EventType::MetricsUpdate, EventPriority::Low);
        let monitor = Monitor::new(bus, DEFAULT_TICK_INTERVAL);

        monitor.register(MonitorTarget {
            name: "self".into(),
            instance_id: 0,
            pid: std::process::id(),
            cpu_threshold: None,
            memory_threshold: None,
            max_memory: 0,
            started_at: Instant::now(),
        });

        let mut sys = System::new_all();
        monitor.tick(&mut sys);

        assert!(metrics_rx.as_ref().recv_timeout(Duration::from_millis(50)).is_ok());
    }
}
