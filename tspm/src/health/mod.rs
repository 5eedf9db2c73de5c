//! Per-instance health probe scheduling. A probe is a small trait boundary (mirroring
//! the teacher's `HttpClient`/`HealthChecker` split) so each protocol can be tested in
//! isolation via `mockall`; the scheduler owns the consecutive-failure bookkeeping and
//! the single-transition-per-state-change rule.

pub mod command;
pub mod http;
pub mod tcp;

use crate::event::cancellation::CancellationMessage;
use crate::event::channel::EventConsumer;
use crate::event::record::EventData;
use crate::event::{Event, EventBus};
use crate::spec::{HealthCheckSpec, HealthProtocol};
use crate::util::thread_context::{NotStartedThreadContext, StartedThreadContext};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthCheckerError {
    #[error("health probe transport error: {0}")]
    Transport(String),
    #[error("health check spec is missing a required field: {0}")]
    MissingField(&'static str),
}

/// A single pass/fail liveness check. Implementations must honor `timeout` as a hard
/// deadline rather than an advisory one.
pub trait HealthProbe: Send {
    fn check(&self, timeout: Duration) -> Result<bool, HealthCheckerError>;
}

fn build_probe(spec: &HealthCheckSpec) -> Option<Result<Box<dyn HealthProbe>, HealthCheckerError>> {
    match spec.protocol {
        HealthProtocol::None => None,
        HealthProtocol::Http | HealthProtocol::Https => Some(http::HttpProbe::from_spec(spec).map(|p| Box::new(p) as Box<dyn HealthProbe>)),
        HealthProtocol::Tcp => Some(tcp::TcpProbe::from_spec(spec).map(|p| Box::new(p) as Box<dyn HealthProbe>)),
        HealthProtocol::Command => Some(command::CommandProbe::from_spec(spec).map(|p| Box::new(p) as Box<dyn HealthProbe>)),
    }
}

/// Schedules and runs probes for every instance that has a `healthCheck` configured.
/// Owns no restart logic: it only reports `instance:health-change`, leaving the
/// decision to request a restart (reason `health`) to whoever subscribes to that event.
pub struct HealthScheduler {
    event_bus: Arc<EventBus>,
}

impl HealthScheduler {
    pub fn new(event_bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { event_bus })
    }

    /// Spawns the scheduler thread for one instance. Returns `None` when the spec's
    /// protocol is `NONE` or construction of the probe fails (logged, not fatal).
    pub fn spawn(self: &Arc<Self>, process_name: String, instance_id: u32, spec: HealthCheckSpec) -> Option<StartedThreadContext> {
        let probe = match build_probe(&spec)? {
            Ok(probe) => probe,
            Err(err) => {
                tracing::warn!(process = %process_name, instance_id, error = %err, "failed to build health probe");
                return None;
            }
        };

        let scheduler = self.clone();
        let thread_name = format!("health-{process_name}-{instance_id}");
        Some(
            NotStartedThreadContext::new(thread_name, move |stop_consumer| {
                scheduler.run(process_name, instance_id, spec, probe, stop_consumer);
            })
            .start(),
        )
    }

    fn run(
        &self,
        process_name: String,
        instance_id: u32,
        spec: HealthCheckSpec,
        probe: Box<dyn HealthProbe>,
        stop_consumer: EventConsumer<CancellationMessage>,
    ) {
        if stop_consumer.is_cancelled(Duration::from(spec.initial_delay)) {
            return;
        }

        let mut consecutive_failures: u32 = 0;
        let mut currently_unhealthy = false;

        loop {
            let healthy = probe.check(Duration::from(spec.timeout)).unwrap_or_else(|err| {
                tracing::debug!(process = %process_name, instance_id, error = %err, "health probe errored, treating as failure");
                false
            });

            if healthy {
                consecutive_failures = 0;
                if currently_unhealthy {
                    currently_unhealthy = false;
                    self.event_bus.emit(Event::normal(
                        &process_name,
                        EventData::InstanceHealthChange { name: process_name.clone(), instance_id, healthy: true },
                    ));
                }
            } else {
                consecutive_failures += 1;
                if consecutive_failures >= spec.retries && !currently_unhealthy {
                    currently_unhealthy = true;
                    self.event_bus.emit(Event::high(
                        &process_name,
                        EventData::InstanceHealthChange { name: process_name.clone(), instance_id, healthy: false },
                    ));
                }
            }

            if stop_consumer.is_cancelled(Duration::from(spec.interval)) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPriority, EventType};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProbe {
        healthy_after: u32,
        calls: AtomicU32,
    }

    impl HealthProbe for FlakyProbe {
        fn check(&self, _timeout: Duration) -> Result<bool, HealthCheckerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(n >= self.healthy_after)
        }
    }

    fn spec_with(retries: u32) -> HealthCheckSpec {
        serde_yaml::from_str(&format!(
            "protocol: NONE\ninterval: \"10ms\"\ntimeout: \"10ms\"\ninitial_delay: \"0ms\"\nretries: {retries}\n"
        ))
        .unwrap()
    }

    #[test]
    fn reaches_unhealthy_after_consecutive_failures() {
        let bus = Arc::new(EventBus::new());
        let (_id, rx) = bus.on(EventType::InstanceHealthChange, EventPriority::High);
        let scheduler = HealthScheduler::new(bus);

        let probe: Box<dyn HealthProbe> = Box::new(FlakyProbe { healthy_after: u32::MAX, calls: AtomicU32::new(0) });
        let spec = spec_with(3);

        // scheduler.run loops forever absent a stop signal; run it detached and only
        // assert the expected event arrives within a bound.
        std::thread::spawn(move || {
            let (_publisher, consumer) = crate::event::channel::pub_sub::<CancellationMessage>();
            scheduler.run("flaky".to_string(), 0, spec, probe, consumer);
        });

        assert!(rx.as_ref().recv_timeout(Duration::from_millis(200)).is_ok());
    }
}
