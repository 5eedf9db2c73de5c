use crate::spec::ProcessSpec;
use std::cmp::max;
use std::time::{Duration, Instant};

/// Crash-loop detection window: if more than this elapses between two exits, the
/// backoff sequence resets — the child is judged to have been stable in between.
pub const LAST_RETRY_INTERVAL: Duration = Duration::from_secs(30);

pub const BASE_DELAY: Duration = Duration::from_secs(1);
pub const MAX_DELAY: Duration = Duration::from_secs(30);
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Why a restart was requested. Reported on `process:restart` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    Manual,
    Watch,
    Crash,
    Oom,
    Health,
    Signal,
}

impl RestartReason {
    pub fn wire(self) -> &'static str {
        match self {
            RestartReason::Manual => "manual",
            RestartReason::Watch => "watch",
            RestartReason::Crash => "auto",
            RestartReason::Oom => "oom",
            RestartReason::Health => "health",
            RestartReason::Signal => "signal",
        }
    }
}

impl serde::Serialize for RestartReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire())
    }
}

/// The outcome of evaluating an instance exit against the restart policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Respawn { delay: Duration, reason: RestartReason },
    GiveUp { reason: &'static str },
    NoAction,
}

/// A pure evaluation of what should happen after an instance exits. Never performs
/// I/O or sleeps; the caller schedules the returned delay.
pub fn decide(spec: &ProcessSpec, restart_count: u32, uptime: Duration, backoff: &mut Backoff) -> Decision {
    if !spec.autorestart {
        return Decision::NoAction;
    }
    if spec.restart_cap_reached(restart_count) {
        return Decision::GiveUp { reason: "max_restarts_exceeded" };
    }

    let _ = uptime; // unstable-exit bookkeeping lives in Backoff's own reset window

    let delay = match spec.restart_delay {
        Some(fixed) => fixed,
        None => backoff.next_delay(exponential),
    };

    Decision::Respawn { delay, reason: RestartReason::Crash }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    last_retry: Instant,
    tries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    last_retry_interval: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            last_retry: Instant::now(),
            tries: 0,
            initial_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
            last_retry_interval: LAST_RETRY_INTERVAL,
        }
    }
}

impl Backoff {
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_last_retry_interval(mut self, last_retry_interval: Duration) -> Self {
        self.last_retry_interval = last_retry_interval;
        self
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Resets the sequence if more than `last_retry_interval` elapsed since the
    /// previous call, then computes and returns the next delay via `schedule`,
    /// clamped to `max_delay`.
    pub fn next_delay<F>(&mut self, schedule: F) -> Duration
    where
        F: Fn(u32, Duration) -> Duration,
    {
        if self.last_retry.elapsed() > self.last_retry_interval {
            self.tries = 0;
        }

        let raw = schedule(self.tries, self.initial_delay);
        let capped = raw.min(self.max_delay);

        self.last_retry = Instant::now();
        self.tries += 1;
        capped
    }
}

/// Constant delay, ignoring `tries`.
pub fn fixed(_tries: u32, initial_delay: Duration) -> Duration {
    initial_delay
}

/// Delay growing linearly with `tries`.
pub fn linear(tries: u32, initial_delay: Duration) -> Duration {
    initial_delay.saturating_mul(tries.max(1))
}

/// Delay doubling with every try (`initial_delay * 2^(tries-1)`, first two tries equal).
pub fn exponential(tries: u32, initial_delay: Duration) -> Duration {
    initial_delay.saturating_mul(BACKOFF_MULTIPLIER.pow(max(tries, 1) - 1))
}
