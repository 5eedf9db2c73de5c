use crate::process::instance::LogStream;
use crate::process::restart_policy::RestartReason;
use crate::process::ProcessState;
use serde::{Serialize, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};

/// Delivery priority. Listeners are notified in `High -> Normal -> Low` order; within a
/// band, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    Normal,
    High,
}

/// Stable wire identifier for an event, matching the external event taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ProcessStart,
    ProcessStop,
    ProcessRestart,
    ProcessExit,
    ProcessError,
    ProcessStateChange,
    ProcessLog,
    ProcessOom,
    InstanceAdd,
    InstanceRemove,
    InstanceHealthChange,
    SystemStart,
    SystemStop,
    SystemError,
    MetricsUpdate,
    MetricsCpuHigh,
    MetricsMemoryHigh,
    ConfigReload,
    ConfigChange,
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire())
    }
}

impl EventType {
    pub fn wire(self) -> &'static str {
        match self {
            EventType::ProcessStart => "process:start",
            EventType::ProcessStop => "process:stop",
            EventType::ProcessRestart => "process:restart",
            EventType::ProcessExit => "process:exit",
            EventType::ProcessError => "process:error",
            EventType::ProcessStateChange => "process:state-change",
            EventType::ProcessLog => "process:log",
            EventType::ProcessOom => "process:oom",
            EventType::InstanceAdd => "instance:add",
            EventType::InstanceRemove => "instance:remove",
            EventType::InstanceHealthChange => "instance:health-change",
            EventType::SystemStart => "system:start",
            EventType::SystemStop => "system:stop",
            EventType::SystemError => "system:error",
            EventType::MetricsUpdate => "metrics:update",
            EventType::MetricsCpuHigh => "metrics:cpu-high",
            EventType::MetricsMemoryHigh => "metrics:memory-high",
            EventType::ConfigReload => "config:reload",
            EventType::ConfigChange => "config:change",
        }
    }

    /// Parses a stable wire identifier (e.g. `"process:restart"`) back into an
    /// `EventType`, for config-driven webhook event filters.
    pub fn from_wire(wire: &str) -> Option<Self> {
        Some(match wire {
            "process:start" => EventType::ProcessStart,
            "process:stop" => EventType::ProcessStop,
            "process:restart" => EventType::ProcessRestart,
            "process:exit" => EventType::ProcessExit,
            "process:error" => EventType::ProcessError,
            "process:state-change" => EventType::ProcessStateChange,
            "process:log" => EventType::ProcessLog,
            "process:oom" => EventType::ProcessOom,
            "instance:add" => EventType::InstanceAdd,
            "instance:remove" => EventType::InstanceRemove,
            "instance:health-change" => EventType::InstanceHealthChange,
            "system:start" => EventType::SystemStart,
            "system:stop" => EventType::SystemStop,
            "system:error" => EventType::SystemError,
            "metrics:update" => EventType::MetricsUpdate,
            "metrics:cpu-high" => EventType::MetricsCpuHigh,
            "metrics:memory-high" => EventType::MetricsMemoryHigh,
            "config:reload" => EventType::ConfigReload,
            "config:change" => EventType::ConfigChange,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventData {
    ProcessStart { name: String, instance_id: u32 },
    ProcessStop { name: String, reason: String },
    ProcessRestart { name: String, reason: RestartReason, restart_count: u32 },
    ProcessExit { name: String, instance_id: u32, exit_code: Option<i32>, signal: Option<i32> },
    ProcessError { name: String, message: String },
    ProcessStateChange { name: String, from: ProcessState, to: ProcessState },
    ProcessLog { name: String, instance_id: u32, stream: LogStream, line: String },
    ProcessOom { name: String, instance_id: u32, memory_bytes: u64 },
    InstanceAdd { name: String, instance_id: u32 },
    InstanceRemove { name: String, instance_id: u32 },
    InstanceHealthChange { name: String, instance_id: u32, healthy: bool },
    SystemStart,
    SystemStop,
    SystemError { message: String },
    MetricsUpdate { name: String, instance_id: u32, cpu_percent: f32, memory_bytes: u64, uptime_ms: u64 },
    MetricsCpuHigh { name: String, instance_id: u32, cpu_percent: f32 },
    MetricsMemoryHigh { name: String, instance_id: u32, memory_bytes: u64 },
    ConfigReload,
    ConfigChange { name: String },
}

impl EventData {
    pub fn event_type(&self) -> EventType {
        match self {
            EventData::ProcessStart { .. } => EventType::ProcessStart,
            EventData::ProcessStop { .. } => EventType::ProcessStop,
            EventData::ProcessRestart { .. } => EventType::ProcessRestart,
            EventData::ProcessExit { .. } => EventType::ProcessExit,
            EventData::ProcessError { .. } => EventType::ProcessError,
            EventData::ProcessStateChange { .. } => EventType::ProcessStateChange,
            EventData::ProcessLog { .. } => EventType::ProcessLog,
            EventData::ProcessOom { .. } => EventType::ProcessOom,
            EventData::InstanceAdd { .. } => EventType::InstanceAdd,
            EventData::InstanceRemove { .. } => EventType::InstanceRemove,
            EventData::InstanceHealthChange { .. } => EventType::InstanceHealthChange,
            EventData::SystemStart => EventType::SystemStart,
            EventData::SystemStop => EventType::SystemStop,
            EventData::SystemError { .. } => EventType::SystemError,
            EventData::MetricsUpdate { .. } => EventType::MetricsUpdate,
            EventData::MetricsCpuHigh { .. } => EventType::MetricsCpuHigh,
            EventData::MetricsMemoryHigh { .. } => EventType::MetricsMemoryHigh,
            EventData::ConfigReload => EventType::ConfigReload,
            EventData::ConfigChange { .. } => EventType::ConfigChange,
        }
    }
}

/// One immutable occurrence, ready for fan-out to listeners, the history ring, and the
/// webhook dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp_ms: u128,
    pub source: String,
    pub priority: EventPriority,
    pub data: EventData,
}

impl Event {
    pub fn new<S: Into<String>>(source: S, priority: EventPriority, data: EventData) -> Self {
        Self {
            event_type: data.event_type(),
            timestamp_ms: now_ms(),
            source: source.into(),
            priority,
            data,
        }
    }

    pub fn normal<S: Into<String>>(source: S, data: EventData) -> Self {
        Self::new(source, EventPriority::Normal, data)
    }

    pub fn high<S: Into<String>>(source: S, data: EventData) -> Self {
        Self::new(source, EventPriority::High, data)
    }

    pub fn low<S: Into<String>>(source: S, data: EventData) -> Self {
        Self::new(source, EventPriority::Low, data)
    }
}

fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}
