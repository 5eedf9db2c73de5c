//! The declarative, already-validated configuration unit the engine operates on.
//! Parsing and on-disk schema concerns live in the daemon binary; this module only
//! defines the validated shape and the one validation pass performed at load time.

use duration_str::{deserialize_duration, deserialize_option_duration};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use wrapper_with_default::WrapperWithDefault;

pub const MAX_INSTANCES: u32 = 32;

const DEFAULT_MIN_UPTIME: Duration = Duration::from_secs(1);
const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WATCH_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HEALTH_INITIAL_DELAY: Duration = Duration::ZERO;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, WrapperWithDefault)]
#[wrapper_default_value(DEFAULT_MIN_UPTIME)]
pub struct MinUptime(#[serde(deserialize_with = "deserialize_duration")] Duration);

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, WrapperWithDefault)]
#[wrapper_default_value(DEFAULT_KILL_TIMEOUT)]
pub struct KillTimeout(#[serde(deserialize_with = "deserialize_duration")] Duration);

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, WrapperWithDefault)]
#[wrapper_default_value(DEFAULT_WATCH_DELAY)]
pub struct WatchDelay(#[serde(deserialize_with = "deserialize_duration")] Duration);

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, WrapperWithDefault)]
#[wrapper_default_value(DEFAULT_HEALTH_INTERVAL)]
pub struct HealthInterval(#[serde(deserialize_with = "deserialize_duration")] Duration);

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, WrapperWithDefault)]
#[wrapper_default_value(DEFAULT_HEALTH_TIMEOUT)]
pub struct HealthTimeout(#[serde(deserialize_with = "deserialize_duration")] Duration);

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, WrapperWithDefault)]
#[wrapper_default_value(DEFAULT_HEALTH_INITIAL_DELAY)]
pub struct HealthInitialDelay(#[serde(deserialize_with = "deserialize_duration")] Duration);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LbStrategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
    LeastCpu,
    LeastMemory,
    IpHash,
    Weighted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthProtocol {
    #[default]
    None,
    Http,
    Https,
    Tcp,
    Command,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HealthCheckSpec {
    #[serde(default)]
    pub protocol: HealthProtocol,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_health_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    pub response_body: Option<String>,
    pub command: Option<String>,
    #[serde(default)]
    pub interval: HealthInterval,
    #[serde(default)]
    pub timeout: HealthTimeout,
    #[serde(default)]
    pub initial_delay: HealthInitialDelay,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_health_method() -> String {
    "GET".to_string()
}

fn default_expected_status() -> u16 {
    200
}

fn default_retries() -> u32 {
    3
}

/// `watch: true`, `watch: false`, or an explicit glob list.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WatchConfig {
    Enabled(bool),
    Globs(Vec<String>),
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig::Enabled(false)
    }
}

impl WatchConfig {
    pub fn is_enabled(&self) -> bool {
        match self {
            WatchConfig::Enabled(b) => *b,
            WatchConfig::Globs(globs) => !globs.is_empty(),
        }
    }

    pub fn globs(&self) -> &[String] {
        match self {
            WatchConfig::Globs(globs) => globs,
            WatchConfig::Enabled(_) => &[],
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_instances() -> u32 {
    1
}

fn default_instance_weight() -> u32 {
    1
}

/// One process definition. Construction through `serde_yaml::from_str` followed by
/// [`ProcessSpec::validate`] is the only validation boundary the engine recognizes;
/// nothing downstream re-checks these invariants.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProcessSpec {
    pub name: String,
    pub script: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub autorestart: bool,
    #[serde(default)]
    pub max_restarts: u32,
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub restart_delay: Option<Duration>,
    #[serde(default)]
    pub min_uptime: MinUptime,
    #[serde(default)]
    pub kill_timeout: KillTimeout,
    #[serde(default = "default_instances")]
    pub instances: u32,
    #[serde(default)]
    pub lb_strategy: LbStrategy,
    #[serde(default = "default_instance_weight")]
    pub instance_weight: u32,
    pub namespace: Option<String>,
    pub cluster_group: Option<String>,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub ignore_watch: Vec<String>,
    #[serde(default)]
    pub watch_delay: WatchDelay,
    pub health_check: Option<HealthCheckSpec>,
    #[serde(default)]
    pub max_memory: u64,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    #[serde(default)]
    pub combine_logs: bool,
    pub dot_env: Option<PathBuf>,
    pub pre_start: Option<String>,
    pub post_start: Option<String>,
    pub cron: Option<String>,
    /// Platform nice-value applied to each instance after spawn, best-effort.
    pub priority: Option<i32>,
    pub cpu_threshold: Option<f32>,
    pub memory_threshold: Option<u64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum SpecError {
    #[error("process name must not be empty")]
    EmptyName,
    #[error("process name `{0}` contains characters outside printable ASCII")]
    InvalidName(String),
    #[error("script path must not be empty")]
    EmptyScript,
    #[error("instances must be between 1 and {MAX_INSTANCES}, got {0}")]
    InvalidInstanceCount(u32),
    #[error("cron expression `{0}` is invalid: {1}")]
    InvalidCron(String, String),
}

impl ProcessSpec {
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::EmptyName);
        }
        if !self.name.chars().all(|c| c.is_ascii_graphic() || c == '-' || c == '_') {
            return Err(SpecError::InvalidName(self.name.clone()));
        }
        if self.script.as_os_str().is_empty() {
            return Err(SpecError::EmptyScript);
        }
        if self.instances == 0 || self.instances > MAX_INSTANCES {
            return Err(SpecError::InvalidInstanceCount(self.instances));
        }
        if let Some(expr) = &self.cron {
            use std::str::FromStr;
            cron::Schedule::from_str(expr)
                .map_err(|err| SpecError::InvalidCron(expr.clone(), err.to_string()))?;
        }
        Ok(())
    }

    /// Whether `restartCount >= maxRestarts` should stop further auto-restarts.
    /// `maxRestarts == 0` means unlimited.
    pub fn restart_cap_reached(&self, restart_count: u32) -> bool {
        self.max_restarts > 0 && restart_count >= self.max_restarts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn base_spec() -> ProcessSpec {
        serde_yaml::from_str(
            r#"
            name: web
            script: /usr/bin/node
            args: ["server.js"]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn minimal_spec_deserializes_with_defaults() {
        let spec = base_spec();
        assert_eq!(spec.instances, 1);
        assert!(spec.autorestart);
        assert_eq!(spec.max_restarts, 0);
        assert_eq!(Duration::from(spec.min_uptime), DEFAULT_MIN_UPTIME);
        assert_eq!(Duration::from(spec.kill_timeout), DEFAULT_KILL_TIMEOUT);
        assert_eq!(spec.lb_strategy, LbStrategy::RoundRobin);
    }

    #[rstest]
    #[case::empty_name("", 1)]
    fn invalid_name_is_rejected(#[case] name: &str, #[case] instances: u32) {
        let mut spec = base_spec();
        spec.name = name.to_string();
        spec.instances = instances;
        assert_eq!(spec.validate(), Err(SpecError::EmptyName));
    }

    #[rstest]
    #[case::zero(0)]
    #[case::over_max(33)]
    fn invalid_instance_count_is_rejected(#[case] instances: u32) {
        let mut spec = base_spec();
        spec.instances = instances;
        assert_eq!(spec.validate(), Err(SpecError::InvalidInstanceCount(instances)));
    }

    #[test]
    fn restart_cap_zero_means_unlimited() {
        let spec = base_spec();
        assert!(!spec.restart_cap_reached(10_000));
    }

    #[test]
    fn restart_cap_is_enforced_once_reached() {
        let mut spec = base_spec();
        spec.max_restarts = 3;
        assert!(!spec.restart_cap_reached(2));
        assert!(spec.restart_cap_reached(3));
    }

    #[test]
    fn watch_config_accepts_bool_or_globs() {
        let spec: ProcessSpec = serde_yaml::from_str(
            r#"
            name: web
            script: /usr/bin/node
            watch: ["src/**/*.js"]
            "#,
        )
        .unwrap();
        assert!(spec.watch.is_enabled());
        assert_eq!(spec.watch.globs(), ["src/**/*.js"]);
    }
}
