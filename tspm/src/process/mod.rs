pub mod instance;
pub mod log_writer;
pub mod managed_process;
pub mod restart_policy;

pub use managed_process::ManagedProcess;

/// The `ManagedProcess` lifecycle. See the transition table in the component design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Restarting,
    Stopping,
    Errored,
}

impl ProcessState {
    pub fn has_live_instances(self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Running | ProcessState::Restarting)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Restarting => "restarting",
            ProcessState::Stopping => "stopping",
            ProcessState::Errored => "errored",
        };
        f.write_str(s)
    }
}
