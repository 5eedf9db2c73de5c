//! Command liveness probe: runs `command` via `/bin/sh -c`, success iff it exits zero
//! within the configured timeout.

use crate::health::{HealthCheckerError, HealthProbe};
use crate::spec::HealthCheckSpec;
use std::process::Command;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct CommandProbe {
    command: String,
}

impl CommandProbe {
    pub fn from_spec(spec: &HealthCheckSpec) -> Result<Self, HealthCheckerError> {
        let command = spec.command.clone().ok_or(HealthCheckerError::MissingField("command"))?;
        Ok(Self { command })
    }
}

impl HealthProbe for CommandProbe {
    fn check(&self, timeout: Duration) -> Result<bool, HealthCheckerError> {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(&self.command)
            .spawn()
            .map_err(|err| HealthCheckerError::Transport(err.to_string()))?;

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status.success()),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Ok(false);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(HealthCheckerError::Transport(err.to_string())),
            }
        }
    }
}
