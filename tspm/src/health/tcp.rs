//! TCP liveness probe: success iff a connection completes within the configured
//! deadline, honoring `timeout` via `TcpStream::connect_timeout` rather than relying on
//! the OS default (which can be minutes).

use crate::health::{HealthCheckerError, HealthProbe};
use crate::spec::HealthCheckSpec;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

pub struct TcpProbe {
    host: String,
    port: u16,
}

impl TcpProbe {
    pub fn from_spec(spec: &HealthCheckSpec) -> Result<Self, HealthCheckerError> {
        let host = spec.host.clone().ok_or(HealthCheckerError::MissingField("host"))?;
        let port = spec.port.ok_or(HealthCheckerError::MissingField("port"))?;
        Ok(Self { host, port })
    }

    fn resolve(&self) -> Result<SocketAddr, HealthCheckerError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| HealthCheckerError::Transport(err.to_string()))?
            .next()
            .ok_or_else(|| HealthCheckerError::Transport(format!("could not resolve {}:{}", self.host, self.port)))
    }
}

impl HealthProbe for TcpProbe {
    fn check(&self, timeout: Duration) -> Result<bool, HealthCheckerError> {
        let addr = self.resolve()?;
        Ok(TcpStream::connect_timeout(&addr, timeout).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn connects_to_a_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe { host: "127.0.0.1".to_string(), port };
        assert!(probe.check(Duration::from_millis(200)).unwrap());
    }

    #[test]
    fn fails_against_a_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = TcpProbe { host: "127.0.0.1".to_string(), port };
        assert!(!probe.check(Duration::from_millis(200)).unwrap());
    }
}
