//! HTTP/HTTPS liveness probe. Grounded on the teacher's `HttpClient` trait split: the
//! transport is a narrow trait so tests can substitute a `mockall` mock instead of
//! making real network calls.

use crate::health::{HealthCheckerError, HealthProbe};
use crate::spec::{HealthCheckSpec, HealthProtocol};
use std::collections::HashMap;
use std::time::Duration;

/// Narrow seam over the HTTP transport, mocked in tests.
pub trait HttpTransport: Send + Sync {
    fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<(u16, String), HealthCheckerError>;
}

struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport for ReqwestTransport {
    fn request(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<(u16, String), HealthCheckerError> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|err| HealthCheckerError::Transport(err.to_string()))?;

        let mut request = self.client.request(method, url).timeout(timeout);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request.send().map_err(|err| HealthCheckerError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Ok((status, body))
    }
}

pub struct HttpProbe {
    transport: Box<dyn HttpTransport>,
    url: String,
    method: String,
    headers: HashMap<String, String>,
    expected_status: u16,
    response_body: Option<String>,
}

impl HttpProbe {
    pub fn from_spec(spec: &HealthCheckSpec) -> Result<Self, HealthCheckerError> {
        let host = spec.host.clone().ok_or(HealthCheckerError::MissingField("host"))?;
        let port = spec.port.ok_or(HealthCheckerError::MissingField("port"))?;
        let scheme = if spec.protocol == HealthProtocol::Https { "https" } else { "http" };
        let path = spec.path.trim_start_matches('/');
        let url = format!("{scheme}://{host}:{port}/{path}");

        Ok(Self {
            transport: Box::new(ReqwestTransport { client: reqwest::blocking::Client::new() }),
            url,
            method: spec.method.clone(),
            headers: spec.headers.clone(),
            expected_status: spec.expected_status,
            response_body: spec.response_body.clone(),
        })
    }

    #[cfg(test)]
    fn with_transport(transport: Box<dyn HttpTransport>, url: &str) -> Self {
        Self {
            transport,
            url: url.to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            expected_status: 200,
            response_body: None,
        }
    }
}

impl HealthProbe for HttpProbe {
    fn check(&self, timeout: Duration) -> Result<bool, HealthCheckerError> {
        let (status, body) = self.transport.request(&self.method, &self.url, &self.headers, timeout)?;

        let status_ok = status == self.expected_status;
        let body_ok = match &self.response_body {
            Some(expected) => body.contains(expected.as_str()),
            None => true,
        };

        Ok(status_ok && body_ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTransport {
        status: u16,
        body: String,
    }

    impl HttpTransport for FixedTransport {
        fn request(&self, _method: &str, _url: &str, _headers: &HashMap<String, String>, _timeout: Duration) -> Result<(u16, String), HealthCheckerError> {
            Ok((self.status, self.body.clone()))
        }
    }

    #[test]
    fn matching_status_is_healthy() {
        let probe = HttpProbe::with_transport(Box::new(FixedTransport { status: 200, body: String::new() }), "http://x");
        assert!(probe.check(Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn mismatched_status_is_unhealthy() {
        let probe = HttpProbe::with_transport(Box::new(FixedTransport { status: 500, body: String::new() }), "http://x");
        assert!(!probe.check(Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn response_body_substring_is_enforced_when_configured() {
        let mut probe = HttpProbe::with_transport(Box::new(FixedTransport { status: 200, body: "status: ok".to_string() }), "http://x");
        probe.response_body = Some("ok".to_string());
        assert!(probe.check(Duration::from_secs(1)).unwrap());

        probe.response_body = Some("degraded".to_string());
        assert!(!probe.check(Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn a_transport_error_propagates() {
        struct FailingTransport;
        impl HttpTransport for FailingTransport {
            fn request(&self, _: &str, _: &str, _: &HashMap<String, String>, _: Duration) -> Result<(u16, String), HealthCheckerError> {
                Err(HealthCheckerError::Transport("connection refused".to_string()))
            }
        }

        let probe = HttpProbe::with_transport(Box::new(FailingTransport), "http://x");
        assert!(probe.check(Duration::from_secs(1)).is_err());
    }
}
