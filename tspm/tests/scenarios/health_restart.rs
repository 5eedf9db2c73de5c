use crate::common::{spec, supervisor};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::time::{Duration, Instant};
use tspm::event::record::EventData;
use tspm::event::{EventPriority, EventType};
use tspm::process::restart_policy::RestartReason;
use tspm::spec::{HealthCheckSpec, HealthProtocol};

/// Answers every request with a bare `200 OK` for `alive_for`, then drops the listener so
/// later connection attempts are refused, simulating a backend that goes dark.
fn spawn_fake_http_server(alive_for: Duration) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    listener.set_nonblocking(true).unwrap();
    std::thread::spawn(move || {
        let deadline = Instant::now() + alive_for;
        while Instant::now() < deadline {
            match listener.accept() {
                Ok((mut stream, _)) => {
                    let mut buf = [0u8; 512];
                    let _ = stream.read(&mut buf);
                    let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
                }
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    });
    port
}

/// S5: once a process's backing server stops answering, two consecutive probe failures
/// mark the instance unhealthy and request a restart with reason `health`.
#[test]
fn repeated_health_check_failures_request_a_restart() {
    let supervisor = supervisor();
    let port = spawn_fake_http_server(Duration::from_millis(250));

    let mut service = spec("flaky", "/bin/sh", &["-c", "sleep 60"]);
    service.health_check = Some(HealthCheckSpec {
        protocol: HealthProtocol::Http,
        host: Some("127.0.0.1".to_string()),
        port: Some(port),
        path: "/h".to_string(),
        method: "GET".to_string(),
        headers: Default::default(),
        expected_status: 200,
        response_body: None,
        command: None,
        interval: Duration::from_millis(100).into(),
        timeout: Duration::from_millis(200).into(),
        initial_delay: Duration::from_millis(0).into(),
        retries: 2,
    });

    supervisor.add_process(service).unwrap();
    supervisor.start_process("flaky").unwrap();

    let (_id, restart_rx) = supervisor.subscribe(Some(EventType::ProcessRestart), EventPriority::Normal);

    let event = restart_rx
        .as_ref()
        .recv_timeout(Duration::from_secs(5))
        .expect("expected a health-triggered restart request");
    match event.data {
        EventData::ProcessRestart { name, reason, .. } => {
            assert_eq!(name, "flaky");
            assert_eq!(reason, RestartReason::Health);
        }
        other => panic!("expected a ProcessRestart event, got {other:?}"),
    }

    supervisor.shutdown();
}
