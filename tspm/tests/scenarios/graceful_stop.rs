use crate::common::{spec, supervisor};
use std::time::{Duration, Instant};
use tspm::process::ProcessState;

/// S3: a child that ignores SIGTERM for longer than `killTimeout` is escalated to
/// SIGKILL and reaped well before it would have exited on its own.
#[test]
fn a_child_ignoring_sigterm_is_killed_after_kill_timeout() {
    let supervisor = supervisor();

    let mut slow = spec("slow", "/bin/sh", &["-c", "trap '' TERM; sleep 3"]);
    slow.kill_timeout = Duration::from_millis(300).into();

    supervisor.add_process(slow).unwrap();
    supervisor.start_process("slow").unwrap();

    let started_stop = Instant::now();
    supervisor.stop_process("slow", tspm::process::restart_policy::RestartReason::Manual).unwrap();
    let elapsed = started_stop.elapsed();

    assert_eq!(supervisor.describe_process("slow").unwrap().status.state, ProcessState::Stopped);
    assert!(elapsed < Duration::from_secs(2), "expected SIGKILL escalation well before the child's own 3s sleep, took {elapsed:?}");

    supervisor.remove_process("slow", true).unwrap();
}
