use crate::common::{spec, supervisor};
use std::time::Duration;
use tspm::process::ProcessState;

/// S2: a process whose child outlives `minUptime` settles in `RUNNING` with a live pid
/// and no restarts recorded.
#[test]
fn a_stable_child_reaches_running_with_no_restarts() {
    let supervisor = supervisor();

    let mut ok = spec("ok", "/bin/sh", &["-c", "sleep 60"]);
    ok.autorestart = true;
    ok.min_uptime = Duration::from_millis(100).into();

    supervisor.add_process(ok).unwrap();
    supervisor.start_process("ok").unwrap();

    let status = supervisor.describe_process("ok").unwrap().status;
    assert_eq!(status.state, ProcessState::Running);
    assert_eq!(status.restart_count, 0);
    assert_eq!(status.pids.len(), 1);
    assert!(status.pids[0] > 0);

    supervisor.stop_process("ok", tspm::process::restart_policy::RestartReason::Manual).unwrap();
    supervisor.remove_process("ok", true).unwrap();
}
