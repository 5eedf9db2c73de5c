use crate::common::{spec, supervisor};
use std::time::Duration;
use tspm::process::ProcessState;

/// S1: a process that never survives `minUptime` exhausts `maxRestarts` and lands in
/// `ERRORED` with a restart count equal to the cap, instead of looping forever.
#[test]
fn crash_loop_exhausts_max_restarts_and_errors() {
    let supervisor = supervisor();

    let mut crasher = spec("crasher", "/bin/sh", &["-c", "exit 1"]);
    crasher.autorestart = true;
    crasher.max_restarts = 3;
    crasher.restart_delay = Some(Duration::from_millis(20));
    crasher.min_uptime = Duration::from_millis(200).into();

    supervisor.add_process(crasher).unwrap();

    let result = supervisor.start_process("crasher");
    assert!(result.is_err(), "expected start to fail once the restart cap is exhausted");

    let status = supervisor.describe_process("crasher").unwrap().status;
    assert_eq!(status.state, ProcessState::Errored);
    assert_eq!(status.restart_count, 3);

    supervisor.remove_process("crasher", true).unwrap();
}
