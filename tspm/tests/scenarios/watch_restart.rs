use crate::common::{spec, supervisor};
use std::fs;
use std::time::Duration;
use tspm::event::record::EventData;
use tspm::event::{EventPriority, EventType};
use tspm::process::restart_policy::RestartReason;
use tspm::spec::WatchConfig;

/// S4: touching files under a watched process's working directory requests exactly one
/// restart (reason `watch`) once the debounce window settles.
#[test]
fn touching_watched_files_requests_one_restart() {
    let supervisor = supervisor();
    let root = tempfile::tempdir().unwrap();

    let mut watched = spec("watched", "/bin/sh", &["-c", "sleep 60"]);
    watched.watch = WatchConfig::Enabled(true);
    watched.watch_delay = Duration::from_millis(200).into();
    watched.cwd = Some(root.path().to_path_buf());

    supervisor.add_process(watched).unwrap();
    supervisor.start_process("watched").unwrap();

    let (_id, restart_rx) = supervisor.subscribe(Some(EventType::ProcessRestart), EventPriority::Normal);

    for i in 0..5 {
        fs::write(root.path().join(format!("file-{i}.txt")), b"changed").unwrap();
        std::thread::sleep(Duration::from_millis(30));
    }

    let event = restart_rx.as_ref().recv_timeout(Duration::from_secs(3)).expect("expected a watch-triggered restart request");
    match event.data {
        EventData::ProcessRestart { name, reason, .. } => {
            assert_eq!(name, "watched");
            assert_eq!(reason, RestartReason::Watch);
        }
        other => panic!("expected a ProcessRestart event, got {other:?}"),
    }

    supervisor.shutdown();
}
