use crate::common::{spec, supervisor};
use std::collections::HashSet;

/// S6: scaling a running cluster down tears down the surplus instances and leaves the
/// requested count of distinct, live pids behind.
#[test]
fn scaling_down_a_cluster_stops_the_surplus_instances() {
    let supervisor = supervisor();

    let mut cluster = spec("cluster", "/bin/sh", &["-c", "sleep 60"]);
    cluster.instances = 4;

    supervisor.add_process(cluster).unwrap();
    supervisor.start_process("cluster").unwrap();

    let before = supervisor.describe_process("cluster").unwrap().status;
    assert_eq!(before.instance_count, 4);
    assert_eq!(before.pids.len(), 4);
    let before_pids: HashSet<u32> = before.pids.into_iter().collect();

    supervisor.scale_process("cluster", 2).unwrap();

    let after = supervisor.describe_process("cluster").unwrap().status;
    assert_eq!(after.instance_count, 2);
    assert_eq!(after.pids.len(), 2);
    let after_pids: HashSet<u32> = after.pids.into_iter().collect();
    assert!(
        after_pids.is_subset(&before_pids),
        "surviving instances should be a subset of the original four, not freshly respawned ones"
    );

    supervisor.remove_process("cluster", true).unwrap();
}
