//! Quorum analysis over node timelines

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

mod common;
use common::{
    RecordingProvider, StaticProbe, TestCluster, fast_config, init_tracing, monitor, wait_for,
};
use vigil_engine::foundation::{AssignmentRecord, Timestamp};
use vigil_engine::{
    AppConfiguration, LogEntry, MonitorConfigInstance, MonitorConfiguration, MonitorId,
    MonitorNode, MonitorStatus, ProposalOutcome, StatusRecord,
};
use vigil_topology::NodeId;

/// Whole second `seconds_ago` seconds before now
fn whole_second(seconds_ago: i64) -> Timestamp {
    DateTime::from_timestamp(Utc::now().timestamp() - seconds_ago, 0).unwrap()
}

/// Commit an assignment of `config` to `nodes` without going through the distributor
async fn assign(
    cluster: &TestCluster,
    nodes: Vec<NodeId>,
    timestamp: Timestamp,
    config: MonitorConfiguration,
) -> Arc<MonitorNode> {
    let leader = cluster.leader().expect("No leader").clone();
    let entry = LogEntry::Assignment(AssignmentRecord {
        monitor_id: config.id.clone(),
        nodes,
        timestamp,
        config: MonitorConfigInstance::new(config),
    });
    assert!(
        leader
            .consensus()
            .write(entry.encode().unwrap())
            .await
            .unwrap()
    );
    leader
}

/// Commit an assignment of `web` to every node
async fn assign_all(cluster: &TestCluster, timestamp: Timestamp) -> Arc<MonitorNode> {
    let nodes = cluster.nodes.iter().map(|node| node.node_id().clone()).collect();
    assign(cluster, nodes, timestamp, monitor("web", 3)).await
}

fn seeds(seeds: &[u8]) -> Vec<NodeId> {
    seeds.iter().map(|seed| NodeId::from_seed(*seed)).collect()
}

fn history(node: &MonitorNode, monitor_id: &MonitorId) -> Vec<StatusRecord> {
    node.store().snapshot().status_history(monitor_id).to_vec()
}

#[tokio::test]
async fn test_steady_checks_commit_one_transition() {
    init_tracing();

    let mut cluster = TestCluster::new(fast_config(), StaticProbe::new(MonitorStatus::Reachable));
    cluster.add_nodes(3);

    let web = MonitorId::new("web");
    let start = whole_second(60);
    let leader = assign_all(&cluster, start).await;

    for node in &cluster.nodes {
        for second in 1..=5 {
            node.recorder().report(
                &web,
                MonitorStatus::Reachable,
                start + TimeDelta::seconds(second),
            );
        }
    }
    leader.analyzer().trigger([web.clone()]);

    assert!(wait_for(Duration::from_secs(5), || history(&leader, &web).len() == 5).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let records = history(&leader, &web);
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.status == MonitorStatus::Reachable));
    assert!(!records[0].redundant);
    assert!(records[1..].iter().all(|r| r.redundant));
    assert_eq!(records[0].check_timestamp, start + TimeDelta::seconds(1));
    assert_eq!(records[4].check_timestamp, start + TimeDelta::seconds(5));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_split_vote_is_partially_reachable() {
    init_tracing();

    let mut cluster = TestCluster::new(fast_config(), StaticProbe::new(MonitorStatus::Reachable));
    cluster.add_nodes(3);

    let web = MonitorId::new("web");
    let start = whole_second(60);
    let leader = assign_all(&cluster, start).await;

    let check = start + TimeDelta::seconds(10);
    for (node, status) in cluster.nodes.iter().zip([
        MonitorStatus::Reachable,
        MonitorStatus::Reachable,
        MonitorStatus::NotReachable,
    ]) {
        node.recorder().report(&web, status, check);
    }
    leader.analyzer().trigger([web.clone()]);

    assert!(wait_for(Duration::from_secs(5), || history(&leader, &web).len() == 1).await);
    let records = history(&leader, &web);
    assert_eq!(records[0].status, MonitorStatus::PartiallyReachable);
    assert_eq!(records[0].check_timestamp, check);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_waits_for_late_observer() {
    init_tracing();

    let mut cluster = TestCluster::new(fast_config(), StaticProbe::new(MonitorStatus::Reachable));
    cluster.add_nodes(3);

    let web = MonitorId::new("web");
    let check = whole_second(0);
    let leader = assign_all(&cluster, check - TimeDelta::seconds(10)).await;

    for node in &cluster.nodes[..2] {
        node.recorder()
            .report(&web, MonitorStatus::Reachable, check);
    }
    leader.analyzer().trigger([web.clone()]);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(history(&leader, &web).is_empty());

    cluster
        .node(&NodeId::from_seed(3))
        .recorder()
        .report(&web, MonitorStatus::NotReachable, check);

    assert!(wait_for(Duration::from_secs(5), || history(&leader, &web).len() == 1).await);
    assert_eq!(
        history(&leader, &web)[0].status,
        MonitorStatus::PartiallyReachable
    );

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_checks_flow_into_status_and_notifications() {
    init_tracing();

    let probe = StaticProbe::new(MonitorStatus::Reachable);
    let provider = Arc::new(RecordingProvider::default());
    let mut cluster =
        TestCluster::new(fast_config(), probe.clone()).with_provider(provider.clone());
    cluster.add_nodes(3);

    let config = AppConfiguration {
        revision: 1,
        monitors: vec![monitor("web", 3)],
        ..Default::default()
    };
    let outcome = cluster.nodes[1]
        .propose_configuration(config, false)
        .await
        .expect("Proposal failed");
    assert_eq!(outcome, ProposalOutcome::Accepted { revision: 1 });

    let web = MonitorId::new("web");
    let leader = cluster.leader().expect("No leader").clone();
    assert!(
        wait_for(Duration::from_secs(15), || history(&leader, &web).len() >= 3).await,
        "Checks never produced status records"
    );

    let records = history(&leader, &web);
    assert!(records.iter().all(|r| r.status == MonitorStatus::Reachable));
    assert_eq!(records.iter().filter(|r| !r.redundant).count(), 1);

    assert!(
        wait_for(Duration::from_secs(5), || {
            leader.store().snapshot().notifications().len() == 1
        })
        .await
    );
    assert_eq!(
        provider.sent.lock().clone(),
        vec![(web.clone(), MonitorStatus::Reachable)]
    );

    probe.set(MonitorStatus::NotReachable);
    assert!(
        wait_for(Duration::from_secs(15), || {
            history(&leader, &web)
                .last()
                .is_some_and(|r| r.status == MonitorStatus::NotReachable)
        })
        .await,
        "Outage was never committed"
    );
    assert!(
        wait_for(Duration::from_secs(5), || {
            provider
                .sent
                .lock()
                .iter()
                .any(|(_, status)| *status == MonitorStatus::NotReachable)
        })
        .await
    );

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_observers_follow_assignment_epochs() {
    init_tracing();

    let mut cluster = TestCluster::new(fast_config(), StaticProbe::new(MonitorStatus::Reachable));
    cluster.add_nodes(3);

    let web = MonitorId::new("web");
    let start = whole_second(60);
    let second = |offset: i64| start + TimeDelta::seconds(offset);

    assign(&cluster, seeds(&[1, 2]), start, monitor("web", 2)).await;
    let leader = assign(&cluster, seeds(&[2, 3]), second(10), monitor("web", 2)).await;

    let reports = [
        (1, MonitorStatus::Reachable, MonitorStatus::NotReachable),
        (2, MonitorStatus::Reachable, MonitorStatus::NotReachable),
        (3, MonitorStatus::NotReachable, MonitorStatus::NotReachable),
    ];
    for (seed, early, late) in reports {
        let recorder = cluster.node(&NodeId::from_seed(seed)).recorder().clone();
        recorder.report(&web, early, second(5));
        recorder.report(&web, late, second(15));
    }
    leader.analyzer().trigger([web.clone()]);

    assert!(wait_for(Duration::from_secs(5), || history(&leader, &web).len() == 11).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let records = history(&leader, &web);
    let statuses: Vec<_> = records.iter().map(|r| (r.check_timestamp, r.status)).collect();
    let mut expected: Vec<_> = (5..10)
        .map(|offset| (second(offset), MonitorStatus::Reachable))
        .collect();
    expected.extend((10..15).map(|offset| (second(offset), MonitorStatus::PartiallyReachable)));
    expected.push((second(15), MonitorStatus::NotReachable));
    assert_eq!(statuses, expected);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unknown_observations_are_skipped() {
    init_tracing();

    let mut cluster = TestCluster::new(fast_config(), StaticProbe::new(MonitorStatus::Reachable));
    cluster.add_nodes(3);

    let web = MonitorId::new("web");
    let start = whole_second(60);
    let second = |offset: i64| start + TimeDelta::seconds(offset);
    let leader = assign_all(&cluster, start).await;

    for node in &cluster.nodes {
        node.recorder().report(&web, MonitorStatus::Reachable, second(3));
        node.recorder().report(&web, MonitorStatus::Unknown, second(5));
        node.recorder().report(&web, MonitorStatus::Reachable, second(7));
    }
    leader.analyzer().trigger([web.clone()]);

    assert!(wait_for(Duration::from_secs(5), || history(&leader, &web).len() == 3).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let committed: Vec<_> = history(&leader, &web)
        .iter()
        .map(|r| r.check_timestamp)
        .collect();
    assert_eq!(committed, vec![second(3), second(4), second(7)]);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_repeat_trigger_ignored_while_analysis_waits() {
    init_tracing();

    let mut config = fast_config();
    config.analyzer.wait_buffer = Duration::from_secs(5);
    let mut cluster = TestCluster::new(config, StaticProbe::new(MonitorStatus::Reachable));
    cluster.add_nodes(3);

    let web = MonitorId::new("web");
    let check = whole_second(0);
    let leader = assign_all(&cluster, check - TimeDelta::seconds(10)).await;

    for node in &cluster.nodes[..2] {
        node.recorder().report(&web, MonitorStatus::Reachable, check);
    }
    leader.analyzer().trigger([web.clone()]);

    // Node 3 has not reported, so an analysis is parked waiting for it
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(leader.analyzer().is_analyzing(&web));
    assert_eq!(leader.analyzer().trigger([web.clone()]), 0);

    cluster
        .node(&NodeId::from_seed(3))
        .recorder()
        .report(&web, MonitorStatus::Reachable, check);

    assert!(wait_for(Duration::from_secs(5), || history(&leader, &web).len() == 1).await);
    assert!(wait_for(Duration::from_secs(2), || !leader.analyzer().is_analyzing(&web)).await);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_leadership_loss_cancels_waiting_analysis() {
    init_tracing();

    let mut config = fast_config();
    config.analyzer.wait_buffer = Duration::from_secs(5);
    let mut cluster = TestCluster::new(config, StaticProbe::new(MonitorStatus::Reachable));
    cluster.add_nodes(3);

    let web = MonitorId::new("web");
    let check = whole_second(0);
    let leader = assign_all(&cluster, check - TimeDelta::seconds(10)).await;

    for node in &cluster.nodes[..2] {
        node.recorder().report(&web, MonitorStatus::Reachable, check);
    }
    leader.analyzer().trigger([web.clone()]);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(leader.analyzer().is_analyzing(&web));

    cluster.consensus.elect(Some(NodeId::from_seed(2)));

    assert!(
        wait_for(Duration::from_secs(1), || !leader.analyzer().is_analyzing(&web)).await,
        "Former leader kept analyzing"
    );
    assert_eq!(leader.analyzer().trigger([web.clone()]), 0);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unrepresentable_wait_deadline_decides_immediately() {
    init_tracing();

    let mut cluster = TestCluster::new(fast_config(), StaticProbe::new(MonitorStatus::Reachable));
    cluster.add_nodes(3);

    // Written straight to the log, so no validation caps the timeout
    let mut config = monitor("web", 3);
    config.timeout_secs = 1e13;

    let web = MonitorId::new("web");
    let start = whole_second(60);
    let check = start + TimeDelta::seconds(5);
    let leader = assign(&cluster, seeds(&[1, 2, 3]), start, config).await;

    for node in &cluster.nodes[..2] {
        node.recorder().report(&web, MonitorStatus::Reachable, check);
    }
    leader.analyzer().trigger([web.clone()]);

    assert!(wait_for(Duration::from_secs(5), || history(&leader, &web).len() == 1).await);
    let records = history(&leader, &web);
    assert_eq!(records[0].check_timestamp, check);
    assert_eq!(records[0].status, MonitorStatus::Reachable);

    // The analysis slot is free again for the next trigger
    assert!(
        wait_for(Duration::from_secs(2), || leader.analyzer().trigger([web.clone()]) == 1).await
    );

    cluster.shutdown().await;
}
