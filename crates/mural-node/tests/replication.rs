//! Multi-replica tests: push convergence, restart resync, and Berkeley
//! clock averaging.

mod common;

use common::*;
use mural_node::Replica;
use mural_registry::RegistryClient;
use mural_replication::run_berkeley_cycle;
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn three_replicas_converge_after_pushes() {
    let (registry_addr, _registry) = spawn_registry().await;
    let dirs: Vec<_> = (0..3).map(|_| tempdir().unwrap()).collect();

    let r1 = Replica::start(replica_config("server_1", &registry_addr, dirs[0].path()))
        .await
        .unwrap();
    let r2 = Replica::start(replica_config("server_2", &registry_addr, dirs[1].path()))
        .await
        .unwrap();
    let r3 = Replica::start(replica_config("server_3", &registry_addr, dirs[2].path()))
        .await
        .unwrap();

    // All traffic lands on server_1; sync_interval is 2, so the final
    // mutation count (14) schedules a push covering everything.
    let addr1 = r1.addrs().client;
    call(addr1, &login("alice")).await;
    call(addr1, &channel("geral")).await;
    call(addr1, &channel("ping")).await;
    for i in 0..12 {
        call(addr1, &publish("alice", "geral", &format!("m{i}"))).await;
    }

    let expected = call(addr1, &get_history("geral", 100)).await.data.messages.unwrap();
    assert_eq!(expected.len(), 12);

    // Peers converge to the identical sequence, in the same order. The
    // side-channel trickle keeps scheduling fresh push rounds, the way a
    // live cluster re-converges after a lost transfer.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let h2 = call(r2.addrs().client, &get_history("geral", 100)).await.data.messages;
        let h3 = call(r3.addrs().client, &get_history("geral", 100)).await.data.messages;
        if h2.as_deref() == Some(&expected[..]) && h3.as_deref() == Some(&expected[..]) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "replicas did not converge: r2={:?} r3={:?}",
            h2.map(|records| records.len()),
            h3.map(|records| records.len())
        );
        call(addr1, &publish("alice", "ping", "tick")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    r1.shutdown().await;
    r2.shutdown().await;
    r3.shutdown().await;
}

#[tokio::test]
async fn restarted_replica_resyncs_from_the_cluster() {
    let (registry_addr, _registry) = spawn_registry().await;
    let dir1 = tempdir().unwrap();
    let dir2 = tempdir().unwrap();

    let r1 = Replica::start(replica_config("server_1", &registry_addr, dir1.path()))
        .await
        .unwrap();
    let addr1 = r1.addrs().client;
    call(addr1, &login("alice")).await;
    call(addr1, &channel("geral")).await;
    call(addr1, &publish("alice", "geral", "antes")).await;

    // server_2 joins mid-traffic and kills itself before any push reaches
    // it; the publish below is only on server_1.
    let r2 = Replica::start(replica_config("server_2", &registry_addr, dir2.path()))
        .await
        .unwrap();
    r2.shutdown().await;
    call(addr1, &publish("alice", "geral", "durante")).await;

    // On restart the replica pulls the full snapshot from the live
    // coordinator before serving clients.
    let r2 = Replica::start(replica_config("server_2", &registry_addr, dir2.path()))
        .await
        .unwrap();
    let expected = call(addr1, &get_history("geral", 100)).await.data.messages.unwrap();
    let actual = call(r2.addrs().client, &get_history("geral", 100))
        .await
        .data
        .messages
        .unwrap();
    assert_eq!(actual, expected);
    assert_eq!(bodies(&actual), vec!["antes", "durante"]);

    r1.shutdown().await;
    r2.shutdown().await;
}

#[tokio::test]
async fn berkeley_cycle_averages_out_skew() {
    let (registry_addr, _registry) = spawn_registry().await;
    let dir1 = tempdir().unwrap();
    let dir2 = tempdir().unwrap();

    let r1 = Replica::start(replica_config("server_1", &registry_addr, dir1.path()))
        .await
        .unwrap();
    let r2 = Replica::start(replica_config("server_2", &registry_addr, dir2.path()))
        .await
        .unwrap();

    // Skew server_2 five seconds into the future.
    r2.store().adjust_offset(5.0);
    let skew = (r2.store().now() - r1.store().now()).abs();
    assert!(skew > 4.0, "skew not applied: {skew}");

    let registry = RegistryClient::new(&registry_addr, Duration::from_secs(1));
    let servers = registry.list().await;
    assert_eq!(servers.len(), 2);

    let responders =
        run_berkeley_cycle(&r1.store(), &servers, "server_1", Duration::from_secs(1)).await;
    assert_eq!(responders, 1);

    // Both replicas moved to the mean: the five-second gap is split.
    let gap = (r2.store().now() - r1.store().now()).abs();
    assert!(gap < 0.5, "clocks still apart: {gap}");
    assert!((r1.store().time_offset() - 2.5).abs() < 0.3);
    assert!((r2.store().time_offset() - 2.5).abs() < 0.3);

    // A second cycle over agreeing clocks changes nearly nothing.
    run_berkeley_cycle(&r1.store(), &servers, "server_1", Duration::from_secs(1)).await;
    let gap = (r2.store().now() - r1.store().now()).abs();
    assert!(gap < 0.5, "clocks drifted apart again: {gap}");

    r1.shutdown().await;
    r2.shutdown().await;
}
