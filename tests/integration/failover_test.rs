// tests/integration/failover_test.rs

//! End-to-end reconciliation scenarios against mock backends and a mock
//! virtual address.

use super::test_helpers::{MockRole, MockValkey};
use valkey_vigil::config::ValkeyConfig;
use valkey_vigil::failover::FailoverClient;

/// Two backends plus a stand-in for the virtual address, initially routed to
/// the first backend.
async fn cluster() -> (MockValkey, MockValkey, MockValkey, FailoverClient) {
    let node0 = MockValkey::start("run-id-node0").await;
    let node1 = MockValkey::start("run-id-node1").await;
    let vip = MockValkey::start(&node0.run_id()).await;

    let cfg = ValkeyConfig {
        virtual_address: vip.host(),
        port: vip.port(),
        nodes: vec![node0.endpoint(), node1.endpoint()],
        ..Default::default()
    };
    let client = FailoverClient::new(&cfg);

    (node0, node1, vip, client)
}

#[tokio::test]
async fn test_first_cycle_converges_on_the_vip_backend() {
    let (node0, node1, _vip, mut client) = cluster().await;

    client.run_cycle().await;

    assert_eq!(client.current_master(), node0.run_id());
    assert!(client.nodes().iter().all(|n| n.is_up()));

    // Node 0 already reported role:master, so promotion is command-free.
    assert_eq!(node0.command_count("REPLICAOF"), 0);
    assert_eq!(node0.role(), MockRole::Master);

    // Node 1 was pointed at node 0's own address and port.
    assert_eq!(
        node1.role(),
        MockRole::ReplicaOf(node0.host(), node0.port())
    );
}

#[tokio::test]
async fn test_steady_state_issues_no_further_commands() {
    let (node0, node1, _vip, mut client) = cluster().await;

    client.run_cycle().await;
    let node0_infos = node0.command_count("INFO replication");
    let node1_replicaofs = node1.command_count("REPLICAOF");

    client.run_cycle().await;
    client.run_cycle().await;

    // The role cache holds within its TTL, so only PINGs flow.
    assert_eq!(node0.command_count("INFO replication"), node0_infos);
    assert_eq!(node1.command_count("REPLICAOF"), node1_replicaofs);
    assert_eq!(node1.command_count("INFO replication"), 1);
}

#[tokio::test]
async fn test_vip_failover_promotes_the_new_backend() {
    let (node0, node1, vip, mut client) = cluster().await;
    client.run_cycle().await;

    // The master dies and the balancer routes the VIP to node 1.
    node0.kill();
    vip.set_run_id(&node1.run_id());

    client.run_cycle().await;

    assert_eq!(client.current_master(), node1.run_id());
    assert!(node1.commands().contains(&"REPLICAOF NO ONE".to_string()));
    assert_eq!(node1.role(), MockRole::Master);

    let old_master = &client.nodes()[0];
    assert!(!old_master.is_up());
    assert!(!old_master.is_connected());
}

#[tokio::test]
async fn test_recovered_node_rejoins_as_replica() {
    let (mut node0, node1, vip, mut client) = cluster().await;
    client.run_cycle().await;

    node0.kill();
    vip.set_run_id(&node1.run_id());
    client.run_cycle().await;

    // Node 0 comes back (same run_id) while the VIP stays on node 1.
    node0.restart("run-id-node0").await;
    client.run_cycle().await;

    let rejoined = &client.nodes()[0];
    assert!(rejoined.is_up());
    assert_eq!(
        node0.role(),
        MockRole::ReplicaOf(node1.host(), node1.port())
    );
    assert!(
        node0
            .commands()
            .contains(&format!("REPLICAOF {} {}", node1.host(), node1.port()))
    );
}

#[tokio::test]
async fn test_unreachable_vip_skips_the_cycle() {
    let (node0, node1, mut vip, mut client) = cluster().await;
    client.run_cycle().await;
    assert_eq!(client.current_master(), node0.run_id());

    let vip_run_id = vip.run_id();
    vip.kill();
    client.run_cycle().await;

    // No topology change happened.
    assert_eq!(client.current_master(), node0.run_id());
    assert_eq!(node1.role(), MockRole::ReplicaOf(node0.host(), node0.port()));

    vip.restart(&vip_run_id).await;
    client.run_cycle().await;
    assert_eq!(client.current_master(), node0.run_id());
}

#[tokio::test]
async fn test_unknown_run_id_skips_role_assertion() {
    let (node0, node1, vip, mut client) = cluster().await;
    client.run_cycle().await;

    // The VIP reports a backend this daemon does not manage.
    vip.set_run_id("run-id-of-a-stranger");
    let replicaofs_before = node1.command_count("REPLICAOF");
    client.run_cycle().await;

    assert_eq!(
        client.current_master(),
        node0.run_id(),
        "the master pointer is not updated for an unknown run_id"
    );
    assert_eq!(node1.command_count("REPLICAOF"), replicaofs_before);

    // Once the VIP points at a managed backend again, the loop recovers.
    vip.set_run_id(&node0.run_id());
    client.run_cycle().await;
    assert_eq!(client.current_master(), node0.run_id());
}

#[tokio::test]
async fn test_node_down_at_startup_is_skipped() {
    let (node0, node1, _vip, mut client) = cluster().await;

    // Node 1 is unreachable during the first convergence.
    node1.kill();
    client.run_cycle().await;

    assert_eq!(client.current_master(), node0.run_id());
    assert!(!client.nodes()[1].is_up());
    assert_eq!(
        node1.command_count("REPLICAOF"),
        0,
        "a down node is skipped, not failed"
    );
}
