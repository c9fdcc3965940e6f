// src/core/failover/fanout.rs

//! Runs a per-node operation across every node concurrently under a shared
//! deadline.

use super::node::Node;
use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Invokes `f` exactly once per node and drives all resulting futures
/// concurrently, waiting for every one of them to finish. All invocations
/// receive the same absolute deadline, computed once from `timeout`;
/// operations bound their own I/O with it and record their outcome on the
/// node they were given.
///
/// Each future owns its node for the duration of the call, so per-node state
/// needs no further synchronization. The nodes are returned in their original
/// order.
pub async fn fan_out<F, Fut>(nodes: Vec<Node>, timeout: Duration, mut f: F) -> Vec<Node>
where
    F: FnMut(Instant, Node) -> Fut,
    Fut: Future<Output = Node>,
{
    let deadline = Instant::now() + timeout;
    join_all(nodes.into_iter().map(|node| f(deadline, node))).await
}
