// src/core/failover/mod.rs

//! The reconciliation loop that keeps a group of Valkey nodes aligned with
//! the backend addressed by the virtual IP.
//!
//! The loop never elects anything. The external load balancer already health
//! checks the backends and exposes exactly one of them through the virtual
//! address; each cycle observes which backend that is and converges the
//! replication topology to match.

use crate::config::ValkeyConfig;
use crate::core::VigilError;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

pub mod client;
pub mod fanout;
pub mod info;
pub mod node;

use self::client::{ConnectOptions, ValkeyClient};
use self::fanout::fan_out;
use self::info::{KEY_RUN_ID, parse_value, split_host_port};
use self::node::{Node, NodeId};

/// Pause between reconciliation cycles.
const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Deadline for the probe and role-assertion fan-outs, and for the query of
/// the virtual address.
const PHASE_TIMEOUT: Duration = Duration::from_secs(1);

/// The long-running reconciler. Owns every node record; loop-level state is
/// mutated between fan-out phases only.
pub struct FailoverClient {
    options: ConnectOptions,
    nodes: Vec<Node>,
    virtual_address: String,
    port: u16,
    current_master: String,
    master_id: Option<NodeId>,
}

impl FailoverClient {
    /// Builds the client and its node records from the configuration.
    pub fn new(cfg: &ValkeyConfig) -> Self {
        let options = ConnectOptions {
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            tls: cfg.tls,
        };

        let nodes = cfg
            .nodes
            .iter()
            .map(|address| {
                let (host, port) = split_host_port(address, cfg.port);
                Node::new(host, port)
            })
            .collect();

        Self {
            options,
            nodes,
            virtual_address: cfg.virtual_address.clone(),
            port: cfg.port,
            current_master: String::new(),
            master_id: None,
        }
    }

    /// Runs reconciliation cycles once per second until a shutdown signal
    /// arrives during the tick wait. An in-progress cycle always finishes.
    pub async fn run(&mut self) {
        let mut shutdown = std::pin::pin!(shutdown_signal());

        info!("Starting failover client");
        let mut first_time = true;
        loop {
            if first_time {
                first_time = false;
            } else {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        info!("Shutting down failover client");
                        break;
                    }
                    _ = time::sleep(TICK_INTERVAL) => {}
                }
            }

            self.run_cycle().await;
        }

        self.close();
    }

    /// One reconciliation pass: probe every node, read the master identity
    /// through the virtual address, and assert the matching roles.
    pub async fn run_cycle(&mut self) {
        self.probe_nodes().await;

        let observed_master = match self.query_virtual_address().await {
            Ok(run_id) => run_id,
            Err(e) => {
                error!(
                    addr = %self.virtual_address,
                    error = %e,
                    "Failed to retrieve master identity from virtual address"
                );
                return;
            }
        };

        if observed_master != self.current_master && !self.resolve_master(observed_master) {
            return;
        }

        self.assert_roles().await;
    }

    /// Fans out across all nodes, reconnecting the disconnected ones and
    /// health checking the rest.
    async fn probe_nodes(&mut self) {
        let options = self.options.clone();
        self.nodes = fan_out(
            std::mem::take(&mut self.nodes),
            PHASE_TIMEOUT,
            |deadline, mut node| {
                let options = options.clone();
                async move {
                    if node.is_connected() {
                        node.ping(deadline).await;
                    } else if let Err(e) = node.connect(deadline, &options).await {
                        if node.up {
                            warn!(node = %node.address, error = %e, "Failed to connect to node");
                            node.up = false;
                        } else {
                            debug!(node = %node.address, error = %e, "Failed to connect to node");
                        }
                    }
                    node
                }
            },
        )
        .await;
    }

    /// Opens a fresh connection to the virtual address and reads the `run_id`
    /// of whichever backend answered. The connection is dropped right after;
    /// the balancer may route the next cycle elsewhere.
    async fn query_virtual_address(&self) -> Result<String, VigilError> {
        let deadline = Instant::now() + PHASE_TIMEOUT;
        let mut client =
            ValkeyClient::connect(deadline, &self.virtual_address, self.port, &self.options)
                .await?;
        let info_str = client.info(deadline, "server").await?;

        let run_id = parse_value(&info_str, KEY_RUN_ID);
        if run_id.is_empty() {
            return Err(VigilError::MissingInfoKey(KEY_RUN_ID.to_string()));
        }
        Ok(run_id.to_string())
    }

    /// Points the loop at the node whose `run_id` matches the identity just
    /// observed through the virtual address. Returns false when no node
    /// matches; the cluster is in a transient state and a later cycle will
    /// resolve it.
    fn resolve_master(&mut self, observed_master: String) -> bool {
        let found = self
            .nodes
            .iter()
            .find(|node| node.run_id == observed_master)
            .map(Node::id);

        match found {
            Some(master_id) => {
                info!(
                    addr = %master_id,
                    run_id = %observed_master,
                    "Failing over to new master"
                );
                self.current_master = observed_master;
                self.master_id = Some(master_id);
                true
            }
            None => {
                error!(
                    run_id = %observed_master,
                    "Could not find the current master's address"
                );
                false
            }
        }
    }

    /// Fans out the role commands: the node matching the current master
    /// `run_id` is promoted, every other node is pointed at it.
    async fn assert_roles(&mut self) {
        let Some(master_id) = self.master_id.clone() else {
            return;
        };
        let current_master = self.current_master.clone();

        self.nodes = fan_out(
            std::mem::take(&mut self.nodes),
            PHASE_TIMEOUT,
            |deadline, mut node| {
                let master_id = master_id.clone();
                let is_master = node.run_id == current_master;
                async move {
                    if is_master {
                        if let Err(e) = node.become_master(deadline).await {
                            error!(node = %node.address, error = %e, "Failed to update node to master");
                        }
                    } else if let Err(e) = node.become_replica_of(deadline, &master_id).await {
                        error!(node = %node.address, error = %e, "Failed to update node to replica");
                    }
                    node
                }
            },
        )
        .await;
    }

    /// Drops every node connection.
    pub fn close(&mut self) {
        for node in &mut self.nodes {
            node.close();
        }
    }

    /// `run_id` of the master currently converged on; empty until the first
    /// successful observation through the virtual address.
    pub fn current_master(&self) -> &str {
        &self.current_master
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

/// Waits for a shutdown signal based on the operating system.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to create Ctrl+C stream");
}
