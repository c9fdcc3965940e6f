// src/core/failover/node.rs

//! Per-backend node state: connection lifecycle, observed identity, and the
//! short-TTL role cache that suppresses redundant role commands.

use super::client::{ConnectOptions, ValkeyClient};
use super::info::{
    KEY_MASTER_HOST, KEY_MASTER_PORT, KEY_ROLE, KEY_RUN_ID, ROLE_MASTER, ROLE_REPLICA, parse_value,
};
use crate::core::VigilError;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// A stable value identity for a node, used as the `master_ref` of a role
/// cache. Compared by address and port, so a cache entry never holds a live
/// back-pointer into the node table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeId {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// The role this daemon last asserted on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

/// How long an asserted role is trusted before it is re-verified against the
/// server. Bounds how long an out-of-band topology change can go unhealed.
pub const ROLE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Memoization of the last role successfully asserted on a node.
///
/// `REPLICAOF` is idempotent but may trigger resync logic on replicas; the
/// cache reduces the steady state to one `INFO replication` per node per TTL.
#[derive(Debug, Default)]
pub struct RoleCache {
    role: Option<Role>,
    master_ref: Option<NodeId>,
    expire: Option<Instant>,
}

impl RoleCache {
    /// Records an asserted role and restarts the TTL.
    pub fn save(&mut self, role: Role, master_ref: Option<NodeId>) {
        self.role = Some(role);
        self.master_ref = master_ref;
        self.expire = Some(Instant::now() + ROLE_CACHE_TTL);
    }

    /// Empties the cache.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn live(&self) -> bool {
        self.expire.is_some_and(|expire| Instant::now() < expire)
    }

    /// True only while unexpired and the cached role is master.
    pub fn is_master(&self) -> bool {
        self.live() && self.role == Some(Role::Master)
    }

    /// True only while unexpired, the cached role is replica, and the cached
    /// master matches `target` by address and port.
    pub fn is_replica_of(&self, target: &NodeId) -> bool {
        self.live() && self.role == Some(Role::Replica) && self.master_ref.as_ref() == Some(target)
    }
}

/// One managed backend. Created once at startup; only the mutable fields
/// change for the lifetime of the process.
pub struct Node {
    pub(crate) address: String,
    pub(crate) port: u16,
    pub(crate) run_id: String,
    pub(crate) up: bool,
    pub(crate) client: Option<ValkeyClient>,
    pub(crate) role_cache: RoleCache,
}

impl Node {
    pub fn new(address: String, port: u16) -> Self {
        Self {
            address,
            port,
            run_id: String::new(),
            up: true,
            client: None,
            role_cache: RoleCache::default(),
        }
    }

    /// The node's stable identity.
    pub fn id(&self) -> NodeId {
        NodeId {
            address: self.address.clone(),
            port: self.port,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Last `run_id` read from the server; empty until the first successful
    /// connect, and only overwritten by the next one.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn role_cache(&self) -> &RoleCache {
        &self.role_cache
    }

    /// Opens a fresh connection and reads the server's `run_id`. On success
    /// the client is stored and the node marked up; on failure any half-open
    /// client is dropped and `client` stays absent.
    pub async fn connect(
        &mut self,
        deadline: Instant,
        options: &ConnectOptions,
    ) -> Result<(), VigilError> {
        let mut client = ValkeyClient::connect(deadline, &self.address, self.port, options).await?;
        let info_str = client.info(deadline, "server").await?;

        self.run_id = parse_value(&info_str, KEY_RUN_ID).to_string();
        self.client = Some(client);
        self.up = true;
        Ok(())
    }

    /// Health-checks an established connection. Any failure drops the client
    /// and empties the role cache; the next probe will reconnect.
    pub async fn ping(&mut self, deadline: Instant) {
        let Some(client) = self.client.as_mut() else {
            self.up = false;
            return;
        };

        match client.ping(deadline).await {
            Ok(()) => {
                if !self.up {
                    self.up = true;
                    info!(node = %self.address, "Node is UP");
                }
            }
            Err(e) => {
                self.client = None;
                self.role_cache.clear();
                if self.up {
                    self.up = false;
                    info!(node = %self.address, error = %e, "Node is DOWN");
                } else {
                    debug!(node = %self.address, error = %e, "Node is still down");
                }
            }
        }
    }

    /// Promotes the node to master unless the role cache or the server state
    /// shows it already is one.
    pub async fn become_master(&mut self, deadline: Instant) -> Result<(), VigilError> {
        let Some(client) = self.client.as_mut() else {
            return Err(VigilError::NotConnected);
        };

        if self.role_cache.is_master() {
            return Ok(());
        }

        let info_str = client.info(deadline, "replication").await?;
        if parse_value(&info_str, KEY_ROLE) == ROLE_MASTER {
            self.role_cache.save(Role::Master, None);
            return Ok(());
        }

        client.replicaof_no_one(deadline).await?;
        self.role_cache.save(Role::Master, None);
        Ok(())
    }

    /// Points the node at `target` unless the role cache or the server state
    /// shows it is already replicating from there. A disconnected node is
    /// skipped; it will be reconciled after its next successful reconnect.
    pub async fn become_replica_of(
        &mut self,
        deadline: Instant,
        target: &NodeId,
    ) -> Result<(), VigilError> {
        let Some(client) = self.client.as_mut() else {
            debug!(node = %self.address, "Node is not up, skipping for update");
            return Ok(());
        };

        if self.role_cache.is_replica_of(target) {
            return Ok(());
        }

        let info_str = client.info(deadline, "replication").await?;
        if parse_value(&info_str, KEY_ROLE) == ROLE_REPLICA
            && parse_value(&info_str, KEY_MASTER_HOST) == target.address
            && parse_value(&info_str, KEY_MASTER_PORT) == target.port.to_string()
        {
            self.role_cache.save(Role::Replica, Some(target.clone()));
            return Ok(());
        }

        client
            .replicaof(deadline, &target.address, target.port)
            .await?;
        self.role_cache.save(Role::Replica, Some(target.clone()));
        Ok(())
    }

    /// Drops the connection if present. Idempotent.
    pub fn close(&mut self) {
        self.client = None;
        self.role_cache.clear();
    }
}
