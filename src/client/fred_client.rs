//! Production [`TopologyClient`] backed by the fred crate.
//!
//! Every target node gets its own centralized (non-clustered) connection:
//! control commands must land on a specific node, not wherever the cluster
//! router sends them. Connections are cached per address and dropped when a
//! transport error suggests the node went away.
//!
//! `CLUSTER SETSLOT` with node-id arguments, `MIGRATE ... KEYS`, and
//! `SHUTDOWN` go through fred's custom-command escape hatch; fred's typed
//! setslot variants do not carry the node-id parameter.

use std::collections::HashMap;

use fred::error::{Error, ErrorKind};
use fred::prelude::*;
use fred::types::{ClusterHash, CustomCommand, Value};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::client::command::{ControlCommand, ControlReply, SlotStateChange};
use crate::client::types::{ClusterNodesView, NodeAddr};
use crate::client::TopologyClient;
use crate::config::TribConfig;
use crate::error::TribError;

/// Fred-backed topology client with per-node connection caching.
pub struct FredTopologyClient {
    config: TribConfig,
    connections: Mutex<HashMap<NodeAddr, Client>>,
}

impl FredTopologyClient {
    pub fn new(config: TribConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Get a cached connection to `addr`, dialing a new one if needed.
    async fn connection(&self, addr: &NodeAddr) -> Result<Client, TribError> {
        let mut cache = self.connections.lock().await;
        if let Some(client) = cache.get(addr)
            && client.is_connected()
        {
            return Ok(client.clone());
        }

        let server_config = ServerConfig::Centralized {
            server: Server::new(addr.host.clone(), addr.port),
        };
        let fred_config = Config {
            server: server_config,
            ..Default::default()
        };

        let command_timeout = self.config.command_timeout;
        let connection_timeout = self.config.connection_timeout;
        let client = Builder::from_config(fred_config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = command_timeout;
            })
            .with_connection_config(|conn| {
                conn.connection_timeout = connection_timeout;
            })
            .build()
            .map_err(|e| map_fred_error(addr, "CONNECT", e))?;

        debug!(node = %addr, "Connecting to node");
        match tokio::time::timeout(connection_timeout, client.init()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(map_fred_error(addr, "CONNECT", e)),
            Err(_) => {
                return Err(TribError::NodeUnreachable {
                    address: addr.clone(),
                    reason: format!("connect timed out after {connection_timeout:?}"),
                });
            }
        }

        cache.insert(addr.clone(), client.clone());
        Ok(client)
    }

    /// Drop a cached connection after a transport failure.
    async fn evict(&self, addr: &NodeAddr) {
        if let Some(client) = self.connections.lock().await.remove(addr) {
            let _ = client.quit().await;
        }
    }

    async fn run_command(
        &self,
        addr: &NodeAddr,
        command: ControlCommand,
    ) -> Result<ControlReply, TribError> {
        let client = self.connection(addr).await?;
        let name = command.name();

        let result = match command {
            ControlCommand::AssignSlots(slots) => client
                .cluster_add_slots(slots)
                .await
                .map(|()| ControlReply::Done),
            ControlCommand::UnassignSlot(slot) => client
                .cluster_del_slots(vec![slot])
                .await
                .map(|()| ControlReply::Done),
            ControlCommand::SetSlotState { slot, state } => {
                let mut args = vec!["SETSLOT".to_string(), slot.to_string()];
                match state {
                    SlotStateChange::Stable => args.push("STABLE".to_string()),
                    SlotStateChange::MigratingTo(id) => {
                        args.push("MIGRATING".to_string());
                        args.push(id);
                    }
                    SlotStateChange::ImportingFrom(id) => {
                        args.push("IMPORTING".to_string());
                        args.push(id);
                    }
                    SlotStateChange::OwnedBy(id) => {
                        args.push("NODE".to_string());
                        args.push(id);
                    }
                }
                let cmd = CustomCommand::new_static("CLUSTER", ClusterHash::Random, false);
                client
                    .custom::<Value, String>(cmd, args)
                    .await
                    .map(|_| ControlReply::Done)
            }
            ControlCommand::Meet(peer) => client
                .cluster_meet(peer.host.as_str(), peer.port)
                .await
                .map(|()| ControlReply::Done),
            ControlCommand::ReplicateOf(master_id) => client
                .cluster_replicate(master_id)
                .await
                .map(|()| ControlReply::Done),
            ControlCommand::Forget(node_id) => client
                .cluster_forget(node_id)
                .await
                .map(|()| ControlReply::Done),
            ControlCommand::Failover => client
                .cluster_failover(None)
                .await
                .map(|()| ControlReply::Done),
            ControlCommand::Shutdown => {
                let cmd = CustomCommand::new_static("SHUTDOWN", ClusterHash::Random, false);
                match client
                    .custom::<Value, String>(cmd, vec!["NOSAVE".to_string()])
                    .await
                {
                    Ok(_) => Ok(ControlReply::Done),
                    // The node drops the connection while dying, which is
                    // the expected outcome of SHUTDOWN.
                    Err(e) if is_transport_error(&e) => {
                        debug!(node = %addr, "Connection closed by shutdown");
                        Ok(ControlReply::Done)
                    }
                    Err(e) => Err(e),
                }
            }
            ControlCommand::CountKeysInSlot(slot) => client
                .cluster_count_keys_in_slot(slot)
                .await
                .map(ControlReply::KeyCount),
            ControlCommand::GetKeysInSlot { slot, count } => client
                .cluster_get_keys_in_slot(slot, count)
                .await
                .map(ControlReply::Keys),
            ControlCommand::MigrateKeys {
                dest,
                keys,
                timeout,
            } => {
                if keys.is_empty() {
                    return Ok(ControlReply::Done);
                }
                // MIGRATE host port "" 0 timeout REPLACE KEYS k1 k2 ...
                // REPLACE tolerates keys that already landed on the target
                // from an interrupted earlier attempt.
                let mut args = vec![
                    dest.host.clone(),
                    dest.port.to_string(),
                    String::new(),
                    "0".to_string(),
                    timeout.as_millis().to_string(),
                    "REPLACE".to_string(),
                    "KEYS".to_string(),
                ];
                args.extend(keys);
                let cmd = CustomCommand::new_static("MIGRATE", ClusterHash::Random, false);
                client
                    .custom::<Value, String>(cmd, args)
                    .await
                    .map(|_| ControlReply::Done)
            }
        };

        match result {
            Ok(reply) => Ok(reply),
            Err(e) => {
                if is_transport_error(&e) {
                    self.evict(addr).await;
                }
                Err(map_fred_error(addr, name, e))
            }
        }
    }

    /// Close all cached connections.
    pub async fn close(&self) {
        let mut cache = self.connections.lock().await;
        for (addr, client) in cache.drain() {
            debug!(node = %addr, "Closing connection");
            let _ = client.quit().await;
        }
    }
}

impl TopologyClient for FredTopologyClient {
    #[instrument(skip(self), fields(node = %addr))]
    async fn fetch_node_state(&self, addr: &NodeAddr) -> Result<ClusterNodesView, TribError> {
        let client = self.connection(addr).await?;
        let raw: String = match client.cluster_nodes().await {
            Ok(raw) => raw,
            Err(e) => {
                if is_transport_error(&e) {
                    self.evict(addr).await;
                }
                return Err(map_fred_error(addr, "CLUSTER NODES", e));
            }
        };
        ClusterNodesView::parse(&raw).map_err(|e| TribError::Protocol {
            address: addr.clone(),
            detail: e.to_string(),
        })
    }

    #[instrument(skip(self, command), fields(node = %addr, command = command.name()))]
    async fn send(
        &self,
        addr: &NodeAddr,
        command: ControlCommand,
    ) -> Result<ControlReply, TribError> {
        let reply = self.run_command(addr, command).await;
        if let Err(e) = &reply {
            warn!(node = %addr, error = %e, "Control command failed");
        }
        reply
    }
}

/// Whether the error means the node could not be reached at all.
fn is_transport_error(e: &Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::IO | ErrorKind::Timeout | ErrorKind::Canceled
    )
}

/// Map a fred error into the orchestrator taxonomy.
fn map_fred_error(addr: &NodeAddr, command: &'static str, e: Error) -> TribError {
    match e.kind() {
        ErrorKind::IO | ErrorKind::Timeout | ErrorKind::Canceled => TribError::NodeUnreachable {
            address: addr.clone(),
            reason: e.to_string(),
        },
        ErrorKind::Protocol | ErrorKind::Parse => TribError::Protocol {
            address: addr.clone(),
            detail: e.to_string(),
        },
        _ => TribError::CommandRejected {
            address: addr.clone(),
            command,
            reason: e.to_string(),
        },
    }
}
