//! Node lifecycle operations: cluster creation, membership, role changes,
//! and resharding entry points.
//!
//! Every operation validates against a fresh topology read before mutating
//! anything, and fails before the first mutation whenever validation can
//! catch the problem.

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::client::command::{ControlCommand, SlotStateChange};
use crate::client::types::{ClusterNodesView, NodeAddr, TOTAL_SLOTS};
use crate::client::TopologyClient;
use crate::config::TribConfig;
use crate::error::{NodeId, TribError};
use crate::slots::allocator::{plan_move_count, CreateClusterParam, MigrationPlan, SlotMove};
use crate::slots::migration::{MigrationCoordinator, MigrationReport};
use crate::topology::ClusterTopology;

/// Which masters give up slots in a count-based reshard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelector {
    /// Drain proportionally from every master except the target.
    AllMasters,
    /// Drain only from the named masters.
    Nodes(Vec<NodeId>),
}

/// How a node leaves the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// The node is alive: refuse if it still owns slots, then make the rest
    /// of the cluster forget it, optionally shutting the process down.
    Graceful { shutdown: bool },
    /// The node is already dead: skip the slot check and the shutdown,
    /// just scrub it from every roster.
    Failed,
}

/// Executes membership and role changes against live nodes.
pub struct NodeLifecycleManager<'a, C: TopologyClient> {
    client: &'a C,
    config: &'a TribConfig,
}

impl<'a, C: TopologyClient> NodeLifecycleManager<'a, C> {
    pub fn new(client: &'a C, config: &'a TribConfig) -> Self {
        Self { client, config }
    }

    /// Bootstrap a cluster from standalone empty nodes.
    ///
    /// Joins all nodes, assigns each master its slot range, waits for the
    /// roster to converge, then attaches replicas.
    #[instrument(skip(self, params), fields(masters = params.len()))]
    pub async fn create_cluster(&self, params: &[CreateClusterParam]) -> Result<(), TribError> {
        validate_create_params(params)?;

        let entry = &params[0].master;
        let all_addrs: Vec<&NodeAddr> = params
            .iter()
            .flat_map(|p| std::iter::once(&p.master).chain(p.replicas.iter()))
            .collect();

        // Full-mesh handshake: every node meets every other node directly,
        // so the roster does not depend on gossip propagation order.
        for (i, from) in all_addrs.iter().enumerate() {
            for (j, to) in all_addrs.iter().enumerate() {
                if i == j {
                    continue;
                }
                self.client
                    .send(from, ControlCommand::Meet((*to).clone()))
                    .await?;
            }
        }

        for param in params {
            let slots: Vec<u16> = param.slots.iter().collect();
            self.client
                .send(&param.master, ControlCommand::AssignSlots(slots))
                .await?;
        }

        // Wait for every node to see the full roster before attaching
        // replicas; REPLICATE rejects master ids the node has not met yet.
        let expected = all_addrs.len();
        for addr in &all_addrs {
            self.poll_view(addr, "roster convergence", |view| {
                view.nodes.len() >= expected
            })
            .await?;
        }

        for param in params {
            if param.replicas.is_empty() {
                continue;
            }
            let master_id = self.node_id_of(&param.master).await?;
            for replica in &param.replicas {
                self.client
                    .send(replica, ControlCommand::ReplicateOf(master_id.clone()))
                    .await?;
            }
        }

        let topology = self.snapshot(entry).await?;
        if topology.assigned_count() != TOTAL_SLOTS as usize {
            return Err(TribError::Protocol {
                address: entry.clone(),
                detail: format!(
                    "slot coverage incomplete after create: {} of {TOTAL_SLOTS} assigned",
                    topology.assigned_count()
                ),
            });
        }
        info!(nodes = expected, "Cluster created");
        Ok(())
    }

    /// Join an empty node to an existing cluster, optionally as a replica.
    ///
    /// Returns the new node's id.
    #[instrument(skip(self), fields(entry = %entry, new = %new))]
    pub async fn add_node(
        &self,
        entry: &NodeAddr,
        new: &NodeAddr,
        master_id: Option<&str>,
    ) -> Result<NodeId, TribError> {
        let topology = self.snapshot(entry).await?;
        if let Some(master_id) = master_id {
            let master = topology
                .node_by_id(master_id)
                .ok_or_else(|| TribError::UnknownMaster {
                    master_id: master_id.to_string(),
                })?;
            if !master.is_master() {
                return Err(TribError::UnknownMaster {
                    master_id: master_id.to_string(),
                });
            }
        }

        let new_view = self.client.fetch_node_state(new).await?;
        let new_id = match new_view.myself() {
            Some(myself) if myself.slot_count() == 0 && new_view.nodes.len() == 1 => {
                myself.node_id.clone()
            }
            _ => {
                return Err(TribError::InvalidParameter(format!(
                    "node {new} is not an empty standalone node"
                )));
            }
        };
        if topology.node_by_id(&new_id).is_some() {
            return Err(TribError::InvalidParameter(format!(
                "node {new} is already part of the cluster"
            )));
        }

        self.client
            .send(new, ControlCommand::Meet(entry.clone()))
            .await?;
        let id = new_id.clone();
        self.poll_view(entry, "node join", move |view| {
            view.node_by_id(&id).is_some()
        })
        .await?;

        if let Some(master_id) = master_id {
            self.client
                .send(new, ControlCommand::ReplicateOf(master_id.to_string()))
                .await?;
        }
        info!(node_id = %new_id, "Node added");
        Ok(new_id)
    }

    /// Turn a node into a replica of the given master.
    #[instrument(skip(self), fields(entry = %entry, node = %node_id, master = %master_id))]
    pub async fn replicate(
        &self,
        entry: &NodeAddr,
        node_id: &str,
        master_id: &str,
    ) -> Result<(), TribError> {
        let topology = self.snapshot(entry).await?;
        let master = topology
            .node_by_id(master_id)
            .ok_or_else(|| TribError::UnknownMaster {
                master_id: master_id.to_string(),
            })?;
        if !master.is_master() {
            return Err(TribError::UnknownMaster {
                master_id: master_id.to_string(),
            });
        }
        let addr = self.addr_of(&topology, node_id)?;
        if topology
            .node_by_id(node_id)
            .is_some_and(|n| n.slot_count() > 0)
        {
            return Err(TribError::NodeHasSlots {
                node_id: node_id.to_string(),
                slot_count: topology.slots_of(node_id).len(),
            });
        }
        self.client
            .send(&addr, ControlCommand::ReplicateOf(master_id.to_string()))
            .await
            .map(|_| ())
    }

    /// Remove a node from the cluster.
    #[instrument(skip(self), fields(entry = %entry, node = %node_id, ?mode))]
    pub async fn delete_node(
        &self,
        entry: &NodeAddr,
        node_id: &str,
        mode: DeleteMode,
    ) -> Result<(), TribError> {
        let topology = self.snapshot(entry).await?;
        let departing = topology
            .node_by_id(node_id)
            .ok_or_else(|| TribError::InvalidParameter(format!("node {node_id} not found")))?;
        let departing_addr = departing.addr.clone();

        if let DeleteMode::Graceful { .. } = mode {
            let slot_count = departing.slot_count();
            if slot_count > 0 {
                return Err(TribError::NodeHasSlots {
                    node_id: node_id.to_string(),
                    slot_count,
                });
            }
        }

        // Every remaining node must forget it, or gossip resurrects it.
        let forgets = topology
            .nodes
            .iter()
            .filter(|n| n.node_id != node_id)
            .map(|n| {
                let addr = n.addr.clone();
                async move {
                    let result = self
                        .client
                        .send(&addr, ControlCommand::Forget(node_id.to_string()))
                        .await;
                    (addr, result)
                }
            });
        for (addr, result) in join_all(forgets).await {
            match (result, mode) {
                (Ok(_), _) => {}
                // A dead cluster member that cannot be told to forget is
                // expected when scrubbing a failed node.
                (Err(TribError::NodeUnreachable { .. }), DeleteMode::Failed) => {
                    debug!(node = %addr, "Skipping forget on unreachable node");
                }
                (Err(e), _) => return Err(e),
            }
        }

        if let DeleteMode::Graceful { shutdown: true } = mode {
            self.client
                .send(&departing_addr, ControlCommand::Shutdown)
                .await?;
        }
        info!(node = %node_id, "Node removed");
        Ok(())
    }

    /// Promote a replica to master via manual failover.
    #[instrument(skip(self), fields(entry = %entry, node = %node_id))]
    pub async fn failover(&self, entry: &NodeAddr, node_id: &str) -> Result<(), TribError> {
        let topology = self.snapshot(entry).await?;
        let node = topology
            .node_by_id(node_id)
            .ok_or_else(|| TribError::InvalidParameter(format!("node {node_id} not found")))?;
        if !node.is_replica() {
            return Err(TribError::InvalidParameter(format!(
                "node {node_id} is a master, failover must target a replica"
            )));
        }
        self.client
            .send(&node.addr.clone(), ControlCommand::Failover)
            .await
            .map(|_| ())
    }

    /// Shut a node's process down.
    #[instrument(skip(self), fields(entry = %entry, node = %node_id))]
    pub async fn shutdown_node(&self, entry: &NodeAddr, node_id: &str) -> Result<(), TribError> {
        let topology = self.snapshot(entry).await?;
        let addr = self.addr_of(&topology, node_id)?;
        self.client
            .send(&addr, ControlCommand::Shutdown)
            .await
            .map(|_| ())
    }

    /// Move `count` slots onto the target master, drained from the selected
    /// sources.
    #[instrument(skip(self, from), fields(entry = %entry, count, target = %target))]
    pub async fn reshard_by_count(
        &self,
        entry: &NodeAddr,
        count: u16,
        from: SourceSelector,
        target: &str,
    ) -> Result<MigrationReport, TribError> {
        let topology = self.snapshot(entry).await?;
        self.require_master(&topology, target)?;

        let source_ids: Vec<NodeId> = match from {
            SourceSelector::AllMasters => topology
                .masters()
                .filter(|m| m.node_id != target)
                .map(|m| m.node_id.clone())
                .collect(),
            SourceSelector::Nodes(ids) => {
                for id in &ids {
                    self.require_master(&topology, id)?;
                    if id == target {
                        return Err(TribError::InvalidParameter(format!(
                            "target {target} cannot be a reshard source"
                        )));
                    }
                }
                ids
            }
        };

        let sources: Vec<(NodeId, Vec<u16>)> = source_ids
            .into_iter()
            .map(|id| {
                let slots = topology.slots_of(&id);
                (id, slots)
            })
            .collect();
        let plan = plan_move_count(count, &target.to_string(), &sources)?;
        self.run_plan(&topology, &plan).await
    }

    /// Move an explicit slot list onto the target master.
    ///
    /// Slots the target already owns are skipped; a slot with no current
    /// owner fails the whole request before any slot moves.
    #[instrument(skip(self, slots), fields(entry = %entry, slots = slots.len(), target = %target))]
    pub async fn reshard_by_slots(
        &self,
        entry: &NodeAddr,
        slots: &[u16],
        target: &str,
    ) -> Result<MigrationReport, TribError> {
        let topology = self.snapshot(entry).await?;
        self.require_master(&topology, target)?;

        let mut moves = Vec::with_capacity(slots.len());
        for &slot in slots {
            if slot >= TOTAL_SLOTS {
                return Err(TribError::InvalidParameter(format!(
                    "slot {slot} is out of range"
                )));
            }
            match topology.owner_of(slot) {
                None => {
                    return Err(TribError::InvalidParameter(format!(
                        "slot {slot} has no owner"
                    )));
                }
                Some(owner) if owner == target => {
                    debug!(slot, "Slot already owned by target, skipping");
                }
                Some(owner) => moves.push(SlotMove {
                    slot,
                    source: owner.clone(),
                    target: target.to_string(),
                }),
            }
        }
        self.run_plan(&topology, &MigrationPlan { moves }).await
    }

    /// Clear stray importing/migrating markers left by an interrupted
    /// reshard, after the keys have already moved.
    #[instrument(skip(self), fields(entry = %entry))]
    pub async fn settle_open_slots(&self, entry: &NodeAddr) -> Result<usize, TribError> {
        let topology = self.snapshot(entry).await?;
        let mut cleared = 0;
        for node in &topology.nodes {
            for open in &node.open_slots {
                warn!(node = %node.node_id, slot = open.slot, kind = %open.kind, "Clearing stale open slot");
                self.client
                    .send(
                        &node.addr,
                        ControlCommand::SetSlotState {
                            slot: open.slot,
                            state: SlotStateChange::Stable,
                        },
                    )
                    .await?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn run_plan(
        &self,
        topology: &ClusterTopology,
        plan: &MigrationPlan,
    ) -> Result<MigrationReport, TribError> {
        if plan.is_empty() {
            return Ok(MigrationReport::default());
        }
        let coordinator = MigrationCoordinator::new(self.client, self.config);
        coordinator.run_plan(topology, plan).await
    }

    async fn snapshot(&self, entry: &NodeAddr) -> Result<ClusterTopology, TribError> {
        let view = self.client.fetch_node_state(entry).await?;
        Ok(ClusterTopology::from_view(entry.clone(), view))
    }

    async fn node_id_of(&self, addr: &NodeAddr) -> Result<NodeId, TribError> {
        let view = self.client.fetch_node_state(addr).await?;
        view.myself()
            .map(|n| n.node_id.clone())
            .ok_or_else(|| TribError::Protocol {
                address: addr.clone(),
                detail: "node state has no myself entry".into(),
            })
    }

    fn addr_of(&self, topology: &ClusterTopology, node_id: &str) -> Result<NodeAddr, TribError> {
        topology
            .node_by_id(node_id)
            .map(|n| n.addr.clone())
            .ok_or_else(|| TribError::InvalidParameter(format!("node {node_id} not found")))
    }

    fn require_master(&self, topology: &ClusterTopology, node_id: &str) -> Result<(), TribError> {
        match topology.node_by_id(node_id) {
            Some(node) if node.is_master() => Ok(()),
            _ => Err(TribError::UnknownMaster {
                master_id: node_id.to_string(),
            }),
        }
    }

    /// Poll a node's view until `pred` holds or attempts run out.
    async fn poll_view<F>(&self, addr: &NodeAddr, what: &str, pred: F) -> Result<(), TribError>
    where
        F: Fn(&ClusterNodesView) -> bool,
    {
        for attempt in 0..self.config.join_poll_attempts {
            match self.client.fetch_node_state(addr).await {
                Ok(view) if pred(&view) => return Ok(()),
                Ok(_) => debug!(node = %addr, attempt, what, "Still waiting"),
                Err(e) => debug!(node = %addr, attempt, what, error = %e, "Poll failed"),
            }
            tokio::time::sleep(self.config.join_poll_interval).await;
        }
        Err(TribError::NodeUnreachable {
            address: addr.clone(),
            reason: format!(
                "{what} did not complete after {} polls",
                self.config.join_poll_attempts
            ),
        })
    }
}

/// Reject parameter sets that cannot form a valid cluster: no masters,
/// reused addresses, or slot ranges that overlap or leave gaps.
fn validate_create_params(params: &[CreateClusterParam]) -> Result<(), TribError> {
    if params.is_empty() {
        return Err(TribError::InsufficientNodes { masters: 0 });
    }

    let mut seen_addrs = std::collections::HashSet::new();
    for param in params {
        for addr in std::iter::once(&param.master).chain(param.replicas.iter()) {
            if !seen_addrs.insert(addr) {
                return Err(TribError::InvalidParameter(format!(
                    "address {addr} appears more than once"
                )));
            }
        }
    }

    let mut covered = vec![false; TOTAL_SLOTS as usize];
    for param in params {
        if param.slots.end >= TOTAL_SLOTS {
            return Err(TribError::InvalidParameter(format!(
                "slot range {}-{} exceeds the slot space",
                param.slots.start, param.slots.end
            )));
        }
        for slot in param.slots.iter() {
            let entry = &mut covered[slot as usize];
            if *entry {
                return Err(TribError::InvalidParameter(format!(
                    "slot {slot} assigned to more than one master"
                )));
            }
            *entry = true;
        }
    }
    if let Some(missing) = covered.iter().position(|c| !c) {
        return Err(TribError::InvalidParameter(format!(
            "slot {missing} is not assigned to any master"
        )));
    }
    Ok(())
}
