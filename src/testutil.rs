//! In-memory cluster model implementing [`TopologyClient`] for tests.
//!
//! The model applies control commands to shared state the way a healthy
//! cluster would: ownership handoffs take effect immediately, forgotten
//! nodes vanish from every view, shut-down nodes stop answering. Every
//! command is logged so tests can assert on exactly what was sent.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use crate::client::command::{ControlCommand, ControlReply, SlotStateChange};
use crate::client::types::{
    ClusterNode, ClusterNodesView, FailState, LinkState, NodeAddr, NodeFlags, OpenSlot,
    OpenSlotKind, SlotRange,
};
use crate::client::TopologyClient;
use crate::error::TribError;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
struct MockNode {
    id: String,
    addr: NodeAddr,
    is_master: bool,
    master_id: Option<String>,
    /// Whether this node has joined the cluster (seen via gossip).
    joined: bool,
    reachable: bool,
    fail: FailState,
    slots: BTreeSet<u16>,
    importing: BTreeMap<u16, String>,
    migrating: BTreeMap<u16, String>,
    /// Key count per slot, decremented by MIGRATE.
    keys: BTreeMap<u16, u64>,
    /// Scripted COUNTKEYSINSLOT replies, consumed before the real count.
    count_overrides: BTreeMap<u16, VecDeque<u64>>,
}

impl MockNode {
    fn new(id: &str, addr: &str) -> Self {
        Self {
            id: id.to_string(),
            addr: addr.parse().unwrap_or_else(|_| panic!("bad addr {addr}")),
            is_master: true,
            master_id: None,
            joined: true,
            reachable: true,
            fail: FailState::None,
            slots: BTreeSet::new(),
            importing: BTreeMap::new(),
            migrating: BTreeMap::new(),
            keys: BTreeMap::new(),
            count_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
struct MockState {
    nodes: Vec<MockNode>,
    log: Vec<(NodeAddr, ControlCommand)>,
}

impl MockState {
    fn node(&self, id: &str) -> Option<&MockNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut MockNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    fn node_by_addr_mut(&mut self, addr: &NodeAddr) -> Option<&mut MockNode> {
        self.nodes.iter_mut().find(|n| &n.addr == addr)
    }
}

/// An in-memory cluster that reacts to control commands.
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<MockState>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a joined master owning the given slots.
    pub fn add_master(&self, id: &str, addr: &str, slots: impl IntoIterator<Item = u16>) {
        let mut node = MockNode::new(id, addr);
        node.slots = slots.into_iter().collect();
        self.lock().nodes.push(node);
    }

    /// Add a joined replica of the given master.
    pub fn add_replica(&self, id: &str, addr: &str, master_id: &str) {
        let mut node = MockNode::new(id, addr);
        node.is_master = false;
        node.master_id = Some(master_id.to_string());
        self.lock().nodes.push(node);
    }

    /// Add an empty master that has not yet joined (needs CLUSTER MEET).
    pub fn add_standalone(&self, id: &str, addr: &str) {
        let mut node = MockNode::new(id, addr);
        node.joined = false;
        self.lock().nodes.push(node);
    }

    /// Seed a slot on a node with keys for migration tests.
    pub fn set_keys(&self, id: &str, slot: u16, count: u64) {
        let mut state = self.lock();
        let node = state.node_mut(id).unwrap_or_else(|| panic!("no node {id}"));
        node.keys.insert(slot, count);
    }

    /// Queue key counts for a slot, served before the real count. Models a
    /// count racing key expiry: the slot reports keys that are gone by the
    /// time they are fetched.
    pub fn script_key_counts(&self, id: &str, slot: u16, counts: impl IntoIterator<Item = u64>) {
        let mut state = self.lock();
        let node = state.node_mut(id).unwrap_or_else(|| panic!("no node {id}"));
        node.count_overrides.entry(slot).or_default().extend(counts);
    }

    /// Leave a stale migrating marker on a node, as an interrupted reshard
    /// would.
    pub fn mark_migrating(&self, id: &str, slot: u16, peer: &str) {
        let mut state = self.lock();
        let node = state.node_mut(id).unwrap_or_else(|| panic!("no node {id}"));
        node.migrating.insert(slot, peer.to_string());
    }

    /// Leave a stale importing marker on a node.
    pub fn mark_importing(&self, id: &str, slot: u16, peer: &str) {
        let mut state = self.lock();
        let node = state.node_mut(id).unwrap_or_else(|| panic!("no node {id}"));
        node.importing.insert(slot, peer.to_string());
    }

    /// Mark a node as agreed-failed by the cluster.
    pub fn mark_failed(&self, id: &str) {
        let mut state = self.lock();
        if let Some(node) = state.node_mut(id) {
            node.fail = FailState::Fail;
            node.reachable = false;
        }
    }

    /// Make a node stop answering without any fail flag.
    pub fn set_unreachable(&self, id: &str) {
        let mut state = self.lock();
        if let Some(node) = state.node_mut(id) {
            node.reachable = false;
        }
    }

    pub fn log(&self) -> Vec<(NodeAddr, ControlCommand)> {
        self.lock().log.clone()
    }

    /// How many logged commands carry the given protocol name.
    pub fn sent_count(&self, name: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|(_, c)| c.name() == name)
            .count()
    }

    pub fn slots_of(&self, id: &str) -> Vec<u16> {
        self.lock()
            .node(id)
            .map(|n| n.slots.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn keys_in(&self, id: &str, slot: u16) -> u64 {
        self.lock()
            .node(id)
            .and_then(|n| n.keys.get(&slot).copied())
            .unwrap_or(0)
    }

    /// Whether the node is currently part of the cluster roster.
    pub fn is_member(&self, id: &str) -> bool {
        self.lock().node(id).is_some_and(|n| n.joined)
    }

    pub fn is_master(&self, id: &str) -> bool {
        self.lock().node(id).is_some_and(|n| n.is_master)
    }

    pub fn master_of(&self, id: &str) -> Option<String> {
        self.lock().node(id).and_then(|n| n.master_id.clone())
    }

    pub fn is_reachable(&self, id: &str) -> bool {
        self.lock().node(id).is_some_and(|n| n.reachable)
    }

    pub fn open_marker_count(&self) -> usize {
        let state = self.lock();
        state
            .nodes
            .iter()
            .map(|n| n.importing.len() + n.migrating.len())
            .sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn render_node(node: &MockNode, myself: bool) -> ClusterNode {
        let slots: Vec<u16> = node.slots.iter().copied().collect();
        let mut open_slots: Vec<OpenSlot> = node
            .importing
            .iter()
            .map(|(&slot, peer)| OpenSlot {
                slot,
                kind: OpenSlotKind::Importing,
                peer: peer.clone(),
            })
            .collect();
        open_slots.extend(node.migrating.iter().map(|(&slot, peer)| OpenSlot {
            slot,
            kind: OpenSlotKind::Migrating,
            peer: peer.clone(),
        }));

        ClusterNode {
            node_id: node.id.clone(),
            addr: node.addr.clone(),
            cluster_bus_port: node.addr.port + 10000,
            flags: NodeFlags {
                myself,
                master: node.is_master,
                replica: !node.is_master,
                pfail: node.fail == FailState::PossibleFail,
                fail: node.fail == FailState::Fail,
                handshake: false,
                noaddr: false,
            },
            master_id: node.master_id.clone(),
            config_epoch: 0,
            link_state: if node.reachable {
                LinkState::Connected
            } else {
                LinkState::Disconnected
            },
            slots: SlotRange::compress(&slots),
            open_slots,
        }
    }

    fn apply(
        state: &mut MockState,
        addr: &NodeAddr,
        command: ControlCommand,
    ) -> Result<ControlReply, TribError> {
        let receiver_id = {
            let Some(node) = state.node_by_addr_mut(addr) else {
                return Err(TribError::NodeUnreachable {
                    address: addr.clone(),
                    reason: "no such node".into(),
                });
            };
            if !node.reachable {
                return Err(TribError::NodeUnreachable {
                    address: addr.clone(),
                    reason: "connection refused".into(),
                });
            }
            node.id.clone()
        };

        match command {
            ControlCommand::AssignSlots(slots) => {
                let node = state.node_mut(&receiver_id).unwrap();
                node.slots.extend(slots);
                Ok(ControlReply::Done)
            }
            ControlCommand::UnassignSlot(slot) => {
                let node = state.node_mut(&receiver_id).unwrap();
                node.slots.remove(&slot);
                Ok(ControlReply::Done)
            }
            ControlCommand::SetSlotState { slot, state: change } => {
                match change {
                    SlotStateChange::Stable => {
                        let node = state.node_mut(&receiver_id).unwrap();
                        node.importing.remove(&slot);
                        node.migrating.remove(&slot);
                    }
                    SlotStateChange::MigratingTo(peer) => {
                        let node = state.node_mut(&receiver_id).unwrap();
                        if !node.slots.contains(&slot) {
                            return Err(TribError::CommandRejected {
                                address: addr.clone(),
                                command: "CLUSTER SETSLOT",
                                reason: format!("not the owner of slot {slot}"),
                            });
                        }
                        node.migrating.insert(slot, peer);
                    }
                    SlotStateChange::ImportingFrom(peer) => {
                        let node = state.node_mut(&receiver_id).unwrap();
                        node.importing.insert(slot, peer);
                    }
                    SlotStateChange::OwnedBy(new_owner) => {
                        // Ownership handoffs propagate instantly in the model.
                        for node in &mut state.nodes {
                            node.importing.remove(&slot);
                            node.migrating.remove(&slot);
                            if node.id != new_owner {
                                node.slots.remove(&slot);
                            }
                        }
                        if let Some(owner) = state.node_mut(&new_owner) {
                            owner.slots.insert(slot);
                        }
                    }
                }
                Ok(ControlReply::Done)
            }
            ControlCommand::Meet(peer) => {
                for node in &mut state.nodes {
                    if node.addr == peer || node.id == receiver_id {
                        node.joined = true;
                    }
                }
                Ok(ControlReply::Done)
            }
            ControlCommand::ReplicateOf(master_id) => {
                if state.node(&master_id).is_none() {
                    return Err(TribError::CommandRejected {
                        address: addr.clone(),
                        command: "CLUSTER REPLICATE",
                        reason: format!("unknown master {master_id}"),
                    });
                }
                let node = state.node_mut(&receiver_id).unwrap();
                node.is_master = false;
                node.master_id = Some(master_id);
                node.slots.clear();
                Ok(ControlReply::Done)
            }
            ControlCommand::Forget(node_id) => {
                // The forgotten node drops out of the roster but its
                // process keeps running.
                if let Some(node) = state.node_mut(&node_id) {
                    node.joined = false;
                }
                Ok(ControlReply::Done)
            }
            ControlCommand::Failover => {
                let Some(master_id) = state.node(&receiver_id).and_then(|n| n.master_id.clone())
                else {
                    return Err(TribError::CommandRejected {
                        address: addr.clone(),
                        command: "CLUSTER FAILOVER",
                        reason: "not a replica".into(),
                    });
                };
                let (slots, keys) = state
                    .node_mut(&master_id)
                    .map(|old| {
                        old.is_master = false;
                        old.master_id = Some(receiver_id.clone());
                        (std::mem::take(&mut old.slots), std::mem::take(&mut old.keys))
                    })
                    .unwrap_or_default();
                let node = state.node_mut(&receiver_id).unwrap();
                node.is_master = true;
                node.master_id = None;
                node.slots = slots;
                node.keys = keys;
                for other in &mut state.nodes {
                    if other.id != receiver_id && other.master_id.as_deref() == Some(&master_id) {
                        other.master_id = Some(receiver_id.clone());
                    }
                }
                Ok(ControlReply::Done)
            }
            ControlCommand::Shutdown => {
                let node = state.node_mut(&receiver_id).unwrap();
                node.reachable = false;
                Ok(ControlReply::Done)
            }
            ControlCommand::CountKeysInSlot(slot) => {
                let node = state.node_mut(&receiver_id).unwrap();
                if let Some(queue) = node.count_overrides.get_mut(&slot)
                    && let Some(count) = queue.pop_front()
                {
                    return Ok(ControlReply::KeyCount(count));
                }
                Ok(ControlReply::KeyCount(
                    node.keys.get(&slot).copied().unwrap_or(0),
                ))
            }
            ControlCommand::GetKeysInSlot { slot, count } => {
                let node = state.node_mut(&receiver_id).unwrap();
                let remaining = node.keys.get(&slot).copied().unwrap_or(0);
                let n = remaining.min(count);
                let keys = (0..n).map(|i| format!("{slot}:{i}")).collect();
                Ok(ControlReply::Keys(keys))
            }
            ControlCommand::MigrateKeys { keys, .. } => {
                // Key names carry the slot as "{slot}:{i}".
                let Some(slot) = keys
                    .first()
                    .and_then(|k| k.split_once(':'))
                    .and_then(|(s, _)| s.parse::<u16>().ok())
                else {
                    return Ok(ControlReply::Done);
                };
                let moved = keys.len() as u64;
                let node = state.node_mut(&receiver_id).unwrap();
                let remaining = node.keys.entry(slot).or_insert(0);
                *remaining = remaining.saturating_sub(moved);
                Ok(ControlReply::Done)
            }
        }
    }
}

impl TopologyClient for MockCluster {
    async fn fetch_node_state(&self, addr: &NodeAddr) -> Result<ClusterNodesView, TribError> {
        let state = self.lock();
        let Some(myself) = state.nodes.iter().find(|n| &n.addr == addr) else {
            return Err(TribError::NodeUnreachable {
                address: addr.clone(),
                reason: "no such node".into(),
            });
        };
        if !myself.reachable {
            return Err(TribError::NodeUnreachable {
                address: addr.clone(),
                reason: "connection refused".into(),
            });
        }

        // A standalone node only sees itself; joined nodes see the roster.
        let nodes = if myself.joined {
            state
                .nodes
                .iter()
                .filter(|n| n.joined)
                .map(|n| Self::render_node(n, n.id == myself.id))
                .collect()
        } else {
            vec![Self::render_node(myself, true)]
        };
        Ok(ClusterNodesView { nodes })
    }

    async fn send(
        &self,
        addr: &NodeAddr,
        command: ControlCommand,
    ) -> Result<ControlReply, TribError> {
        let mut state = self.lock();
        state.log.push((addr.clone(), command.clone()));
        Self::apply(&mut state, addr, command)
    }
}
