//! Immutable cluster topology snapshots.
//!
//! A [`ClusterTopology`] is reconstructed from a fresh read every time it is
//! needed and never updated in place. Topology goes stale the moment any
//! mutating operation runs; callers re-read instead of patching, which keeps
//! staleness visible instead of hidden in shared mutable state.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::client::types::{ClusterNode, ClusterNodesView, NodeAddr, OpenSlot, SlotRange};
use crate::error::NodeId;

/// A snapshot of the cluster as seen by one node at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTopology {
    /// The node whose view this snapshot reflects.
    pub observed_from: NodeAddr,
    /// When the view was fetched.
    pub observed_at: SystemTime,
    /// All nodes in the roster.
    pub nodes: Vec<ClusterNode>,
    /// Slot-to-owner mapping claimed by this view.
    slot_owner: HashMap<u16, NodeId>,
}

impl ClusterTopology {
    /// Build a snapshot from one node's view.
    pub fn from_view(observed_from: NodeAddr, view: ClusterNodesView) -> Self {
        let slot_owner = view.slot_owners();
        Self {
            observed_from,
            observed_at: SystemTime::now(),
            nodes: view.nodes,
            slot_owner,
        }
    }

    pub fn masters(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter().filter(|n| n.is_master())
    }

    pub fn replicas(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter().filter(|n| n.is_replica())
    }

    pub fn node_by_id(&self, node_id: &str) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn node_by_addr(&self, addr: &NodeAddr) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| &n.addr == addr)
    }

    /// Replicas attached to the given master.
    pub fn replicas_of(&self, master_id: &str) -> impl Iterator<Item = &ClusterNode> {
        self.nodes
            .iter()
            .filter(move |n| n.master_id.as_deref() == Some(master_id))
    }

    /// The master claiming a slot, if any.
    pub fn owner_of(&self, slot: u16) -> Option<&NodeId> {
        self.slot_owner.get(&slot)
    }

    /// Slots owned by the given node, ascending.
    pub fn slots_of(&self, node_id: &str) -> Vec<u16> {
        self.node_by_id(node_id)
            .map(|n| n.owned_slots())
            .unwrap_or_default()
    }

    /// Number of slots with a claimed owner.
    pub fn assigned_count(&self) -> usize {
        self.slot_owner.len()
    }

    /// Slots with no claimed owner, compressed to ranges.
    pub fn unassigned_ranges(&self) -> Vec<SlotRange> {
        let missing: Vec<u16> = (0..crate::client::types::TOTAL_SLOTS)
            .filter(|s| !self.slot_owner.contains_key(s))
            .collect();
        SlotRange::compress(&missing)
    }

    /// All open (importing/migrating) slots across the roster, with the
    /// node reporting each.
    pub fn open_slots(&self) -> impl Iterator<Item = (&ClusterNode, &OpenSlot)> {
        self.nodes
            .iter()
            .flat_map(|n| n.open_slots.iter().map(move |o| (n, o)))
    }

    /// True when every slot has an owner and nothing is mid-migration.
    pub fn is_settled(&self) -> bool {
        self.assigned_count() == crate::client::types::TOTAL_SLOTS as usize
            && self.open_slots().next().is_none()
    }
}
