//! Parsed node and slot state.
//!
//! These types represent one node's view of the cluster roster and slot map,
//! parsed from the `CLUSTER NODES` wire format. A view is a snapshot taken
//! from a single node: it may be stale or inconsistent with other nodes'
//! views, and callers must tolerate that.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Total number of hash slots in the keyspace.
pub const TOTAL_SLOTS: u16 = 16384;

/// Errors raised while parsing node state.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid node line: {0}")]
    InvalidNodeLine(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid slot range: {0}")]
    InvalidSlotRange(String),
}

/// A node's network address (host and client port).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddr {
    type Err = ParseError;

    /// Parse a `host:port` string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port_str) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(ParseError::InvalidAddress(s.to_string()));
        }
        let port = port_str
            .parse()
            .map_err(|_| ParseError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// A contiguous range of hash slots, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start <= end, "start ({start}) must be <= end ({end})");
        debug_assert!(end < TOTAL_SLOTS, "end ({end}) must be < {TOTAL_SLOTS}");
        Self { start, end }
    }

    /// A range covering a single slot.
    pub fn single(slot: u16) -> Self {
        Self {
            start: slot,
            end: slot,
        }
    }

    /// Number of slots in this range.
    pub fn count(&self) -> u16 {
        self.end - self.start + 1
    }

    /// Whether the range contains the given slot.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Iterate over all slots in the range.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }

    /// Parse `"0-5460"` or `"5461"`.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        if let Some((start_str, end_str)) = s.split_once('-') {
            let start = start_str
                .parse()
                .map_err(|_| ParseError::InvalidSlotRange(s.to_string()))?;
            let end: u16 = end_str
                .parse()
                .map_err(|_| ParseError::InvalidSlotRange(s.to_string()))?;
            if start > end || end >= TOTAL_SLOTS {
                return Err(ParseError::InvalidSlotRange(s.to_string()));
            }
            Ok(SlotRange::new(start, end))
        } else {
            let slot: u16 = s
                .parse()
                .map_err(|_| ParseError::InvalidSlotRange(s.to_string()))?;
            if slot >= TOTAL_SLOTS {
                return Err(ParseError::InvalidSlotRange(s.to_string()));
            }
            Ok(SlotRange::single(slot))
        }
    }

    /// Compress a sorted, deduplicated slot list into contiguous ranges.
    pub fn compress(slots: &[u16]) -> Vec<SlotRange> {
        let mut ranges = Vec::new();
        let mut iter = slots.iter().copied();
        let Some(first) = iter.next() else {
            return ranges;
        };
        let mut start = first;
        let mut prev = first;
        for slot in iter {
            if slot != prev + 1 {
                ranges.push(SlotRange::new(start, prev));
                start = slot;
            }
            prev = slot;
        }
        ranges.push(SlotRange::new(start, prev));
        ranges
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Master,
    Replica,
}

/// Failure state of a node as seen by the reporting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailState {
    /// No failure suspected.
    None,
    /// PFAIL: suspected failed by the reporting node.
    PossibleFail,
    /// FAIL: agreed failed by the cluster.
    Fail,
}

impl fmt::Display for FailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailState::None => write!(f, "none"),
            FailState::PossibleFail => write!(f, "possible-fail"),
            FailState::Fail => write!(f, "fail"),
        }
    }
}

/// Cluster bus link state toward a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Flags from the `CLUSTER NODES` flags field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    pub myself: bool,
    pub master: bool,
    pub replica: bool,
    pub pfail: bool,
    pub fail: bool,
    pub handshake: bool,
    pub noaddr: bool,
}

impl NodeFlags {
    /// Parse the comma-separated flags field.
    pub fn parse(flags_str: &str) -> Self {
        let mut flags = NodeFlags::default();
        for flag in flags_str.split(',') {
            match flag.trim() {
                "myself" => flags.myself = true,
                "master" => flags.master = true,
                "slave" | "replica" => flags.replica = true,
                "pfail" => flags.pfail = true,
                "fail" => flags.fail = true,
                "handshake" => flags.handshake = true,
                "noaddr" => flags.noaddr = true,
                _ => {}
            }
        }
        flags
    }

    pub fn role(&self) -> NodeRole {
        if self.replica {
            NodeRole::Replica
        } else {
            NodeRole::Master
        }
    }

    pub fn fail_state(&self) -> FailState {
        if self.fail {
            FailState::Fail
        } else if self.pfail {
            FailState::PossibleFail
        } else {
            FailState::None
        }
    }
}

/// Direction of an open (transitional) slot on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenSlotKind {
    /// The node is importing the slot from a peer.
    Importing,
    /// The node is migrating the slot to a peer.
    Migrating,
}

impl fmt::Display for OpenSlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenSlotKind::Importing => write!(f, "importing"),
            OpenSlotKind::Migrating => write!(f, "migrating"),
        }
    }
}

/// A slot in importing/migrating state, parsed from the bracket syntax:
/// `[slot-<-node]` (importing from node) or `[slot->-node]` (migrating to
/// node).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenSlot {
    pub slot: u16,
    pub kind: OpenSlotKind,
    /// The peer on the other end of the move.
    pub peer: String,
}

impl OpenSlot {
    /// Parse one bracketed open-slot marker.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let inner = s
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| ParseError::InvalidSlotRange(s.to_string()))?;

        let (slot_str, kind, peer) = if let Some((slot, peer)) = inner.split_once("-<-") {
            (slot, OpenSlotKind::Importing, peer)
        } else if let Some((slot, peer)) = inner.split_once("->-") {
            (slot, OpenSlotKind::Migrating, peer)
        } else {
            return Err(ParseError::InvalidSlotRange(s.to_string()));
        };

        let slot: u16 = slot_str
            .parse()
            .map_err(|_| ParseError::InvalidSlotRange(s.to_string()))?;
        if slot >= TOTAL_SLOTS || peer.is_empty() {
            return Err(ParseError::InvalidSlotRange(s.to_string()));
        }
        Ok(OpenSlot {
            slot,
            kind,
            peer: peer.to_string(),
        })
    }
}

/// One node as reported by `CLUSTER NODES`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Opaque node id (40 hex characters).
    pub node_id: String,
    /// Client address.
    pub addr: NodeAddr,
    /// Cluster bus port.
    pub cluster_bus_port: u16,
    /// Parsed flags.
    pub flags: NodeFlags,
    /// Master node id when this node is a replica.
    pub master_id: Option<String>,
    /// Config epoch of the node.
    pub config_epoch: i64,
    /// Link state from the reporting node.
    pub link_state: LinkState,
    /// Slot ranges owned by this node (masters only).
    pub slots: Vec<SlotRange>,
    /// Slots on this node currently in importing/migrating state.
    pub open_slots: Vec<OpenSlot>,
}

impl ClusterNode {
    pub fn role(&self) -> NodeRole {
        self.flags.role()
    }

    pub fn is_master(&self) -> bool {
        self.flags.role() == NodeRole::Master
    }

    pub fn is_replica(&self) -> bool {
        self.flags.role() == NodeRole::Replica
    }

    pub fn is_myself(&self) -> bool {
        self.flags.myself
    }

    pub fn fail_state(&self) -> FailState {
        self.flags.fail_state()
    }

    /// Total number of slots owned by this node.
    pub fn slot_count(&self) -> usize {
        self.slots.iter().map(|r| r.count() as usize).sum()
    }

    /// All owned slots, ascending.
    pub fn owned_slots(&self) -> Vec<u16> {
        let mut slots: Vec<u16> = self.slots.iter().flat_map(|r| r.iter()).collect();
        slots.sort_unstable();
        slots
    }

    /// Parse a single `CLUSTER NODES` line.
    ///
    /// Format: `id ip:port@cport flags master-id ping-sent pong-recv epoch
    /// link-state slot ...`
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 8 {
            return Err(ParseError::InvalidNodeLine(format!(
                "expected at least 8 fields: {line}"
            )));
        }

        let node_id = parts[0].to_string();

        // ip:port@cport, where @cport may be absent on old nodes
        let addr_field = parts[1];
        let (ip_port, bus_part) = match addr_field.split_once('@') {
            Some((a, b)) => (a, Some(b)),
            None => (addr_field, None),
        };
        let addr: NodeAddr = ip_port.parse()?;
        let cluster_bus_port = bus_part
            .and_then(|p| p.split(',').next())
            .and_then(|p| p.parse().ok())
            .unwrap_or(addr.port + 10000);

        let flags = NodeFlags::parse(parts[2]);

        let master_id = match parts[3] {
            "-" => None,
            id => Some(id.to_string()),
        };

        let config_epoch = parts[6].parse().unwrap_or(0);
        let link_state = match parts[7] {
            "connected" => LinkState::Connected,
            _ => LinkState::Disconnected,
        };

        let mut slots = Vec::new();
        let mut open_slots = Vec::new();
        for field in &parts[8..] {
            if field.starts_with('[') {
                open_slots.push(OpenSlot::parse(field)?);
            } else {
                slots.push(SlotRange::parse(field)?);
            }
        }

        Ok(ClusterNode {
            node_id,
            addr,
            cluster_bus_port,
            flags,
            master_id,
            config_epoch,
            link_state,
            slots,
            open_slots,
        })
    }
}

/// The full roster and slot map as seen by one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNodesView {
    pub nodes: Vec<ClusterNode>,
}

impl ClusterNodesView {
    /// Parse the complete `CLUSTER NODES` output.
    pub fn parse(output: &str) -> Result<Self, ParseError> {
        let nodes = output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(ClusterNode::parse_line)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ClusterNodesView { nodes })
    }

    pub fn masters(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter().filter(|n| n.is_master())
    }

    pub fn replicas(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter().filter(|n| n.is_replica())
    }

    /// The reporting node itself.
    pub fn myself(&self) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.is_myself())
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

    /// Slot-to-owner mapping claimed by this view.
    pub fn slot_owners(&self) -> HashMap<u16, String> {
        let mut owners = HashMap::new();
        for master in self.masters() {
            for range in &master.slots {
                for slot in range.iter() {
                    owners.insert(slot, master.node_id.clone());
                }
            }
        }
        owners
    }

    pub fn total_slots_assigned(&self) -> usize {
        self.masters().map(|m| m.slot_count()).sum()
    }
}
