//! Control command primitives issued against a single node.
//!
//! Commands map one-to-one onto the node protocol's cluster management
//! surface. This layer does no retries; retry policy belongs to callers who
//! know whether the operation is idempotent.

use std::time::Duration;

use crate::client::types::NodeAddr;
use crate::error::NodeId;

/// A per-slot state change issued via `CLUSTER SETSLOT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStateChange {
    /// Clear any importing/migrating marker.
    Stable,
    /// Mark the slot as migrating toward the given node (issued on the
    /// source). Reissuing is safe.
    MigratingTo(NodeId),
    /// Mark the slot as importing from the given node (issued on the
    /// target). Reissuing is safe.
    ImportingFrom(NodeId),
    /// Final ownership handoff: the slot is now owned by the given node.
    OwnedBy(NodeId),
}

/// A control command addressed to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Assign unowned slots to the receiving node (`CLUSTER ADDSLOTS`).
    AssignSlots(Vec<u16>),
    /// Remove a slot from the receiving node (`CLUSTER DELSLOTS`).
    UnassignSlot(u16),
    /// Change a slot's migration state (`CLUSTER SETSLOT`).
    SetSlotState { slot: u16, state: SlotStateChange },
    /// Introduce another node to the receiving node (`CLUSTER MEET`).
    Meet(NodeAddr),
    /// Make the receiving node a replica of the given master.
    ReplicateOf(NodeId),
    /// Remove a node from the receiving node's roster.
    Forget(NodeId),
    /// Request a manual failover (issued on a replica).
    Failover,
    /// Request process termination.
    Shutdown,
    /// Count keys currently stored in a slot.
    CountKeysInSlot(u16),
    /// Fetch up to `count` keys from a slot.
    GetKeysInSlot { slot: u16, count: u64 },
    /// Move the given keys to another node (`MIGRATE ... KEYS`).
    MigrateKeys {
        dest: NodeAddr,
        keys: Vec<String>,
        timeout: Duration,
    },
}

impl ControlCommand {
    /// Protocol-level command name, used in error reports.
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::AssignSlots(_) => "CLUSTER ADDSLOTS",
            ControlCommand::UnassignSlot(_) => "CLUSTER DELSLOTS",
            ControlCommand::SetSlotState { .. } => "CLUSTER SETSLOT",
            ControlCommand::Meet(_) => "CLUSTER MEET",
            ControlCommand::ReplicateOf(_) => "CLUSTER REPLICATE",
            ControlCommand::Forget(_) => "CLUSTER FORGET",
            ControlCommand::Failover => "CLUSTER FAILOVER",
            ControlCommand::Shutdown => "SHUTDOWN",
            ControlCommand::CountKeysInSlot(_) => "CLUSTER COUNTKEYSINSLOT",
            ControlCommand::GetKeysInSlot { .. } => "CLUSTER GETKEYSINSLOT",
            ControlCommand::MigrateKeys { .. } => "MIGRATE",
        }
    }
}

/// Result of a control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// The node acknowledged the command.
    Done,
    /// Reply to [`ControlCommand::CountKeysInSlot`].
    KeyCount(u64),
    /// Reply to [`ControlCommand::GetKeysInSlot`].
    Keys(Vec<String>),
}

impl ControlReply {
    /// Extract a key count, treating any other reply as zero keys.
    pub fn key_count(&self) -> u64 {
        match self {
            ControlReply::KeyCount(n) => *n,
            _ => 0,
        }
    }

    /// Extract a key list, treating any other reply as empty.
    pub fn into_keys(self) -> Vec<String> {
        match self {
            ControlReply::Keys(keys) => keys,
            _ => Vec::new(),
        }
    }
}
