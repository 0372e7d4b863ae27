//! Error taxonomy for topology orchestration.
//!
//! Every variant carries enough structured detail (node, slot, command) for
//! the caller to decide whether to re-run the operation or intervene
//! manually. The orchestrator itself never retries except inside the
//! key-transfer loop.

use thiserror::Error;

use crate::client::types::NodeAddr;

/// Node id as reported by the cluster protocol (40 hex characters).
pub type NodeId = String;

/// Errors produced by topology orchestration operations.
#[derive(Error, Debug)]
pub enum TribError {
    /// Malformed or out-of-range input, caught before any node is mutated.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Transport-level failure: timeout or connection refused. Never
    /// reported as silent success.
    #[error("node {address} is unreachable: {reason}")]
    NodeUnreachable { address: NodeAddr, reason: String },

    /// The node replied with something the client could not interpret.
    #[error("protocol error from {address}: {detail}")]
    Protocol { address: NodeAddr, detail: String },

    /// The node understood the command and refused it.
    #[error("node {address} rejected {command}: {reason}")]
    CommandRejected {
        address: NodeAddr,
        command: &'static str,
        reason: String,
    },

    /// Graceful removal of a node that still owns slots.
    #[error("node {node_id} still owns {slot_count} slots, reshard them away first")]
    NodeHasSlots { node_id: NodeId, slot_count: usize },

    /// A master id that does not resolve in the cluster's current view.
    #[error("master {master_id} is not known to the cluster")]
    UnknownMaster { master_id: NodeId },

    /// Cluster creation with fewer masters than required.
    #[error("at least one master is required, got {masters}")]
    InsufficientNodes { masters: usize },

    /// More replicas requested than there are candidate nodes.
    #[error("replica count {requested} exceeds available candidates ({available})")]
    InvalidReplicaCount { requested: usize, available: usize },

    /// The final ownership broadcast for a slot reached some nodes but not
    /// all of them. The cluster converges on its own via gossip; the caller
    /// decides whether to re-check or intervene.
    #[error(
        "ownership broadcast for slot {slot} (new owner {target}) failed on {} node(s)",
        failures.len()
    )]
    PartialReassignment {
        slot: u16,
        target: NodeId,
        failures: Vec<(NodeAddr, String)>,
    },
}

impl TribError {
    /// True when re-running the failed operation is known to be safe.
    ///
    /// Slot-state marking is idempotent, so transport and rejection errors
    /// during marking can be retried by the caller. A partial ownership
    /// broadcast needs a health check first.
    pub fn is_safe_to_rerun(&self) -> bool {
        !matches!(self, TribError::PartialReassignment { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_reassignment_is_not_safe_to_rerun() {
        let err = TribError::PartialReassignment {
            slot: 42,
            target: "abc".into(),
            failures: vec![(NodeAddr::new("10.0.0.1", 6379), "timeout".into())],
        };
        assert!(!err.is_safe_to_rerun());

        let err = TribError::NodeUnreachable {
            address: NodeAddr::new("10.0.0.1", 6379),
            reason: "connection refused".into(),
        };
        assert!(err.is_safe_to_rerun());
    }

    #[test]
    fn errors_render_with_context() {
        let err = TribError::NodeHasSlots {
            node_id: "07c37dfe".into(),
            slot_count: 5461,
        };
        let msg = err.to_string();
        assert!(msg.contains("07c37dfe"));
        assert!(msg.contains("5461"));
    }
}
