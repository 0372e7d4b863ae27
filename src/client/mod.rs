//! Protocol adapter for talking to individual cluster nodes.
//!
//! The orchestrator never talks to "the cluster"; it talks to specific nodes
//! and reconciles their possibly-divergent views. This module provides:
//!
//! - `types`: parsed `CLUSTER NODES` state (roster, slots, open-slot markers)
//! - `command`: the control command primitives and their replies
//! - [`TopologyClient`]: the seam between orchestration logic and the wire,
//!   implemented for production by [`FredTopologyClient`] and by an
//!   in-memory model in tests

pub mod command;
pub mod fred_client;
pub mod types;

use std::future::Future;

pub use command::{ControlCommand, ControlReply, SlotStateChange};
pub use fred_client::FredTopologyClient;
pub use types::{
    ClusterNode, ClusterNodesView, FailState, LinkState, NodeAddr, NodeFlags, NodeRole, OpenSlot,
    OpenSlotKind, ParseError, SlotRange, TOTAL_SLOTS,
};

use crate::error::TribError;

/// Thin protocol adapter for one-node control commands and state reads.
///
/// Implementations perform no retries and bound every call with a timeout;
/// a timeout surfaces as [`TribError::NodeUnreachable`], never as silent
/// success.
pub trait TopologyClient: Send + Sync {
    /// Read the full roster and slot map as seen by the node at `addr`.
    ///
    /// The returned view may be stale or inconsistent with other nodes'
    /// views; callers must tolerate that.
    fn fetch_node_state(
        &self,
        addr: &NodeAddr,
    ) -> impl Future<Output = Result<ClusterNodesView, TribError>> + Send;

    /// Issue a single control command to the node at `addr`.
    fn send(
        &self,
        addr: &NodeAddr,
        command: ControlCommand,
    ) -> impl Future<Output = Result<ControlReply, TribError>> + Send;
}

impl<T: TopologyClient> TopologyClient for std::sync::Arc<T> {
    fn fetch_node_state(
        &self,
        addr: &NodeAddr,
    ) -> impl Future<Output = Result<ClusterNodesView, TribError>> + Send {
        (**self).fetch_node_state(addr)
    }

    fn send(
        &self,
        addr: &NodeAddr,
        command: ControlCommand,
    ) -> impl Future<Output = Result<ControlReply, TribError>> + Send {
        (**self).send(addr, command)
    }
}
