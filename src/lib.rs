//! valkey-trib: cluster topology orchestration for Valkey/Redis-cluster
//! protocol clusters.
//!
//! The crate computes slot and replica assignments, migrates slots between
//! masters, manages node membership and roles, and cross-checks cluster
//! consistency. It talks to individual nodes over their control surface;
//! storage, replication, and gossip remain the nodes' job.
//!
//! Entry points:
//! - [`Orchestrator`] for intent-level operations against named clusters
//! - [`NodeLifecycleManager`] and [`ClusterHealthChecker`] when you already
//!   hold an entry address
//! - [`slots`] for pure planning with no I/O

pub mod check;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod slots;
pub mod topology;

#[cfg(test)]
pub(crate) mod testutil;

pub use check::{ClusterHealthChecker, Finding, HealthReport};
pub use client::{
    ClusterNode, ClusterNodesView, FredTopologyClient, NodeAddr, SlotRange, TopologyClient,
    TOTAL_SLOTS,
};
pub use config::TribConfig;
pub use directory::{
    ClusterRegistry, MemoryDirectory, MemoryRegistry, NodeDirectory, NodeExclusion,
};
pub use error::{NodeId, TribError};
pub use lifecycle::{DeleteMode, NodeLifecycleManager, SourceSelector};
pub use orchestrator::Orchestrator;
pub use slots::{
    build_create_params, calculate_distribution, CancelFlag, CreateClusterParam,
    MigrationCoordinator, MigrationPlan, MigrationReport, SlotMove,
};
pub use topology::ClusterTopology;
