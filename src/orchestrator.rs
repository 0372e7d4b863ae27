//! Top-level orchestration surface: one method per operator intent.
//!
//! Each operation picks an entry point through the directory, runs the
//! lifecycle or check machinery, updates the registry after membership
//! changes, and hands back a fresh topology snapshot. Nothing here caches
//! cluster state between calls.

use tracing::{info, instrument};

use crate::check::{ClusterHealthChecker, HealthReport};
use crate::client::types::NodeAddr;
use crate::client::TopologyClient;
use crate::config::TribConfig;
use crate::directory::{ClusterRegistry, NodeDirectory, NodeExclusion};
use crate::error::TribError;
use crate::lifecycle::{DeleteMode, NodeLifecycleManager, SourceSelector};
use crate::slots::allocator::{build_create_params, CreateClusterParam};
use crate::slots::migration::MigrationReport;
use crate::topology::ClusterTopology;

/// Orchestrates a fleet of named clusters through collaborator seams.
pub struct Orchestrator<C, D, R> {
    client: C,
    directory: D,
    registry: R,
    config: TribConfig,
}

impl<C, D, R> Orchestrator<C, D, R>
where
    C: TopologyClient,
    D: NodeDirectory,
    R: ClusterRegistry,
{
    pub fn new(client: C, directory: D, registry: R, config: TribConfig) -> Self {
        Self {
            client,
            directory,
            registry,
            config,
        }
    }

    /// Derive create-cluster parameters without touching any node.
    pub fn derive_create_params(
        &self,
        replicas_per_master: usize,
        hosts: &[NodeAddr],
    ) -> Result<Vec<CreateClusterParam>, TribError> {
        build_create_params(replicas_per_master, hosts)
    }

    /// Bootstrap a new named cluster from the given parameters.
    #[instrument(skip(self, params), fields(cluster))]
    pub async fn create(
        &self,
        cluster: &str,
        params: &[CreateClusterParam],
    ) -> Result<ClusterTopology, TribError> {
        self.lifecycle().create_cluster(params).await?;
        let entry = &params[0].master;
        self.registry.record(cluster, entry).await?;
        info!(cluster, entry = %entry, "Cluster registered");
        self.snapshot(entry).await
    }

    /// Run a full consistency check.
    #[instrument(skip(self), fields(cluster))]
    pub async fn check(&self, cluster: &str) -> Result<HealthReport, TribError> {
        let entry = self.directory.entry_point(cluster).await?;
        ClusterHealthChecker::new(&self.client).check(&entry).await
    }

    /// Fetch a fresh topology snapshot without mutating anything.
    #[instrument(skip(self), fields(cluster))]
    pub async fn topology(&self, cluster: &str) -> Result<ClusterTopology, TribError> {
        let entry = self.directory.entry_point(cluster).await?;
        self.snapshot(&entry).await
    }

    /// Move `count` slots onto a target master.
    #[instrument(skip(self, from), fields(cluster, count, target = %target))]
    pub async fn reshard(
        &self,
        cluster: &str,
        count: u16,
        from: SourceSelector,
        target: &str,
    ) -> Result<(MigrationReport, ClusterTopology), TribError> {
        let entry = self.directory.entry_point(cluster).await?;
        let report = self
            .lifecycle()
            .reshard_by_count(&entry, count, from, target)
            .await?;
        Ok((report, self.snapshot(&entry).await?))
    }

    /// Move an explicit slot list onto a target master.
    #[instrument(skip(self, slots), fields(cluster, slots = slots.len(), target = %target))]
    pub async fn reshard_slots(
        &self,
        cluster: &str,
        slots: &[u16],
        target: &str,
    ) -> Result<(MigrationReport, ClusterTopology), TribError> {
        let entry = self.directory.entry_point(cluster).await?;
        let report = self
            .lifecycle()
            .reshard_by_slots(&entry, slots, target)
            .await?;
        Ok((report, self.snapshot(&entry).await?))
    }

    /// Join an empty node, optionally as a replica of an existing master.
    #[instrument(skip(self), fields(cluster, new = %new))]
    pub async fn add_node(
        &self,
        cluster: &str,
        new: &NodeAddr,
        master_id: Option<&str>,
    ) -> Result<ClusterTopology, TribError> {
        let entry = self.directory.entry_point(cluster).await?;
        self.lifecycle().add_node(&entry, new, master_id).await?;
        self.registry.record(cluster, &entry).await?;
        self.snapshot(&entry).await
    }

    /// Remove a node, picking an entry point that is not the node itself.
    #[instrument(skip(self), fields(cluster, node = %node_id, ?mode))]
    pub async fn remove_node(
        &self,
        cluster: &str,
        node_id: &str,
        mode: DeleteMode,
    ) -> Result<ClusterTopology, TribError> {
        let entry = self
            .directory
            .entry_point_excluding(cluster, &NodeExclusion::ById(node_id.to_string()))
            .await?;
        self.lifecycle().delete_node(&entry, node_id, mode).await?;
        self.registry.record(cluster, &entry).await?;
        self.snapshot(&entry).await
    }

    /// Attach a node as a replica of the given master.
    #[instrument(skip(self), fields(cluster, node = %node_id, master = %master_id))]
    pub async fn replicate(
        &self,
        cluster: &str,
        node_id: &str,
        master_id: &str,
    ) -> Result<ClusterTopology, TribError> {
        let entry = self.directory.entry_point(cluster).await?;
        self.lifecycle().replicate(&entry, node_id, master_id).await?;
        self.snapshot(&entry).await
    }

    /// Promote a replica via manual failover.
    #[instrument(skip(self), fields(cluster, node = %node_id))]
    pub async fn failover(
        &self,
        cluster: &str,
        node_id: &str,
    ) -> Result<ClusterTopology, TribError> {
        let entry = self.directory.entry_point(cluster).await?;
        self.lifecycle().failover(&entry, node_id).await?;
        self.snapshot(&entry).await
    }

    /// Shut a member's process down, observing from another member.
    #[instrument(skip(self), fields(cluster, node = %node_id))]
    pub async fn shutdown(
        &self,
        cluster: &str,
        node_id: &str,
    ) -> Result<ClusterTopology, TribError> {
        let entry = self
            .directory
            .entry_point_excluding(cluster, &NodeExclusion::ById(node_id.to_string()))
            .await?;
        self.lifecycle().shutdown_node(&entry, node_id).await?;
        self.snapshot(&entry).await
    }

    /// Clear stale open-slot markers left by an interrupted reshard.
    #[instrument(skip(self), fields(cluster))]
    pub async fn settle(&self, cluster: &str) -> Result<ClusterTopology, TribError> {
        let entry = self.directory.entry_point(cluster).await?;
        self.lifecycle().settle_open_slots(&entry).await?;
        self.snapshot(&entry).await
    }

    fn lifecycle(&self) -> NodeLifecycleManager<'_, C> {
        NodeLifecycleManager::new(&self.client, &self.config)
    }

    async fn snapshot(&self, entry: &NodeAddr) -> Result<ClusterTopology, TribError> {
        let view = self.client.fetch_node_state(entry).await?;
        Ok(ClusterTopology::from_view(entry.clone(), view))
    }
}
