//! Collaborator seams: where entry points come from and where cluster
//! membership gets recorded.
//!
//! The orchestrator does not decide which node of a named cluster to talk
//! to; a [`NodeDirectory`] does. After mutations it reports a known-good
//! representative back through a [`ClusterRegistry`]. Both are traits so
//! the surrounding system (an API server, a config file, a database) can
//! plug in its own storage; [`MemoryDirectory`] and [`MemoryRegistry`]
//! cover tests and simple embeddings.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::client::types::NodeAddr;
use crate::error::{NodeId, TribError};

/// A node to avoid when picking an entry point, typically because it is
/// about to be removed or shut down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeExclusion {
    ById(NodeId),
    ByAddr(NodeAddr),
}

/// Source of entry-point addresses for named clusters.
pub trait NodeDirectory: Send + Sync {
    /// An address believed to be a live member of the named cluster.
    fn entry_point(
        &self,
        cluster: &str,
    ) -> impl Future<Output = Result<NodeAddr, TribError>> + Send;

    /// Like [`entry_point`], but never returns the excluded node.
    ///
    /// [`entry_point`]: NodeDirectory::entry_point
    fn entry_point_excluding(
        &self,
        cluster: &str,
        exclusion: &NodeExclusion,
    ) -> impl Future<Output = Result<NodeAddr, TribError>> + Send;
}

/// Sink for cluster-name to representative-address bindings.
pub trait ClusterRegistry: Send + Sync {
    /// Record a representative member address for the named cluster.
    fn record(
        &self,
        cluster: &str,
        representative: &NodeAddr,
    ) -> impl Future<Output = Result<(), TribError>> + Send;
}

impl<T: NodeDirectory> NodeDirectory for Arc<T> {
    fn entry_point(
        &self,
        cluster: &str,
    ) -> impl Future<Output = Result<NodeAddr, TribError>> + Send {
        (**self).entry_point(cluster)
    }

    fn entry_point_excluding(
        &self,
        cluster: &str,
        exclusion: &NodeExclusion,
    ) -> impl Future<Output = Result<NodeAddr, TribError>> + Send {
        (**self).entry_point_excluding(cluster, exclusion)
    }
}

impl<T: ClusterRegistry> ClusterRegistry for Arc<T> {
    fn record(
        &self,
        cluster: &str,
        representative: &NodeAddr,
    ) -> impl Future<Output = Result<(), TribError>> + Send {
        (**self).record(cluster, representative)
    }
}

/// In-memory directory keyed by cluster name.
///
/// Nodes registered with an id can be excluded by id; address exclusion
/// always works.
#[derive(Default)]
pub struct MemoryDirectory {
    clusters: Mutex<HashMap<String, Vec<(Option<NodeId>, NodeAddr)>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cluster: &str, addr: NodeAddr) {
        self.register_with_id(cluster, None, addr);
    }

    pub fn register_with_id(&self, cluster: &str, id: Option<NodeId>, addr: NodeAddr) {
        self.lock()
            .entry(cluster.to_string())
            .or_default()
            .push((id, addr));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<(Option<NodeId>, NodeAddr)>>> {
        self.clusters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pick(
        &self,
        cluster: &str,
        exclusion: Option<&NodeExclusion>,
    ) -> Result<NodeAddr, TribError> {
        let clusters = self.lock();
        let members = clusters
            .get(cluster)
            .ok_or_else(|| TribError::InvalidParameter(format!("unknown cluster {cluster}")))?;
        members
            .iter()
            .find(|(id, addr)| match exclusion {
                None => true,
                Some(NodeExclusion::ById(excluded)) => id.as_deref() != Some(excluded.as_str()),
                Some(NodeExclusion::ByAddr(excluded)) => addr != excluded,
            })
            .map(|(_, addr)| addr.clone())
            .ok_or_else(|| {
                TribError::InvalidParameter(format!(
                    "no usable entry point for cluster {cluster}"
                ))
            })
    }
}

impl NodeDirectory for MemoryDirectory {
    async fn entry_point(&self, cluster: &str) -> Result<NodeAddr, TribError> {
        self.pick(cluster, None)
    }

    async fn entry_point_excluding(
        &self,
        cluster: &str,
        exclusion: &NodeExclusion,
    ) -> Result<NodeAddr, TribError> {
        self.pick(cluster, Some(exclusion))
    }
}

/// In-memory registry keeping the latest representative per cluster.
#[derive(Default)]
pub struct MemoryRegistry {
    entries: Mutex<HashMap<String, NodeAddr>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, cluster: &str) -> Option<NodeAddr> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(cluster)
            .cloned()
    }
}

impl ClusterRegistry for MemoryRegistry {
    async fn record(&self, cluster: &str, representative: &NodeAddr) -> Result<(), TribError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(cluster.to_string(), representative.clone());
        Ok(())
    }
}
