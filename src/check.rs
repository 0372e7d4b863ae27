//! Cluster consistency checking.
//!
//! The checker cross-examines every node rather than trusting a single
//! view: each node's own slot claims are collected and compared, because a
//! split-brain or interrupted reshard shows up exactly where views
//! disagree. An unreachable node is itself a finding, never a hard error,
//! so one dead node cannot hide the rest of the report.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::client::types::{FailState, NodeAddr, OpenSlotKind, SlotRange, TOTAL_SLOTS};
use crate::client::TopologyClient;
use crate::error::{NodeId, TribError};
use crate::topology::ClusterTopology;

/// One problem found during a cluster check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "finding", rename_all = "snake_case")]
pub enum Finding {
    /// No reachable master claims these slots.
    MissingCoverage { range: SlotRange },
    /// More than one master claims these slots.
    DuplicateOwnership {
        range: SlotRange,
        owners: Vec<NodeId>,
    },
    /// A master with assigned slots and nothing to fail over to.
    MasterWithoutReplicas { node_id: NodeId, addr: NodeAddr },
    /// A node flagged pfail or fail in the entry node's view.
    NodeFailState {
        node_id: NodeId,
        addr: NodeAddr,
        state: FailState,
    },
    /// A roster node that did not answer.
    NodeUnreachable { addr: NodeAddr, reason: String },
    /// A slot stuck in importing or migrating state.
    OpenSlot {
        node_id: NodeId,
        slot: u16,
        kind: OpenSlotKind,
        peer: NodeId,
    },
}

/// Everything a check run found, plus the topology it was derived from.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub topology: ClusterTopology,
    pub findings: Vec<Finding>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Read-only consistency checker.
pub struct ClusterHealthChecker<'a, C: TopologyClient> {
    client: &'a C,
}

impl<'a, C: TopologyClient> ClusterHealthChecker<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Check the cluster reachable from `entry`.
    ///
    /// The entry node's view supplies the roster; slot claims come from
    /// each node's own answer.
    #[instrument(skip(self), fields(entry = %entry))]
    pub async fn check(&self, entry: &NodeAddr) -> Result<HealthReport, TribError> {
        let entry_view = self.client.fetch_node_state(entry).await?;
        let topology = ClusterTopology::from_view(entry.clone(), entry_view);
        let mut findings = Vec::new();

        // Fail flags and replica coverage come from the entry view.
        for node in &topology.nodes {
            let state = node.fail_state();
            if state != FailState::None {
                findings.push(Finding::NodeFailState {
                    node_id: node.node_id.clone(),
                    addr: node.addr.clone(),
                    state,
                });
            }
        }
        for master in topology.masters() {
            if master.slot_count() > 0 && topology.replicas_of(&master.node_id).next().is_none() {
                findings.push(Finding::MasterWithoutReplicas {
                    node_id: master.node_id.clone(),
                    addr: master.addr.clone(),
                });
            }
        }

        // Slot claims and open markers come from each node's own view.
        let mut claims: BTreeMap<u16, Vec<NodeId>> = BTreeMap::new();
        for node in &topology.nodes {
            let view = match self.client.fetch_node_state(&node.addr).await {
                Ok(view) => view,
                Err(e) => {
                    debug!(node = %node.addr, error = %e, "Node did not answer check");
                    findings.push(Finding::NodeUnreachable {
                        addr: node.addr.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let Some(myself) = view.myself() else {
                continue;
            };
            if myself.is_master() {
                for slot in myself.owned_slots() {
                    claims.entry(slot).or_default().push(myself.node_id.clone());
                }
            }
            for open in &myself.open_slots {
                findings.push(Finding::OpenSlot {
                    node_id: myself.node_id.clone(),
                    slot: open.slot,
                    kind: open.kind,
                    peer: open.peer.clone(),
                });
            }
        }

        findings.extend(coverage_findings(&claims));
        Ok(HealthReport { topology, findings })
    }
}

/// Turn the per-slot claim map into missing/duplicate findings, with
/// adjacent slots sharing the same problem compressed into ranges.
fn coverage_findings(claims: &BTreeMap<u16, Vec<NodeId>>) -> Vec<Finding> {
    let mut findings = Vec::new();

    let missing: Vec<u16> = (0..TOTAL_SLOTS)
        .filter(|slot| !claims.contains_key(slot))
        .collect();
    findings.extend(
        SlotRange::compress(&missing)
            .into_iter()
            .map(|range| Finding::MissingCoverage { range }),
    );

    // Group contiguous duplicated slots claimed by the same owner set.
    let mut run: Option<(u16, u16, Vec<NodeId>)> = None;
    for (&slot, owners) in claims {
        if owners.len() < 2 {
            continue;
        }
        let mut owners = owners.clone();
        owners.sort();

        let extends = matches!(
            &run,
            Some((_, end, run_owners)) if end + 1 == slot && *run_owners == owners
        );
        if extends {
            if let Some((_, end, _)) = &mut run {
                *end = slot;
            }
        } else {
            if let Some((start, end, run_owners)) = run.take() {
                findings.push(Finding::DuplicateOwnership {
                    range: SlotRange::new(start, end),
                    owners: run_owners,
                });
            }
            run = Some((slot, slot, owners));
        }
    }
    if let Some((start, end, owners)) = run {
        findings.push(Finding::DuplicateOwnership {
            range: SlotRange::new(start, end),
            owners,
        });
    }

    findings
}
