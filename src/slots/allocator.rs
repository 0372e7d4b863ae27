//! Pure slot and replica allocation.
//!
//! Everything in this module is deterministic computation with no I/O:
//! given the same inputs, the same plan comes out. Execution lives in
//! [`crate::slots::migration`] and [`crate::lifecycle`].

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::client::types::{NodeAddr, SlotRange, TOTAL_SLOTS};
use crate::error::{NodeId, TribError};

/// Calculate the ideal slot distribution for N masters.
///
/// Slots split as evenly as possible; the remainder goes one extra slot to
/// the first `16384 % master_count` masters in input order, so the per-master
/// counts differ by at most one. Errors when there are no masters or more
/// masters than slots, since every master must own at least one slot.
pub fn calculate_distribution(master_count: u16) -> Result<Vec<SlotRange>, TribError> {
    if master_count == 0 {
        return Err(TribError::InsufficientNodes { masters: 0 });
    }
    if master_count > TOTAL_SLOTS {
        return Err(TribError::InvalidParameter(format!(
            "cannot split {TOTAL_SLOTS} slots across {master_count} masters"
        )));
    }

    let per_master = TOTAL_SLOTS / master_count;
    let remainder = TOTAL_SLOTS % master_count;

    let mut ranges = Vec::with_capacity(master_count as usize);
    let mut start: u16 = 0;
    for i in 0..master_count {
        let extra = if i < remainder { 1 } else { 0 };
        let end = start + per_master + extra - 1;
        ranges.push(SlotRange::new(start, end));
        start = end.saturating_add(1);
    }
    Ok(ranges)
}

/// One master of a new cluster: its slot range and its replicas.
///
/// Produced by [`build_create_params`] for the caller to review or edit
/// before cluster creation, then consumed once by
/// [`crate::lifecycle::NodeLifecycleManager::create_cluster`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateClusterParam {
    /// Slot range assigned to this master.
    pub slots: SlotRange,
    /// Address of the master.
    pub master: NodeAddr,
    /// Addresses of its replicas.
    pub replicas: Vec<NodeAddr>,
}

/// Derive create-cluster parameters from a replica count and a node list.
///
/// Masters are chosen by round-robining across distinct hosts so that no
/// host concentrates more masters than necessary. Replicas are then paired
/// to masters preferring a different physical host; same-host pairing is
/// the fallback when no alternative remains. Nodes left over after every
/// master has `replicas_per_master` replicas are spread round-robin as
/// extra replicas.
pub fn build_create_params(
    replicas_per_master: usize,
    hosts: &[NodeAddr],
) -> Result<Vec<CreateClusterParam>, TribError> {
    let master_count = hosts.len() / (replicas_per_master + 1);
    if master_count == 0 {
        if replicas_per_master > 0 && !hosts.is_empty() {
            return Err(TribError::InvalidReplicaCount {
                requested: replicas_per_master,
                available: hosts.len() - 1,
            });
        }
        return Err(TribError::InsufficientNodes { masters: 0 });
    }
    if master_count > TOTAL_SLOTS as usize {
        return Err(TribError::InvalidParameter(format!(
            "{master_count} masters cannot each own at least one of {TOTAL_SLOTS} slots"
        )));
    }

    // Group by host, preserving input order, then take one node per host
    // round-robin. Masters come out first, everything after is a replica
    // candidate in the same interleaved order.
    let mut groups: Vec<(String, VecDeque<NodeAddr>)> = Vec::new();
    for addr in hosts {
        match groups.iter_mut().find(|(host, _)| host == &addr.host) {
            Some((_, group)) => group.push_back(addr.clone()),
            None => groups.push((addr.host.clone(), VecDeque::from([addr.clone()]))),
        }
    }

    let mut interleaved = Vec::with_capacity(hosts.len());
    while interleaved.len() < hosts.len() {
        for (_, group) in &mut groups {
            if let Some(addr) = group.pop_front() {
                interleaved.push(addr);
            }
        }
    }

    let mut candidates: VecDeque<NodeAddr> = interleaved.split_off(master_count).into();
    let masters = interleaved;

    let mut params: Vec<CreateClusterParam> = calculate_distribution(master_count as u16)?
        .into_iter()
        .zip(masters)
        .map(|(slots, master)| CreateClusterParam {
            slots,
            master,
            replicas: Vec::new(),
        })
        .collect();

    // Fixed replica count per master first, then leftovers round-robin.
    let master_hosts: Vec<String> = params.iter().map(|p| p.master.host.clone()).collect();
    let mut assign = |i: usize, candidates: &mut VecDeque<NodeAddr>| -> bool {
        let m = master_hosts.len();
        let preferred = &master_hosts[(i + 1) % m];
        match take_replica_for(&master_hosts[i], preferred, candidates) {
            Some(replica) => {
                params[i].replicas.push(replica);
                true
            }
            None => false,
        }
    };
    for _ in 0..replicas_per_master {
        for i in 0..master_count {
            assign(i, &mut candidates);
        }
    }
    let mut idx = 0;
    while assign(idx % master_count, &mut candidates) {
        idx += 1;
    }

    Ok(params)
}

/// Pick a replica for a master, avoiding its host. Preferring the next
/// master's host keeps assignments off-host even when every host has
/// exactly one master and one spare (a pure "first different host" pick
/// can strand the last master with its own spare).
fn take_replica_for(
    master_host: &str,
    preferred_host: &str,
    candidates: &mut VecDeque<NodeAddr>,
) -> Option<NodeAddr> {
    let pos = candidates
        .iter()
        .position(|c| c.host == preferred_host && c.host != master_host)
        .or_else(|| candidates.iter().position(|c| c.host != master_host))
        .unwrap_or(0);
    candidates.remove(pos)
}

/// A planned move of one slot from a source master to a target master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMove {
    pub slot: u16,
    pub source: NodeId,
    pub target: NodeId,
}

/// An ordered list of slot moves, consumed by the migration coordinator and
/// then discarded. Plans are never persisted; they are recomputed from a
/// fresh topology read per reshard request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub moves: Vec<SlotMove>,
}

impl MigrationPlan {
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

/// Select `count` slots to move to `target` from the given source masters.
///
/// Slots are drained from the source currently holding the most slots
/// first (ties broken by input order), taking its highest-numbered slot
/// each step. The selection is deterministic and stable across repeated
/// calls against the same snapshot.
pub fn plan_move_count(
    count: u16,
    target: &NodeId,
    sources: &[(NodeId, Vec<u16>)],
) -> Result<MigrationPlan, TribError> {
    let mut pools: Vec<(NodeId, Vec<u16>)> = sources
        .iter()
        .filter(|(id, _)| id != target)
        .map(|(id, slots)| {
            let mut slots = slots.clone();
            slots.sort_unstable();
            (id.clone(), slots)
        })
        .collect();

    let available: usize = pools.iter().map(|(_, s)| s.len()).sum();
    if (count as usize) > available {
        return Err(TribError::InvalidParameter(format!(
            "cannot move {count} slots, sources only hold {available}"
        )));
    }

    let mut moves = Vec::with_capacity(count as usize);
    for _ in 0..count {
        // first source among those holding the most remaining slots
        let Some(richest) = pools
            .iter_mut()
            .reduce(|best, cur| if cur.1.len() > best.1.len() { cur } else { best })
        else {
            break;
        };
        if let Some(slot) = richest.1.pop() {
            moves.push(SlotMove {
                slot,
                source: richest.0.clone(),
                target: target.clone(),
            });
        }
    }

    Ok(MigrationPlan { moves })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn distribution_covers_every_slot_exactly_once() {
        for master_count in 1..=20 {
            let dist = calculate_distribution(master_count).unwrap();
            assert_eq!(dist.len(), master_count as usize);

            let total: usize = dist.iter().map(|r| r.count() as usize).sum();
            assert_eq!(total, TOTAL_SLOTS as usize, "master_count={master_count}");

            assert_eq!(dist[0].start, 0);
            assert_eq!(dist.last().unwrap().end, TOTAL_SLOTS - 1);
            for i in 1..dist.len() {
                assert_eq!(dist[i].start, dist[i - 1].end + 1);
            }

            let min = dist.iter().map(|r| r.count()).min().unwrap();
            let max = dist.iter().map(|r| r.count()).max().unwrap();
            assert!(max - min <= 1, "counts differ by more than 1");
        }
    }

    #[test]
    fn distribution_rejects_zero_and_oversized_master_counts() {
        assert!(matches!(
            calculate_distribution(0),
            Err(TribError::InsufficientNodes { masters: 0 })
        ));
        assert!(matches!(
            calculate_distribution(TOTAL_SLOTS + 1),
            Err(TribError::InvalidParameter(_))
        ));
        // one master per slot is the limit
        let dist = calculate_distribution(TOTAL_SLOTS).unwrap();
        assert_eq!(dist.len(), TOTAL_SLOTS as usize);
        assert!(dist.iter().all(|r| r.count() == 1));
    }

    #[test]
    fn distribution_for_three_masters() {
        let dist = calculate_distribution(3).unwrap();
        assert_eq!(dist[0], SlotRange::new(0, 5461)); // 5462 slots
        assert_eq!(dist[1], SlotRange::new(5462, 10922)); // 5461 slots
        assert_eq!(dist[2], SlotRange::new(10923, 16383)); // 5461 slots
    }

    fn addrs(raw: &[&str]) -> Vec<NodeAddr> {
        raw.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn create_params_three_masters_one_replica() {
        let hosts = addrs(&[
            "10.0.0.1:6379",
            "10.0.0.2:6379",
            "10.0.0.3:6379",
            "10.0.0.4:6379",
            "10.0.0.5:6379",
            "10.0.0.6:6379",
        ]);
        let params = build_create_params(1, &hosts).unwrap();

        assert_eq!(params.len(), 3);
        let total: usize = params.iter().map(|p| p.slots.count() as usize).sum();
        assert_eq!(total, TOTAL_SLOTS as usize);
        for param in &params {
            assert_eq!(param.replicas.len(), 1);
        }
        // all six nodes used exactly once
        let used: HashSet<&NodeAddr> = params
            .iter()
            .flat_map(|p| std::iter::once(&p.master).chain(p.replicas.iter()))
            .collect();
        assert_eq!(used.len(), 6);
    }

    #[test]
    fn create_params_spread_replicas_across_hosts() {
        // two physical hosts, two nodes each
        let hosts = addrs(&["a:7000", "a:7001", "b:7000", "b:7001"]);
        let params = build_create_params(1, &hosts).unwrap();

        assert_eq!(params.len(), 2);
        for param in &params {
            assert_eq!(param.replicas.len(), 1);
            assert_ne!(
                param.master.host, param.replicas[0].host,
                "replica must land on a different host when possible"
            );
        }
    }

    #[test]
    fn create_params_fall_back_to_same_host() {
        // only one physical host: same-host pairing is the only option
        let hosts = addrs(&["a:7000", "a:7001"]);
        let params = build_create_params(1, &hosts).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].replicas.len(), 1);
        assert_eq!(params[0].replicas[0].host, "a");
    }

    #[test]
    fn create_params_deterministic() {
        let hosts = addrs(&["a:1", "b:1", "c:1", "a:2", "b:2", "c:2"]);
        let first = build_create_params(1, &hosts).unwrap();
        let second = build_create_params(1, &hosts).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn create_params_errors() {
        assert!(matches!(
            build_create_params(0, &[]),
            Err(TribError::InsufficientNodes { masters: 0 })
        ));
        let hosts = addrs(&["a:1", "a:2"]);
        assert!(matches!(
            build_create_params(5, &hosts),
            Err(TribError::InvalidReplicaCount {
                requested: 5,
                available: 1
            })
        ));
    }

    #[test]
    fn plan_move_count_takes_highest_slots_from_richest_source() {
        let sources = vec![
            ("poor".to_string(), (0..100).collect::<Vec<u16>>()),
            ("rich".to_string(), (100..400).collect::<Vec<u16>>()),
        ];
        let plan = plan_move_count(10, &"target".to_string(), &sources).unwrap();

        assert_eq!(plan.len(), 10);
        for (i, mv) in plan.moves.iter().enumerate() {
            assert_eq!(mv.source, "rich");
            assert_eq!(mv.slot, 399 - i as u16);
            assert_eq!(mv.target, "target");
        }
    }

    #[test]
    fn plan_move_count_is_stable() {
        let sources = vec![
            ("a".to_string(), (0..200).collect::<Vec<u16>>()),
            ("b".to_string(), (200..400).collect::<Vec<u16>>()),
        ];
        let target = "t".to_string();
        assert_eq!(
            plan_move_count(50, &target, &sources).unwrap(),
            plan_move_count(50, &target, &sources).unwrap()
        );
    }

    #[test]
    fn plan_move_count_rejects_oversized_request() {
        let sources = vec![("a".to_string(), vec![1, 2, 3])];
        assert!(matches!(
            plan_move_count(4, &"t".to_string(), &sources),
            Err(TribError::InvalidParameter(_))
        ));
    }

    #[test]
    fn plan_move_count_ignores_target_in_sources() {
        let sources = vec![
            ("t".to_string(), vec![1, 2, 3]),
            ("a".to_string(), vec![10, 11]),
        ];
        let plan = plan_move_count(2, &"t".to_string(), &sources).unwrap();
        assert!(plan.moves.iter().all(|m| m.source == "a"));
    }
}
