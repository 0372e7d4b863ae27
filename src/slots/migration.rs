//! Slot migration execution.
//!
//! A single slot moves through a fixed sequence:
//! 1. mark the slot migrating on the source (`SETSLOT MIGRATING`)
//! 2. mark the slot importing on the target (`SETSLOT IMPORTING`)
//! 3. batch keys out of the source until the slot is empty
//! 4. broadcast the new owner to every node (`SETSLOT NODE`)
//!
//! Marking is idempotent, so a migration interrupted before step 4 can be
//! re-run from the start. The ownership broadcast is the only step that is
//! not: a partial broadcast leaves nodes disagreeing about the owner until
//! gossip converges, and is surfaced as
//! [`TribError::PartialReassignment`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::client::command::{ControlCommand, SlotStateChange};
use crate::client::types::NodeAddr;
use crate::client::TopologyClient;
use crate::config::TribConfig;
use crate::error::TribError;
use crate::slots::allocator::{MigrationPlan, SlotMove};
use crate::topology::ClusterTopology;

/// Progress of one slot through the migration sequence, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MigrationState {
    #[default]
    Pending,
    /// Source and target are marked, keys are moving.
    TransferringKeys { moved: u64 },
    /// Ownership broadcast in flight.
    Finalizing,
    Complete,
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationState::Pending => write!(f, "pending"),
            MigrationState::TransferringKeys { moved } => write!(f, "transferring ({moved} keys)"),
            MigrationState::Finalizing => write!(f, "finalizing"),
            MigrationState::Complete => write!(f, "complete"),
        }
    }
}

/// Cooperative cancellation for a running plan.
///
/// Cancelling never interrupts a slot mid-sequence; it stops new slots from
/// starting, so a cancelled plan leaves every slot either fully moved or
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of running a migration plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Slots fully moved, including the ownership broadcast.
    pub migrated: usize,
    /// Slots never started because the plan was cancelled.
    pub skipped: usize,
    /// Total keys transferred.
    pub keys_moved: u64,
}

/// Executes migration plans against live nodes.
pub struct MigrationCoordinator<'a, C: TopologyClient> {
    client: &'a C,
    config: &'a TribConfig,
    cancel: CancelFlag,
}

impl<'a, C: TopologyClient> MigrationCoordinator<'a, C> {
    pub fn new(client: &'a C, config: &'a TribConfig) -> Self {
        Self {
            client,
            config,
            cancel: CancelFlag::new(),
        }
    }

    /// Handle for cancelling a plan started with [`run_plan`].
    ///
    /// [`run_plan`]: MigrationCoordinator::run_plan
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run a whole plan, migrating up to `slot_concurrency` slots at once.
    ///
    /// Slots already started keep running to completion even when another
    /// slot fails or the plan is cancelled. If any slot failed, the first
    /// error is returned after all in-flight slots have settled.
    pub async fn run_plan(
        &self,
        topology: &ClusterTopology,
        plan: &MigrationPlan,
    ) -> Result<MigrationReport, TribError> {
        let outcomes: Vec<Result<Option<u64>, TribError>> = stream::iter(plan.moves.iter())
            .map(|mv| async move {
                if self.cancel.is_cancelled() {
                    return Ok(None);
                }
                self.migrate_slot(topology, mv).await.map(Some)
            })
            .buffer_unordered(self.config.slot_concurrency)
            .collect()
            .await;

        let mut report = MigrationReport::default();
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(Some(keys)) => {
                    report.migrated += 1;
                    report.keys_moved += keys;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    migrated = report.migrated,
                    skipped = report.skipped,
                    keys = report.keys_moved,
                    "Migration plan finished"
                );
                Ok(report)
            }
        }
    }

    /// Move one slot from its source to its target. Returns the number of
    /// keys transferred.
    #[instrument(skip(self, topology, mv), fields(slot = mv.slot, source = %mv.source, target = %mv.target))]
    pub async fn migrate_slot(
        &self,
        topology: &ClusterTopology,
        mv: &SlotMove,
    ) -> Result<u64, TribError> {
        let source_addr = self.resolve(topology, &mv.source)?;
        let target_addr = self.resolve(topology, &mv.target)?;
        let mut state = MigrationState::Pending;
        debug!(state = %state, "Starting slot migration");

        self.client
            .send(
                &source_addr,
                ControlCommand::SetSlotState {
                    slot: mv.slot,
                    state: SlotStateChange::MigratingTo(mv.target.clone()),
                },
            )
            .await?;
        self.client
            .send(
                &target_addr,
                ControlCommand::SetSlotState {
                    slot: mv.slot,
                    state: SlotStateChange::ImportingFrom(mv.source.clone()),
                },
            )
            .await?;

        let mut moved: u64 = 0;
        loop {
            let remaining = self
                .client
                .send(&source_addr, ControlCommand::CountKeysInSlot(mv.slot))
                .await?
                .key_count();
            if remaining == 0 {
                break;
            }

            let keys = self
                .client
                .send(
                    &source_addr,
                    ControlCommand::GetKeysInSlot {
                        slot: mv.slot,
                        count: self.config.migrate_batch,
                    },
                )
                .await?
                .into_keys();
            if keys.is_empty() {
                // The count raced a deletion or expiry; give the node a
                // moment and re-check rather than spinning.
                tokio::time::sleep(self.config.join_poll_interval).await;
                continue;
            }

            let batch = keys.len() as u64;
            self.client
                .send(
                    &source_addr,
                    ControlCommand::MigrateKeys {
                        dest: target_addr.clone(),
                        keys,
                        timeout: self.config.migrate_timeout,
                    },
                )
                .await?;
            moved += batch;
            state = MigrationState::TransferringKeys { moved };
            debug!(state = %state, "Slot transfer progress");
        }

        state = MigrationState::Finalizing;
        debug!(state = %state, "Broadcasting new owner");
        self.broadcast_owner(topology, mv.slot, &mv.target).await?;

        state = MigrationState::Complete;
        info!(state = %state, keys = moved, "Slot migrated");
        Ok(moved)
    }

    /// Tell every node in the roster who owns the slot now.
    async fn broadcast_owner(
        &self,
        topology: &ClusterTopology,
        slot: u16,
        target: &str,
    ) -> Result<(), TribError> {
        let sends = topology.nodes.iter().map(|node| {
            let addr = node.addr.clone();
            async move {
                let result = self
                    .client
                    .send(
                        &addr,
                        ControlCommand::SetSlotState {
                            slot,
                            state: SlotStateChange::OwnedBy(target.to_string()),
                        },
                    )
                    .await;
                (addr, result)
            }
        });

        let failures: Vec<(NodeAddr, String)> = join_all(sends)
            .await
            .into_iter()
            .filter_map(|(addr, result)| result.err().map(|e| (addr, e.to_string())))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            warn!(slot, failed = failures.len(), "Ownership broadcast incomplete");
            Err(TribError::PartialReassignment {
                slot,
                target: target.to_string(),
                failures,
            })
        }
    }

    fn resolve(&self, topology: &ClusterTopology, node_id: &str) -> Result<NodeAddr, TribError> {
        topology
            .node_by_id(node_id)
            .map(|n| n.addr.clone())
            .ok_or_else(|| TribError::UnknownMaster {
                master_id: node_id.to_string(),
            })
    }
}
