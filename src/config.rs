//! Orchestrator configuration.

use std::time::Duration;

/// Tunables for node connections and migration behavior.
#[derive(Clone, Debug)]
pub struct TribConfig {
    /// Timeout for establishing a connection to a node.
    pub connection_timeout: Duration,
    /// Timeout for a single control command.
    pub command_timeout: Duration,
    /// How many keys to request per GETKEYSINSLOT batch during migration.
    pub migrate_batch: u64,
    /// Timeout passed to the node for each MIGRATE call.
    pub migrate_timeout: Duration,
    /// How many slots of one reshard may be migrated concurrently.
    pub slot_concurrency: usize,
    /// Interval between polls while waiting for gossip to propagate a join.
    pub join_poll_interval: Duration,
    /// How many polls to attempt before giving up on a join.
    pub join_poll_attempts: u32,
}

impl Default for TribConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            migrate_batch: 100,
            migrate_timeout: Duration::from_secs(15),
            slot_concurrency: 4,
            join_poll_interval: Duration::from_millis(500),
            join_poll_attempts: 20,
        }
    }
}

impl TribConfig {
    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the per-command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the key batch size for slot migration.
    pub fn with_migrate_batch(mut self, batch: u64) -> Self {
        self.migrate_batch = batch;
        self
    }

    /// Set the number of slots migrated concurrently within one reshard.
    pub fn with_slot_concurrency(mut self, concurrency: usize) -> Self {
        self.slot_concurrency = concurrency.max(1);
        self
    }
}
