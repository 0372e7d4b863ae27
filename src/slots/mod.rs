//! Slot allocation and migration.
//!
//! `allocator` is pure planning: slot distribution, replica placement, and
//! move selection. `migration` executes plans against live nodes.

pub mod allocator;
pub mod migration;

pub use allocator::{
    build_create_params, calculate_distribution, plan_move_count, CreateClusterParam,
    MigrationPlan, SlotMove,
};
pub use migration::{CancelFlag, MigrationCoordinator, MigrationReport};
