//! Application layer for Parley.
//!
//! This crate provides the conversation history service and the pieces that
//! coordinate it across surfaces: sync, legacy migration, view snapshots and
//! the store domains that bridge history into a surface's store.

pub mod domains;
pub mod history;
pub mod migration;
pub mod snapshot;
pub mod sync;

pub use history::HistoryService;
pub use migration::{LegacyMigrator, MigrationOptions, MigrationReport};
pub use snapshot::SnapshotRegistry;
pub use sync::{HistorySync, SyncHandle};
