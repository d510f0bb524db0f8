//! Legacy chat history migration.
//!
//! - `layouts`: recognizers for the record shapes older releases stored
//! - `migrator`: the idempotent migration run and its report

mod layouts;
mod migrator;

pub use layouts::{
    default_layouts, ExchangeLayout, LegacyLayout, LegacyRecord, MessagesLayout, TranscriptLayout,
};
pub use migrator::{legacy_id, LegacyMigrator, MigrationError, MigrationOptions, MigrationReport};
