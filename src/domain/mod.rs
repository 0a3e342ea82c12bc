//! Domain layer for event-relay.
//!
//! Contains the canonical types shared across all modules:
//! - `Event`: one captured occurrence, owned by the pipeline until delivered
//! - `EventRecord`: an event as persisted, with its schema version

pub mod event;

pub use event::{CURRENT_SCHEMA, Event, EventRecord, RecordMigration, migrate_records};
