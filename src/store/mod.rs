//! Durable, ordered persistence: the append-only event log, snapshots, and
//! crash-resume metadata.

pub mod event_store;
pub mod schema;

pub use event_store::{Snapshot, SnapshotPolicy, SqliteEventStore, StoreStats};
