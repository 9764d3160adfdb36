//! SQLite-backed append-only event log with snapshots.
//!
//! The log exclusively owns the canonical session history. Appends are the
//! linearization point: an effect whose result never became a persisted
//! event is considered not to have happened.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::model::{Event, EventPayload, SessionState};
use crate::store::schema::{initialize_schema, is_initialized};

/// A state materialization bound to the last event it incorporates.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: SessionState,
    pub at_event_index: i64,
}

/// Statistics about the event log.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub total_events: u64,
    pub events_by_kind: HashMap<String, i64>,
    pub snapshot_count: u64,
}

/// Decides when the orchestrator materializes a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotPolicy {
    /// Snapshot every N events regardless of kind.
    pub every: u64,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self { every: 100 }
    }
}

impl SnapshotPolicy {
    /// Phase boundaries and convergence always snapshot; otherwise every
    /// `every`-th event does.
    pub fn should_snapshot(&self, event_index: i64, event: &Event) -> bool {
        if matches!(
            event.payload,
            EventPayload::PhaseStarted { .. }
                | EventPayload::PhaseCompleted { .. }
                | EventPayload::ConvergenceReached { .. }
        ) {
            return true;
        }
        self.every > 0 && event_index as u64 % self.every == 0
    }
}

/// SQLite-backed event store.
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    /// Open or create an event store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::storage(e.to_string()))?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::storage(e.to_string()))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::storage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::storage(e.to_string()))
    }

    // ==================== Event Operations ====================

    /// Append one event and return its assigned monotonic index.
    pub fn append_event(&self, event: &Event) -> Result<i64> {
        let payload = serde_json::to_string(&event.payload)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (kind, payload, timestamp) VALUES (?1, ?2, ?3)",
                params![event.kind(), payload, event.at.to_rfc3339()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Fetch one event by index.
    pub fn get_event(&self, index: i64) -> Result<Option<Event>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT payload, timestamp FROM events WHERE id = ?1",
                params![index],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                },
            )
            .optional()
        })?;

        row.map(|(payload, timestamp)| decode_event(&payload, &timestamp))
            .transpose()
    }

    /// Fetch events ordered by index, optionally bounded inclusively.
    pub fn get_events(&self, from: Option<i64>, to: Option<i64>) -> Result<Vec<Event>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT payload, timestamp FROM events
                 WHERE id >= ?1 AND id <= ?2
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(
                    params![from.unwrap_or(0), to.unwrap_or(i64::MAX)],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                        ))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.iter()
            .map(|(payload, timestamp)| decode_event(payload, timestamp))
            .collect()
    }

    /// Index of the most recent event, if any.
    pub fn last_event_index(&self) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT MAX(id) FROM events", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
        })
    }

    // ==================== Snapshot Operations ====================

    /// Persist a snapshot of `state` incorporating events up to `at_index`.
    pub fn create_snapshot(&self, state: &SessionState, at_index: i64) -> Result<()> {
        let serialized = serde_json::to_string(state)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO snapshots (at_event_index, state) VALUES (?1, ?2)",
                params![at_index, serialized],
            )?;
            Ok(())
        })
    }

    /// The snapshot incorporating the most events, if any.
    pub fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT state, at_event_index FROM snapshots
                 ORDER BY at_event_index DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                    ))
                },
            )
            .optional()
        })?;

        row.map(|(state, at_event_index)| {
            let state = serde_json::from_str(&state)
                .map_err(|e| Error::corrupt(format!("snapshot decode failed: {}", e)))?;
            Ok(Snapshot {
                state,
                at_event_index,
            })
        })
        .transpose()
    }

    // ==================== Metadata Operations ====================

    /// Set a crash-resume hint.
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO metadata (key, value, updated_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// Read a crash-resume hint.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Get statistics about the log.
    pub fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let total_events: i64 =
                conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;

            let events_by_kind: HashMap<String, i64> = {
                let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM events GROUP BY kind")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let snapshot_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;

            Ok(StoreStats {
                total_events: total_events as u64,
                events_by_kind,
                snapshot_count: snapshot_count as u64,
            })
        })
    }
}

fn decode_event(payload: &str, timestamp: &str) -> Result<Event> {
    let payload: EventPayload = serde_json::from_str(payload)
        .map_err(|e| Error::corrupt(format!("event payload decode failed: {}", e)))?;
    let at = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| Error::corrupt(format!("event timestamp decode failed: {}", e)))?
        .with_timezone(&Utc);
    Ok(Event::new(at, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;
    use pretty_assertions::assert_eq;

    fn event(secs: i64, payload: EventPayload) -> Event {
        Event::new(
            DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(secs),
            payload,
        )
    }

    #[test]
    fn test_append_then_fetch_by_index_round_trips() {
        let store = SqliteEventStore::in_memory().unwrap();
        let original = event(
            1234,
            EventPayload::TestsPassed {
                total: 7,
                coverage: Some(81.25),
            },
        );

        let index = store.append_event(&original).unwrap();
        let fetched = store.get_event(index).unwrap().unwrap();
        assert_eq!(fetched, original);
    }

    #[test]
    fn test_indices_are_monotonic_and_reads_ordered() {
        let store = SqliteEventStore::in_memory().unwrap();
        let first = store
            .append_event(&event(1, EventPayload::TurnStarted { turn: 1 }))
            .unwrap();
        let second = store
            .append_event(&event(2, EventPayload::TurnCompleted { turn: 1 }))
            .unwrap();
        assert!(second > first);

        let events = store.get_events(None, None).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "turn_started");
        assert_eq!(events[1].kind(), "turn_completed");
        assert_eq!(store.last_event_index().unwrap(), Some(second));
    }

    #[test]
    fn test_get_events_from_bound() {
        let store = SqliteEventStore::in_memory().unwrap();
        for turn in 1..=5 {
            store
                .append_event(&event(turn, EventPayload::TurnStarted { turn: turn as u64 }))
                .unwrap();
        }

        let tail = store.get_events(Some(4), None).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(
            tail[0].payload,
            EventPayload::TurnStarted { turn: 4 }
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let store = SqliteEventStore::in_memory().unwrap();
        let mut state = SessionState::initial("build a parser");
        state.turn = 42;
        state.phase = Phase::Testing;

        store.create_snapshot(&state, 42).unwrap();
        let snapshot = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.at_event_index, 42);
        assert_eq!(snapshot.state, state);
    }

    #[test]
    fn test_latest_snapshot_wins_by_event_index() {
        let store = SqliteEventStore::in_memory().unwrap();
        let mut early = SessionState::initial("p");
        early.turn = 1;
        let mut late = SessionState::initial("p");
        late.turn = 9;

        store.create_snapshot(&late, 90).unwrap();
        store.create_snapshot(&early, 10).unwrap();

        let snapshot = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.at_event_index, 90);
        assert_eq!(snapshot.state.turn, 9);
    }

    #[test]
    fn test_metadata_upsert() {
        let store = SqliteEventStore::in_memory().unwrap();
        assert_eq!(store.get_metadata("prompt").unwrap(), None);

        store.set_metadata("prompt", "one").unwrap();
        store.set_metadata("prompt", "two").unwrap();
        assert_eq!(store.get_metadata("prompt").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_corrupt_payload_is_fatal() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO events (kind, payload, timestamp)
                     VALUES ('turn_started', 'not json', '1970-01-01T00:00:00+00:00')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let err = store.get_events(None, None).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_stats_counts_by_kind() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .append_event(&event(1, EventPayload::TurnStarted { turn: 1 }))
            .unwrap();
        store
            .append_event(&event(2, EventPayload::TurnStarted { turn: 2 }))
            .unwrap();
        store
            .append_event(&event(3, EventPayload::TypeCheckPassed))
            .unwrap();
        store.create_snapshot(&SessionState::initial("p"), 3).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.events_by_kind.get("turn_started"), Some(&2));
        assert_eq!(stats.snapshot_count, 1);
    }

    #[test]
    fn test_open_on_disk_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");

        {
            let store = SqliteEventStore::open(&path).unwrap();
            store
                .append_event(&event(1, EventPayload::TurnStarted { turn: 1 }))
                .unwrap();
        }

        let reopened = SqliteEventStore::open(&path).unwrap();
        assert_eq!(reopened.get_events(None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_policy_triggers() {
        let policy = SnapshotPolicy::default();
        let boundary = event(
            1,
            EventPayload::PhaseCompleted {
                phase: Phase::Design,
                turns_used: 3,
            },
        );
        let plain = event(2, EventPayload::TurnStarted { turn: 5 });

        assert!(policy.should_snapshot(7, &boundary));
        assert!(policy.should_snapshot(100, &plain));
        assert!(!policy.should_snapshot(101, &plain));
    }
}
