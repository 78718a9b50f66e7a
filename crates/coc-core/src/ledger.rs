//! Append-only JSON-Lines event ledger with per-trace locking and
//! malformed-tail recovery.
//!
//! The ledger file (`events.jsonl`) holds one JSON event per line,
//! terminated by `\n`. Writes never mutate or delete prior lines; the only
//! legal mutation is tail truncation of a malformed write.
//!
//! Appends run under a **trace-level exclusive lock**: a lockfile created
//! with exclusive-create semantics, polled with bounded delay and a five
//! second timeout. The full read-modify-append-metadata sequence happens
//! under the lock, so ledger order is the append order observed under it.
//!
//! A crash between appending the line and updating the session metadata
//! leaves the session head stale; the next append detects the mismatch via
//! the `prev_event_hash` precondition and rejects. [`Ledger::repair_session`]
//! rebuilds the metadata from the persisted event file, which is truth.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::event::ProtocolEvent;
use crate::home::CocHome;
use crate::schema::SchemaError;
use crate::trace::{TraceSession, TraceStore, TraceStoreError};

/// How long an append waits for the trace lock before failing.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between lock acquisition attempts.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Name of the per-trace append lockfile.
const LOCK_FILE_NAME: &str = ".append.lock";

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// I/O error during ledger file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The event failed boundary validation.
    #[error(transparent)]
    Validation(#[from] SchemaError),

    /// The event's trace id does not match the target trace.
    #[error("trace id mismatch: event belongs to {event_trace_id}, ledger is {trace_id}")]
    TraceIdMismatch {
        /// The ledger's trace id.
        trace_id: String,
        /// The event's trace id.
        event_trace_id: String,
    },

    /// The event's `prev_event_hash` does not match the session head.
    ///
    /// The caller must reload the head and retry with a fresh event. If the
    /// mismatch persists, the session metadata is stale (crashed append)
    /// and the trace needs repair.
    #[error(
        "prev hash mismatch: event chains from {event_prev_hash}, session head is {head_hash}"
    )]
    PrevHashMismatch {
        /// The session's current head hash.
        head_hash: String,
        /// The event's `prev_event_hash`.
        event_prev_hash: String,
    },

    /// An event with the same id is already in the ledger.
    #[error("duplicate event id: {event_id}")]
    DuplicateEventId {
        /// The duplicated event id.
        event_id: String,
    },

    /// The trace lock could not be acquired within [`LOCK_TIMEOUT`].
    #[error(
        "timed out acquiring append lock for trace {trace_id} after {timeout_ms} ms; \
         if no appender is running, remove the stale lockfile"
    )]
    LockTimeout {
        /// The contended trace.
        trace_id: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u128,
    },

    /// Trace store operation failed.
    #[error(transparent)]
    Trace(#[from] TraceStoreError),
}

/// Exclusive append lock for one trace, released on drop.
struct AppendLock {
    path: PathBuf,
}

impl AppendLock {
    /// Acquires the lock by exclusive-create, polling with bounded delay.
    fn acquire(trace_dir: &Path, trace_id: &str) -> Result<Self, LedgerError> {
        let path = trace_dir.join(LOCK_FILE_NAME);
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    // Holder PID, for operator diagnosis of stale locks.
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { path });
                },
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if started.elapsed() >= LOCK_TIMEOUT {
                        return Err(LedgerError::LockTimeout {
                            trace_id: trace_id.to_string(),
                            timeout_ms: LOCK_TIMEOUT.as_millis(),
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                },
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for AppendLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove append lock");
        }
    }
}

/// Append-only event ledger for the traces under a home.
pub struct Ledger {
    traces: TraceStore,
}

impl Ledger {
    /// Creates a ledger handle for the given home.
    #[must_use]
    pub fn new(home: &CocHome) -> Self {
        Self {
            traces: TraceStore::new(home),
        }
    }

    /// Appends one event to a trace's ledger.
    ///
    /// Runs under the trace's exclusive append lock. The event must chain
    /// from the current session head, carry the ledger's trace id, and use
    /// an id not present in the ledger. On success the session metadata is
    /// advanced (head hash, event count, artifact count) and saved.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on validation failure, integrity
    /// precondition violation, lock timeout, or I/O failure.
    pub fn append_event(
        &self,
        trace_id: &str,
        event: &ProtocolEvent,
    ) -> Result<TraceSession, LedgerError> {
        event.validate()?;

        let trace_dir = self.traces.trace_dir(trace_id);
        let lock = AppendLock::acquire(&trace_dir, trace_id)?;
        let result = self.append_event_locked(trace_id, event);
        drop(lock);
        result
    }

    fn append_event_locked(
        &self,
        trace_id: &str,
        event: &ProtocolEvent,
    ) -> Result<TraceSession, LedgerError> {
        let mut session = self.traces.load_trace(trace_id)?;

        if event.trace_id != trace_id {
            return Err(LedgerError::TraceIdMismatch {
                trace_id: trace_id.to_string(),
                event_trace_id: event.trace_id.clone(),
            });
        }
        if event.prev_event_hash != session.head_event_hash {
            return Err(LedgerError::PrevHashMismatch {
                head_hash: session.head_event_hash.clone(),
                event_prev_hash: event.prev_event_hash.clone(),
            });
        }
        let existing = self.read_events(trace_id, false)?;
        if existing.iter().any(|e| e.event_id == event.event_id) {
            return Err(LedgerError::DuplicateEventId {
                event_id: event.event_id.clone(),
            });
        }

        let mut line = serde_json::to_string(event).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.traces.events_path(trace_id))?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;

        session.head_event_hash.clone_from(&event.event_hash);
        session.event_count += 1;
        session.artifact_count += event.artifacts.len() as u64;
        self.traces.save_trace(&session)?;

        debug!(
            trace_id,
            event_id = %event.event_id,
            event_type = %event.event_type,
            count = session.event_count,
            "appended event"
        );
        Ok(session)
    }

    /// Reads a trace's committed events.
    ///
    /// Lines are split on `\n` with empties skipped. On the first malformed
    /// line parsing stops and the events up to that point are returned.
    /// With `recover_malformed_tail`, the file is additionally truncated to
    /// the end of the last good line, discarding the trailing garbage; the
    /// truncation is idempotent across restarts.
    ///
    /// A missing ledger file reads as empty.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read or truncated.
    pub fn read_events(
        &self,
        trace_id: &str,
        recover_malformed_tail: bool,
    ) -> Result<Vec<ProtocolEvent>, LedgerError> {
        let path = self.traces.events_path(trace_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&path)?;
        let mut events = Vec::new();
        let mut good_end: u64 = 0;
        let mut offset: u64 = 0;
        let mut malformed = false;

        for segment in contents.split_inclusive('\n') {
            let segment_len = segment.len() as u64;
            let line = segment.trim_end_matches('\n');
            if line.is_empty() {
                offset += segment_len;
                good_end = offset;
                continue;
            }
            match serde_json::from_str::<ProtocolEvent>(line) {
                Ok(event) => {
                    events.push(event);
                    offset += segment_len;
                    good_end = offset;
                },
                Err(e) => {
                    warn!(
                        trace_id,
                        at_byte = offset,
                        error = %e,
                        "malformed ledger line; discarding tail"
                    );
                    malformed = true;
                    break;
                },
            }
        }

        if malformed && recover_malformed_tail {
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(good_end)?;
            file.sync_all()?;
        }

        Ok(events)
    }

    /// Rebuilds a trace's session metadata from the persisted event file.
    ///
    /// The event file is truth after a crash between line append and
    /// metadata save: the head hash becomes the last event's hash, and the
    /// counts are recomputed from the committed lines. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the trace does not exist or the ledger
    /// cannot be read.
    pub fn repair_session(&self, trace_id: &str) -> Result<TraceSession, LedgerError> {
        let trace_dir = self.traces.trace_dir(trace_id);
        let lock = AppendLock::acquire(&trace_dir, trace_id)?;

        let result = (|| {
            let mut session = self.traces.load_trace(trace_id)?;
            let events = self.read_events(trace_id, true)?;

            session.head_event_hash = events
                .last()
                .map_or_else(
                    || crate::schema::GENESIS_PREV_HASH.to_string(),
                    |e| e.event_hash.clone(),
                );
            session.event_count = events.len() as u64;
            session.artifact_count = events.iter().map(|e| e.artifacts.len() as u64).sum();
            self.traces.save_trace(&session)?;
            Ok(session)
        })();

        drop(lock);
        result
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::event::{EventBuilder, EventType};
    use crate::policy::{PolicyProfile, Role};
    use crate::schema::GENESIS_PREV_HASH;
    use crate::trace::Participant;

    struct Fixture {
        _dir: TempDir,
        home: CocHome,
        trace_id: String,
        signing_key: ed25519_dalek::SigningKey,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let home = CocHome::new(dir.path());
        let store = TraceStore::new(&home);
        let session = store
            .create_trace(
                "task-ledger",
                vec![
                    Participant {
                        agent_id: "agent.planner".to_string(),
                        role: Role::Planner,
                    },
                    Participant {
                        agent_id: "agent.executor".to_string(),
                        role: Role::Executor,
                    },
                    Participant {
                        agent_id: "agent.auditor".to_string(),
                        role: Role::Auditor,
                    },
                ],
                PolicyProfile::Default,
                None,
                None,
            )
            .unwrap();
        let mut rng = rand::thread_rng();
        Fixture {
            _dir: dir,
            home,
            trace_id: session.trace_id,
            signing_key: ed25519_dalek::SigningKey::generate(&mut rng),
        }
    }

    fn build_event(fixture: &Fixture, prev_hash: &str) -> ProtocolEvent {
        EventBuilder::new(fixture.trace_id.clone(), EventType::SessionInitialized)
            .actor("agent.planner", Role::Planner, "key_0123456789abcdef")
            .payload("session", json!({"task": "ledger tests"}))
            .prev_event_hash(prev_hash)
            .build_signed(&fixture.signing_key)
            .unwrap()
    }

    #[test]
    fn test_append_advances_head_and_counts() {
        let fixture = fixture();
        let ledger = Ledger::new(&fixture.home);

        let first = build_event(&fixture, GENESIS_PREV_HASH);
        let session = ledger.append_event(&fixture.trace_id, &first).unwrap();
        assert_eq!(session.head_event_hash, first.event_hash);
        assert_eq!(session.event_count, 1);

        let second = build_event(&fixture, &first.event_hash);
        let session = ledger.append_event(&fixture.trace_id, &second).unwrap();
        assert_eq!(session.head_event_hash, second.event_hash);
        assert_eq!(session.event_count, 2);

        let events = ledger.read_events(&fixture.trace_id, true).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, first.event_id);
        assert_eq!(events[1].event_id, second.event_id);
    }

    #[test]
    fn test_append_rejects_stale_prev_hash() {
        let fixture = fixture();
        let ledger = Ledger::new(&fixture.home);

        let first = build_event(&fixture, GENESIS_PREV_HASH);
        ledger.append_event(&fixture.trace_id, &first).unwrap();

        // Chains from genesis again instead of the new head.
        let stale = build_event(&fixture, GENESIS_PREV_HASH);
        assert!(matches!(
            ledger.append_event(&fixture.trace_id, &stale),
            Err(LedgerError::PrevHashMismatch { .. })
        ));
    }

    #[test]
    fn test_append_rejects_duplicate_event_id() {
        let fixture = fixture();
        let ledger = Ledger::new(&fixture.home);

        let first = build_event(&fixture, GENESIS_PREV_HASH);
        ledger.append_event(&fixture.trace_id, &first).unwrap();

        let mut replay = first.clone();
        replay.prev_event_hash.clone_from(&first.event_hash);
        // Re-seal so only the duplicate id is at fault.
        replay.signature = None;
        replay.event_hash = replay.compute_event_hash().unwrap();
        assert!(matches!(
            ledger.append_event(&fixture.trace_id, &replay),
            Err(LedgerError::DuplicateEventId { .. })
        ));
    }

    #[test]
    fn test_append_rejects_foreign_trace_id() {
        let fixture = fixture();
        let ledger = Ledger::new(&fixture.home);

        let mut event = build_event(&fixture, GENESIS_PREV_HASH);
        event.trace_id = crate::schema::new_ulid();
        event.event_hash = event.compute_event_hash().unwrap();
        assert!(matches!(
            ledger.append_event(&fixture.trace_id, &event),
            Err(LedgerError::TraceIdMismatch { .. })
        ));
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let fixture = fixture();
        let ledger = Ledger::new(&fixture.home);
        fs::remove_file(
            TraceStore::new(&fixture.home).events_path(&fixture.trace_id),
        )
        .unwrap();
        assert!(ledger.read_events(&fixture.trace_id, true).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_tail_recovery_is_idempotent() {
        let fixture = fixture();
        let ledger = Ledger::new(&fixture.home);

        let first = build_event(&fixture, GENESIS_PREV_HASH);
        ledger.append_event(&fixture.trace_id, &first).unwrap();
        let second = build_event(&fixture, &first.event_hash);
        ledger.append_event(&fixture.trace_id, &second).unwrap();

        let path = TraceStore::new(&fixture.home).events_path(&fixture.trace_id);
        let clean_len = fs::metadata(&path).unwrap().len();

        // Simulate a torn write.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"schema_version\":\"1.0\",\"trunc").unwrap();
        file.sync_all().unwrap();

        let events = ledger.read_events(&fixture.trace_id, true).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), clean_len);

        // Second pass converges on the same prefix and leaves it on disk.
        let events = ledger.read_events(&fixture.trace_id, true).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), clean_len);
    }

    #[test]
    fn test_recovery_disabled_leaves_file_untouched() {
        let fixture = fixture();
        let ledger = Ledger::new(&fixture.home);

        let first = build_event(&fixture, GENESIS_PREV_HASH);
        ledger.append_event(&fixture.trace_id, &first).unwrap();

        let path = TraceStore::new(&fixture.home).events_path(&fixture.trace_id);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"garbage").unwrap();
        file.sync_all().unwrap();
        let dirty_len = fs::metadata(&path).unwrap().len();

        let events = ledger.read_events(&fixture.trace_id, false).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), dirty_len);
    }

    #[test]
    fn test_lock_contention_times_out() {
        let fixture = fixture();
        let ledger = Ledger::new(&fixture.home);

        // Hold the lock by creating the lockfile out of band.
        let lock_path = TraceStore::new(&fixture.home)
            .trace_dir(&fixture.trace_id)
            .join(".append.lock");
        fs::write(&lock_path, b"4242").unwrap();

        let event = build_event(&fixture, GENESIS_PREV_HASH);
        let started = Instant::now();
        let result = ledger.append_event(&fixture.trace_id, &event);
        assert!(matches!(result, Err(LedgerError::LockTimeout { .. })));
        assert!(started.elapsed() >= LOCK_TIMEOUT);

        // After the stale lock is removed the append succeeds.
        fs::remove_file(&lock_path).unwrap();
        ledger.append_event(&fixture.trace_id, &event).unwrap();
    }

    #[test]
    fn test_lock_released_after_failed_append() {
        let fixture = fixture();
        let ledger = Ledger::new(&fixture.home);

        let stale = build_event(&fixture, &"f".repeat(64));
        assert!(ledger.append_event(&fixture.trace_id, &stale).is_err());

        // Lock must not leak: a good append goes straight through.
        let good = build_event(&fixture, GENESIS_PREV_HASH);
        ledger.append_event(&fixture.trace_id, &good).unwrap();
    }

    #[test]
    fn test_repair_rebuilds_stale_session() {
        let fixture = fixture();
        let ledger = Ledger::new(&fixture.home);
        let store = TraceStore::new(&fixture.home);

        let first = build_event(&fixture, GENESIS_PREV_HASH);
        ledger.append_event(&fixture.trace_id, &first).unwrap();
        let second = build_event(&fixture, &first.event_hash);
        ledger.append_event(&fixture.trace_id, &second).unwrap();

        // Simulate the crash window: metadata rolled back, events intact.
        let mut session = store.load_trace(&fixture.trace_id).unwrap();
        session.head_event_hash = GENESIS_PREV_HASH.to_string();
        session.event_count = 0;
        session.artifact_count = 0;
        store.save_trace(&session).unwrap();

        let repaired = ledger.repair_session(&fixture.trace_id).unwrap();
        assert_eq!(repaired.head_event_hash, second.event_hash);
        assert_eq!(repaired.event_count, 2);

        // Appends work again after repair.
        let third = build_event(&fixture, &second.event_hash);
        ledger.append_event(&fixture.trace_id, &third).unwrap();
    }
}
