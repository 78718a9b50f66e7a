//! Per-trace session metadata and trace directory management.
//!
//! A trace is a single multi-agent session: an append-only ledger of
//! events, its metadata (`trace.meta.json`), and all artifacts referenced
//! by its events. Session metadata is mutated only by append (head hash,
//! counts) and by final status transitions.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::home::CocHome;
use crate::policy::{PolicyProfile, Role};
use crate::schema::{self, GENESIS_PREV_HASH, SCHEMA_VERSION};

/// Lifecycle status of a trace session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    /// The session is still accepting events.
    Running,
    /// The session finished successfully.
    Succeeded,
    /// The session finished unsuccessfully.
    Failed,
    /// The session was aborted before finishing.
    Aborted,
    /// Verification detected tampering.
    Tampered,
}

/// One participating agent and the role it holds in the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Participant {
    /// Stable agent identifier.
    pub agent_id: String,
    /// Role the agent holds in this trace.
    pub role: Role,
}

/// Session metadata for a single trace (`trace.meta.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceSession {
    /// Schema version of this record.
    pub schema_version: String,
    /// Unique trace identifier (ULID).
    pub trace_id: String,
    /// The task this session works on.
    pub task_id: String,
    /// Session start timestamp (ISO-8601 ms).
    pub started_at: String,
    /// Session end timestamp, present once the session leaves `running`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Lifecycle status.
    pub status: TraceStatus,
    /// Participating agents; at least three distinct roles.
    pub participants: Vec<Participant>,
    /// `event_hash` of the most recently appended event, or the genesis
    /// value for an empty trace.
    pub head_event_hash: String,
    /// Number of committed events.
    pub event_count: u64,
    /// Total artifact references across committed events.
    pub artifact_count: u64,
    /// Verification strictness profile for this trace.
    pub policy_profile: PolicyProfile,
    /// Versions of the tools used in the session, when recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_versions: Option<BTreeMap<String, String>>,
    /// Fingerprint of the producing configuration, when recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_fingerprint: Option<String>,
}

/// Errors that can occur during trace store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TraceStoreError {
    /// I/O error during trace directory operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No trace exists for the given id.
    #[error("trace not found: {trace_id}")]
    NotFound {
        /// The trace id that was not found.
        trace_id: String,
    },

    /// A trace metadata file exists but cannot be parsed.
    #[error("invalid trace metadata for {trace_id}: {message}")]
    InvalidMeta {
        /// The trace whose metadata is invalid.
        trace_id: String,
        /// Description of the problem.
        message: String,
    },

    /// Fewer than three distinct roles among the participants.
    #[error("insufficient participants: {distinct} distinct roles, need at least 3")]
    InsufficientParticipants {
        /// Number of distinct roles provided.
        distinct: usize,
    },
}

/// Store for per-trace directories under `<home>/traces`.
pub struct TraceStore {
    traces_dir: PathBuf,
}

impl TraceStore {
    /// Creates a store handle for the given home.
    #[must_use]
    pub fn new(home: &CocHome) -> Self {
        Self {
            traces_dir: home.traces_dir(),
        }
    }

    /// Creates a new trace session with an empty ledger.
    ///
    /// The session starts `running` with the genesis head hash and zero
    /// counts; an empty `events.jsonl` is created alongside the metadata.
    ///
    /// # Errors
    ///
    /// Returns [`TraceStoreError::InsufficientParticipants`] if fewer than
    /// three distinct roles are present, or an I/O error if the trace
    /// directory cannot be created.
    pub fn create_trace(
        &self,
        task_id: &str,
        participants: Vec<Participant>,
        policy_profile: PolicyProfile,
        tool_versions: Option<BTreeMap<String, String>>,
        config_fingerprint: Option<String>,
    ) -> Result<TraceSession, TraceStoreError> {
        let distinct: HashSet<Role> = participants.iter().map(|p| p.role).collect();
        if distinct.len() < 3 {
            return Err(TraceStoreError::InsufficientParticipants {
                distinct: distinct.len(),
            });
        }

        let session = TraceSession {
            schema_version: SCHEMA_VERSION.to_string(),
            trace_id: schema::new_ulid(),
            task_id: task_id.to_string(),
            started_at: schema::now_iso8601_millis(),
            ended_at: None,
            status: TraceStatus::Running,
            participants,
            head_event_hash: GENESIS_PREV_HASH.to_string(),
            event_count: 0,
            artifact_count: 0,
            policy_profile,
            tool_versions,
            config_fingerprint,
        };

        let trace_dir = self.trace_dir(&session.trace_id);
        fs::create_dir_all(trace_dir.join("reports"))?;
        fs::File::create(self.events_path(&session.trace_id))?;
        self.save_trace(&session)?;

        info!(trace_id = %session.trace_id, task_id, "created trace");
        Ok(session)
    }

    /// Loads a trace session by id.
    ///
    /// # Errors
    ///
    /// Returns [`TraceStoreError::NotFound`] if the trace does not exist or
    /// [`TraceStoreError::InvalidMeta`] if its metadata cannot be parsed.
    pub fn load_trace(&self, trace_id: &str) -> Result<TraceSession, TraceStoreError> {
        let path = self.meta_path(trace_id);
        if !path.exists() {
            return Err(TraceStoreError::NotFound {
                trace_id: trace_id.to_string(),
            });
        }
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| TraceStoreError::InvalidMeta {
            trace_id: trace_id.to_string(),
            message: e.to_string(),
        })
    }

    /// Persists a trace session's metadata.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the metadata cannot be written.
    pub fn save_trace(&self, session: &TraceSession) -> Result<(), TraceStoreError> {
        let serialized = serde_json::to_string_pretty(session).map_err(|e| {
            TraceStoreError::InvalidMeta {
                trace_id: session.trace_id.clone(),
                message: e.to_string(),
            }
        })?;
        let path = self.meta_path(&session.trace_id);
        let tmp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(serialized.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Transitions a trace to a final status.
    ///
    /// # Errors
    ///
    /// Returns [`TraceStoreError`] if the trace cannot be loaded or saved.
    pub fn update_status(
        &self,
        trace_id: &str,
        status: TraceStatus,
        ended_at: Option<String>,
    ) -> Result<TraceSession, TraceStoreError> {
        let mut session = self.load_trace(trace_id)?;
        session.status = status;
        session.ended_at = ended_at;
        self.save_trace(&session)?;
        Ok(session)
    }

    /// Lists all trace ids, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the traces directory cannot be read.
    pub fn list_trace_ids(&self) -> Result<Vec<String>, TraceStoreError> {
        if !self.traces_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.traces_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Lists all trace sessions, sorted by `started_at` descending.
    ///
    /// Traces whose metadata cannot be parsed are skipped.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the traces directory cannot be read.
    pub fn list_traces(&self) -> Result<Vec<TraceSession>, TraceStoreError> {
        let mut sessions: Vec<TraceSession> = self
            .list_trace_ids()?
            .iter()
            .filter_map(|id| self.load_trace(id).ok())
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }

    /// Resolves operator input to a trace id.
    ///
    /// Accepts a filesystem path ending in `events.jsonl` (the trace id is
    /// the containing directory's name), an existing directory (its
    /// basename), or the id itself.
    #[must_use]
    pub fn resolve_trace_id(&self, input: &str) -> String {
        let path = Path::new(input);
        if path.file_name().is_some_and(|n| n == "events.jsonl") {
            if let Some(name) = path.parent().and_then(Path::file_name) {
                return name.to_string_lossy().into_owned();
            }
        }
        if path.is_dir() {
            if let Some(name) = path.file_name() {
                return name.to_string_lossy().into_owned();
            }
        }
        input.to_string()
    }

    /// Directory of a trace.
    #[must_use]
    pub fn trace_dir(&self, trace_id: &str) -> PathBuf {
        self.traces_dir.join(trace_id)
    }

    /// Path of a trace's metadata file.
    #[must_use]
    pub fn meta_path(&self, trace_id: &str) -> PathBuf {
        self.trace_dir(trace_id).join("trace.meta.json")
    }

    /// Path of a trace's event ledger.
    #[must_use]
    pub fn events_path(&self, trace_id: &str) -> PathBuf {
        self.trace_dir(trace_id).join("events.jsonl")
    }

    /// Directory of a trace's verification reports.
    #[must_use]
    pub fn reports_dir(&self, trace_id: &str) -> PathBuf {
        self.trace_dir(trace_id).join("reports")
    }

    /// Path of a trace's latest verification report.
    #[must_use]
    pub fn latest_report_path(&self, trace_id: &str) -> PathBuf {
        self.trace_dir(trace_id).join("verification.latest.json")
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn participants() -> Vec<Participant> {
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
                agent_id: "agent.critic".to_string(),
                role: Role::Critic,
            },
            Participant {
                agent_id: "agent.auditor".to_string(),
                role: Role::Auditor,
            },
        ]
    }

    fn store() -> (TempDir, TraceStore) {
        let dir = TempDir::new().unwrap();
        let home = CocHome::new(dir.path());
        let store = TraceStore::new(&home);
        (dir, store)
    }

    #[test]
    fn test_create_trace_initial_state() {
        let (dir, store) = store();
        let session = store
            .create_trace("task-1", participants(), PolicyProfile::Default, None, None)
            .unwrap();

        assert_eq!(session.status, TraceStatus::Running);
        assert_eq!(session.head_event_hash, GENESIS_PREV_HASH);
        assert_eq!(session.event_count, 0);
        assert_eq!(session.artifact_count, 0);

        let trace_dir = dir.path().join("traces").join(&session.trace_id);
        assert!(trace_dir.join("trace.meta.json").exists());
        assert!(trace_dir.join("events.jsonl").exists());
        assert!(trace_dir.join("reports").is_dir());
        assert_eq!(
            fs::read(trace_dir.join("events.jsonl")).unwrap().len(),
            0,
            "ledger starts empty"
        );
    }

    #[test]
    fn test_create_trace_requires_three_roles() {
        let (_dir, store) = store();
        let two_roles = vec![
            Participant {
                agent_id: "a".to_string(),
                role: Role::Planner,
            },
            Participant {
                agent_id: "b".to_string(),
                role: Role::Executor,
            },
            Participant {
                agent_id: "c".to_string(),
                role: Role::Executor,
            },
        ];
        assert!(matches!(
            store.create_trace("t", two_roles, PolicyProfile::Default, None, None),
            Err(TraceStoreError::InsufficientParticipants { distinct: 2 })
        ));
    }

    #[test]
    fn test_load_save_round_trip() {
        let (_dir, store) = store();
        let session = store
            .create_trace("task-2", participants(), PolicyProfile::Strict, None, None)
            .unwrap();
        let loaded = store.load_trace(&session.trace_id).unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_load_missing_trace() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load_trace("01ARZ3NDEKTSV4RRFFQ69G5FAV"),
            Err(TraceStoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_status() {
        let (_dir, store) = store();
        let session = store
            .create_trace("task-3", participants(), PolicyProfile::Default, None, None)
            .unwrap();

        let ended = schema::now_iso8601_millis();
        let updated = store
            .update_status(&session.trace_id, TraceStatus::Succeeded, Some(ended.clone()))
            .unwrap();
        assert_eq!(updated.status, TraceStatus::Succeeded);
        assert_eq!(updated.ended_at, Some(ended));
    }

    #[test]
    fn test_list_trace_ids_sorted() {
        let (_dir, store) = store();
        let mut created = Vec::new();
        for i in 0..3 {
            let session = store
                .create_trace(
                    &format!("task-{i}"),
                    participants(),
                    PolicyProfile::Default,
                    None,
                    None,
                )
                .unwrap();
            created.push(session.trace_id);
        }
        created.sort();
        assert_eq!(store.list_trace_ids().unwrap(), created);
    }

    #[test]
    fn test_list_traces_newest_first() {
        let (_dir, store) = store();
        for i in 0..3 {
            store
                .create_trace(
                    &format!("task-{i}"),
                    participants(),
                    PolicyProfile::Default,
                    None,
                    None,
                )
                .unwrap();
        }
        let sessions = store.list_traces().unwrap();
        assert_eq!(sessions.len(), 3);
        for pair in sessions.windows(2) {
            assert!(pair[0].started_at >= pair[1].started_at);
        }
    }

    #[test]
    fn test_resolve_trace_id_variants() {
        let (dir, store) = store();
        let session = store
            .create_trace("task-r", participants(), PolicyProfile::Default, None, None)
            .unwrap();
        let id = &session.trace_id;
        let trace_dir = dir.path().join("traces").join(id);

        // Bare id passes through.
        assert_eq!(store.resolve_trace_id(id), *id);
        // events.jsonl path resolves to the containing directory's name.
        let events = trace_dir.join("events.jsonl");
        assert_eq!(store.resolve_trace_id(&events.to_string_lossy()), *id);
        // Existing directory resolves to its basename.
        assert_eq!(store.resolve_trace_id(&trace_dir.to_string_lossy()), *id);
        // Unknown input is taken as an id verbatim.
        assert_eq!(store.resolve_trace_id("whatever"), "whatever");
    }
}
