//! Shared fixture: a known good-path protocol run.
//!
//! Emits the full canned event sequence into a fresh home - session
//! opening, proposal and review, a signed tool run producing two
//! artifacts, an evidenced claim, the final statement, and a completed
//! verification run - so scenario tests can tamper with a trace that
//! verifies clean.

use std::fs;
use std::path::PathBuf;

use coc_core::artifact::ArtifactStore;
use coc_core::crypto::{KeyMaterial, KeyRegistry};
use coc_core::event::{EventBuilder, EventType, ProtocolEvent, RedactionStatus};
use coc_core::home::CocHome;
use coc_core::ledger::Ledger;
use coc_core::policy::{PolicyProfile, Role};
use coc_core::trace::{Participant, TraceStore};
use serde_json::{json, Value};
use tempfile::TempDir;
use ulid::Ulid;

/// A complete good-path trace in a temporary home.
pub struct GoodTrace {
    pub home: CocHome,
    pub trace_id: String,
    pub planner: KeyMaterial,
    pub executor: KeyMaterial,
    pub critic: KeyMaterial,
    pub auditor: KeyMaterial,
    /// Hashes of the two artifacts the run persisted, in emission order.
    pub artifact_hashes: Vec<String>,
    /// The single claim id issued by the run.
    pub claim_id: String,
    _dir: TempDir,
}

impl GoodTrace {
    pub fn events_path(&self) -> PathBuf {
        TraceStore::new(&self.home).events_path(&self.trace_id)
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::new(&self.home)
    }

    /// Reads the raw ledger lines as JSON values for tamper simulation.
    pub fn read_lines(&self) -> Vec<Value> {
        let contents = fs::read_to_string(self.events_path()).unwrap();
        contents
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    /// Rewrites the ledger from JSON values, bypassing the append path.
    pub fn write_lines(&self, lines: &[Value]) {
        let mut out = String::new();
        for line in lines {
            out.push_str(&serde_json::to_string(line).unwrap());
            out.push('\n');
        }
        fs::write(self.events_path(), out).unwrap();
    }

    /// Index of the first event of the given type in the ledger.
    pub fn index_of(&self, event_type: EventType) -> usize {
        self.read_lines()
            .iter()
            .position(|l| l["event_type"] == event_type.as_str())
            .unwrap()
    }
}

/// Emits the good-path protocol run and returns the populated fixture.
pub fn emit_good_trace(profile: PolicyProfile) -> GoodTrace {
    let dir = TempDir::new().unwrap();
    let home = CocHome::new(dir.path());
    let registry = KeyRegistry::new(&home);
    let traces = TraceStore::new(&home);
    let ledger = Ledger::new(&home);
    let artifacts = ArtifactStore::new(&home);

    let planner = registry
        .ensure_key("agent.planner", "Planner", &[Role::Planner])
        .unwrap();
    let executor = registry
        .ensure_key("agent.executor", "Executor", &[Role::Executor])
        .unwrap();
    let critic = registry
        .ensure_key("agent.critic", "Critic", &[Role::Critic])
        .unwrap();
    let auditor = registry
        .ensure_key("agent.auditor", "Auditor", &[Role::Auditor])
        .unwrap();

    let participants = [&planner, &executor, &critic, &auditor]
        .iter()
        .map(|m| Participant {
            agent_id: m.identity.agent_id.clone(),
            role: m.identity.role_capabilities[0],
        })
        .collect();
    let session = traces
        .create_trace("task.good-path", participants, profile, None, None)
        .unwrap();
    let trace_id = session.trace_id.clone();

    let append = |event: &ProtocolEvent| -> String {
        ledger
            .append_event(&trace_id, event)
            .unwrap()
            .head_event_hash
    };

    let event = EventBuilder::new(trace_id.clone(), EventType::SessionInitialized)
        .actor(&planner.identity.agent_id, Role::Planner, &planner.identity.key_id)
        .payload("session", json!({"task_id": "task.good-path"}))
        .prev_event_hash(session.head_event_hash.clone())
        .build_signed(planner.signing_key())
        .unwrap();
    let head = append(&event);

    let event = EventBuilder::new(trace_id.clone(), EventType::ProposalCreated)
        .actor(&planner.identity.agent_id, Role::Planner, &planner.identity.key_id)
        .payload(
            "proposal",
            json!({"objective": "compile and test the target", "steps": ["compile", "test"]}),
        )
        .prev_event_hash(head.clone())
        .build_signed(planner.signing_key())
        .unwrap();
    let head = append(&event);

    let event = EventBuilder::new(trace_id.clone(), EventType::ProposalReviewed)
        .actor(&critic.identity.agent_id, Role::Critic, &critic.identity.key_id)
        .payload("review", json!({"approved": true}))
        .prev_event_hash(head.clone())
        .build_signed(critic.signing_key())
        .unwrap();
    let head = append(&event);

    let event = EventBuilder::new(trace_id.clone(), EventType::ToolIntentSigned)
        .actor(&executor.identity.agent_id, Role::Executor, &executor.identity.key_id)
        .payload("tool_intent", json!({"tool": "cargo", "args": ["test"]}))
        .prev_event_hash(head.clone())
        .build_signed(executor.signing_key())
        .unwrap();
    let head = append(&event);

    let event = EventBuilder::new(trace_id.clone(), EventType::ToolExecutionStarted)
        .actor(&executor.identity.agent_id, Role::Executor, &executor.identity.key_id)
        .payload("tool_execution", json!({"tool": "cargo"}))
        .prev_event_hash(head.clone())
        .build_signed(executor.signing_key())
        .unwrap();
    let head = append(&event);

    let event = EventBuilder::new(trace_id.clone(), EventType::ToolExecutionCompleted)
        .actor(&executor.identity.agent_id, Role::Executor, &executor.identity.key_id)
        .payload("tool_execution", json!({"tool": "cargo", "exit_code": 0}))
        .prev_event_hash(head.clone())
        .build_signed(executor.signing_key())
        .unwrap();
    let head = append(&event);

    // Persist the tool outputs, then record them in one event.
    let record_event_id = Ulid::new().to_string();
    let stdout_descriptor = artifacts
        .write_artifact(
            &trace_id,
            &record_event_id,
            b"test result: ok. 42 passed; 0 failed\n",
            "text/plain",
            "utf-8",
            RedactionStatus::None,
        )
        .unwrap();
    let log_descriptor = artifacts
        .write_artifact(
            &trace_id,
            &record_event_id,
            b"{\"compiler\":\"rustc\",\"warnings\":0}\n",
            "application/json",
            "utf-8",
            RedactionStatus::None,
        )
        .unwrap();
    let artifact_hashes = vec![
        stdout_descriptor.artifact_hash.clone(),
        log_descriptor.artifact_hash.clone(),
    ];

    let event = EventBuilder::new(trace_id.clone(), EventType::ArtifactRecorded)
        .event_id(record_event_id)
        .actor(&executor.identity.agent_id, Role::Executor, &executor.identity.key_id)
        .payload("artifacts", json!({"count": 2}))
        .artifact(stdout_descriptor.clone())
        .artifact(log_descriptor.clone())
        .prev_event_hash(head.clone())
        .build_signed(executor.signing_key())
        .unwrap();
    let head = append(&event);

    let claim_id = format!("claim_{}", Ulid::new());
    let event = EventBuilder::new(trace_id.clone(), EventType::ClaimIssued)
        .actor(&executor.identity.agent_id, Role::Executor, &executor.identity.key_id)
        .payload(
            "claim",
            json!({
                "claim_id": claim_id,
                "statement": "all tests pass on the target",
                "evidence_artifacts": artifact_hashes,
            }),
        )
        .claim(claim_id.clone())
        .artifact(stdout_descriptor)
        .artifact(log_descriptor)
        .prev_event_hash(head.clone())
        .build_signed(executor.signing_key())
        .unwrap();
    let head = append(&event);

    let event = EventBuilder::new(trace_id.clone(), EventType::FinalStatementSigned)
        .actor(&executor.identity.agent_id, Role::Executor, &executor.identity.key_id)
        .payload("final_statement", json!({"outcome": "succeeded", "claims": [claim_id]}))
        .prev_event_hash(head.clone())
        .build_signed(executor.signing_key())
        .unwrap();
    let head = append(&event);

    let event = EventBuilder::new(trace_id.clone(), EventType::VerificationRunStarted)
        .actor(&auditor.identity.agent_id, Role::Auditor, &auditor.identity.key_id)
        .payload("verification_run", json!({"checks": 10}))
        .prev_event_hash(head.clone())
        .build_signed(auditor.signing_key())
        .unwrap();
    let head = append(&event);

    let event = EventBuilder::new(trace_id.clone(), EventType::VerificationRunCompleted)
        .actor(&auditor.identity.agent_id, Role::Auditor, &auditor.identity.key_id)
        .payload("verification_run", json!({"verdict": "pass"}))
        .prev_event_hash(head.clone())
        .build_signed(auditor.signing_key())
        .unwrap();
    let head = append(&event);

    GoodTrace {
        home,
        trace_id,
        planner,
        executor,
        critic,
        auditor,
        artifact_hashes,
        claim_id,
        _dir: dir,
    }
}
