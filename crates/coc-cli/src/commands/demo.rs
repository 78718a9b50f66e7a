//! The scripted good-path demo protocol run.
//!
//! Provisions four identities, opens a trace, and emits the canned event
//! sequence end to end: session opening, proposal and review, a signed
//! tool run persisting two artifacts, an evidenced claim, the final
//! statement, and a completed verification run. Every event passes the
//! role-policy preflight before it is signed; a violation aborts with exit
//! code 5 and writes nothing.

use std::process::ExitCode;

use anyhow::Context;
use coc_core::artifact::ArtifactStore;
use coc_core::crypto::{KeyMaterial, KeyRegistry};
use coc_core::event::{ArtifactDescriptor, EventBuilder, EventType, RedactionStatus};
use coc_core::home::CocHome;
use coc_core::ledger::Ledger;
use coc_core::policy::Role;
use coc_core::schema;
use coc_core::trace::{Participant, TraceStatus, TraceStore};
use serde_json::{json, Value};

use crate::exit;

struct DemoContext {
    trace_id: String,
    head: String,
    ledger: Ledger,
}

impl DemoContext {
    /// Builds, signs, and appends one event after the role preflight.
    #[allow(clippy::too_many_arguments)]
    fn emit(
        &mut self,
        material: &KeyMaterial,
        role: Role,
        event_type: EventType,
        payload_type: &str,
        payload: Value,
        claims: &[String],
        artifacts: Vec<ArtifactDescriptor>,
        event_id: Option<String>,
    ) -> anyhow::Result<()> {
        if !role.allows(event_type) {
            anyhow::bail!(PolicyBlocked { role, event_type });
        }

        let mut builder = EventBuilder::new(self.trace_id.clone(), event_type)
            .actor(&material.identity.agent_id, role, &material.identity.key_id)
            .payload(payload_type, payload)
            .prev_event_hash(self.head.clone());
        if let Some(event_id) = event_id {
            builder = builder.event_id(event_id);
        }
        for claim in claims {
            builder = builder.claim(claim.clone());
        }
        for artifact in artifacts {
            builder = builder.artifact(artifact);
        }

        let event = builder
            .build_signed(material.signing_key())
            .context("failed to build event")?;
        let session = self
            .ledger
            .append_event(&self.trace_id, &event)
            .with_context(|| format!("failed to append {event_type}"))?;
        self.head = session.head_event_hash;
        Ok(())
    }
}

/// Role-policy preflight rejection; maps to exit code 5.
#[derive(Debug, thiserror::Error)]
#[error("policy preflight blocked: role {role} may not emit {event_type}")]
struct PolicyBlocked {
    role: Role,
    event_type: EventType,
}

pub fn run(
    home: &CocHome,
    task_id: &str,
    policy_profile: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let profile = super::resolve_profile(policy_profile)?.unwrap_or_default();

    let registry = KeyRegistry::new(home);
    let planner = registry.ensure_key("agent.planner", "Demo Planner", &[Role::Planner])?;
    let executor = registry.ensure_key("agent.executor", "Demo Executor", &[Role::Executor])?;
    let critic = registry.ensure_key("agent.critic", "Demo Critic", &[Role::Critic])?;
    let auditor = registry.ensure_key("agent.auditor", "Demo Auditor", &[Role::Auditor])?;

    let traces = TraceStore::new(home);
    let participants = [&planner, &executor, &critic, &auditor]
        .iter()
        .map(|m| Participant {
            agent_id: m.identity.agent_id.clone(),
            role: m.identity.role_capabilities[0],
        })
        .collect();
    let session = traces
        .create_trace(task_id, participants, profile, None, None)
        .context("failed to create trace")?;

    let mut ctx = DemoContext {
        trace_id: session.trace_id.clone(),
        head: session.head_event_hash.clone(),
        ledger: Ledger::new(home),
    };

    let result = emit_sequence(home, &mut ctx, &planner, &executor, &critic, &auditor, task_id);
    if let Err(error) = result {
        if error.is::<PolicyBlocked>() {
            eprintln!("error: {error:#}");
            return Ok(ExitCode::from(exit::POLICY_BLOCKED));
        }
        return Err(error);
    }

    traces.update_status(
        &ctx.trace_id,
        TraceStatus::Succeeded,
        Some(schema::now_iso8601_millis()),
    )?;
    println!("{}", ctx.trace_id);
    Ok(ExitCode::SUCCESS)
}

#[allow(clippy::too_many_arguments)]
fn emit_sequence(
    home: &CocHome,
    ctx: &mut DemoContext,
    planner: &KeyMaterial,
    executor: &KeyMaterial,
    critic: &KeyMaterial,
    auditor: &KeyMaterial,
    task_id: &str,
) -> anyhow::Result<()> {
    ctx.emit(
        planner,
        Role::Planner,
        EventType::SessionInitialized,
        "session",
        json!({"task_id": task_id}),
        &[],
        vec![],
        None,
    )?;

    ctx.emit(
        planner,
        Role::Planner,
        EventType::ProposalCreated,
        "proposal",
        json!({
            "objective": "compile the workspace and run its test suite",
            "steps": ["compile", "test", "collect evidence"],
        }),
        &[],
        vec![],
        None,
    )?;

    ctx.emit(
        critic,
        Role::Critic,
        EventType::ProposalReviewed,
        "review",
        json!({"approved": true, "notes": "steps are sufficient"}),
        &[],
        vec![],
        None,
    )?;

    ctx.emit(
        executor,
        Role::Executor,
        EventType::ToolIntentSigned,
        "tool_intent",
        json!({"tool": "cargo", "args": ["test", "--workspace"]}),
        &[],
        vec![],
        None,
    )?;

    ctx.emit(
        executor,
        Role::Executor,
        EventType::ToolExecutionStarted,
        "tool_execution",
        json!({"tool": "cargo"}),
        &[],
        vec![],
        None,
    )?;

    ctx.emit(
        executor,
        Role::Executor,
        EventType::ToolExecutionCompleted,
        "tool_execution",
        json!({"tool": "cargo", "exit_code": 0, "duration_ms": 5214}),
        &[],
        vec![],
        None,
    )?;

    // Persist the outputs first so their descriptors can point back at the
    // recording event.
    let artifacts = ArtifactStore::new(home);
    let record_event_id = schema::new_ulid();
    let stdout_descriptor = artifacts.write_artifact(
        &ctx.trace_id,
        &record_event_id,
        b"test result: ok. 128 passed; 0 failed; 0 ignored\n",
        "text/plain",
        "utf-8",
        RedactionStatus::None,
    )?;
    let manifest_descriptor = artifacts.write_artifact(
        &ctx.trace_id,
        &record_event_id,
        b"{\"toolchain\":\"stable\",\"warnings\":0}\n",
        "application/json",
        "utf-8",
        RedactionStatus::None,
    )?;
    let evidence = vec![
        stdout_descriptor.artifact_hash.clone(),
        manifest_descriptor.artifact_hash.clone(),
    ];

    ctx.emit(
        executor,
        Role::Executor,
        EventType::ArtifactRecorded,
        "artifacts",
        json!({"count": 2}),
        &[],
        vec![stdout_descriptor.clone(), manifest_descriptor.clone()],
        Some(record_event_id),
    )?;

    let claim_id = schema::new_claim_id();
    ctx.emit(
        executor,
        Role::Executor,
        EventType::ClaimIssued,
        "claim",
        json!({
            "claim_id": claim_id,
            "statement": "the workspace compiles and its test suite passes",
            "evidence_artifacts": evidence,
        }),
        &[claim_id.clone()],
        vec![stdout_descriptor, manifest_descriptor],
        None,
    )?;

    ctx.emit(
        executor,
        Role::Executor,
        EventType::FinalStatementSigned,
        "final_statement",
        json!({"outcome": "succeeded", "claims": [claim_id]}),
        &[],
        vec![],
        None,
    )?;

    ctx.emit(
        auditor,
        Role::Auditor,
        EventType::VerificationRunStarted,
        "verification_run",
        json!({"checks": 10}),
        &[],
        vec![],
        None,
    )?;

    ctx.emit(
        auditor,
        Role::Auditor,
        EventType::VerificationRunCompleted,
        "verification_run",
        json!({"verdict": "pass"}),
        &[],
        vec![],
        None,
    )?;

    Ok(())
}
