//! The ten deterministic pipeline checks.
//!
//! Each check inspects the immutable trace snapshot and pushes typed
//! failures or warnings into the pipeline state; none of them raises for
//! data-integrity problems in the trace under inspection. Later checks
//! consume facts recorded by earlier ones (valid signatures, present and
//! verified artifacts), which is why the execution order is mandatory.

use std::collections::{BTreeSet, HashMap, HashSet};

use ed25519_dalek::VerifyingKey;
use serde_json::Value;

use super::report::{
    CheckId, FailureCode, Severity, VerificationFailure, VerificationWarning,
};
use crate::artifact::ArtifactStore;
use crate::crypto::{self, KeyRegistry, KeyStatus};
use crate::event::{EventType, ProtocolEvent};
use crate::policy::{self, PolicyProfile};
use crate::schema::{GENESIS_PREV_HASH, HEX_64};

/// Shared state threaded through the pipeline checks.
pub(super) struct PipelineState<'a> {
    pub trace_id: &'a str,
    pub events: &'a [ProtocolEvent],
    pub registry: &'a KeyRegistry,
    pub artifacts: &'a ArtifactStore,
    pub profile: PolicyProfile,
    pub allow_incomplete_finalization: bool,
    /// Timestamp stamped on every finding (the report's `verified_at`).
    pub detected_at: &'a str,

    pub failures: Vec<VerificationFailure>,
    pub warnings: Vec<VerificationWarning>,
    /// Evidence lines for the currently-running check, drained by the
    /// pipeline runner.
    pub evidence: Vec<String>,

    /// Event ids whose signature verified (check 4).
    pub signature_valid: HashSet<String>,
    /// Referenced artifact hashes with a blob present (check 6).
    pub artifact_present: HashSet<String>,
    /// Referenced artifact hashes whose blob bytes match (check 7).
    pub artifact_verified: HashSet<String>,
    /// Every artifact hash referenced by any event, in stable order.
    pub referenced_hashes: BTreeSet<String>,
}

impl PipelineState<'_> {
    #[allow(clippy::too_many_arguments)]
    fn fail(
        &mut self,
        step: CheckId,
        code: FailureCode,
        severity: Severity,
        event_id: Option<&str>,
        artifact_hash: Option<&str>,
        message: String,
        suggested_action: &str,
    ) {
        self.failures.push(VerificationFailure {
            failure_code: code,
            severity,
            event_id: event_id.map(str::to_string),
            artifact_hash: artifact_hash.map(str::to_string),
            description: message.clone(),
            message,
            suggested_action: suggested_action.to_string(),
            detected_at: self.detected_at.to_string(),
            verification_step: step,
            recommended_remediation: suggested_action.to_string(),
        });
    }

    fn warn(
        &mut self,
        step: CheckId,
        code: FailureCode,
        severity: Severity,
        event_id: Option<&str>,
        message: String,
    ) {
        self.warnings.push(VerificationWarning {
            warning_code: code,
            severity,
            event_id: event_id.map(str::to_string),
            message,
            detected_at: self.detected_at.to_string(),
            verification_step: step,
        });
    }

    fn note(&mut self, line: String) {
        self.evidence.push(line);
    }
}

/// Evidence artifact hashes carried in a claim event's payload.
fn claim_evidence_hashes(event: &ProtocolEvent) -> Vec<String> {
    event
        .payload
        .get("evidence_artifacts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// CHK_SCHEMA_CONFORMANCE: every event validates against the schema, ids
/// are unique, and every event carries the ledger's trace id.
pub(super) fn check_schema_conformance(state: &mut PipelineState<'_>) {
    const STEP: CheckId = CheckId::SchemaConformance;
    const ACTION: &str = "re-emit the event from a schema-compliant producer";

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for event in state.events {
        if let Err(e) = event.validate() {
            state.fail(
                STEP,
                FailureCode::SchemaInvalid,
                Severity::Medium,
                Some(&event.event_id),
                None,
                format!("event fails schema validation: {e}"),
                ACTION,
            );
        }
        if event.trace_id != state.trace_id {
            state.fail(
                STEP,
                FailureCode::SchemaInvalid,
                Severity::Medium,
                Some(&event.event_id),
                None,
                format!(
                    "event belongs to trace {} but was found in {}",
                    event.trace_id, state.trace_id
                ),
                ACTION,
            );
        }
        if !seen_ids.insert(&event.event_id) {
            state.fail(
                STEP,
                FailureCode::SchemaInvalid,
                Severity::Medium,
                Some(&event.event_id),
                None,
                format!("duplicate event id {}", event.event_id),
                "investigate the producer that replayed the event id",
            );
        }
    }
    state.note(format!("validated {} events", state.events.len()));
}

/// CHK_EVENT_HASH_INTEGRITY: recompute every event hash and compare.
pub(super) fn check_event_hash_integrity(state: &mut PipelineState<'_>) {
    const STEP: CheckId = CheckId::EventHashIntegrity;
    const ACTION: &str = "treat the trace as tampered and quarantine it";

    let mut mismatches = 0usize;
    for event in state.events {
        match event.compute_event_hash() {
            Ok(recomputed) if recomputed == event.event_hash => {},
            Ok(recomputed) => {
                mismatches += 1;
                state.fail(
                    STEP,
                    FailureCode::HashMismatch,
                    Severity::Critical,
                    Some(&event.event_id),
                    None,
                    format!(
                        "event hash {} does not match recomputed {recomputed}",
                        event.event_hash
                    ),
                    ACTION,
                );
            },
            Err(e) => {
                mismatches += 1;
                state.fail(
                    STEP,
                    FailureCode::HashMismatch,
                    Severity::Critical,
                    Some(&event.event_id),
                    None,
                    format!("event hash cannot be recomputed: {e}"),
                    ACTION,
                );
            },
        }
    }
    state.note(format!(
        "recomputed {} event hashes, {mismatches} mismatched",
        state.events.len()
    ));
}

/// CHK_CHAIN_CONTINUITY: the chain links from genesis; stops at the first
/// break.
pub(super) fn check_chain_continuity(state: &mut PipelineState<'_>) {
    const STEP: CheckId = CheckId::ChainContinuity;
    const ACTION: &str = "treat the trace as tampered and quarantine it";

    for (index, event) in state.events.iter().enumerate() {
        let expected = if index == 0 {
            GENESIS_PREV_HASH
        } else {
            &state.events[index - 1].event_hash
        };
        if event.prev_event_hash != expected {
            let message = if index == 0 {
                format!(
                    "first event chains from {} instead of the genesis hash",
                    event.prev_event_hash
                )
            } else {
                format!(
                    "event at index {index} chains from {} but its predecessor's hash is {expected}",
                    event.prev_event_hash
                )
            };
            state.fail(
                STEP,
                FailureCode::ChainBreak,
                Severity::Critical,
                Some(&event.event_id),
                None,
                message,
                ACTION,
            );
            state.note(format!("chain break at index {index}"));
            return;
        }
    }
    state.note(format!("chain continuous over {} events", state.events.len()));
}

/// CHK_SIGNATURE_VALIDITY: required-signed events carry a valid signature;
/// present signatures on other types must also verify.
pub(super) fn check_signature_validity(state: &mut PipelineState<'_>) {
    const STEP: CheckId = CheckId::SignatureValidity;
    const ACTION: &str = "re-sign from the original producer or treat the trace as tampered";

    let mut key_cache: HashMap<String, Option<VerifyingKey>> = HashMap::new();
    let mut valid = 0usize;

    for event in state.events {
        let required = policy::requires_signature(event.event_type);
        let Some(signature) = &event.signature else {
            if required {
                state.fail(
                    STEP,
                    FailureCode::SigMissing,
                    Severity::Critical,
                    Some(&event.event_id),
                    None,
                    format!(
                        "{} event requires a signature but carries none",
                        event.event_type
                    ),
                    ACTION,
                );
            }
            continue;
        };

        let verifying_key = key_cache
            .entry(event.actor.key_id.clone())
            .or_insert_with(|| {
                state
                    .registry
                    .resolve_public_key(&event.actor.key_id)
                    .ok()
                    .flatten()
            })
            .clone();

        let Some(verifying_key) = verifying_key else {
            state.fail(
                STEP,
                FailureCode::SigInvalid,
                Severity::Critical,
                Some(&event.event_id),
                None,
                format!("no public key resolves for key id {}", event.actor.key_id),
                ACTION,
            );
            continue;
        };

        if crypto::verify_event_signature(&verifying_key, event, signature) {
            valid += 1;
            state.signature_valid.insert(event.event_id.clone());
        } else {
            state.fail(
                STEP,
                FailureCode::SigInvalid,
                Severity::Critical,
                Some(&event.event_id),
                None,
                format!(
                    "signature on {} event does not verify against the signed fields",
                    event.event_type
                ),
                ACTION,
            );
        }
    }
    state.note(format!("{valid} signatures verified"));
}

/// CHK_KEY_STATUS: every actor key resolves to its claimed identity, and no
/// event is signed with a key revoked at its creation time.
pub(super) fn check_key_status(state: &mut PipelineState<'_>) {
    const STEP: CheckId = CheckId::KeyStatus;

    let mut identity_cache = HashMap::new();
    for event in state.events {
        let identity = identity_cache
            .entry(event.actor.key_id.clone())
            .or_insert_with(|| {
                state
                    .registry
                    .resolve_identity(&event.actor.key_id)
                    .ok()
                    .flatten()
            });

        let Some(identity) = identity else {
            state.fail(
                STEP,
                FailureCode::SchemaInvalid,
                Severity::Medium,
                Some(&event.event_id),
                None,
                format!("key id {} is not in the registry", event.actor.key_id),
                "register the producing identity or treat the event as forged",
            );
            continue;
        };

        if identity.agent_id != event.actor.agent_id {
            state.fail(
                STEP,
                FailureCode::SchemaInvalid,
                Severity::Medium,
                Some(&event.event_id),
                None,
                format!(
                    "key id {} belongs to {} but the event claims actor {}",
                    event.actor.key_id, identity.agent_id, event.actor.agent_id
                ),
                "correct the actor identity or treat the event as forged",
            );
        }

        if identity.status == KeyStatus::Revoked && !identity.valid_at(&event.created_at) {
            state.fail(
                STEP,
                FailureCode::SchemaInvalid,
                Severity::Medium,
                Some(&event.event_id),
                None,
                format!(
                    "event is dated {} but key {} was revoked at {}",
                    event.created_at,
                    event.actor.key_id,
                    identity.revoked_at.as_deref().unwrap_or("<unknown>")
                ),
                "rotate to an active key and re-emit the event",
            );
        }
    }
    state.note(format!(
        "resolved {} distinct actor keys",
        identity_cache.len()
    ));
}

/// CHK_ARTIFACT_EXISTENCE: every referenced artifact hash has a blob.
pub(super) fn check_artifact_existence(state: &mut PipelineState<'_>) {
    const STEP: CheckId = CheckId::ArtifactExistence;

    let mut referenced = BTreeSet::new();
    for event in state.events {
        for descriptor in &event.artifacts {
            referenced.insert(descriptor.artifact_hash.clone());
        }
        if event.event_type == EventType::ClaimIssued {
            for hash in claim_evidence_hashes(event) {
                if HEX_64.is_match(&hash) {
                    referenced.insert(hash);
                }
            }
        }
    }
    state.referenced_hashes = referenced;

    let mut missing = 0usize;
    let hashes: Vec<String> = state.referenced_hashes.iter().cloned().collect();
    for hash in hashes {
        if state.artifacts.has_artifact(&hash).unwrap_or(false) {
            state.artifact_present.insert(hash);
        } else {
            missing += 1;
            state.fail(
                STEP,
                FailureCode::ArtifactMissing,
                Severity::High,
                None,
                Some(&hash),
                format!("referenced artifact {hash} has no blob in the store"),
                "restore the artifact store from backup",
            );
        }
    }
    state.note(format!(
        "{} referenced artifacts, {missing} missing",
        state.referenced_hashes.len()
    ));
}

/// CHK_ARTIFACT_HASH_MATCH: recompute SHA-256 over every present blob.
pub(super) fn check_artifact_hash_match(state: &mut PipelineState<'_>) {
    const STEP: CheckId = CheckId::ArtifactHashMatch;

    let mut mismatches = 0usize;
    let hashes: Vec<String> = state.referenced_hashes.iter().cloned().collect();
    for hash in hashes {
        if !state.artifact_present.contains(&hash) {
            continue;
        }
        let blob_path = state.artifacts.blob_path(&hash);
        match crypto::hash_file(&blob_path) {
            Ok(actual) if actual == hash => {
                state.artifact_verified.insert(hash);
            },
            Ok(actual) => {
                mismatches += 1;
                state.fail(
                    STEP,
                    FailureCode::ArtifactHashMismatch,
                    Severity::High,
                    None,
                    Some(&hash),
                    format!("blob bytes hash to {actual}, expected {hash}"),
                    "restore the artifact blob from backup and re-verify",
                );
            },
            Err(e) => {
                mismatches += 1;
                state.fail(
                    STEP,
                    FailureCode::ArtifactHashMismatch,
                    Severity::High,
                    None,
                    Some(&hash),
                    format!("blob cannot be read for hashing: {e}"),
                    "restore the artifact blob from backup and re-verify",
                );
            },
        }
    }
    state.note(format!(
        "{} blobs rehashed, {mismatches} mismatched",
        state.artifact_present.len()
    ));
}

/// CHK_CLAIM_EVIDENCE_SUFFICIENCY: every issued claim is backed by verified
/// evidence and a valid signature; challenged claims resolve per profile.
pub(super) fn check_claim_evidence_sufficiency(state: &mut PipelineState<'_>) {
    const STEP: CheckId = CheckId::ClaimEvidenceSufficiency;
    const ACTION: &str = "re-issue the claim with verifiable evidence artifacts";

    let mut issued_claims: HashSet<&str> = HashSet::new();
    let mut claims_checked = 0usize;

    for event in state.events {
        if event.event_type != EventType::ClaimIssued {
            continue;
        }
        claims_checked += 1;

        if event.claims.is_empty() {
            state.fail(
                STEP,
                FailureCode::ClaimUnproven,
                Severity::High,
                Some(&event.event_id),
                None,
                "claim_issued event carries no claim id".to_string(),
                ACTION,
            );
            continue;
        }
        for claim in &event.claims {
            issued_claims.insert(claim);
        }

        let evidence = claim_evidence_hashes(event);
        if evidence.is_empty() {
            state.fail(
                STEP,
                FailureCode::ClaimUnproven,
                Severity::High,
                Some(&event.event_id),
                None,
                format!("claim {} has no evidence artifacts", event.claims[0]),
                ACTION,
            );
            continue;
        }

        let unverified: Vec<&String> = evidence
            .iter()
            .filter(|hash| !state.artifact_verified.contains(*hash))
            .collect();
        if !unverified.is_empty() {
            state.fail(
                STEP,
                FailureCode::ClaimUnproven,
                Severity::High,
                Some(&event.event_id),
                Some(unverified[0]),
                format!(
                    "claim {} cites {} evidence artifact(s) that did not pass integrity checks",
                    event.claims[0],
                    unverified.len()
                ),
                ACTION,
            );
            continue;
        }

        if !state.signature_valid.contains(&event.event_id) {
            state.fail(
                STEP,
                FailureCode::ClaimUnproven,
                Severity::High,
                Some(&event.event_id),
                None,
                format!(
                    "claim {} is not backed by a valid signature",
                    event.claims[0]
                ),
                ACTION,
            );
        }
    }

    for event in state.events {
        if event.event_type != EventType::ClaimChallenged {
            continue;
        }
        let resolved = event
            .payload
            .get("resolved")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if resolved {
            continue;
        }
        let claim = event
            .payload
            .get("claim_id")
            .and_then(Value::as_str)
            .or_else(|| event.claims.first().map(String::as_str))
            .unwrap_or("<unknown>");

        match state.profile {
            PolicyProfile::Strict => {
                state.fail(
                    STEP,
                    FailureCode::ClaimUnproven,
                    Severity::High,
                    Some(&event.event_id),
                    None,
                    format!("claim {claim} is challenged and unresolved"),
                    "resolve the challenge before accepting the trace",
                );
            },
            PolicyProfile::Default => {
                let message = format!("claim {claim} is challenged and unresolved");
                state.warn(
                    STEP,
                    FailureCode::ClaimDisputed,
                    Severity::Medium,
                    Some(&event.event_id),
                    message,
                );
            },
            PolicyProfile::Lenient => {
                let message = format!("claim {claim} is challenged and unresolved");
                state.warn(
                    STEP,
                    FailureCode::ClaimDisputed,
                    Severity::Low,
                    Some(&event.event_id),
                    message,
                );
            },
        }
    }

    state.note(format!(
        "{claims_checked} issued claims checked, {} distinct claim ids",
        issued_claims.len()
    ));
}

/// CHK_ROLE_POLICY_CONFORMANCE: every event type is allowed for its
/// actor's role.
pub(super) fn check_role_policy_conformance(state: &mut PipelineState<'_>) {
    const STEP: CheckId = CheckId::RolePolicyConformance;

    let mut violations = 0usize;
    for event in state.events {
        if !event.actor.role.allows(event.event_type) {
            violations += 1;
            state.fail(
                STEP,
                FailureCode::RolePolicyViolation,
                Severity::Medium,
                Some(&event.event_id),
                None,
                format!(
                    "role {} may not emit {}",
                    event.actor.role, event.event_type
                ),
                "correct the actor's role capabilities or the producing workflow",
            );
        }
    }
    state.note(format!(
        "{} events checked against role policy, {violations} violations",
        state.events.len()
    ));
}

/// CHK_FINALIZATION_INTEGRITY: exactly one final statement, a verification
/// run that started and (unless allowed incomplete) completed, in order.
pub(super) fn check_finalization_integrity(state: &mut PipelineState<'_>) {
    const STEP: CheckId = CheckId::FinalizationIntegrity;

    let events = state.events;
    let position = |wanted: EventType| {
        events
            .iter()
            .position(|e| e.event_type == wanted)
            .map(|i| (i, events[i].event_id.clone()))
    };

    let finals: Vec<&ProtocolEvent> = events
        .iter()
        .filter(|e| e.event_type == EventType::FinalStatementSigned)
        .collect();
    match finals.len() {
        1 => {},
        0 => state.fail(
            STEP,
            FailureCode::SchemaInvalid,
            Severity::Medium,
            None,
            None,
            "trace has no final_statement_signed event".to_string(),
            "have the executor sign a final statement before closing the trace",
        ),
        n => state.fail(
            STEP,
            FailureCode::SchemaInvalid,
            Severity::Medium,
            Some(finals[1].event_id.as_str()),
            None,
            format!("trace has {n} final_statement_signed events, expected exactly one"),
            "have the executor sign a final statement before closing the trace",
        ),
    }

    if position(EventType::VerificationRunStarted).is_none() {
        state.fail(
            STEP,
            FailureCode::SchemaInvalid,
            Severity::Medium,
            None,
            None,
            "trace has no verification_run_started event".to_string(),
            "have the auditor run verification before closing the trace",
        );
    }

    let completed = position(EventType::VerificationRunCompleted);
    if completed.is_none() {
        if state.allow_incomplete_finalization {
            state.warn(
                STEP,
                FailureCode::FinalizationIncomplete,
                Severity::Low,
                None,
                "trace has no verification_run_completed event".to_string(),
            );
        } else {
            state.fail(
                STEP,
                FailureCode::FinalizationIncomplete,
                Severity::Medium,
                None,
                None,
                "trace has no verification_run_completed event".to_string(),
                "complete the verification run before archiving the trace",
            );
        }
    }

    if let (Some((final_index, final_id)), Some((completed_index, _))) = (
        position(EventType::FinalStatementSigned),
        completed,
    ) {
        if final_index > completed_index {
            state.fail(
                STEP,
                FailureCode::RolePolicyViolation,
                Severity::Medium,
                Some(&final_id),
                None,
                "final_statement_signed appears after verification_run_completed".to_string(),
                "re-run verification after the final statement is signed",
            );
        }
    }

    state.note(format!(
        "finalization events inspected across {} events",
        state.events.len()
    ));
}
