//! Verification report types and machine/human report emission.
//!
//! A report is written three ways: `reports/<report_id>.json` (structured),
//! `reports/<report_id>.txt` (human rendering), and
//! `verification.latest.json` (overwritten with the same structured
//! report). The text rendering sorts failures by severity, then lists
//! warnings, per-check timings, and a deduplicated "Recommended Next
//! Actions" block derived from the failures' suggested actions.

use std::fmt;
use std::fs;
use std::io::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::PolicyProfile;
use crate::trace::TraceStore;

/// Outcome of a whole verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    /// No failures, no warnings.
    #[serde(rename = "pass")]
    Pass,
    /// No failures, at least one warning.
    #[serde(rename = "pass-with-warnings")]
    PassWithWarnings,
    /// At least one failure.
    #[serde(rename = "fail")]
    Fail,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::PassWithWarnings => "pass-with-warnings",
            Self::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// No failure or warning originated in this check.
    Pass,
    /// Only warnings originated in this check.
    Warning,
    /// At least one failure originated in this check.
    Fail,
}

/// Failure severity, ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Integrity of the chain or a signature is broken.
    Critical,
    /// Evidence is missing or does not match its hash.
    High,
    /// Schema or policy conformance problem.
    Medium,
    /// Advisory condition.
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

/// Closed set of failure (and warning) codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCode {
    /// Event or document fails schema conformance (includes duplicate ids,
    /// key-status problems, finalization cardinality).
    #[serde(rename = "SCHEMA_INVALID")]
    SchemaInvalid,
    /// Recomputed event hash does not match the recorded one.
    #[serde(rename = "HASH_MISMATCH")]
    HashMismatch,
    /// The hash chain does not link.
    #[serde(rename = "CHAIN_BREAK")]
    ChainBreak,
    /// A required-signed event carries no signature.
    #[serde(rename = "SIG_MISSING")]
    SigMissing,
    /// A signature does not verify (or its key cannot be resolved).
    #[serde(rename = "SIG_INVALID")]
    SigInvalid,
    /// A referenced artifact blob is absent from the store.
    #[serde(rename = "ARTIFACT_MISSING")]
    ArtifactMissing,
    /// A referenced artifact blob's bytes do not match its hash.
    #[serde(rename = "ARTIFACT_HASH_MISMATCH")]
    ArtifactHashMismatch,
    /// A claim lacks sufficient verified evidence.
    #[serde(rename = "CLAIM_UNPROVEN")]
    ClaimUnproven,
    /// A claim is challenged and unresolved (warning form).
    #[serde(rename = "CLAIM_DISPUTED")]
    ClaimDisputed,
    /// An actor emitted an event type outside its role.
    #[serde(rename = "ROLE_POLICY_VIOLATION")]
    RolePolicyViolation,
    /// Finalization events are incomplete.
    #[serde(rename = "FINALIZATION_INCOMPLETE")]
    FinalizationIncomplete,
}

impl FailureCode {
    /// The wire name of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SchemaInvalid => "SCHEMA_INVALID",
            Self::HashMismatch => "HASH_MISMATCH",
            Self::ChainBreak => "CHAIN_BREAK",
            Self::SigMissing => "SIG_MISSING",
            Self::SigInvalid => "SIG_INVALID",
            Self::ArtifactMissing => "ARTIFACT_MISSING",
            Self::ArtifactHashMismatch => "ARTIFACT_HASH_MISMATCH",
            Self::ClaimUnproven => "CLAIM_UNPROVEN",
            Self::ClaimDisputed => "CLAIM_DISPUTED",
            Self::RolePolicyViolation => "ROLE_POLICY_VIOLATION",
            Self::FinalizationIncomplete => "FINALIZATION_INCOMPLETE",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifiers of the ten pipeline checks, in mandatory execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckId {
    /// Schema conformance of every event.
    #[serde(rename = "CHK_SCHEMA_CONFORMANCE")]
    SchemaConformance,
    /// Recomputation of every event hash.
    #[serde(rename = "CHK_EVENT_HASH_INTEGRITY")]
    EventHashIntegrity,
    /// Hash-chain continuity from genesis.
    #[serde(rename = "CHK_CHAIN_CONTINUITY")]
    ChainContinuity,
    /// Signature presence and validity.
    #[serde(rename = "CHK_SIGNATURE_VALIDITY")]
    SignatureValidity,
    /// Key resolution and revocation windows.
    #[serde(rename = "CHK_KEY_STATUS")]
    KeyStatus,
    /// Existence of every referenced artifact blob.
    #[serde(rename = "CHK_ARTIFACT_EXISTENCE")]
    ArtifactExistence,
    /// Byte-level integrity of every referenced blob.
    #[serde(rename = "CHK_ARTIFACT_HASH_MATCH")]
    ArtifactHashMatch,
    /// Evidence sufficiency for issued and challenged claims.
    #[serde(rename = "CHK_CLAIM_EVIDENCE_SUFFICIENCY")]
    ClaimEvidenceSufficiency,
    /// Role policy conformance of every event.
    #[serde(rename = "CHK_ROLE_POLICY_CONFORMANCE")]
    RolePolicyConformance,
    /// Finalization event cardinality and ordering.
    #[serde(rename = "CHK_FINALIZATION_INTEGRITY")]
    FinalizationIntegrity,
}

impl CheckId {
    /// The wire name of this check id.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SchemaConformance => "CHK_SCHEMA_CONFORMANCE",
            Self::EventHashIntegrity => "CHK_EVENT_HASH_INTEGRITY",
            Self::ChainContinuity => "CHK_CHAIN_CONTINUITY",
            Self::SignatureValidity => "CHK_SIGNATURE_VALIDITY",
            Self::KeyStatus => "CHK_KEY_STATUS",
            Self::ArtifactExistence => "CHK_ARTIFACT_EXISTENCE",
            Self::ArtifactHashMatch => "CHK_ARTIFACT_HASH_MATCH",
            Self::ClaimEvidenceSufficiency => "CHK_CLAIM_EVIDENCE_SUFFICIENCY",
            Self::RolePolicyConformance => "CHK_ROLE_POLICY_CONFORMANCE",
            Self::FinalizationIntegrity => "CHK_FINALIZATION_INTEGRITY",
        }
    }

    /// Human-readable name of this check.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SchemaConformance => "Schema conformance",
            Self::EventHashIntegrity => "Event hash integrity",
            Self::ChainContinuity => "Chain continuity",
            Self::SignatureValidity => "Signature validity",
            Self::KeyStatus => "Key status",
            Self::ArtifactExistence => "Artifact existence",
            Self::ArtifactHashMatch => "Artifact hash match",
            Self::ClaimEvidenceSufficiency => "Claim evidence sufficiency",
            Self::RolePolicyConformance => "Role policy conformance",
            Self::FinalizationIntegrity => "Finalization integrity",
        }
    }

    /// The scope the check operates over.
    #[must_use]
    pub const fn scope(self) -> &'static str {
        match self {
            Self::SchemaConformance
            | Self::EventHashIntegrity
            | Self::ChainContinuity
            | Self::SignatureValidity
            | Self::KeyStatus
            | Self::RolePolicyConformance => "events",
            Self::ArtifactExistence | Self::ArtifactHashMatch => "artifacts",
            Self::ClaimEvidenceSufficiency => "claims",
            Self::FinalizationIntegrity => "finalization",
        }
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one pipeline check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationCheck {
    /// Check identifier.
    pub check_id: CheckId,
    /// Human-readable name.
    pub name: String,
    /// Outcome of the check.
    pub status: CheckStatus,
    /// What the check inspected.
    pub scope: String,
    /// Brief evidence lines (counts, samples).
    pub evidence: Vec<String>,
    /// Wall time spent in this check.
    pub elapsed_ms: u64,
}

/// One verification failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationFailure {
    /// Failure code from the closed set.
    pub failure_code: FailureCode,
    /// Severity of the failure.
    pub severity: Severity,
    /// The offending event, when the failure is event-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// The offending artifact, when the failure is artifact-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_hash: Option<String>,
    /// One-line statement of the failure.
    pub message: String,
    /// Operator action that would address the failure.
    pub suggested_action: String,
    /// When the verifier detected the failure (equals the report's
    /// `verified_at`).
    pub detected_at: String,
    /// Longer description of the failure.
    pub description: String,
    /// The check that produced the failure.
    pub verification_step: CheckId,
    /// Remediation guidance for the report's text rendering.
    pub recommended_remediation: String,
}

/// One verification warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationWarning {
    /// Warning code from the closed set.
    pub warning_code: FailureCode,
    /// Severity of the warning.
    pub severity: Severity,
    /// The event the warning refers to, when event-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// One-line statement of the warning.
    pub message: String,
    /// When the verifier detected the warning.
    pub detected_at: String,
    /// The check that produced the warning.
    pub verification_step: CheckId,
}

/// Aggregate counters for a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportMetrics {
    /// Number of events in the verified snapshot.
    pub event_count: u64,
    /// Total artifact references across those events.
    pub artifact_reference_count: u64,
    /// Wall time of the whole run.
    pub verification_duration_ms: u64,
}

/// Structured result of a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationReport {
    /// Schema version of this record.
    pub schema_version: String,
    /// Unique report identifier (`report_<ULID>`).
    pub report_id: String,
    /// The verified trace.
    pub trace_id: String,
    /// When the run happened (ISO-8601 ms).
    pub verified_at: String,
    /// Overall verdict.
    pub verification_status: VerificationStatus,
    /// One-line human summary.
    pub summary: String,
    /// Per-check results in execution order.
    pub checks: Vec<VerificationCheck>,
    /// All failures, in detection order.
    pub failures: Vec<VerificationFailure>,
    /// All warnings, in detection order.
    pub warnings: Vec<VerificationWarning>,
    /// Aggregate counters.
    pub metrics: ReportMetrics,
    /// The profile the run was evaluated under.
    pub policy_profile: PolicyProfile,
}

/// Errors that can occur while writing reports.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportError {
    /// I/O error writing a report file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The report could not be serialized.
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes verification reports into a trace's directory.
pub struct ReportWriter<'a> {
    traces: &'a TraceStore,
}

impl<'a> ReportWriter<'a> {
    /// Creates a writer over the given trace store.
    #[must_use]
    pub const fn new(traces: &'a TraceStore) -> Self {
        Self { traces }
    }

    /// Writes `reports/<report_id>.json`, `reports/<report_id>.txt`, and
    /// overwrites `verification.latest.json`.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] on serialization or I/O failure.
    pub fn write(&self, report: &VerificationReport) -> Result<(), ReportError> {
        let reports_dir = self.traces.reports_dir(&report.trace_id);
        fs::create_dir_all(&reports_dir)?;

        let json = serde_json::to_string_pretty(report)?;
        let json_path = reports_dir.join(format!("{}.json", report.report_id));
        write_file(&json_path, json.as_bytes())?;

        let text = render_text(report);
        let txt_path = reports_dir.join(format!("{}.txt", report.report_id));
        write_file(&txt_path, text.as_bytes())?;

        let latest_path = self.traces.latest_report_path(&report.trace_id);
        write_file(&latest_path, json.as_bytes())?;
        Ok(())
    }
}

fn write_file(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    if !bytes.ends_with(b"\n") {
        file.write_all(b"\n")?;
    }
    file.sync_all()?;
    Ok(())
}

/// Renders the human-readable text form of a report.
#[must_use]
pub fn render_text(report: &VerificationReport) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let _ = writeln!(out, "Verification report {}", report.report_id);
    let _ = writeln!(out, "Trace:    {}", report.trace_id);
    let _ = writeln!(out, "Verified: {}", report.verified_at);
    let _ = writeln!(out, "Profile:  {}", report.policy_profile);
    let _ = writeln!(out, "Status:   {}", report.verification_status);
    let _ = writeln!(out, "Summary:  {}", report.summary);

    if !report.failures.is_empty() {
        let mut failures: Vec<&VerificationFailure> = report.failures.iter().collect();
        failures.sort_by_key(|f| f.severity);

        let _ = writeln!(out, "\nFailures ({}):", failures.len());
        for failure in failures {
            let _ = writeln!(
                out,
                "  [{}] {} ({}) {}",
                failure.severity, failure.failure_code, failure.verification_step,
                failure.message
            );
            if let Some(event_id) = &failure.event_id {
                let _ = writeln!(out, "      event:       {event_id}");
            }
            if let Some(artifact_hash) = &failure.artifact_hash {
                let _ = writeln!(out, "      artifact:    {artifact_hash}");
            }
            let _ = writeln!(out, "      remediation: {}", failure.recommended_remediation);
        }
    }

    if !report.warnings.is_empty() {
        let _ = writeln!(out, "\nWarnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            let _ = writeln!(
                out,
                "  [{}] {} ({}) {}",
                warning.severity, warning.warning_code, warning.verification_step,
                warning.message
            );
            if let Some(event_id) = &warning.event_id {
                let _ = writeln!(out, "      event:       {event_id}");
            }
        }
    }

    let _ = writeln!(out, "\nChecks:");
    for check in &report.checks {
        let status = match check.status {
            CheckStatus::Pass => "pass",
            CheckStatus::Warning => "warn",
            CheckStatus::Fail => "FAIL",
        };
        let _ = writeln!(
            out,
            "  {:4} {} ({} ms)",
            status, check.check_id, check.elapsed_ms
        );
    }

    if !report.failures.is_empty() {
        let mut failures: Vec<&VerificationFailure> = report.failures.iter().collect();
        failures.sort_by_key(|f| f.severity);
        let mut seen = std::collections::BTreeSet::new();
        let mut actions = Vec::new();
        for failure in failures {
            if seen.insert(failure.suggested_action.clone()) {
                actions.push(failure.suggested_action.clone());
            }
        }
        let _ = writeln!(out, "\nRecommended Next Actions:");
        for action in actions {
            let _ = writeln!(out, "  - {action}");
        }
    }

    out
}
