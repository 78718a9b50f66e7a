//! Deterministic verifier pipeline over a trace snapshot.
//!
//! The verifier loads a trace's session and event snapshot (with
//! malformed-tail recovery), then runs ten checks in a mandatory order,
//! producing a structured [`VerificationReport`]. Data-integrity problems
//! in the trace under inspection never raise; every such condition becomes
//! a typed failure or warning in the report. The verifier does raise
//! [`VerifierError`] for infrastructure problems such as a missing trace.
//!
//! Running the verifier twice on an unchanged trace yields reports that
//! differ only in `report_id`, `verified_at`, the failures' `detected_at`
//! (stamped with `verified_at`), and the measured durations; all other
//! fields are byte-equal.

pub mod report;

mod checks;

use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

use thiserror::Error;
use tracing::info;

use self::checks::PipelineState;
use self::report::{
    CheckId, CheckStatus, ReportError, ReportMetrics, ReportWriter, VerificationCheck,
    VerificationReport, VerificationStatus,
};
use crate::artifact::ArtifactStore;
use crate::crypto::KeyRegistry;
use crate::home::CocHome;
use crate::ledger::{Ledger, LedgerError};
use crate::policy::PolicyProfile;
use crate::schema::{self, SCHEMA_VERSION};
use crate::trace::{TraceStore, TraceStoreError};

/// The ten checks in mandatory execution order.
const PIPELINE: [(CheckId, fn(&mut PipelineState<'_>)); 10] = [
    (CheckId::SchemaConformance, checks::check_schema_conformance),
    (CheckId::EventHashIntegrity, checks::check_event_hash_integrity),
    (CheckId::ChainContinuity, checks::check_chain_continuity),
    (CheckId::SignatureValidity, checks::check_signature_validity),
    (CheckId::KeyStatus, checks::check_key_status),
    (CheckId::ArtifactExistence, checks::check_artifact_existence),
    (CheckId::ArtifactHashMatch, checks::check_artifact_hash_match),
    (
        CheckId::ClaimEvidenceSufficiency,
        checks::check_claim_evidence_sufficiency,
    ),
    (
        CheckId::RolePolicyConformance,
        checks::check_role_policy_conformance,
    ),
    (
        CheckId::FinalizationIntegrity,
        checks::check_finalization_integrity,
    ),
];

/// Options for a verification run.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Overrides the trace's own policy profile when set.
    pub policy_profile: Option<PolicyProfile>,
    /// Write report files into the trace directory (default `true`).
    pub write_reports: bool,
    /// Use this report id instead of generating one.
    pub report_id: Option<String>,
    /// Downgrade a missing `verification_run_completed` to a warning.
    pub allow_incomplete_finalization: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            policy_profile: None,
            write_reports: true,
            report_id: None,
            allow_incomplete_finalization: false,
        }
    }
}

/// Infrastructure errors raised by the verifier.
///
/// Data-integrity findings never surface here; they are carried in the
/// report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerifierError {
    /// The trace could not be loaded.
    #[error(transparent)]
    Trace(#[from] TraceStoreError),

    /// The ledger snapshot could not be read.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A report file could not be written.
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// The deterministic verifier pipeline.
pub struct Verifier {
    home: CocHome,
}

impl Verifier {
    /// Creates a verifier over the given home.
    #[must_use]
    pub fn new(home: &CocHome) -> Self {
        Self { home: home.clone() }
    }

    /// Verifies a trace and returns the structured report.
    ///
    /// # Errors
    ///
    /// Returns [`VerifierError`] only for infrastructure problems (missing
    /// trace, unreadable ledger, unwritable reports).
    pub fn verify(
        &self,
        trace_id: &str,
        options: &VerifyOptions,
    ) -> Result<VerificationReport, VerifierError> {
        let traces = TraceStore::new(&self.home);
        let session = traces.load_trace(trace_id)?;
        let ledger = Ledger::new(&self.home);
        let events = ledger.read_events(trace_id, true)?;

        let registry = KeyRegistry::new(&self.home);
        let artifacts = ArtifactStore::new(&self.home);
        let profile = options.policy_profile.unwrap_or(session.policy_profile);
        let verified_at = schema::now_iso8601_millis();
        let run_started = Instant::now();

        let mut state = PipelineState {
            trace_id,
            events: &events,
            registry: &registry,
            artifacts: &artifacts,
            profile,
            allow_incomplete_finalization: options.allow_incomplete_finalization,
            detected_at: &verified_at,
            failures: Vec::new(),
            warnings: Vec::new(),
            evidence: Vec::new(),
            signature_valid: HashSet::new(),
            artifact_present: HashSet::new(),
            artifact_verified: HashSet::new(),
            referenced_hashes: BTreeSet::new(),
        };

        let mut check_results = Vec::with_capacity(PIPELINE.len());
        for (check_id, run) in PIPELINE {
            let started = Instant::now();
            run(&mut state);
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let failed = state
                .failures
                .iter()
                .any(|f| f.verification_step == check_id);
            let warned = state
                .warnings
                .iter()
                .any(|w| w.verification_step == check_id);
            let status = if failed {
                CheckStatus::Fail
            } else if warned {
                CheckStatus::Warning
            } else {
                CheckStatus::Pass
            };

            check_results.push(VerificationCheck {
                check_id,
                name: check_id.name().to_string(),
                status,
                scope: check_id.scope().to_string(),
                evidence: std::mem::take(&mut state.evidence),
                elapsed_ms,
            });
        }

        // Consume the pipeline state so the `verified_at` borrow ends
        // before the timestamp moves into the report.
        let PipelineState {
            failures, warnings, ..
        } = state;

        let verification_status = if !failures.is_empty() {
            VerificationStatus::Fail
        } else if !warnings.is_empty() {
            VerificationStatus::PassWithWarnings
        } else {
            VerificationStatus::Pass
        };

        let summary = format!(
            "{} checks over {} events: {} failure(s), {} warning(s)",
            PIPELINE.len(),
            events.len(),
            failures.len(),
            warnings.len()
        );

        let artifact_reference_count = events
            .iter()
            .map(|e| e.artifacts.len() as u64)
            .sum::<u64>();

        let report = VerificationReport {
            schema_version: SCHEMA_VERSION.to_string(),
            report_id: options
                .report_id
                .clone()
                .unwrap_or_else(schema::new_report_id),
            trace_id: trace_id.to_string(),
            verified_at,
            verification_status,
            summary,
            checks: check_results,
            failures,
            warnings,
            metrics: ReportMetrics {
                event_count: events.len() as u64,
                artifact_reference_count,
                verification_duration_ms: u64::try_from(run_started.elapsed().as_millis())
                    .unwrap_or(u64::MAX),
            },
            policy_profile: profile,
        };

        if options.write_reports {
            ReportWriter::new(&traces).write(&report)?;
        }

        info!(
            trace_id,
            report_id = %report.report_id,
            status = %report.verification_status,
            failures = report.failures.len(),
            warnings = report.warnings.len(),
            "verification run completed"
        );
        Ok(report)
    }
}
