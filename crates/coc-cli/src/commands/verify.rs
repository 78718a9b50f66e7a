//! Offline trace verification.

use std::process::ExitCode;

use anyhow::Context;
use coc_core::home::CocHome;
use coc_core::trace::TraceStore;
use coc_core::verifier::report::{render_text, VerificationStatus};
use coc_core::verifier::{Verifier, VerifyOptions};

use crate::exit;

pub fn run(
    home: &CocHome,
    trace: &str,
    policy_profile: Option<&str>,
    no_reports: bool,
    allow_incomplete: bool,
) -> anyhow::Result<ExitCode> {
    let traces = TraceStore::new(home);
    let trace_id = traces.resolve_trace_id(trace);

    let options = VerifyOptions {
        policy_profile: super::resolve_profile(policy_profile)?,
        write_reports: !no_reports,
        report_id: None,
        allow_incomplete_finalization: allow_incomplete,
    };

    let report = Verifier::new(home)
        .verify(&trace_id, &options)
        .with_context(|| format!("failed to verify trace {trace_id}"))?;

    print!("{}", render_text(&report));

    match report.verification_status {
        VerificationStatus::Pass | VerificationStatus::PassWithWarnings => Ok(ExitCode::SUCCESS),
        VerificationStatus::Fail => Ok(ExitCode::from(exit::VERIFICATION_FAILED)),
    }
}
