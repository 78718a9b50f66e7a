//! Crash recovery: rebuild session metadata from the event file.
//!
//! A crash between appending a ledger line and saving the session leaves
//! the metadata stale, after which every append fails its
//! `prev_event_hash` precondition. The event file is truth; this command
//! re-derives the head hash and counts from it and rewrites
//! `trace.meta.json`. Safe to run repeatedly.

use std::process::ExitCode;

use anyhow::Context;
use coc_core::home::CocHome;
use coc_core::ledger::Ledger;
use coc_core::trace::TraceStore;

pub fn run(home: &CocHome, trace: &str) -> anyhow::Result<ExitCode> {
    let traces = TraceStore::new(home);
    let trace_id = traces.resolve_trace_id(trace);

    let session = Ledger::new(home)
        .repair_session(&trace_id)
        .with_context(|| format!("failed to repair trace {trace_id}"))?;

    println!(
        "repaired {}: head={} events={} artifacts={}",
        session.trace_id, session.head_event_hash, session.event_count, session.artifact_count
    );
    Ok(ExitCode::SUCCESS)
}
