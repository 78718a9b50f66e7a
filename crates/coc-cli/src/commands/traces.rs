//! Trace inspection commands.

use std::process::ExitCode;

use anyhow::Context;
use clap::Subcommand;
use coc_core::home::CocHome;
use coc_core::trace::TraceStore;

/// Trace inspection.
#[derive(Subcommand, Debug)]
pub enum TracesCommands {
    /// List traces, newest first
    #[command(alias = "ls")]
    List {
        /// Emit JSON instead of the table
        #[arg(long)]
        json: bool,
    },

    /// Show one trace's session metadata as JSON
    Show {
        /// Trace id, trace directory, or path to its events.jsonl
        trace: String,
    },
}

pub fn run(home: &CocHome, command: TracesCommands) -> anyhow::Result<ExitCode> {
    let traces = TraceStore::new(home);
    match command {
        TracesCommands::List { json } => {
            let sessions = traces.list_traces().context("failed to list traces")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                for session in sessions {
                    println!(
                        "{}  {:<10}  {:>5} events  {}",
                        session.trace_id,
                        format!("{:?}", session.status).to_lowercase(),
                        session.event_count,
                        session.task_id
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        },
        TracesCommands::Show { trace } => {
            let trace_id = traces.resolve_trace_id(&trace);
            let session = traces
                .load_trace(&trace_id)
                .with_context(|| format!("failed to load trace {trace_id}"))?;
            println!("{}", serde_json::to_string_pretty(&session)?);
            Ok(ExitCode::SUCCESS)
        },
    }
}
