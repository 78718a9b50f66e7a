//! coc - tamper-evident execution traces for multi-agent workflows.
//!
//! CLI over the chain-of-custody core: key provisioning, the scripted demo
//! protocol run, offline verification, trace inspection, crash repair, and
//! the HTTP read API.
//!
//! Exit codes (consumed by CI): `0` pass, `1` verification fail, `2`
//! input/schema validation, `3` runtime protocol error, `4` internal
//! error, `5` policy preflight block.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use coc_core::home::CocHome;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit;

/// coc - chain-of-custody traces for multi-agent workflows
#[derive(Parser, Debug)]
#[command(name = "coc")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Root of the chain-of-custody store (env: COC_HOME, default ./.coc)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error; env: COC_LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Key registry management
    #[command(subcommand)]
    Keys(commands::keys::KeysCommands),

    /// Run the scripted good-path demo protocol
    Demo {
        /// Task identifier recorded in the trace
        #[arg(long, default_value = "task.demo")]
        task_id: String,

        /// Policy profile (strict, default, lenient; env: COC_POLICY_PROFILE)
        #[arg(long)]
        policy_profile: Option<String>,
    },

    /// Verify a trace and write reports
    Verify {
        /// Trace id, trace directory, or path to its events.jsonl
        trace: String,

        /// Override the trace's policy profile
        #[arg(long)]
        policy_profile: Option<String>,

        /// Skip writing report files
        #[arg(long)]
        no_reports: bool,

        /// Treat a missing verification_run_completed as a warning
        #[arg(long)]
        allow_incomplete: bool,
    },

    /// Trace inspection
    #[command(subcommand)]
    Traces(commands::traces::TracesCommands),

    /// Rebuild a trace's session metadata from its event file
    Repair {
        /// Trace id, trace directory, or path to its events.jsonl
        trace: String,
    },

    /// Serve the HTTP read API
    Serve {
        /// Bind host (env: COC_API_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (env: COC_API_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Environment resolution happens here, at the process boundary; the
    // core components only ever see explicit paths and values.
    let log_level = cli
        .log_level
        .or_else(|| std::env::var("COC_LOG_LEVEL").ok())
        .unwrap_or_else(|| "warn".to_string());
    let filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let home = CocHome::new(cli.home.unwrap_or_else(|| {
        std::env::var("COC_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.coc"))
    }));

    let result = match cli.command {
        Commands::Keys(cmd) => commands::keys::run(&home, cmd),
        Commands::Demo {
            task_id,
            policy_profile,
        } => commands::demo::run(&home, &task_id, policy_profile.as_deref()),
        Commands::Verify {
            trace,
            policy_profile,
            no_reports,
            allow_incomplete,
        } => commands::verify::run(
            &home,
            &trace,
            policy_profile.as_deref(),
            no_reports,
            allow_incomplete,
        ),
        Commands::Traces(cmd) => commands::traces::run(&home, cmd),
        Commands::Repair { trace } => commands::repair::run(&home, &trace),
        Commands::Serve { host, port } => commands::serve::run(&home, host.as_deref(), port),
    };

    match result {
        Ok(code) => code,
        Err(error) => exit::report(&error),
    }
}
