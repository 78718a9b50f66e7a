//! Serve the HTTP read API.

use std::net::SocketAddr;
use std::process::ExitCode;

use anyhow::Context;
use coc_core::home::CocHome;

/// Default bind host; loopback unless the operator opts out.
const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port.
const DEFAULT_PORT: u16 = 7433;

pub fn run(home: &CocHome, host: Option<&str>, port: Option<u16>) -> anyhow::Result<ExitCode> {
    let host = host
        .map(str::to_string)
        .or_else(|| std::env::var("COC_API_HOST").ok())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = port
        .or_else(|| {
            std::env::var("COC_API_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
        })
        .unwrap_or(DEFAULT_PORT);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {host}:{port}"))?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime
        .block_on(coc_api::serve(home.clone(), addr))
        .context("API server failed")?;
    Ok(ExitCode::SUCCESS)
}
