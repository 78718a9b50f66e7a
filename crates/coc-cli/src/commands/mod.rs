//! CLI command implementations.

pub mod demo;
pub mod keys;
pub mod repair;
pub mod serve;
pub mod traces;
pub mod verify;

use anyhow::Context;
use coc_core::policy::PolicyProfile;

/// Resolves a policy profile from a CLI flag, the `COC_POLICY_PROFILE`
/// environment variable, or `None` for the per-trace default.
pub fn resolve_profile(flag: Option<&str>) -> anyhow::Result<Option<PolicyProfile>> {
    let raw = match flag {
        Some(value) => Some(value.to_string()),
        None => std::env::var("COC_POLICY_PROFILE").ok(),
    };
    raw.map(|value| {
        value
            .parse::<PolicyProfile>()
            .map_err(|e| anyhow::anyhow!(e))
            .context("invalid policy profile")
    })
    .transpose()
}
