//! Key registry commands.

use std::process::ExitCode;

use anyhow::Context;
use clap::Subcommand;
use coc_core::crypto::KeyRegistry;
use coc_core::home::CocHome;
use coc_core::policy::Role;

/// Key registry management.
#[derive(Subcommand, Debug)]
pub enum KeysCommands {
    /// Provision (or load) an identity's keypair
    Ensure {
        /// Stable agent identifier ([a-z0-9._-]+)
        agent_id: String,

        /// Human-readable display name
        #[arg(long)]
        display_name: Option<String>,

        /// Comma-separated roles (planner,executor,critic,auditor)
        #[arg(long, default_value = "executor")]
        roles: String,
    },

    /// List registered identities
    List,
}

pub fn run(home: &CocHome, command: KeysCommands) -> anyhow::Result<ExitCode> {
    let registry = KeyRegistry::new(home);
    match command {
        KeysCommands::Ensure {
            agent_id,
            display_name,
            roles,
        } => {
            let roles = parse_roles(&roles)?;
            let display_name = display_name.unwrap_or_else(|| agent_id.clone());
            let material = registry
                .ensure_key(&agent_id, &display_name, &roles)
                .context("failed to ensure key")?;
            println!(
                "{}  {}  {}",
                material.identity.agent_id,
                material.identity.key_id,
                roles
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            );
            Ok(ExitCode::SUCCESS)
        },
        KeysCommands::List => {
            for identity in registry.list_identities().context("failed to read registry")? {
                println!(
                    "{}  {}  {:?}  {}",
                    identity.agent_id,
                    identity.key_id,
                    identity.status,
                    identity
                        .role_capabilities
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                );
            }
            Ok(ExitCode::SUCCESS)
        },
    }
}

fn parse_roles(raw: &str) -> anyhow::Result<Vec<Role>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Role>().map_err(|e| anyhow::anyhow!(e)))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid role list")
}
