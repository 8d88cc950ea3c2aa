pub mod tunnel;

use crate::config::ProvisionConfig;
use crate::state::AppState;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

const ENVIRONMENT_HELP: &str = "\
Configuration is read from the environment (SSH_*, OWNER_ID, DATASTORE_*,
CLOUDFLARE_*, APP_*). Set RUST_LOG=debug to see every remote command.";

/// launchpad - provision a host and publish an app through a Cloudflare tunnel
#[derive(Parser, Debug)]
#[command(name = "launchpad")]
#[command(version, about, long_about = None, after_help = ENVIRONMENT_HELP)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    /// Provisioning is what runs when no subcommand is given.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Provision)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Provision the configured host (default)
    Provision,

    /// Remove a provisioned app, its DNS records and its tunnel
    Teardown {
        /// Id of the tunnel record printed by a successful run
        #[arg(value_parser = record_id)]
        tunnel_record_id: String,
    },
}

fn record_id(value: &str) -> Result<String, String> {
    let id = value.trim();
    if id.is_empty() {
        return Err("the tunnel record id must not be blank".to_string());
    }
    Ok(id.to_string())
}

/// Runs `command` and returns what should be printed on stdout.
pub async fn execute(command: Command) -> Result<String> {
    let config = ProvisionConfig::from_env().context("Invalid configuration")?;
    let state = AppState::init(config).await?;

    match command {
        Command::Provision => {
            let outcome = tunnel::provision(&state).await?;
            Ok(serde_json::to_string_pretty(&outcome)?)
        }
        Command::Teardown { tunnel_record_id } => {
            let report = tunnel::teardown(&state, &tunnel_record_id).await?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
    }
}
