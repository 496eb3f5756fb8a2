//! Command execution.

use anyhow::{Context, Result};
use ota_shared::Outcome;
use otad::lock::OperationLock;
use otad::{backends, AgentConfig, UpdateAgent};
use std::path::PathBuf;
use tracing::debug;

use crate::cli::{Cli, Commands};
use crate::output;

pub fn load_config(paths: &[PathBuf]) -> Result<AgentConfig> {
    if paths.is_empty() {
        return Ok(AgentConfig::load());
    }
    AgentConfig::load_from(paths).context("Failed to load configuration")
}

/// Parse-independent entry point: load config, take the lock, run.
pub fn run(cli: &Cli) -> Result<Outcome> {
    let config = load_config(&cli.config)?;
    let agent = backends::build(&config);

    let _lock = match cli.command.operation() {
        Some(operation) => Some(
            OperationLock::acquire(&config.agent.state_dir, operation)
                .context("Another update operation is running")?,
        ),
        None => None,
    };
    execute(&agent, &config, &cli.command)
}

pub fn execute(agent: &UpdateAgent, config: &AgentConfig, command: &Commands) -> Result<Outcome> {
    debug!("Executing {:?}", command);
    let outcome = match command {
        Commands::Check => agent.check(config),
        Commands::Pull(target) => agent.pull(config, &target.request(None)),
        Commands::Install {
            target,
            install_mode,
        } => agent.install(config, &target.request(*install_mode)),
        Commands::Run => agent.finalize(config),
        Commands::Rollback => agent.rollback(config),
        Commands::Update {
            target,
            install_mode,
        } => agent.update(config, &target.request(*install_mode)),
        Commands::Status { json } => {
            let report = agent.status(config).context("Failed to read device state")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_status(&report);
            }
            Outcome::Ok
        }
        Commands::List { json } => {
            let (outcome, entries) = agent.list(config).context("Failed to read device state")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                output::print_list(&entries);
            }
            outcome
        }
    };
    Ok(outcome)
}
