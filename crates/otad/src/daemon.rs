//! Update daemon loop.
//!
//! Resumes whatever the ledger holds once the reboot it waited for has
//! happened, then polls the catalog every `interval_secs`. Config is
//! reloaded on each tick. Agent calls are blocking and run on the blocking
//! pool; the operation lock keeps them exclusive with otactl.

use ota_shared::Outcome;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::backends;
use crate::config::{AgentConfig, InstallMode};
use crate::lock::OperationLock;
use crate::select::UpdateRequest;

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Shutdown,
    /// An update is waiting for a reboot
    RebootRequired(Outcome),
}

pub struct UpdateDaemon {
    config_paths: Vec<PathBuf>,
}

impl UpdateDaemon {
    /// `config_paths` empty means the standard locations
    pub fn new(config_paths: Vec<PathBuf>) -> Self {
        Self { config_paths }
    }

    fn load_config(&self) -> AgentConfig {
        if self.config_paths.is_empty() {
            return AgentConfig::load();
        }
        AgentConfig::load_from(&self.config_paths).unwrap_or_else(|e| {
            warn!("Config not usable, using defaults: {}", e);
            AgentConfig::default()
        })
    }

    pub async fn run(self) -> anyhow::Result<Exit> {
        let config = self.load_config();
        info!(
            "🔄  Update loop started (tag {}, every {}s)",
            config.agent.tag, config.daemon.interval_secs
        );

        if let Some(outcome) = Self::resume(config.clone()).await? {
            if outcome.needs_reboot() {
                return Ok(Self::reboot(&config, outcome).await);
            }
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(config.daemon.interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down gracefully");
                    return Ok(Exit::Shutdown);
                }
            }

            let config = self.load_config();
            match Self::tick(config.clone()).await? {
                Some(outcome) if outcome.needs_reboot() => {
                    return Ok(Self::reboot(&config, outcome).await);
                }
                Some(Outcome::Ok) => debug!("📋  Up to date"),
                Some(outcome) => info!("Update cycle ended: {}", outcome),
                None => {}
            }
        }
    }

    /// One unattended update cycle. Apps are always installed in the same
    /// pass since the loop never finalizes deferred apps.
    async fn tick(config: AgentConfig) -> anyhow::Result<Option<Outcome>> {
        Self::run_locked(config, "update", |agent, config| {
            agent.update(config, &UpdateRequest::latest().with_mode(InstallMode::All))
        })
        .await
    }

    /// Finalize a pending installation whose reboot already happened.
    async fn resume(config: AgentConfig) -> anyhow::Result<Option<Outcome>> {
        let agent = backends::build(&config);
        let pending = match agent.pending() {
            Ok(pending) => pending,
            Err(e) => {
                error!("❌  Cannot read installation record: {}", e);
                return Ok(None);
            }
        };
        let Some(record) = pending else {
            return Ok(None);
        };
        if record.phase.awaits_reboot() && agent.reboot_pending() {
            info!("{} still waits for a reboot", record.target);
            return Ok(Some(record.reboot_outcome()));
        }

        info!("Resuming {} from phase {}", record.target, record.phase);
        Self::run_locked(config, "finalize", |agent, config| agent.finalize(config)).await
    }

    /// Run one agent operation under the operation lock. `None` when
    /// another process holds the lock.
    async fn run_locked<F>(
        config: AgentConfig,
        operation: &'static str,
        op: F,
    ) -> anyhow::Result<Option<Outcome>>
    where
        F: FnOnce(&crate::UpdateAgent, &AgentConfig) -> Outcome + Send + 'static,
    {
        let outcome = tokio::task::spawn_blocking(move || {
            let _lock = match OperationLock::acquire(&config.agent.state_dir, operation) {
                Ok(lock) => lock,
                Err(e) => {
                    warn!("Skipping {}: {}", operation, e);
                    return None;
                }
            };
            let agent = backends::build(&config);
            Some(op(&agent, &config))
        })
        .await?;
        Ok(outcome)
    }

    async fn reboot(config: &AgentConfig, outcome: Outcome) -> Exit {
        match &config.agent.reboot_command {
            Some(command) => {
                info!("🔄  {}; running {}", outcome, command);
                match Command::new("sh").arg("-c").arg(command).status().await {
                    Ok(status) if status.success() => {}
                    Ok(status) => error!("❌  Reboot command exited with {}", status),
                    Err(e) => error!("❌  Cannot run reboot command: {}", e),
                }
            }
            None => warn!("{}; reboot the device to continue", outcome),
        }
        Exit::RebootRequired(outcome)
    }
}
