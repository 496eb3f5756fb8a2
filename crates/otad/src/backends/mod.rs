//! File and command backed collaborators used by the otad and otactl binaries.

mod command;
mod local;
mod reboot;

pub use command::{CommandAppRuntime, CommandImageDeployer, IMAGE_NEEDS_REBOOT_EXIT};
pub use local::{CatalogFile, LocalCatalog, LocalFetcher, CATALOG_FILE};
pub use reboot::RebootFlag;

use ota_shared::{EventLog, Ledger};

use crate::agent::UpdateAgent;
use crate::callbacks::CallbackDispatcher;
use crate::collab::Collaborators;
use crate::config::AgentConfig;
use crate::emitter::EventEmitter;

/// Staging area under the state directory
pub const STAGING_DIR: &str = "staging";

/// Wire an agent from configuration.
pub fn build(config: &AgentConfig) -> UpdateAgent {
    let state_dir = &config.agent.state_dir;
    let parts = Collaborators {
        catalog: Box::new(LocalCatalog::new(&config.source.dir)),
        fetcher: Box::new(LocalFetcher::new(
            &config.source.dir,
            state_dir.join(STAGING_DIR),
        )),
        images: Box::new(CommandImageDeployer::new(
            &config.hooks.image_apply,
            &config.hooks.image_booted,
        )),
        apps: Box::new(CommandAppRuntime::new(&config.hooks.apps_apply)),
        reboot: Box::new(RebootFlag::new(&config.agent.reboot_flag)),
    };

    UpdateAgent::new(
        parts,
        Ledger::new(state_dir),
        EventEmitter::new(EventLog::in_dir(state_dir)),
        CallbackDispatcher::for_program(config.agent.callback_program.as_deref()),
    )
}
