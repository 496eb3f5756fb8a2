//! otad - update installation agent
//!
//! Drives a single version through download, install, reboot and finalize,
//! rolling back to the last committed version when any step fails.
//!
//! - `agent`: the installation state machine (`UpdateAgent`)
//! - `policy`: rollback target and reboot decisions
//! - `select`: which catalog version an operation acts on
//! - `collab`: interfaces to the catalog, fetcher, image deployer, app runtime and reboot signal
//! - `backends`: file and command backed implementations of those interfaces
//! - `emitter` / `callbacks`: lifecycle events and operator hooks

pub mod agent;
pub mod backends;
pub mod callbacks;
pub mod collab;
pub mod config;
pub mod daemon;
pub mod emitter;
pub mod lock;
pub mod logging;
pub mod policy;
pub mod select;

pub use agent::UpdateAgent;
pub use select::UpdateRequest;
pub use config::{AgentConfig, InstallMode};
