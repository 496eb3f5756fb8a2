//! otad - update installation daemon
//!
//! Usage: otad [CONFIG_PATH...]

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use otad::daemon::{Exit, UpdateDaemon};

#[tokio::main]
async fn main() -> Result<()> {
    let verbose = std::env::var_os("OTAD_DEBUG").is_some();
    otad::logging::init(verbose);

    info!("otad v{} starting", env!("CARGO_PKG_VERSION"));

    let config_paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    match UpdateDaemon::new(config_paths).run().await? {
        Exit::Shutdown => info!("otad stopped"),
        Exit::RebootRequired(outcome) => info!("otad stopped, waiting for reboot: {}", outcome),
    }

    Ok(())
}
