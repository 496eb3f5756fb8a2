use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::collab::RebootSignal;

/// Flag file raised by the agent and removed by the platform on boot
/// (for example a file under /run).
pub struct RebootFlag {
    path: PathBuf,
}

impl RebootFlag {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RebootSignal for RebootFlag {
    fn request_reboot(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, Utc::now().to_rfc3339())?;
        info!("Reboot requested ({})", self.path.display());
        Ok(())
    }

    fn reboot_pending(&self) -> bool {
        self.path.exists()
    }
}
