//! Platform hooks run as external commands.

use ota_shared::{App, AppSet};
use std::io::{self, Write};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

use crate::collab::{AppApply, AppFailure, AppRuntime, ImageApply, ImageDeployer};

/// Exit code of the image hook when the image is active only after a reboot
pub const IMAGE_NEEDS_REBOOT_EXIT: i32 = 100;

pub struct CommandImageDeployer {
    apply: String,
    booted: String,
}

impl CommandImageDeployer {
    pub fn new(apply: &str, booted: &str) -> Self {
        Self {
            apply: apply.to_string(),
            booted: booted.to_string(),
        }
    }
}

impl ImageDeployer for CommandImageDeployer {
    fn apply_image(&self, hash: &str) -> ImageApply {
        debug!("Running {} {}", self.apply, hash);
        let output = match Command::new(&self.apply)
            .arg(hash)
            .stdin(Stdio::null())
            .output()
        {
            Ok(output) => output,
            Err(e) => return ImageApply::Failed(format!("cannot run {}: {}", self.apply, e)),
        };

        match output.status.code() {
            Some(0) => ImageApply::Ok,
            Some(IMAGE_NEEDS_REBOOT_EXIT) => ImageApply::NeedsReboot,
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                ImageApply::Failed(format!("{} ({})", stderr.trim(), output.status))
            }
        }
    }

    fn booted_image(&self) -> Option<String> {
        match Command::new(&self.booted).stdin(Stdio::null()).output() {
            Ok(output) if output.status.success() => {
                let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if hash.is_empty() {
                    None
                } else {
                    Some(hash)
                }
            }
            Ok(output) => {
                warn!("{} exited with {}", self.booted, output.status);
                None
            }
            Err(e) => {
                warn!("Cannot run {}: {}", self.booted, e);
                None
            }
        }
    }
}

/// Hands the desired app set to a runtime hook as JSON on stdin.
/// `OTAD_PRUNE` is `1` when apps outside the set must be removed.
pub struct CommandAppRuntime {
    program: String,
}

impl CommandAppRuntime {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    fn run(&self, apps: &AppSet, prune: bool) -> Result<std::process::Output, String> {
        let list: Vec<&App> = apps.iter().collect();
        let payload = serde_json::to_vec(&list).map_err(|e| e.to_string())?;

        let mut child = Command::new(&self.program)
            .env("OTAD_PRUNE", if prune { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("cannot run {}: {}", self.program, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload) {
                Ok(()) => {}
                // Hook exited without reading the app set
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("{} closed stdin early", self.program)
                }
                Err(e) => return Err(e.to_string()),
            }
        }
        child.wait_with_output().map_err(|e| e.to_string())
    }
}

/// `name: reason` lines; anything else is ignored
fn parse_failures(stdout: &str) -> Vec<AppFailure> {
    stdout
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(app, reason)| AppFailure::new(app.trim(), reason.trim()))
        .filter(|f| !f.app.is_empty())
        .collect()
}

impl AppRuntime for CommandAppRuntime {
    fn apply_apps(&self, apps: &AppSet, prune: bool) -> AppApply {
        debug!("Applying {} app(s), prune={}", apps.len(), prune);
        let output = match self.run(apps, prune) {
            Ok(output) => output,
            Err(reason) => return AppApply::Failed(vec![AppFailure::new("*", &reason)]),
        };
        if output.status.success() {
            return AppApply::Ok;
        }

        let mut failures = parse_failures(&String::from_utf8_lossy(&output.stdout));
        if failures.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            failures.push(AppFailure::new(
                "*",
                &format!("{} ({})", stderr.trim(), output.status),
            ));
        }
        AppApply::Failed(failures)
    }
}
