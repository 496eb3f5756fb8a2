//! In-memory device for agent integration tests.
//!
//! The fake image deployer behaves like an A/B bootloader: deploying the
//! booted image is a no-op, anything else is staged for the next boot.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex};

use ota_shared::callback::CallbackEvent;
use ota_shared::{
    App, AppSet, DeviceState, EventLog, Ledger, UpdateSummary, Version, VersionId,
};
use otad::callbacks::{CallbackDispatcher, CallbackError, CallbackHook};
use otad::collab::{
    AppApply, AppFailure, AppRuntime, Catalog, CatalogError, Collaborators, ContentFetcher,
    FetchError, ImageApply, ImageDeployer, RebootSignal,
};
use otad::emitter::EventEmitter;
use otad::{AgentConfig, UpdateAgent};
use tempfile::TempDir;

#[derive(Debug, Default)]
pub struct World {
    pub versions: Vec<Version>,
    pub catalog_error: Option<CatalogError>,
    pub fetch_error: Option<FetchError>,
    pub staged: BTreeSet<VersionId>,
    pub booted: String,
    /// Image that becomes active on the next boot
    pub deployed: Option<String>,
    pub broken_images: BTreeSet<String>,
    pub failing_apps: BTreeSet<String>,
    pub running: AppSet,
    pub reboot_flag: bool,
    /// Next boot falls back to the old image
    pub bootloader_rollback: bool,
    pub image_calls: Vec<String>,
}

pub type Shared = Arc<Mutex<World>>;

struct FakeCatalog(Shared);

impl Catalog for FakeCatalog {
    fn list_versions(&self, tag: &str) -> Result<Vec<Version>, CatalogError> {
        let world = self.0.lock().unwrap();
        if let Some(e) = &world.catalog_error {
            return Err(e.clone());
        }
        Ok(world
            .versions
            .iter()
            .filter(|v| v.tag.is_empty() || v.tag == tag)
            .cloned()
            .collect())
    }
}

struct FakeFetcher(Shared);

impl ContentFetcher for FakeFetcher {
    fn fetch(&self, version: &Version) -> Result<(), FetchError> {
        let mut world = self.0.lock().unwrap();
        if let Some(e) = &world.fetch_error {
            return Err(e.clone());
        }
        world.staged.insert(version.id);
        Ok(())
    }

    fn is_staged(&self, version: &Version) -> bool {
        self.0.lock().unwrap().staged.contains(&version.id)
    }
}

struct FakeImages(Shared);

impl ImageDeployer for FakeImages {
    fn apply_image(&self, hash: &str) -> ImageApply {
        let mut world = self.0.lock().unwrap();
        world.image_calls.push(hash.to_string());
        if world.broken_images.contains(hash) {
            return ImageApply::Failed(format!("image {} does not verify", hash));
        }
        if world.booted == hash {
            world.deployed = None;
            return ImageApply::Ok;
        }
        world.deployed = Some(hash.to_string());
        ImageApply::NeedsReboot
    }

    fn booted_image(&self) -> Option<String> {
        Some(self.0.lock().unwrap().booted.clone())
    }
}

struct FakeApps(Shared);

impl AppRuntime for FakeApps {
    fn apply_apps(&self, apps: &AppSet, _prune: bool) -> AppApply {
        let mut world = self.0.lock().unwrap();
        let failures: Vec<AppFailure> = apps
            .iter()
            .filter(|app| world.failing_apps.contains(&app.name))
            .map(|app| AppFailure::new(&app.name, "container exited with 1"))
            .collect();
        if !failures.is_empty() {
            return AppApply::Failed(failures);
        }
        world.running = apps.clone();
        AppApply::Ok
    }
}

struct FakeReboot(Shared);

impl RebootSignal for FakeReboot {
    fn request_reboot(&self) -> io::Result<()> {
        self.0.lock().unwrap().reboot_flag = true;
        Ok(())
    }

    fn reboot_pending(&self) -> bool {
        self.0.lock().unwrap().reboot_flag
    }
}

pub type CallbackLog = Arc<Mutex<Vec<(String, String)>>>;

struct RecordingHook(CallbackLog);

impl CallbackHook for RecordingHook {
    fn invoke(&self, event: &CallbackEvent) -> Result<(), CallbackError> {
        self.0.lock().unwrap().push((
            event.message.as_str().to_string(),
            event.result_str().to_string(),
        ));
        Ok(())
    }
}

pub fn version(id: VersionId, image: &str, apps: &[&str]) -> Version {
    Version::new(id, image).with_apps(
        apps.iter()
            .map(|name| App::new(name, &format!("{}-{}", name, id))),
    )
}

pub struct Harness {
    pub dir: TempDir,
    pub world: Shared,
    pub calls: CallbackLog,
    pub agent: UpdateAgent,
    pub config: AgentConfig,
}

impl Harness {
    /// Device committed to `current`, catalog publishing `versions`
    pub fn new(current: Version, versions: Vec<Version>) -> Self {
        let dir = TempDir::new().unwrap();
        let world: Shared = Arc::new(Mutex::new(World {
            versions,
            booted: current.image_hash.clone(),
            running: current.apps.clone(),
            ..World::default()
        }));
        let calls: CallbackLog = Arc::new(Mutex::new(Vec::new()));

        let ledger = Ledger::new(dir.path());
        ledger
            .save_device(&DeviceState::new(current.clone(), current.apps.clone()))
            .unwrap();

        let parts = Collaborators {
            catalog: Box::new(FakeCatalog(world.clone())),
            fetcher: Box::new(FakeFetcher(world.clone())),
            images: Box::new(FakeImages(world.clone())),
            apps: Box::new(FakeApps(world.clone())),
            reboot: Box::new(FakeReboot(world.clone())),
        };
        let agent = UpdateAgent::new(
            parts,
            ledger,
            EventEmitter::new(EventLog::in_dir(dir.path())),
            CallbackDispatcher::new(Box::new(RecordingHook(calls.clone()))),
        );

        let mut config = AgentConfig::default();
        config.agent.state_dir = dir.path().to_path_buf();

        Self {
            dir,
            world,
            calls,
            agent,
            config,
        }
    }

    pub fn with_world(self, f: impl FnOnce(&mut World)) -> Self {
        f(&mut self.world.lock().unwrap());
        self
    }

    /// Boot whatever was deployed; the platform clears the reboot flag.
    pub fn reboot(&self) {
        let mut world = self.world.lock().unwrap();
        world.reboot_flag = false;
        if let Some(image) = world.deployed.take() {
            if !world.bootloader_rollback {
                world.booted = image;
            }
        }
    }

    pub fn booted(&self) -> String {
        self.world.lock().unwrap().booted.clone()
    }

    pub fn running(&self) -> Vec<String> {
        self.world
            .lock()
            .unwrap()
            .running
            .names()
            .iter()
            .map(|n| n.to_string())
            .collect()
    }

    /// Drain the recorded callbacks
    pub fn take_calls(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Drained callbacks of one family (`install`, `download`, ...)
    pub fn take_calls_of(&self, family: &str) -> Vec<(String, String)> {
        self.take_calls()
            .into_iter()
            .filter(|(message, _)| message.starts_with(family))
            .collect()
    }

    pub fn device(&self) -> DeviceState {
        self.agent.ledger().load_device().unwrap().unwrap()
    }

    pub fn updates(&self) -> Vec<UpdateSummary> {
        self.agent.events().updates()
    }
}

pub fn calls(expected: &[(&str, &str)]) -> Vec<(String, String)> {
    expected
        .iter()
        .map(|(m, r)| (m.to_string(), r.to_string()))
        .collect()
}
