//! Configuration management for otad.
//!
//! Loads /etc/otad/otad.toml and every fragment in /etc/otad/conf.d in
//! lexical order; later fragments override earlier keys. Missing files
//! fall back to defaults.

use ota_shared::{AppSet, Version};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Main config file
pub const CONFIG_PATH: &str = "/etc/otad/otad.toml";

/// Drop-in fragments
pub const CONFIG_DIR: &str = "/etc/otad/conf.d";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(#[from] toml::de::Error),
}

/// How apps are applied during install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallMode {
    /// Apps are applied as part of install
    #[default]
    All,
    /// Apps are applied by a follow-up `run` when no reboot is involved
    DelayAppInstall,
}

impl std::str::FromStr for InstallMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(InstallMode::All),
            "delay-app-install" => Ok(InstallMode::DelayAppInstall),
            other => Err(format!("unknown install mode: {}", other)),
        }
    }
}

/// Agent behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Update channel
    #[serde(default = "default_tag")]
    pub tag: String,

    /// App shortlist; unset runs every app of the version
    #[serde(default)]
    pub apps: Option<Vec<String>>,

    /// Remove apps that are not part of the desired set
    #[serde(default = "default_true")]
    pub prune: bool,

    #[serde(default)]
    pub install_mode: InstallMode,

    /// Follow the tag to a lower version when it moves backwards
    #[serde(default = "default_true")]
    pub auto_downgrade: bool,

    /// Program run for every lifecycle callback
    #[serde(default)]
    pub callback_program: Option<PathBuf>,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Flag file present while a requested reboot is outstanding
    #[serde(default = "default_reboot_flag")]
    pub reboot_flag: PathBuf,

    /// Command the daemon runs when an update needs a reboot
    #[serde(default)]
    pub reboot_command: Option<String>,
}

fn default_tag() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(ota_shared::STATE_DIR)
}

fn default_reboot_flag() -> PathBuf {
    PathBuf::from("/run/otad/need_reboot")
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            tag: default_tag(),
            apps: None,
            prune: true,
            install_mode: InstallMode::All,
            auto_downgrade: true,
            callback_program: None,
            state_dir: default_state_dir(),
            reboot_flag: default_reboot_flag(),
            reboot_command: None,
        }
    }
}

/// Local catalog and content bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    #[serde(default = "default_source_dir")]
    pub dir: PathBuf,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("/var/lib/otad/source")
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            dir: default_source_dir(),
        }
    }
}

/// Platform hook commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksSection {
    /// Called with the image hash; exit 0 = active, 100 = needs reboot
    #[serde(default = "default_image_apply")]
    pub image_apply: String,

    /// Prints the booted image hash
    #[serde(default = "default_image_booted")]
    pub image_booted: String,

    /// Reads the app set as JSON on stdin
    #[serde(default = "default_apps_apply")]
    pub apps_apply: String,
}

fn default_image_apply() -> String {
    "/usr/libexec/otad/apply-image".to_string()
}

fn default_image_booted() -> String {
    "/usr/libexec/otad/booted-image".to_string()
}

fn default_apps_apply() -> String {
    "/usr/libexec/otad/apply-apps".to_string()
}

impl Default for HooksSection {
    fn default() -> Self {
        Self {
            image_apply: default_image_apply(),
            image_booted: default_image_booted(),
            apps_apply: default_apps_apply(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 {
    300
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

/// Complete agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub source: SourceSection,

    #[serde(default)]
    pub hooks: HooksSection,

    #[serde(default)]
    pub daemon: DaemonSection,
}

impl AgentConfig {
    /// Load from the standard locations or use defaults
    pub fn load() -> Self {
        let paths = [PathBuf::from(CONFIG_PATH), PathBuf::from(CONFIG_DIR)];
        Self::load_from(&paths).unwrap_or_else(|e| {
            warn!("Config not usable, using defaults: {}", e);
            AgentConfig::default()
        })
    }

    /// Merge the given files and directories in order. Paths that do not
    /// exist are skipped.
    pub fn load_from(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();
        let mut loaded = 0;

        for path in paths {
            for file in config_files(path)? {
                let content = fs::read_to_string(&file).map_err(|source| ConfigError::Io {
                    path: file.clone(),
                    source,
                })?;
                let fragment: toml::Table =
                    toml::from_str(&content).map_err(|source| ConfigError::Parse {
                        path: file.clone(),
                        source,
                    })?;
                merge_tables(&mut merged, fragment);
                debug!("Merged config fragment {}", file.display());
                loaded += 1;
            }
        }

        if loaded == 0 {
            warn!("No config files found, using defaults");
        } else {
            info!("Loaded {} config file(s)", loaded);
        }
        Ok(toml::Value::Table(merged).try_into()?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn shortlist(&self) -> Option<&[String]> {
        self.agent.apps.as_deref()
    }

    /// Apps that should run for `version` under the current shortlist
    pub fn desired_apps(&self, version: &Version) -> AppSet {
        version.apps.shortlisted(self.shortlist())
    }

    /// `version` restricted to the apps this device runs
    pub fn effective_version(&self, version: &Version) -> Version {
        version.with_app_set(self.desired_apps(version))
    }
}

fn config_files(path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map(|x| x == "toml").unwrap_or(false))
        .collect();
    files.sort();
    Ok(files)
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => merge_tables(existing, incoming),
                _ => {
                    base.insert(key, toml::Value::Table(incoming));
                }
            },
            other => {
                base.insert(key, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_shared::App;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.agent.tag, "main");
        assert!(config.agent.prune);
        assert!(config.agent.auto_downgrade);
        assert_eq!(config.agent.install_mode, InstallMode::All);
        assert_eq!(config.daemon.interval_secs, 300);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AgentConfig::from_toml_str(
            r#"
            [agent]
            tag = "beta"
            install_mode = "delay-app-install"
            "#,
        )
        .unwrap();
        assert_eq!(config.agent.tag, "beta");
        assert_eq!(config.agent.install_mode, InstallMode::DelayAppInstall);
        assert!(config.agent.prune);
        assert_eq!(config.hooks.apps_apply, "/usr/libexec/otad/apply-apps");
    }

    #[test]
    fn test_fragments_override_in_order() {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("otad.toml");
        fs::write(&main, "[agent]\ntag = \"main\"\nprune = false\n").unwrap();
        let conf_d = dir.path().join("conf.d");
        fs::create_dir(&conf_d).unwrap();
        fs::write(conf_d.join("z-50-apps.toml"), "[agent]\napps = [\"shellhttpd\"]\n").unwrap();
        fs::write(conf_d.join("a-10-tag.toml"), "[agent]\ntag = \"devel\"\n").unwrap();
        fs::write(conf_d.join("notes.txt"), "ignored").unwrap();

        let config = AgentConfig::load_from(&[main, conf_d]).unwrap();
        assert_eq!(config.agent.tag, "devel");
        assert!(!config.agent.prune);
        assert_eq!(config.agent.apps, Some(vec!["shellhttpd".to_string()]));
    }

    #[test]
    fn test_bad_fragment_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[agent\n").unwrap();
        assert!(matches!(
            AgentConfig::load_from(&[path]),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_paths_give_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AgentConfig::load_from(&[dir.path().join("nope.toml")]).unwrap();
        assert_eq!(config.agent.tag, "main");
    }

    #[test]
    fn test_desired_apps_follow_shortlist() {
        let mut config = AgentConfig::default();
        let v = Version::new(1, "a").with_apps(vec![App::new("x", "1"), App::new("y", "2")]);
        assert_eq!(config.desired_apps(&v).len(), 2);
        config.agent.apps = Some(vec!["y".to_string()]);
        assert_eq!(config.desired_apps(&v).names(), vec!["y"]);
        assert_eq!(config.effective_version(&v).apps.names(), vec!["y"]);
    }

    #[test]
    fn test_install_mode_from_str() {
        assert_eq!("all".parse::<InstallMode>(), Ok(InstallMode::All));
        assert!("later".parse::<InstallMode>().is_err());
    }
}
