//! Version descriptors as published by the catalog.
//!
//! A version is immutable once observed: a base image identified by its
//! content hash plus a named set of applications.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type VersionId = u64;

/// One application of a version's app set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    /// Content digest of the app bundle (hex sha256)
    pub digest: String,
}

impl App {
    pub fn new(name: &str, digest: &str) -> Self {
        Self {
            name: name.to_string(),
            digest: digest.to_string(),
        }
    }
}

/// Ordered set of apps, unique by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<App>", into = "Vec<App>")]
pub struct AppSet(Vec<App>);

impl From<Vec<App>> for AppSet {
    fn from(mut apps: Vec<App>) -> Self {
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        apps.dedup_by(|a, b| a.name == b.name);
        AppSet(apps)
    }
}

impl From<AppSet> for Vec<App> {
    fn from(set: AppSet) -> Self {
        set.0
    }
}

impl FromIterator<App> for AppSet {
    fn from_iter<I: IntoIterator<Item = App>>(iter: I) -> Self {
        AppSet::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl AppSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &App> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&App> {
        self.0.iter().find(|a| a.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|a| a.name.as_str()).collect()
    }

    /// Restrict to the apps named in `shortlist`; `None` keeps everything.
    pub fn shortlisted(&self, shortlist: Option<&[String]>) -> AppSet {
        match shortlist {
            None => self.clone(),
            Some(names) => self
                .0
                .iter()
                .filter(|a| names.iter().any(|n| n == &a.name))
                .cloned()
                .collect(),
        }
    }
}

/// Immutable version descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Monotonic version number
    pub id: VersionId,
    /// Human readable name (e.g. "gateway-lmp-42")
    pub name: String,
    /// Hash of the immutable base image
    pub image_hash: String,
    #[serde(default)]
    pub apps: AppSet,
    /// Update channel
    #[serde(default)]
    pub tag: String,
}

impl Version {
    pub fn new(id: VersionId, image_hash: &str) -> Self {
        Self {
            id,
            name: format!("v{}", id),
            image_hash: image_hash.to_string(),
            apps: AppSet::new(),
            tag: String::new(),
        }
    }

    /// Placeholder for a device whose running image was not installed by the agent.
    pub fn initial(image_hash: &str) -> Self {
        Self {
            name: "initial".to_string(),
            ..Self::new(0, image_hash)
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    pub fn with_apps(mut self, apps: impl IntoIterator<Item = App>) -> Self {
        self.apps = apps.into_iter().collect();
        self
    }

    /// Copy of this version carrying only `apps`.
    pub fn with_app_set(&self, apps: AppSet) -> Self {
        Self {
            apps,
            ..self.clone()
        }
    }

    pub fn same_image(&self, other: &Version) -> bool {
        self.image_hash == other.image_hash
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_set_sorted_and_unique() {
        let set: AppSet = vec![
            App::new("zigbee", "d1"),
            App::new("agent", "d2"),
            App::new("zigbee", "d3"),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.names(), vec!["agent", "zigbee"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_shortlist_filters_apps() {
        let set: AppSet = vec![App::new("a", "1"), App::new("b", "2"), App::new("c", "3")]
            .into_iter()
            .collect();
        let shortlist = vec!["c".to_string(), "a".to_string(), "missing".to_string()];
        let picked = set.shortlisted(Some(&shortlist));
        assert_eq!(picked.names(), vec!["a", "c"]);
        assert_eq!(set.shortlisted(None), set);
    }

    #[test]
    fn test_app_set_serializes_as_list() {
        let set: AppSet = vec![App::new("b", "2"), App::new("a", "1")].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.starts_with('['));
        let back: AppSet = serde_json::from_str(r#"[{"name":"b","digest":"2"},{"name":"a","digest":"1"}]"#).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_version_display_and_image_compare() {
        let a = Version::new(3, "img-b").with_name("gateway-3");
        let b = Version::new(4, "img-b");
        assert_eq!(a.to_string(), "gateway-3 (#3)");
        assert!(a.same_image(&b));
        assert!(!a.same_image(&Version::new(5, "img-c")));
    }
}
