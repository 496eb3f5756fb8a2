//! Catalog and content read from a local source directory.
//!
//! ```text
//! <source>/versions.json          catalog
//! <source>/versions.json.sha256   optional integrity digest of the catalog
//! <source>/images/<hash>          base image, named by its sha256
//! <source>/apps/<digest>          app bundle, named by its sha256
//! ```

use chrono::{DateTime, Utc};
use ota_shared::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::collab::{Catalog, CatalogError, ContentFetcher, FetchError};

pub const CATALOG_FILE: &str = "versions.json";

const ENOSPC: i32 = 28;

/// On-disk catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    /// Metadata is refused after this instant
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    pub versions: Vec<Version>,
}

pub struct LocalCatalog {
    dir: PathBuf,
}

impl LocalCatalog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn verify(&self, content: &[u8]) -> Result<(), CatalogError> {
        let digest_path = self.dir.join(format!("{}.sha256", CATALOG_FILE));
        let expected = match fs::read_to_string(&digest_path) {
            Ok(text) => text.split_whitespace().next().unwrap_or("").to_lowercase(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CatalogError::MetadataFetchFailure(e.to_string())),
        };
        let actual = hex::encode(Sha256::digest(content));
        if actual != expected {
            return Err(CatalogError::SecurityError(format!(
                "catalog digest {} does not match {}",
                actual, expected
            )));
        }
        Ok(())
    }
}

impl Catalog for LocalCatalog {
    fn list_versions(&self, tag: &str) -> Result<Vec<Version>, CatalogError> {
        let path = self.dir.join(CATALOG_FILE);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CatalogError::MetadataNotFound(path.display().to_string()));
            }
            Err(e) => return Err(CatalogError::MetadataFetchFailure(e.to_string())),
        };
        self.verify(&content)?;

        let catalog: CatalogFile = serde_json::from_slice(&content)
            .map_err(|e| CatalogError::InvalidBundleMetadata(e.to_string()))?;
        if let Some(expires) = catalog.expires {
            if expires < Utc::now() {
                return Err(CatalogError::ExpiredMetadata(format!(
                    "expired at {}",
                    expires.to_rfc3339()
                )));
            }
        }

        let versions: Vec<Version> = catalog
            .versions
            .into_iter()
            .filter(|v| v.tag.is_empty() || v.tag == tag)
            .collect();
        debug!("Catalog lists {} version(s) for tag {}", versions.len(), tag);
        Ok(versions)
    }
}

/// Copies content into the staging area, verifying digests on the way
pub struct LocalFetcher {
    source: PathBuf,
    staging: PathBuf,
}

impl LocalFetcher {
    pub fn new(source: impl AsRef<Path>, staging: impl AsRef<Path>) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            staging: staging.as_ref().to_path_buf(),
        }
    }

    /// (kind, digest) of every object `version` needs
    fn objects(version: &Version) -> Vec<(&'static str, String)> {
        let mut objects = vec![("images", version.image_hash.clone())];
        objects.extend(version.apps.iter().map(|app| ("apps", app.digest.clone())));
        objects
    }

    pub fn staged_path(&self, kind: &str, digest: &str) -> PathBuf {
        self.staging.join(kind).join(digest)
    }

    fn stage(&self, kind: &str, digest: &str) -> Result<(), FetchError> {
        if !is_sha256_hex(digest) {
            return Err(FetchError::VerificationFailed(format!(
                "{} name {:?} is not a sha256 digest",
                kind, digest
            )));
        }
        let target = self.staged_path(kind, digest);
        if target.exists() {
            debug!("{}/{} already staged", kind, digest);
            return Ok(());
        }
        let source = self.source.join(kind).join(digest);
        let mut input = File::open(&source).map_err(|e| {
            FetchError::Unavailable(format!("{}: {}", source.display(), e))
        })?;

        let dir = self.staging.join(kind);
        fs::create_dir_all(&dir).map_err(io_error)?;
        let temp = dir.join(format!("{}.part", digest));
        let result = copy_hashed(&mut input, &temp).map_err(io_error);
        let actual = match result {
            Ok(actual) => actual,
            Err(e) => {
                let _ = fs::remove_file(&temp);
                return Err(e);
            }
        };

        if actual != digest {
            let _ = fs::remove_file(&temp);
            return Err(FetchError::VerificationFailed(format!(
                "{}/{} has digest {}",
                kind, digest, actual
            )));
        }
        fs::rename(&temp, &target).map_err(io_error)?;
        info!("Staged {}/{}", kind, digest);
        Ok(())
    }
}

/// Content names are lowercase hex sha256 and nothing else
fn is_sha256_hex(digest: &str) -> bool {
    digest.len() == 64 && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn copy_hashed(input: &mut File, temp: &Path) -> io::Result<String> {
    let mut output = File::create(temp)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n])?;
    }
    output.sync_all()?;
    Ok(hex::encode(hasher.finalize()))
}

fn io_error(e: io::Error) -> FetchError {
    if e.raw_os_error() == Some(ENOSPC) {
        FetchError::NoSpace(e.to_string())
    } else {
        FetchError::Unavailable(e.to_string())
    }
}

impl ContentFetcher for LocalFetcher {
    fn fetch(&self, version: &Version) -> Result<(), FetchError> {
        for (kind, digest) in Self::objects(version) {
            if let Err(e) = self.stage(kind, &digest) {
                warn!("Staging {} of {} failed: {}", kind, version, e);
                return Err(e);
            }
        }
        Ok(())
    }

    fn is_staged(&self, version: &Version) -> bool {
        Self::objects(version)
            .iter()
            .all(|(kind, digest)| is_sha256_hex(digest) && self.staged_path(kind, digest).exists())
    }
}
