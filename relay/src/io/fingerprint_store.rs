//! On-disk fingerprint cache, scoped per watched root.
//!
//! One JSON file holds a section per root:
//!
//! ```json
//! { "/notes": { "fingerprints": { "/notes/a.md": "<sha256>" },
//!               "self_writes": { "/notes/a.md": { "produced": "<sha256>" } } } }
//! ```
//!
//! Saving re-reads the file and replaces only the caller's section so several
//! roots can share the cache. A missing, empty or malformed file loads as empty.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::classifier::SelfWrite;

pub const CACHE_FILE_NAME: &str = "file_hashes.json";

/// Document path → fingerprint.
pub type FingerprintMap = BTreeMap<PathBuf, String>;
/// Document path → pending self-write mark.
pub type SelfWriteMap = BTreeMap<PathBuf, SelfWrite>;

/// Persisted state for one watched root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootCache {
    pub fingerprints: FingerprintMap,
    pub self_writes: SelfWriteMap,
}

type CacheFile = BTreeMap<String, RootCache>;

/// Shared handle on the cache file. Writers are serialized in-process.
#[derive(Debug)]
pub struct FingerprintStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FingerprintStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join(CACHE_FILE_NAME),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the section for `root`. Never fails: unreadable caches load empty.
    pub fn load(&self, root: &Path) -> RootCache {
        let mut file = self.read_file();
        let cache = file.remove(&root_key(root)).unwrap_or_default();
        debug!(
            root = %root.display(),
            fingerprints = cache.fingerprints.len(),
            self_writes = cache.self_writes.len(),
            "loaded fingerprint cache"
        );
        cache
    }

    /// Replace the fingerprint map for `root`, keeping its self-write marks.
    pub fn save_fingerprints(&self, root: &Path, fingerprints: &FingerprintMap) -> Result<()> {
        self.update(root, |cache| cache.fingerprints = fingerprints.clone())
    }

    /// Replace the self-write marks for `root`, keeping its fingerprints.
    pub fn save_self_writes(&self, root: &Path, self_writes: &SelfWriteMap) -> Result<()> {
        self.update(root, |cache| cache.self_writes = self_writes.clone())
    }

    fn update<F: FnOnce(&mut RootCache)>(&self, root: &Path, apply: F) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("fingerprint cache lock poisoned"))?;
        let mut file = self.read_file();
        apply(file.entry(root_key(root)).or_default());
        self.write_file(&file)
    }

    fn read_file(&self) -> CacheFile {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return CacheFile::new(),
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "failed to read fingerprint cache");
                return CacheFile::new();
            }
        };
        if contents.trim().is_empty() {
            return CacheFile::new();
        }
        match serde_json::from_str(&contents) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "ignoring malformed fingerprint cache");
                CacheFile::new()
            }
        }
    }

    fn write_file(&self, file: &CacheFile) -> Result<()> {
        let parent = self
            .path
            .parent()
            .with_context(|| format!("cache path missing parent {}", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let mut buf = serde_json::to_string_pretty(file).context("serialize fingerprint cache")?;
        buf.push('\n');
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp cache {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace cache {}", self.path.display()))?;
        Ok(())
    }
}

fn root_key(root: &Path) -> String {
    root.to_string_lossy().into_owned()
}
