//! Content-hash change detection over the watched tree.
//!
//! [`ChangeDetector::poll`] walks the root in lexicographic order and returns
//! the first document that is new or genuinely modified. Documents written by
//! relay itself are recognized through [`SelfWriteMarker`] and skipped.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::classifier::{Classification, SelfWrite, classify};
use crate::core::fingerprint::content_hash;
use crate::core::types::{ChangeEvent, ChangeKind, FailureClass};
use crate::io::fingerprint_store::{FingerprintMap, FingerprintStore, SelfWriteMap};

/// Cloneable handle used by the annotator to flag documents it wrote.
///
/// Marks are persisted immediately so a restart between the write and the
/// next poll still recognizes the annotation.
#[derive(Debug, Clone)]
pub struct SelfWriteMarker {
    inner: Arc<MarkerInner>,
}

#[derive(Debug)]
struct MarkerInner {
    root: PathBuf,
    store: Arc<FingerprintStore>,
    marks: Mutex<SelfWriteMap>,
}

impl SelfWriteMarker {
    fn new(root: PathBuf, store: Arc<FingerprintStore>, marks: SelfWriteMap) -> Self {
        Self {
            inner: Arc::new(MarkerInner {
                root,
                store,
                marks: Mutex::new(marks),
            }),
        }
    }

    /// Record that relay just wrote `path`, remembering the fingerprint of
    /// what it wrote.
    pub fn mark(&self, path: &Path) -> Result<()> {
        self.write_and_mark(path, || Ok(()))
    }

    /// Run `write` and record the result as a self-write, holding the marks
    /// lock throughout so a concurrent poll sees either the old content or
    /// the new content together with its mark.
    pub fn write_and_mark<F>(&self, path: &Path, write: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut marks = self.lock()?;
        write()?;
        let produced = match fs::read(path) {
            Ok(bytes) => Some(content_hash(&bytes)),
            Err(err) => {
                warn!(path = %path.display(), err = %err, "cannot fingerprint self-written document");
                None
            }
        };
        marks.insert(path.to_path_buf(), SelfWrite { produced });
        debug!(path = %path.display(), "marked document as self-written");
        self.inner
            .store
            .save_self_writes(&self.inner.root, &marks)
            .context("persist self-write mark")
    }

    pub fn is_marked(&self, path: &Path) -> bool {
        self.lock()
            .map(|marks| marks.contains_key(path))
            .unwrap_or(false)
    }

    /// Classify `path` against its pending mark under the marks lock.
    ///
    /// The mark is consumed once the document is seen to have changed; an
    /// unchanged document keeps it for a later poll.
    fn classify(&self, path: &Path, stored: Option<&str>, current: &str) -> Result<Classification> {
        let mut marks = self.lock()?;
        let classification = classify(stored, current, marks.get(path));
        if classification != Classification::Unchanged
            && marks.remove(path).is_some()
            && let Err(err) = self.inner.store.save_self_writes(&self.inner.root, &marks)
        {
            error!(err = %err, "failed to persist cleared self-write mark");
        }
        Ok(classification)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SelfWriteMap>> {
        self.inner
            .marks
            .lock()
            .map_err(|_| anyhow!("self-write marks lock poisoned"))
    }
}

/// Snapshot reported by `relay status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WatchStatus {
    pub watch_root: PathBuf,
    pub tracked_documents: usize,
    pub cached_fingerprints: usize,
    pub cache_file: PathBuf,
    pub cache_exists: bool,
}

/// Owns the in-memory fingerprint map for one watched root.
pub struct ChangeDetector {
    root: PathBuf,
    extensions: Vec<String>,
    store: Arc<FingerprintStore>,
    fingerprints: FingerprintMap,
    marker: SelfWriteMarker,
}

impl ChangeDetector {
    /// Open a detector for `root`, resuming from the persisted cache.
    pub fn open(root: &Path, extensions: &[String], store: Arc<FingerprintStore>) -> Self {
        let cache = store.load(root);
        if !cache.fingerprints.is_empty() {
            info!(
                root = %root.display(),
                count = cache.fingerprints.len(),
                "resuming from cached fingerprints"
            );
        }
        let marker = SelfWriteMarker::new(root.to_path_buf(), store.clone(), cache.self_writes);
        Self {
            root: root.to_path_buf(),
            extensions: extensions.to_vec(),
            store,
            fingerprints: cache.fingerprints,
            marker,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn marker(&self) -> SelfWriteMarker {
        self.marker.clone()
    }

    /// Stored fingerprint for `path`, if the document has been seen.
    pub fn fingerprint(&self, path: &Path) -> Option<&str> {
        self.fingerprints.get(path).map(String::as_str)
    }

    /// True when nothing is known about this root yet.
    pub fn is_cold(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Seed fingerprints for every existing document without emitting events.
    ///
    /// Returns the number of documents recorded.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn warm_up(&mut self) -> Result<usize> {
        let mut count = 0usize;
        for path in self.documents()? {
            match fs::read(&path) {
                Ok(bytes) => {
                    self.fingerprints.insert(path, content_hash(&bytes));
                    count += 1;
                }
                Err(err) => {
                    debug!(path = %path.display(), err = %err, class = %FailureClass::TransientIo, "skipping unreadable document during warm-up");
                }
            }
        }
        if count > 0 {
            self.save()?;
        }
        info!(count, "built initial fingerprint cache");
        Ok(count)
    }

    /// Walk the tree once and return the first qualifying change.
    ///
    /// Unreadable documents are skipped and retried on the next call. An
    /// error is returned only when the walk itself fails.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn poll(&mut self) -> Result<Option<ChangeEvent>> {
        for path in self.documents()? {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!(path = %path.display(), err = %err, class = %FailureClass::TransientIo, "document unreadable this cycle");
                    continue;
                }
            };
            let current = content_hash(&bytes);
            let stored = self.fingerprints.get(&path).map(String::as_str);

            let kind = match self.marker.classify(&path, stored, &current)? {
                Classification::Unchanged => continue,
                Classification::SelfWrite => {
                    info!(path = %path.display(), "skipping self-written change");
                    self.record(path, current);
                    continue;
                }
                Classification::New => ChangeKind::New,
                Classification::Modified => ChangeKind::Modified,
            };

            info!(path = %path.display(), kind = %kind, "detected content change");
            self.record(path.clone(), current);
            return Ok(Some(ChangeEvent {
                path,
                content: String::from_utf8_lossy(&bytes).into_owned(),
                kind,
                detected_at: Local::now(),
            }));
        }
        Ok(None)
    }

    /// Persist the current fingerprint map.
    pub fn save(&self) -> Result<()> {
        self.store.save_fingerprints(&self.root, &self.fingerprints)
    }

    pub fn status(&self) -> Result<WatchStatus> {
        Ok(WatchStatus {
            watch_root: self.root.clone(),
            tracked_documents: self.documents()?.len(),
            cached_fingerprints: self.fingerprints.len(),
            cache_file: self.store.path().to_path_buf(),
            cache_exists: self.store.path().exists(),
        })
    }

    fn record(&mut self, path: PathBuf, fingerprint: String) {
        self.fingerprints.insert(path, fingerprint);
        if let Err(err) = self.save() {
            error!(err = %err, "failed to save fingerprint cache");
        }
    }

    /// Watched documents under the root, in lexicographic path order.
    fn documents(&self) -> Result<Vec<PathBuf>> {
        let mut documents = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(err).with_context(|| format!("walk {}", self.root.display()));
                }
                Err(err) => {
                    debug!(err = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && self.is_watched(entry.path()) {
                documents.push(entry.into_path());
            }
        }
        Ok(documents)
    }

    fn is_watched(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|want| want == ext))
    }
}
