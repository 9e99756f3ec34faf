//! Test-only fakes and fixtures for driving relay without real agents.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::core::outcome::ExitFacts;
use crate::io::config::RelayConfig;
use crate::io::detector::ChangeDetector;
use crate::io::executor::{ExecRequest, ExecResult, Executor};
use crate::io::fingerprint_store::FingerprintStore;
use crate::io::notifier::{Notification, NotificationSink, NotifyKind};

/// One canned agent run.
#[derive(Debug, Clone)]
pub struct ScriptedExec {
    pub code: Option<i32>,
    pub output: String,
    pub timed_out: bool,
    /// How long the fake agent "runs"; cancellation is honoured meanwhile.
    pub delay: Duration,
    /// Fail the invocation itself, as a spawn failure would.
    pub error: Option<String>,
}

impl ScriptedExec {
    pub fn exit(code: i32, output: &str) -> Self {
        Self {
            code: Some(code),
            output: output.to_string(),
            timed_out: false,
            delay: Duration::ZERO,
            error: None,
        }
    }

    pub fn timed_out(output: &str) -> Self {
        Self {
            code: None,
            timed_out: true,
            ..Self::exit(0, output)
        }
    }

    pub fn spawn_error(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::exit(0, "")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Executor returning queued results in order and recording every request.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ScriptedExec>>,
    requests: Mutex<Vec<ExecRequest>>,
    running: AtomicUsize,
    max_parallel: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<ScriptedExec>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests().len()
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Highest number of invocations observed running at once.
    pub fn max_parallel(&self) -> usize {
        self.max_parallel.load(Ordering::SeqCst)
    }
}

impl Executor for ScriptedExecutor {
    fn exec(&self, request: &ExecRequest, cancel: &CancellationToken) -> Result<ExecResult> {
        self.requests
            .lock()
            .map_err(|_| anyhow!("requests lock poisoned"))?
            .push(request.clone());
        let next = self
            .script
            .lock()
            .map_err(|_| anyhow!("script lock poisoned"))?
            .pop_front()
            .context("scripted executor ran out of responses")?;

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_parallel.fetch_max(running, Ordering::SeqCst);
        let cancelled = sleep_unless_cancelled(next.delay, cancel);
        self.running.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = next.error {
            bail!(message);
        }
        Ok(ExecResult {
            facts: ExitFacts {
                code: if cancelled { None } else { next.code },
                timed_out: next.timed_out && !cancelled,
                cancelled,
            },
            output: next.output,
        })
    }
}

/// Returns `true` if `cancel` fired before `delay` elapsed.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        thread::sleep(remaining.min(Duration::from_millis(10)));
    }
}

/// Sink that keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<NotifyKind> {
        self.notifications().iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow!("sink lock poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}

/// Temporary watch root, projects dir and cache dir.
pub struct TestWorkspace {
    _temp: TempDir,
    watch_root: PathBuf,
    projects_dir: PathBuf,
    cache_dir: PathBuf,
    store: Arc<FingerprintStore>,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let watch_root = temp.path().join("notes");
        let projects_dir = temp.path().join("projects");
        let cache_dir = temp.path().join("cache");
        for dir in [&watch_root, &projects_dir, &cache_dir] {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let store = Arc::new(FingerprintStore::new(&cache_dir));
        Ok(Self {
            _temp: temp,
            watch_root,
            projects_dir,
            cache_dir,
            store,
        })
    }

    pub fn watch_root(&self) -> &Path {
        &self.watch_root
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn store(&self) -> Arc<FingerprintStore> {
        self.store.clone()
    }

    /// Write `contents` to `relative` under the watch root, creating parents.
    pub fn write_doc(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.watch_root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// A detector over the watch root backed by the shared cache, watching `.md`.
    pub fn detector(&self) -> ChangeDetector {
        ChangeDetector::open(&self.watch_root, &["md".to_string()], self.store())
    }

    /// Default config pointed at this workspace with fast timings.
    pub fn config(&self) -> RelayConfig {
        let mut cfg = RelayConfig {
            watch_root: self.watch_root.clone(),
            projects_dir: self.projects_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            ..RelayConfig::default()
        };
        cfg.watch.poll_interval_ms = 20;
        cfg.watch.error_backoff_ms = 50;
        cfg.retry.interval_secs = 0;
        cfg
    }
}
