//! The `relay watch` poll/dispatch loop.
//!
//! A single loop polls the detector on a blocking thread and hands each event
//! to the orchestrator. Shutdown stops polling, cancels in-flight executions,
//! waits for them, and saves the fingerprint cache.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::types::{ChangeEvent, FailureClass};
use crate::io::annotator::FeedbackAnnotator;
use crate::io::config::RelayConfig;
use crate::io::detector::ChangeDetector;
use crate::io::executor::AgentExecutor;
use crate::io::fingerprint_store::FingerprintStore;
use crate::io::notifier::{LogSink, NotificationSink, SlackWebhookSink};
use crate::io::registry::ProjectRegistry;
use crate::orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorStats, Submission};

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub announce_existing: bool,
}

impl WatchOptions {
    pub fn from_config(cfg: &RelayConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            error_backoff: cfg.error_backoff(),
            announce_existing: cfg.watch.announce_existing,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub events: u64,
    pub warmed_up: usize,
    pub orchestrator: OrchestratorStats,
}

pub struct WatchLoop {
    detector: Arc<Mutex<ChangeDetector>>,
    orchestrator: Orchestrator,
    options: WatchOptions,
}

impl WatchLoop {
    pub fn new(detector: ChangeDetector, orchestrator: Orchestrator, options: WatchOptions) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            orchestrator,
            options,
        }
    }

    /// Wire the real detector, registry, agent executor and sink from `cfg`.
    pub fn from_config(cfg: &RelayConfig) -> Result<Self> {
        cfg.validate()?;
        let mut cfg = cfg.clone();
        cfg.make_paths_absolute()?;
        let cfg = &cfg;
        if !cfg.watch_root.is_dir() {
            bail!("watch root {} is not a directory", cfg.watch_root.display());
        }

        let store = Arc::new(FingerprintStore::new(&cfg.cache_dir));
        let detector = ChangeDetector::open(&cfg.watch_root, &cfg.watch.extensions, store);
        let registry = ProjectRegistry::open(&cfg.projects_dir)
            .with_context(|| format!("open projects dir {}", cfg.projects_dir.display()))?;
        let executor = AgentExecutor::new(cfg.agent.command.clone())?;
        let sink: Arc<dyn NotificationSink> = match &cfg.slack.webhook_url {
            Some(url) => Arc::new(SlackWebhookSink::new(url.clone())?),
            None => {
                info!("no slack webhook configured, notifications go to the log");
                Arc::new(LogSink)
            }
        };
        let annotator = FeedbackAnnotator::new(detector.marker(), cfg.question_limits());
        let orchestrator = Orchestrator::new(
            Arc::new(tokio::sync::Mutex::new(registry)),
            Arc::new(executor),
            sink,
            annotator,
            OrchestratorConfig::from_config(cfg),
        );
        Ok(Self::new(detector, orchestrator, WatchOptions::from_config(cfg)))
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Poll until `shutdown` fires, then drain and save.
    pub async fn run(self, shutdown: CancellationToken) -> Result<WatchSummary> {
        let mut summary = WatchSummary::default();
        let root = self.with_detector(|d| Ok(d.root().to_path_buf())).await?;
        info!(root = %root.display(), "watching for changes");

        let cold = self.with_detector(|d| Ok(d.is_cold())).await?;
        if cold && !self.options.announce_existing {
            match self.with_detector(ChangeDetector::warm_up).await {
                Ok(count) => summary.warmed_up = count,
                Err(err) => warn!(err = %format!("{err:#}"), "warm-up failed, documents will be announced"),
            }
        }

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let delay = match self.with_detector(ChangeDetector::poll).await {
                Ok(Some(event)) => {
                    summary.events += 1;
                    self.dispatch(event);
                    tokio::task::yield_now().await;
                    continue;
                }
                Ok(None) => self.options.poll_interval,
                Err(err) => {
                    warn!(
                        class = %FailureClass::TransientIo,
                        err = %format!("{err:#}"),
                        backoff_ms = self.options.error_backoff.as_millis() as u64,
                        "poll failed, backing off"
                    );
                    self.options.error_backoff
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("shutdown requested, draining executions");
        self.orchestrator.shutdown().await;
        self.with_detector(|d| d.save()).await?;
        summary.orchestrator = self.orchestrator.stats();
        info!(
            events = summary.events,
            accepted = summary.orchestrator.accepted,
            dropped = summary.orchestrator.dropped,
            "watch stopped"
        );
        Ok(summary)
    }

    fn dispatch(&self, event: ChangeEvent) {
        let path = event.path.clone();
        match self.orchestrator.submit(event) {
            Submission::Accepted(_) => debug!(path = %path.display(), "execution scheduled"),
            Submission::Dropped => debug!(path = %path.display(), "execution not scheduled"),
        }
    }

    /// Run `f` against the detector on a blocking thread.
    async fn with_detector<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ChangeDetector) -> Result<T> + Send + 'static,
    {
        let detector = self.detector.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = detector
                .lock()
                .map_err(|_| anyhow!("detector lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .context("join detector task")?
    }
}

/// Cancel `token` on Ctrl-C or, on Unix, SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("signal received");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            warn!(err = %err, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
