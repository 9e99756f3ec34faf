//! Execution orchestration: one agent run per change event.
//!
//! Submissions are deduplicated by document path (at most one in flight per
//! path, later ones are dropped and counted) and bounded by a semaphore
//! across paths. Each run resolves its project, invokes the agent, retries
//! the resource-limit failure on a fixed interval, and reports through the
//! notification sink.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Local;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::core::outcome::{
    EXCERPT_CHARS, TASK_SUMMARY_CHARS, classify_exit, failure_class, remediation_hint,
    truncate_chars,
};
use crate::core::types::{AttemptOutcome, ChangeEvent, ExecutionStatus, FailureClass};
use crate::io::annotator::FeedbackAnnotator;
use crate::io::config::RelayConfig;
use crate::io::execution_log::{ExecutionLogEntry, write_execution_log};
use crate::io::executor::{ExecRequest, Executor};
use crate::io::notifier::{Notification, NotificationSink, notify};
use crate::io::registry::{Project, ProjectRegistry, RegistryError};

/// Execution knobs, usually derived from [`RelayConfig`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub max_concurrent: usize,
    pub retry_interval: Duration,
    pub max_retries: u32,
    pub resource_limit_exit_code: i32,
}

impl OrchestratorConfig {
    pub fn from_config(cfg: &RelayConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.agent.timeout_secs),
            output_limit_bytes: cfg.agent.output_limit_bytes,
            max_concurrent: cfg.agent.max_concurrent,
            retry_interval: Duration::from_secs(cfg.retry.interval_secs),
            max_retries: cfg.retry.max_retries,
            resource_limit_exit_code: cfg.retry.resource_limit_exit_code,
        }
    }
}

/// Terminal result of one submission.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub source: PathBuf,
    /// `None` when the project could not be resolved.
    pub project: Option<Arc<Project>>,
    pub status: ExecutionStatus,
    /// Retries performed after the first attempt.
    pub retries: u32,
    pub log_files: Vec<PathBuf>,
}

#[derive(Debug)]
pub enum Submission {
    Accepted(JoinHandle<ExecutionReport>),
    /// Same document already in flight, or shutdown has begun.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub accepted: u64,
    pub dropped: u64,
    pub in_flight: usize,
}

pub struct Orchestrator {
    inner: Arc<Inner>,
    tracker: TaskTracker,
}

struct Inner {
    registry: Arc<tokio::sync::Mutex<ProjectRegistry>>,
    executor: Arc<dyn Executor>,
    sink: Arc<dyn NotificationSink>,
    annotator: FeedbackAnnotator,
    config: OrchestratorConfig,
    in_flight: Mutex<HashSet<PathBuf>>,
    slots: Semaphore,
    cancel: CancellationToken,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

/// Releases a document's in-flight slot when its run ends, however it ends.
struct InFlightGuard {
    inner: Arc<Inner>,
    path: PathBuf,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.inner.in_flight.lock() {
            in_flight.remove(&self.path);
        }
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<tokio::sync::Mutex<ProjectRegistry>>,
        executor: Arc<dyn Executor>,
        sink: Arc<dyn NotificationSink>,
        annotator: FeedbackAnnotator,
        config: OrchestratorConfig,
    ) -> Self {
        let slots = Semaphore::new(config.max_concurrent.max(1));
        Self {
            inner: Arc::new(Inner {
                registry,
                executor,
                sink,
                annotator,
                config,
                in_flight: Mutex::new(HashSet::new()),
                slots,
                cancel: CancellationToken::new(),
                accepted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            tracker: TaskTracker::new(),
        }
    }

    /// Schedule an execution for `event`. Must be called inside a tokio runtime.
    pub fn submit(&self, event: ChangeEvent) -> Submission {
        if self.inner.cancel.is_cancelled() {
            debug!(path = %event.path.display(), "shutting down, submission dropped");
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return Submission::Dropped;
        }

        let inserted = match self.inner.in_flight.lock() {
            Ok(mut in_flight) => in_flight.insert(event.path.clone()),
            Err(_) => {
                error!(class = %FailureClass::OrchestrationFault, "in-flight set lock poisoned");
                false
            }
        };
        if !inserted {
            info!(path = %event.path.display(), "execution already in flight, dropping submission");
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return Submission::Dropped;
        }

        self.inner.accepted.fetch_add(1, Ordering::Relaxed);
        let guard = InFlightGuard {
            inner: self.inner.clone(),
            path: event.path.clone(),
        };
        let inner = self.inner.clone();
        Submission::Accepted(self.tracker.spawn(async move {
            let _guard = guard;
            inner.execute(event).await
        }))
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            accepted: self.inner.accepted.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.lock().map(|s| s.len()).unwrap_or(0),
        }
    }

    pub fn registry(&self) -> Arc<tokio::sync::Mutex<ProjectRegistry>> {
        self.inner.registry.clone()
    }

    /// Cancel every in-flight execution and wait for all of them to finish.
    pub async fn shutdown(&self) {
        let stats = self.stats();
        info!(in_flight = stats.in_flight, "cancelling in-flight executions");
        self.inner.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("all executions stopped");
    }
}

impl Inner {
    #[instrument(skip_all, fields(path = %event.path.display(), kind = %event.kind))]
    async fn execute(&self, event: ChangeEvent) -> ExecutionReport {
        let mut report = ExecutionReport {
            source: event.path.clone(),
            project: None,
            status: ExecutionStatus::Cancelled,
            retries: 0,
            log_files: Vec::new(),
        };

        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("cancelled while waiting for a worker slot");
                return report;
            }
            permit = self.slots.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return report,
            },
        };

        let project = match self.resolve_project(&event.path).await {
            Ok(project) => project,
            Err(err) => {
                let err = anyhow::Error::new(err);
                report.status = self
                    .fault(&display_source(&event.path), "Could not resolve a project", &err)
                    .await;
                return report;
            }
        };
        report.project = Some(project.clone());
        let name = project.display_name().to_string();

        notify(
            self.sink.as_ref(),
            &Notification::start(
                &name,
                truncate_chars(&event.content, TASK_SUMMARY_CHARS),
                &event.path,
            ),
        )
        .await;

        loop {
            if self.cancel.is_cancelled() {
                return report;
            }
            let (outcome, output) = match self.attempt(&project, &event, report.retries).await {
                Ok((outcome, output, log_file)) => {
                    report.log_files.extend(log_file);
                    (outcome, output)
                }
                Err(err) => {
                    report.status = self.fault(&name, "Agent could not be run", &err).await;
                    return report;
                }
            };

            match outcome {
                AttemptOutcome::Success { summary } => {
                    let questions = self.annotate(&event.path, &output);
                    info!(project = %name, retries = report.retries, questions = questions.len(), "execution succeeded");
                    notify(
                        self.sink.as_ref(),
                        &Notification::complete(&name, summary.clone(), &event.path),
                    )
                    .await;
                    report.status = ExecutionStatus::Succeeded { summary, questions };
                    return report;
                }
                AttemptOutcome::Cancelled => {
                    info!(project = %name, "execution cancelled");
                    return report;
                }
                AttemptOutcome::ResourceLimit if report.retries < self.config.max_retries => {
                    let retry = report.retries + 1;
                    warn!(
                        project = %name,
                        retry,
                        max_retries = self.config.max_retries,
                        interval_secs = self.config.retry_interval.as_secs(),
                        "resource limit reached, waiting to retry"
                    );
                    if !self.wait_for_retry().await {
                        info!(project = %name, "cancelled during retry wait");
                        return report;
                    }
                    notify(
                        self.sink.as_ref(),
                        &Notification::retry(&name, retry, self.config.max_retries),
                    )
                    .await;
                    report.retries = retry;
                }
                failed => {
                    report.status = self.terminal_failure(&name, &failed, &output, report.retries).await;
                    return report;
                }
            }
        }
    }

    async fn resolve_project(&self, source: &Path) -> Result<Arc<Project>, RegistryError> {
        let mut registry = self.registry.lock().await;
        if let Some(project) = registry.find_by_source(source)? {
            debug!(project = %project.display_name(), "reusing project");
            return Ok(project);
        }
        registry.create(source)
    }

    /// Run the agent once. Returns the outcome, its output and the log file
    /// written for it.
    async fn attempt(
        &self,
        project: &Project,
        event: &ChangeEvent,
        retry: u32,
    ) -> Result<(AttemptOutcome, String, Option<PathBuf>)> {
        let request = ExecRequest {
            workdir: project.working_directory().to_path_buf(),
            prompt: event.content.clone(),
            timeout: self.config.timeout,
            output_limit_bytes: self.config.output_limit_bytes,
        };
        let executor = self.executor.clone();
        let cancel = self.cancel.clone();
        let started_at = Local::now();
        let result = tokio::task::spawn_blocking(move || executor.exec(&request, &cancel))
            .await
            .map_err(|err| anyhow!("executor task failed: {err}"))??;
        let ended_at = Local::now();

        let outcome = classify_exit(
            result.facts,
            self.config.resource_limit_exit_code,
            &result.output,
        );
        debug!(retry, outcome = ?outcome, "attempt finished");

        let log_file = match write_execution_log(
            &project.logs_dir(),
            &ExecutionLogEntry {
                project: project.display_name(),
                source: &event.path,
                retry,
                started_at,
                ended_at,
                outcome: &outcome,
                output: &result.output,
            },
        ) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to write execution log");
                None
            }
        };

        Ok((outcome, result.output, log_file))
    }

    /// Returns `false` if cancelled before the interval elapsed.
    async fn wait_for_retry(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.retry_interval) => true,
        }
    }

    fn annotate(&self, source: &Path, output: &str) -> Vec<String> {
        let questions = self.annotator.extract_questions(output);
        if let Err(err) = self.annotator.append_questions(source, &questions) {
            error!(
                path = %source.display(),
                err = %format!("{err:#}"),
                "failed to append questions"
            );
        }
        questions
    }

    async fn terminal_failure(
        &self,
        project: &str,
        outcome: &AttemptOutcome,
        output: &str,
        retries: u32,
    ) -> ExecutionStatus {
        let class = failure_class(outcome).unwrap_or(FailureClass::OrchestrationFault);
        let summary = match outcome {
            AttemptOutcome::Timeout => format!(
                "Agent timed out after {}s",
                self.config.timeout.as_secs()
            ),
            AttemptOutcome::ResourceLimit => {
                format!("Usage limit still reached after {retries} retries")
            }
            AttemptOutcome::Failure { code: Some(code) } => format!("Agent exited with status {code}"),
            AttemptOutcome::Failure { code: None } => "Agent was killed by a signal".to_string(),
            AttemptOutcome::Success { .. } | AttemptOutcome::Cancelled => {
                "Unexpected outcome".to_string()
            }
        };
        let excerpt = truncate_chars(output.trim(), EXCERPT_CHARS);
        error!(project, class = %class, retries, "{summary}");
        notify(
            self.sink.as_ref(),
            &Notification::error(
                project,
                class,
                summary.clone(),
                Some(excerpt.clone()),
                remediation_hint(class),
            ),
        )
        .await;
        ExecutionStatus::Failed {
            class,
            detail: if excerpt.is_empty() { summary } else { excerpt },
        }
    }

    async fn fault(&self, project: &str, summary: &str, err: &anyhow::Error) -> ExecutionStatus {
        let class = FailureClass::OrchestrationFault;
        let detail = format!("{err:#}");
        error!(project, class = %class, err = %detail, "{summary}");
        notify(
            self.sink.as_ref(),
            &Notification::error(
                project,
                class,
                summary.to_string(),
                Some(detail.clone()),
                remediation_hint(class),
            ),
        )
        .await;
        ExecutionStatus::Failed { class, detail }
    }
}

fn display_source(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::types::{ChangeKind, Severity};
    use crate::io::notifier::NotifyKind;
    use crate::test_support::{RecordingSink, ScriptedExec, ScriptedExecutor, TestWorkspace};

    struct Harness {
        ws: TestWorkspace,
        executor: Arc<ScriptedExecutor>,
        sink: Arc<RecordingSink>,
        orchestrator: Orchestrator,
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            timeout: Duration::from_secs(5),
            output_limit_bytes: 10_000,
            max_concurrent: 3,
            retry_interval: Duration::from_millis(10),
            max_retries: 3,
            resource_limit_exit_code: 129,
        }
    }

    fn harness(script: Vec<ScriptedExec>, config: OrchestratorConfig) -> Harness {
        let ws = TestWorkspace::new().expect("workspace");
        let executor = Arc::new(ScriptedExecutor::new(script));
        let sink = Arc::new(RecordingSink::default());
        let registry = ProjectRegistry::open(ws.projects_dir()).expect("registry");
        let detector = ws.detector();
        let annotator = FeedbackAnnotator::new(detector.marker(), Default::default());
        let orchestrator = Orchestrator::new(
            Arc::new(tokio::sync::Mutex::new(registry)),
            executor.clone(),
            sink.clone(),
            annotator,
            config,
        );
        Harness {
            ws,
            executor,
            sink,
            orchestrator,
        }
    }

    fn event(path: &Path) -> ChangeEvent {
        ChangeEvent {
            path: path.to_path_buf(),
            content: fs::read_to_string(path).expect("read doc"),
            kind: ChangeKind::New,
            detected_at: Local::now(),
        }
    }

    async fn run(h: &Harness, path: &Path) -> ExecutionReport {
        match h.orchestrator.submit(event(path)) {
            Submission::Accepted(handle) => handle.await.expect("join"),
            Submission::Dropped => panic!("submission dropped"),
        }
    }

    #[tokio::test]
    async fn success_notifies_start_then_complete_and_writes_log() {
        let h = harness(vec![ScriptedExec::exit(0, "all done\n")], config());
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");

        let report = run(&h, &doc).await;

        assert_eq!(
            report.status,
            ExecutionStatus::Succeeded {
                summary: "all done".to_string(),
                questions: Vec::new(),
            }
        );
        assert_eq!(h.sink.kinds(), vec![NotifyKind::Start, NotifyKind::Complete]);
        assert_eq!(report.log_files.len(), 1);
        assert!(report.log_files[0].is_file());

        let request = h.executor.requests().pop().expect("request");
        assert_eq!(request.prompt, "Build a calculator");
        let project = report.project.expect("project");
        assert_eq!(request.workdir, project.working_directory());
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_one_terminal_failure() {
        let h = harness(vec![ScriptedExec::exit(129, "limit"); 4], config());
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");

        let report = run(&h, &doc).await;

        assert_eq!(h.executor.calls(), 4);
        assert_eq!(report.retries, 3);
        assert!(matches!(
            report.status,
            ExecutionStatus::Failed {
                class: FailureClass::ResourceLimit,
                ..
            }
        ));
        let kinds = h.sink.kinds();
        assert_eq!(kinds.iter().filter(|k| **k == NotifyKind::Retry).count(), 3);
        assert_eq!(kinds.iter().filter(|k| **k == NotifyKind::Error).count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == NotifyKind::Complete).count(), 0);
        assert_eq!(report.log_files.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_the_configured_interval() {
        let mut cfg = config();
        cfg.retry_interval = Duration::from_secs(300);
        let h = harness(vec![ScriptedExec::exit(129, "limit"); 4], cfg);
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");
        let started = tokio::time::Instant::now();

        let report = run(&h, &doc).await;

        assert_eq!(report.retries, 3);
        assert!(
            started.elapsed() >= Duration::from_secs(3 * 300),
            "retries finished after {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn retry_then_success_completes() {
        let h = harness(
            vec![ScriptedExec::exit(129, "limit"), ScriptedExec::exit(0, "ok")],
            config(),
        );
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");

        let report = run(&h, &doc).await;

        assert_eq!(report.retries, 1);
        assert!(matches!(report.status, ExecutionStatus::Succeeded { .. }));
        assert_eq!(
            h.sink.kinds(),
            vec![NotifyKind::Start, NotifyKind::Retry, NotifyKind::Complete]
        );
        let retry = &h.sink.notifications()[1];
        assert!(retry.summary.contains("1/3"));
    }

    #[tokio::test]
    async fn task_failure_is_major_with_excerpt_and_no_retry() {
        let h = harness(vec![ScriptedExec::exit(2, "error: boom")], config());
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");

        let report = run(&h, &doc).await;

        assert_eq!(h.executor.calls(), 1);
        assert_eq!(
            report.status,
            ExecutionStatus::Failed {
                class: FailureClass::TaskFailure,
                detail: "error: boom".to_string(),
            }
        );
        let error = h.sink.notifications().pop().expect("error notification");
        assert_eq!(error.severity, Some(Severity::Major));
        assert_eq!(error.detail.as_deref(), Some("error: boom"));
        assert!(error.hint.is_some());
    }

    #[tokio::test]
    async fn timeout_is_terminal() {
        let h = harness(vec![ScriptedExec::timed_out("partial")], config());
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");

        let report = run(&h, &doc).await;

        assert!(matches!(
            report.status,
            ExecutionStatus::Failed {
                class: FailureClass::Timeout,
                ..
            }
        ));
        assert_eq!(h.executor.calls(), 1);
    }

    #[tokio::test]
    async fn executor_error_is_critical_fault() {
        let h = harness(vec![ScriptedExec::spawn_error("no such program")], config());
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");

        let report = run(&h, &doc).await;

        assert!(matches!(
            report.status,
            ExecutionStatus::Failed {
                class: FailureClass::OrchestrationFault,
                ..
            }
        ));
        let error = h.sink.notifications().pop().expect("error notification");
        assert_eq!(error.severity, Some(Severity::Critical));
    }

    #[tokio::test]
    async fn unresolvable_project_is_critical_fault() {
        let h = harness(Vec::new(), config());
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");
        fs::remove_dir_all(h.ws.projects_dir()).expect("remove projects dir");
        fs::write(h.ws.projects_dir(), "not a directory").expect("block projects dir");

        let report = run(&h, &doc).await;

        assert!(report.project.is_none());
        assert!(matches!(
            report.status,
            ExecutionStatus::Failed {
                class: FailureClass::OrchestrationFault,
                ..
            }
        ));
        assert_eq!(h.executor.calls(), 0);
        assert_eq!(h.sink.kinds(), vec![NotifyKind::Error]);
    }

    #[tokio::test]
    async fn duplicate_submission_is_dropped_while_in_flight() {
        let h = harness(
            vec![ScriptedExec::exit(0, "done").with_delay(Duration::from_millis(300))],
            config(),
        );
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");

        let first = h.orchestrator.submit(event(&doc));
        let second = h.orchestrator.submit(event(&doc));

        assert!(matches!(second, Submission::Dropped));
        let Submission::Accepted(handle) = first else {
            panic!("first submission dropped");
        };
        let report = handle.await.expect("join");
        assert!(matches!(report.status, ExecutionStatus::Succeeded { .. }));
        assert_eq!(h.executor.calls(), 1);
        assert_eq!(
            h.orchestrator.stats(),
            OrchestratorStats {
                accepted: 1,
                dropped: 1,
                in_flight: 0,
            }
        );
    }

    #[tokio::test]
    async fn same_document_resolves_to_identical_project() {
        let h = harness(
            vec![ScriptedExec::exit(0, "one"), ScriptedExec::exit(0, "two")],
            config(),
        );
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");

        let first = run(&h, &doc).await.project.expect("first project");
        let second = run(&h, &doc).await.project.expect("second project");

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn questions_are_appended_and_suppressed() {
        let h = harness(
            vec![ScriptedExec::exit(
                0,
                "Scaffolded the project.\nWhich database should I use?\n",
            )],
            config(),
        );
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");
        let mut detector = h.ws.detector();
        assert!(detector.poll().expect("first poll").is_some());

        let report = run(&h, &doc).await;

        let ExecutionStatus::Succeeded { questions, .. } = report.status else {
            panic!("expected success");
        };
        assert_eq!(questions, vec!["Which database should I use?".to_string()]);
        let contents = fs::read_to_string(&doc).expect("read doc");
        assert!(contents.contains("1. Which database should I use?"));

        // A detector reopened on the same cache sees the persisted mark.
        let mut reopened = h.ws.detector();
        assert_eq!(reopened.poll().expect("poll after annotation"), None);
    }

    #[tokio::test]
    async fn shutdown_cancels_running_execution_without_retry_or_annotation() {
        let h = harness(
            vec![ScriptedExec::exit(0, "Which database should I use?").with_delay(Duration::from_secs(5))],
            config(),
        );
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");

        let Submission::Accepted(handle) = h.orchestrator.submit(event(&doc)) else {
            panic!("dropped");
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.orchestrator.shutdown().await;
        let report = handle.await.expect("join");

        assert_eq!(report.status, ExecutionStatus::Cancelled);
        assert_eq!(h.executor.calls(), 1);
        assert_eq!(h.sink.kinds(), vec![NotifyKind::Start]);
        assert_eq!(
            fs::read_to_string(&doc).expect("read doc"),
            "Build a calculator"
        );
        assert!(matches!(
            h.orchestrator.submit(event(&doc)),
            Submission::Dropped
        ));
    }

    #[tokio::test]
    async fn shutdown_during_retry_wait_stops_retrying() {
        let mut cfg = config();
        cfg.retry_interval = Duration::from_secs(30);
        let h = harness(vec![ScriptedExec::exit(129, "limit"); 2], cfg);
        let doc = h.ws.write_doc("calc.md", "Build a calculator").expect("doc");

        let Submission::Accepted(handle) = h.orchestrator.submit(event(&doc)) else {
            panic!("dropped");
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.orchestrator.shutdown().await;
        let report = handle.await.expect("join");

        assert_eq!(report.status, ExecutionStatus::Cancelled);
        assert_eq!(h.executor.calls(), 1);
        assert!(!h.sink.kinds().contains(&NotifyKind::Retry));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let mut cfg = config();
        cfg.max_concurrent = 1;
        let h = harness(
            vec![ScriptedExec::exit(0, "a").with_delay(Duration::from_millis(200)); 2],
            cfg,
        );
        let a = h.ws.write_doc("a.md", "A").expect("doc a");
        let b = h.ws.write_doc("b.md", "B").expect("doc b");

        let handles: Vec<_> = [a, b]
            .iter()
            .map(|doc| match h.orchestrator.submit(event(doc)) {
                Submission::Accepted(handle) => handle,
                Submission::Dropped => panic!("dropped"),
            })
            .collect();
        for handle in handles {
            handle.await.expect("join");
        }

        assert_eq!(h.executor.calls(), 2);
        assert_eq!(h.executor.max_parallel(), 1);
    }
}
