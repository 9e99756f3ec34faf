//! Outbound notifications about execution progress.
//!
//! Delivery is best effort: callers log a failed send as
//! [`FailureClass::NotificationFailure`] and carry on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::core::outcome::truncate_chars;
use crate::core::types::{FailureClass, Severity};

const SLACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Start,
    Complete,
    Error,
    Retry,
}

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotifyKind,
    pub project: String,
    pub summary: String,
    pub source: Option<PathBuf>,
    pub detail: Option<String>,
    pub severity: Option<Severity>,
    pub hint: Option<String>,
    pub timestamp: DateTime<Local>,
}

impl Notification {
    fn new(kind: NotifyKind, project: &str, summary: String) -> Self {
        Self {
            kind,
            project: project.to_string(),
            summary,
            source: None,
            detail: None,
            severity: None,
            hint: None,
            timestamp: Local::now(),
        }
    }

    pub fn start(project: &str, task_summary: String, source: &Path) -> Self {
        Self {
            source: Some(source.to_path_buf()),
            ..Self::new(NotifyKind::Start, project, task_summary)
        }
    }

    pub fn complete(project: &str, summary: String, source: &Path) -> Self {
        Self {
            source: Some(source.to_path_buf()),
            ..Self::new(NotifyKind::Complete, project, summary)
        }
    }

    pub fn error(
        project: &str,
        class: FailureClass,
        summary: String,
        detail: Option<String>,
        hint: &str,
    ) -> Self {
        Self {
            detail,
            severity: Some(class.severity()),
            hint: Some(hint.to_string()),
            ..Self::new(NotifyKind::Error, project, summary)
        }
    }

    pub fn retry(project: &str, retry: u32, max_retries: u32) -> Self {
        Self::new(
            NotifyKind::Retry,
            project,
            format!("Waiting out the usage limit, retry {retry}/{max_retries}"),
        )
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Send and swallow failures.
pub async fn notify(sink: &dyn NotificationSink, notification: &Notification) {
    if let Err(err) = sink.send(notification).await {
        warn!(
            class = %FailureClass::NotificationFailure,
            kind = ?notification.kind,
            project = %notification.project,
            err = %err,
            "notification failed"
        );
    }
}

/// Writes notifications to the tracing log only.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, n: &Notification) -> Result<()> {
        match n.kind {
            NotifyKind::Error => error!(
                project = %n.project,
                severity = ?n.severity,
                summary = %n.summary,
                hint = n.hint.as_deref().unwrap_or(""),
                "execution failed"
            ),
            kind => info!(project = %n.project, kind = ?kind, summary = %n.summary, "notification"),
        }
        Ok(())
    }
}

/// Posts Block Kit messages to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackWebhookSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackWebhookSink {
    pub fn new(webhook_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SLACK_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl NotificationSink for SlackWebhookSink {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&slack_payload(notification))
            .send()
            .await
            .context("post slack webhook")?;
        let status = response.status();
        if !status.is_success() {
            bail!("slack webhook returned {status}");
        }
        Ok(())
    }
}

/// Block Kit body for `n`.
pub fn slack_payload(n: &Notification) -> Value {
    let stamp = n.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
    match n.kind {
        NotifyKind::Start => progress_blocks(
            ":rocket: Agent run started",
            "Task",
            100,
            n,
            &format!("Started: {stamp}"),
        ),
        NotifyKind::Complete => progress_blocks(
            ":white_check_mark: Agent run finished",
            "Result",
            200,
            n,
            &format!("Finished: {stamp}"),
        ),
        NotifyKind::Retry => json!({
            "blocks": [{
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(":hourglass: *Usage limit reached*\nProject: {}\n{}", n.project, n.summary),
                }
            }]
        }),
        NotifyKind::Error => error_blocks(n, &stamp),
    }
}

fn progress_blocks(
    title: &str,
    label: &str,
    max_chars: usize,
    n: &Notification,
    footer: &str,
) -> Value {
    let mut fields = Vec::new();
    if let Some(source) = &n.source {
        fields.push(mrkdwn(format!("*File:*\n{}", source.display())));
    }
    fields.push(mrkdwn(format!("*Project:*\n{}", n.project)));
    fields.push(mrkdwn(format!("*{label}:*\n{}", ellipsize(&n.summary, max_chars))));
    json!({
        "blocks": [
            { "type": "header", "text": { "type": "plain_text", "text": title } },
            { "type": "section", "fields": fields },
            { "type": "context", "elements": [mrkdwn(footer.to_string())] },
        ]
    })
}

fn error_blocks(n: &Notification, stamp: &str) -> Value {
    let emoji = match n.severity {
        Some(Severity::Minor) => ":warning:",
        Some(Severity::Major) => ":x:",
        Some(Severity::Critical) => ":rotating_light:",
        None => ":grey_question:",
    };
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": format!("{emoji} Agent run failed") }
        }),
        json!({
            "type": "section",
            "fields": [
                mrkdwn(format!("*Project:*\n{}", n.project)),
                mrkdwn(format!("*Error:*\n{}", n.summary)),
            ]
        }),
    ];
    if let Some(detail) = n.detail.as_deref().filter(|d| !d.trim().is_empty()) {
        blocks.push(json!({
            "type": "section",
            "text": mrkdwn(format!("*Details:*\n```{}```", truncate_chars(detail, 500))),
        }));
    }
    if let Some(hint) = &n.hint {
        blocks.push(json!({
            "type": "section",
            "text": mrkdwn(format!("*What to do:*\n{hint}")),
        }));
    }
    blocks.push(json!({
        "type": "context",
        "elements": [mrkdwn(format!("Occurred: {stamp}"))],
    }));
    json!({ "blocks": blocks })
}

fn mrkdwn(text: String) -> Value {
    json!({ "type": "mrkdwn", "text": text })
}

fn ellipsize(text: &str, max_chars: usize) -> String {
    let cut = truncate_chars(text, max_chars);
    if cut.len() < text.len() {
        format!("{cut}...")
    } else {
        cut
    }
}
