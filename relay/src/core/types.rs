//! Shared deterministic types for relay core logic.
//!
//! These types define stable contracts between the detector, the registry and
//! the orchestrator. They hold no I/O handles.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// How a document transitioned since the last observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// First sight of a document with no stored fingerprint.
    New,
    /// Stored fingerprint differs from the current content.
    Modified,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::New => f.write_str("new"),
            ChangeKind::Modified => f.write_str("modified"),
        }
    }
}

/// A detected content transition, consumed exactly once by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub content: String,
    pub kind: ChangeKind,
    pub detected_at: DateTime<Local>,
}

/// Terminal classification of one subprocess attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Exit status 0.
    Success { summary: String },
    /// The reserved exit status signalling a recoverable usage limit.
    ResourceLimit,
    /// The deadline elapsed and the process was killed.
    Timeout,
    /// Any other non-zero exit. `code` is `None` when killed by a signal.
    Failure { code: Option<i32> },
    /// Shutdown was requested while the process ran.
    Cancelled,
}

/// Error taxonomy used when reporting and logging failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Unreadable document this cycle; retried next poll and never surfaced.
    TransientIo,
    /// Subprocess signalled exhaustion; surfaced only when retries run out.
    ResourceLimit,
    /// Subprocess exceeded its deadline.
    Timeout,
    /// Subprocess exited non-zero with a non-reserved status.
    TaskFailure,
    /// Resolving the project or another internal step failed.
    OrchestrationFault,
    /// Outbound report failed; logged only.
    NotificationFailure,
}

impl FailureClass {
    /// Severity used when this class reaches the notification channel.
    pub fn severity(self) -> Severity {
        match self {
            FailureClass::OrchestrationFault => Severity::Critical,
            FailureClass::TransientIo | FailureClass::NotificationFailure => Severity::Minor,
            FailureClass::ResourceLimit | FailureClass::Timeout | FailureClass::TaskFailure => {
                Severity::Major
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::TransientIo => "transient_io",
            FailureClass::ResourceLimit => "resource_limit",
            FailureClass::Timeout => "timeout",
            FailureClass::TaskFailure => "task_failure",
            FailureClass::OrchestrationFault => "orchestration_fault",
            FailureClass::NotificationFailure => "notification_failure",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Minor => f.write_str("minor"),
            Severity::Major => f.write_str("major"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

/// Final result of one submitted execution, after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Succeeded {
        summary: String,
        questions: Vec<String>,
    },
    Failed {
        class: FailureClass,
        detail: String,
    },
    Cancelled,
}
