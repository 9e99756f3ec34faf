//! Classification of subprocess results and the text derived from them.

use crate::core::types::{AttemptOutcome, FailureClass};

/// Lines of output kept as the success summary when the output is long.
const SUMMARY_TAIL_LINES: usize = 10;
/// Characters kept as the success summary when the output is short.
const SUMMARY_HEAD_CHARS: usize = 500;
/// Characters of output quoted in a failure notification.
pub const EXCERPT_CHARS: usize = 500;
/// Characters of the document quoted in a start notification.
pub const TASK_SUMMARY_CHARS: usize = 200;

/// Raw facts about a finished subprocess attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitFacts {
    pub code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Classify an attempt. Cancellation wins over timeout, timeout over exit code.
pub fn classify_exit(facts: ExitFacts, resource_limit_code: i32, output: &str) -> AttemptOutcome {
    if facts.cancelled {
        return AttemptOutcome::Cancelled;
    }
    if facts.timed_out {
        return AttemptOutcome::Timeout;
    }
    match facts.code {
        Some(0) => AttemptOutcome::Success {
            summary: summarize(output),
        },
        Some(code) if code == resource_limit_code => AttemptOutcome::ResourceLimit,
        code => AttemptOutcome::Failure { code },
    }
}

/// Failure class for a non-success attempt, `None` for success/cancel.
pub fn failure_class(outcome: &AttemptOutcome) -> Option<FailureClass> {
    match outcome {
        AttemptOutcome::Success { .. } | AttemptOutcome::Cancelled => None,
        AttemptOutcome::ResourceLimit => Some(FailureClass::ResourceLimit),
        AttemptOutcome::Timeout => Some(FailureClass::Timeout),
        AttemptOutcome::Failure { .. } => Some(FailureClass::TaskFailure),
    }
}

/// Short human summary from the tail of captured output.
pub fn summarize(output: &str) -> String {
    let trimmed = output.trim();
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() > SUMMARY_TAIL_LINES {
        return lines[lines.len() - SUMMARY_TAIL_LINES..].join("\n");
    }
    truncate_chars(trimmed, SUMMARY_HEAD_CHARS)
}

/// First `max` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Operator guidance attached to a user-visible failure.
pub fn remediation_hint(class: FailureClass) -> &'static str {
    match class {
        FailureClass::Timeout => "Split the request into smaller steps or raise agent.timeout_secs.",
        FailureClass::TaskFailure => "Check the execution log and fix the request.",
        FailureClass::ResourceLimit => {
            "Wait for the usage window to reset, then edit the document to re-run."
        }
        FailureClass::OrchestrationFault => "Check relay's logs and the projects directory.",
        FailureClass::TransientIo | FailureClass::NotificationFailure => {
            "No action needed; relay retries automatically."
        }
    }
}
