//! Per-attempt execution logs under a project's `logs/` directory.
//!
//! These are product artifacts, written regardless of `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::core::types::AttemptOutcome;

/// Everything recorded about one agent attempt.
pub struct ExecutionLogEntry<'a> {
    pub project: &'a str,
    pub source: &'a Path,
    /// 0 for the first attempt, `n` for the n-th retry.
    pub retry: u32,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    pub outcome: &'a AttemptOutcome,
    pub output: &'a str,
}

/// `execution_<YYYYMMDD_HHMMSS>.log`, or `..._retry<n>.log` for retries.
pub fn execution_log_path(logs_dir: &Path, started_at: DateTime<Local>, retry: u32) -> PathBuf {
    let stamp = started_at.format("%Y%m%d_%H%M%S");
    let name = if retry == 0 {
        format!("execution_{stamp}.log")
    } else {
        format!("execution_{stamp}_retry{retry}.log")
    };
    logs_dir.join(name)
}

/// Write `entry` to a new file under `logs_dir` and return its path.
///
/// Attempts that start in the same second get `_2`, `_3`, … appended; an
/// existing log is never overwritten.
pub fn write_execution_log(logs_dir: &Path, entry: &ExecutionLogEntry<'_>) -> Result<PathBuf> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("create logs dir {}", logs_dir.display()))?;
    let base = execution_log_path(logs_dir, entry.started_at, entry.retry);
    let mut suffix = 1u32;
    loop {
        let path = if suffix == 1 {
            base.clone()
        } else {
            base.with_file_name(format!(
                "{}_{suffix}.log",
                base.file_stem().unwrap_or_default().to_string_lossy()
            ))
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(render(entry).as_bytes())
                    .with_context(|| format!("write {}", path.display()))?;
                return Ok(path);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => suffix += 1,
            Err(err) => {
                return Err(err).with_context(|| format!("create {}", path.display()));
            }
        }
    }
}

fn render(entry: &ExecutionLogEntry<'_>) -> String {
    let mut buf = String::new();
    buf.push_str(&format!("project: {}\n", entry.project));
    buf.push_str(&format!("source: {}\n", entry.source.display()));
    buf.push_str(&format!("retry: {}\n", entry.retry));
    buf.push_str(&format!("started_at: {}\n", entry.started_at.to_rfc3339()));
    buf.push_str(&format!("ended_at: {}\n", entry.ended_at.to_rfc3339()));
    buf.push_str(&format!("outcome: {}\n", describe(entry.outcome)));
    buf.push_str("\n--- output ---\n");
    buf.push_str(entry.output);
    if !entry.output.ends_with('\n') {
        buf.push('\n');
    }
    buf
}

fn describe(outcome: &AttemptOutcome) -> String {
    match outcome {
        AttemptOutcome::Success { .. } => "success".to_string(),
        AttemptOutcome::ResourceLimit => "resource_limit".to_string(),
        AttemptOutcome::Timeout => "timeout".to_string(),
        AttemptOutcome::Failure { code: Some(code) } => format!("failure (exit {code})"),
        AttemptOutcome::Failure { code: None } => "failure (killed by signal)".to_string(),
        AttemptOutcome::Cancelled => "cancelled".to_string(),
    }
}
