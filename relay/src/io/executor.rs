//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples orchestration from the actual agent
//! backend (by default the `claude` CLI). Tests use scripted executors that
//! return predetermined exits without spawning processes.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::outcome::ExitFacts;
use crate::io::process::run_command_supervised;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Instruction payload: the document content, passed as one argument.
    pub prompt: String,
    /// Maximum time to wait for the agent to complete.
    pub timeout: Duration,
    /// Combined output kept in memory beyond which bytes are discarded.
    pub output_limit_bytes: usize,
}

/// What an invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub facts: ExitFacts,
    /// Combined stdout/stderr, including any truncation notice.
    pub output: String,
}

/// Abstraction over agent execution backends.
///
/// Implementations block until the agent exits and must honour `cancel`
/// by terminating the agent.
pub trait Executor: Send + Sync {
    fn exec(&self, request: &ExecRequest, cancel: &CancellationToken) -> Result<ExecResult>;
}

/// Executor that spawns a configured program with the prompt appended as the
/// final argument. No shell is involved.
pub struct AgentExecutor {
    command: Vec<String>,
}

impl AgentExecutor {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("agent command must name a program"));
        }
        Ok(Self { command })
    }

    fn build(&self, request: &ExecRequest) -> Command {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg(&request.prompt)
            .current_dir(&request.workdir);
        cmd
    }
}

impl Executor for AgentExecutor {
    #[instrument(skip_all, fields(program = %self.command[0], timeout_secs = request.timeout.as_secs()))]
    fn exec(&self, request: &ExecRequest, cancel: &CancellationToken) -> Result<ExecResult> {
        info!(
            workdir = %request.workdir.display(),
            prompt_chars = request.prompt.chars().count(),
            "starting agent"
        );
        fs::create_dir_all(&request.workdir)
            .with_context(|| format!("create workdir {}", request.workdir.display()))?;

        let output = run_command_supervised(
            self.build(request),
            request.timeout,
            request.output_limit_bytes,
            cancel,
        )
        .with_context(|| format!("run {}", self.command[0]))?;

        let mut text = output.text();
        text.push_str(&output.truncated_notice("agent"));
        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "agent timed out"
            );
        } else if !output.status.success() {
            warn!(exit_code = ?output.code(), "agent exited non-zero");
        } else {
            debug!("agent completed successfully");
        }

        Ok(ExecResult {
            facts: ExitFacts {
                code: output.code(),
                timed_out: output.timed_out,
                cancelled: output.cancelled,
            },
            output: text,
        })
    }
}
