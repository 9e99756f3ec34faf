//! Relay configuration stored in `relay.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::questions::QuestionLimits;

pub const WATCH_ROOT_ENV: &str = "RELAY_WATCH_ROOT";
pub const PROJECTS_DIR_ENV: &str = "RELAY_PROJECTS_DIR";
pub const SLACK_WEBHOOK_ENV: &str = "SLACK_WEBHOOK_URL";

/// Relay configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to values that
/// work against a local `notes/` directory and the `claude` CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// Directory tree of documents to watch.
    pub watch_root: PathBuf,

    /// Directory holding one workspace per watched document.
    pub projects_dir: PathBuf,

    /// Directory holding the fingerprint cache file.
    pub cache_dir: PathBuf,

    pub watch: WatchConfig,
    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub questions: QuestionsConfig,
    pub slack: SlackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// File extensions (without the dot) that mark a watched document.
    pub extensions: Vec<String>,
    /// Delay between polls that found nothing.
    pub poll_interval_ms: u64,
    /// Delay after an unexpected I/O error during a walk.
    pub error_backoff_ms: u64,
    /// Announce documents that already existed when the cache was empty.
    pub announce_existing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Program and leading arguments. The document content is appended as
    /// one extra argument.
    pub command: Vec<String>,
    /// Hard wall-clock limit per attempt.
    pub timeout_secs: u64,
    /// Combined stdout/stderr kept in memory per attempt.
    pub output_limit_bytes: usize,
    /// Executions allowed to run at once across all documents.
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Exit status the agent uses to signal a usage limit.
    pub resource_limit_exit_code: i32,
    pub interval_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QuestionsConfig {
    pub min_len: usize,
    pub max_len: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SlackConfig {
    /// Incoming webhook URL. Notifications only go to the log when unset.
    pub webhook_url: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            watch_root: PathBuf::from("notes"),
            projects_dir: PathBuf::from("projects"),
            cache_dir: default_cache_dir(),
            watch: WatchConfig::default(),
            agent: AgentConfig::default(),
            retry: RetryConfig::default(),
            questions: QuestionsConfig::default(),
            slack: SlackConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["md".to_string()],
            poll_interval_ms: 1000,
            error_backoff_ms: 5000,
            announce_existing: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "--allowedTools".to_string(),
                "Write,Edit,MultiEdit,Read,Bash,Glob,Grep".to_string(),
                "--print".to_string(),
            ],
            timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
            max_concurrent: 3,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            resource_limit_exit_code: 129,
            interval_secs: 5 * 60,
            max_retries: 10,
        }
    }
}

impl Default for QuestionsConfig {
    fn default() -> Self {
        let limits = QuestionLimits::default();
        Self {
            min_len: limits.min_len,
            max_len: limits.max_len,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("relay"))
        .unwrap_or_else(|| PathBuf::from(".relay").join("cache"))
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.watch.extensions.is_empty()
            || self.watch.extensions.iter().any(|ext| ext.trim().is_empty())
        {
            return Err(anyhow!("watch.extensions must be a non-empty array"));
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(anyhow!("watch.poll_interval_ms must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.max_concurrent == 0 {
            return Err(anyhow!("agent.max_concurrent must be > 0"));
        }
        if self.retry.resource_limit_exit_code == 0 {
            return Err(anyhow!("retry.resource_limit_exit_code must not be 0"));
        }
        if self.questions.min_len >= self.questions.max_len {
            return Err(anyhow!("questions.min_len must be < questions.max_len"));
        }
        Ok(())
    }

    /// Apply `RELAY_WATCH_ROOT`, `RELAY_PROJECTS_DIR` and `SLACK_WEBHOOK_URL`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(root) = lookup(WATCH_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.watch_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup(PROJECTS_DIR_ENV).filter(|v| !v.is_empty()) {
            self.projects_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup(SLACK_WEBHOOK_ENV).filter(|v| !v.is_empty()) {
            self.slack.webhook_url = Some(url);
        }
    }

    /// Make `watch_root`, `projects_dir` and `cache_dir` absolute against
    /// the current directory.
    ///
    /// Document paths, cache keys and project metadata are all derived from
    /// these, so they must not depend on where relay was started.
    pub fn make_paths_absolute(&mut self) -> Result<()> {
        let base = std::env::current_dir().context("read current directory")?;
        self.resolve_paths_against(&base);
        Ok(())
    }

    fn resolve_paths_against(&mut self, base: &Path) {
        for path in [
            &mut self.watch_root,
            &mut self.projects_dir,
            &mut self.cache_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.watch.error_backoff_ms)
    }

    pub fn question_limits(&self) -> QuestionLimits {
        QuestionLimits {
            min_len: self.questions.min_len,
            max_len: self.questions.max_len,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RelayConfig::default()`.
pub fn load_config(path: &Path) -> Result<RelayConfig> {
    if !path.exists() {
        let cfg = RelayConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RelayConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RelayConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
