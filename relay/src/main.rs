//! relay command line.
//!
//! `relay watch` runs the poll/dispatch loop until Ctrl-C or SIGTERM; the
//! other subcommands inspect or adjust state on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use relay::exit_codes;
use relay::io::config::{RelayConfig, load_config, write_config};
use relay::io::detector::ChangeDetector;
use relay::io::fingerprint_store::FingerprintStore;
use relay::io::registry::{ProjectRegistry, RegistryError};
use relay::logging;
use relay::watch::{WatchLoop, cancel_on_signal};

#[derive(Parser)]
#[command(
    name = "relay",
    version,
    about = "Run an agent for every human edit in a document tree"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file and create the watch and projects dirs.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Watch the document tree until interrupted.
    Watch {
        /// Directory tree to watch (overrides config and environment).
        #[arg(long)]
        root: Option<PathBuf>,
        /// Directory holding project workspaces.
        #[arg(long)]
        projects_dir: Option<PathBuf>,
    },
    /// Show what the fingerprint cache knows about the watch root.
    Status,
    /// List projects.
    Projects,
    /// Give a project its official name. Allowed once per project.
    Rename { project: String, new_name: String },
}

fn main() {
    let _ = dotenvy::dotenv();
    logging::init(logging::DEFAULT_FILTER);
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Watch { root, projects_dir } => {
            let mut cfg = load_settings(&cli.config)?;
            if let Some(root) = root {
                cfg.watch_root = root;
            }
            if let Some(dir) = projects_dir {
                cfg.projects_dir = dir;
            }
            cmd_watch(&cfg)
        }
        Command::Status => cmd_status(&load_settings(&cli.config)?),
        Command::Projects => cmd_projects(&load_settings(&cli.config)?),
        Command::Rename { project, new_name } => {
            cmd_rename(&load_settings(&cli.config)?, &project, &new_name)
        }
    }
}

/// Config file, then environment overrides. Paths come back absolute.
fn load_settings(path: &Path) -> Result<RelayConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env_overrides();
    cfg.validate()?;
    cfg.make_paths_absolute()?;
    Ok(cfg)
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    let cfg = if !force && path.exists() {
        println!("{} already exists", path.display());
        load_config(path)?
    } else {
        let cfg = RelayConfig::default();
        write_config(path, &cfg)?;
        println!("wrote {}", path.display());
        cfg
    };
    for dir in [&cfg.watch_root, &cfg.projects_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    Ok(())
}

fn cmd_watch(cfg: &RelayConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(async {
        let watcher = WatchLoop::from_config(cfg)?;
        let shutdown = CancellationToken::new();
        cancel_on_signal(shutdown.clone());
        let summary = watcher.run(shutdown).await?;
        println!(
            "processed {} change(s): {} started, {} dropped",
            summary.events, summary.orchestrator.accepted, summary.orchestrator.dropped
        );
        Ok(())
    })
}

fn cmd_status(cfg: &RelayConfig) -> Result<()> {
    if !cfg.watch_root.is_dir() {
        bail!("watch root {} is not a directory", cfg.watch_root.display());
    }
    let store = Arc::new(FingerprintStore::new(&cfg.cache_dir));
    let detector = ChangeDetector::open(&cfg.watch_root, &cfg.watch.extensions, store);
    let status = detector.status()?;
    println!("watch root: {}", status.watch_root.display());
    println!("tracked documents: {}", status.tracked_documents);
    println!("cached fingerprints: {}", status.cached_fingerprints);
    println!(
        "cache file: {} ({})",
        status.cache_file.display(),
        if status.cache_exists { "present" } else { "missing" }
    );
    Ok(())
}

fn cmd_projects(cfg: &RelayConfig) -> Result<()> {
    let mut registry = ProjectRegistry::open(&cfg.projects_dir)?;
    let projects = registry.list()?;
    if projects.is_empty() {
        println!("no projects in {}", cfg.projects_dir.display());
    }
    for project in projects {
        println!(
            "{}\t{}\t{}\t{}",
            project.display_name(),
            project.info.temp_name,
            project.info.source_file.display(),
            project.working_directory().display()
        );
    }
    Ok(())
}

fn cmd_rename(cfg: &RelayConfig, name: &str, new_name: &str) -> Result<()> {
    let mut registry = ProjectRegistry::open(&cfg.projects_dir)?;
    let project = registry
        .find_by_name(name)?
        .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
    let renamed = registry.rename(&project, new_name)?;
    println!(
        "renamed {} to {} ({})",
        project.display_name(),
        renamed.display_name(),
        renamed.working_directory().display()
    );
    Ok(())
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<RegistryError>() {
        Some(RegistryError::AlreadyExists(_) | RegistryError::AlreadyRenamed(_)) => {
            exit_codes::CONFLICT
        }
        _ => exit_codes::INVALID,
    }
}
