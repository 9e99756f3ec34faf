//! I/O helpers for relay commands.

pub mod annotator;
pub mod config;
pub mod detector;
pub mod execution_log;
pub mod executor;
pub mod fingerprint_store;
pub mod notifier;
pub mod process;
pub mod registry;
