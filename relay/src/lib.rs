//! Document-triggered agent runner.
//!
//! relay watches a tree of text documents, runs an agent once per genuine
//! human edit inside a per-document project workspace, and writes the
//! agent's questions back into the document without re-triggering itself.
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, exit outcomes,
//!   question extraction). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, caches, process
//!   execution, notifications). Isolated to enable fakes in tests.
//!
//! [`orchestrator`] and [`watch`] coordinate core logic with I/O to implement
//! the `relay watch` command.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watch;
