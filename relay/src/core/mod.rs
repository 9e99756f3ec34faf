//! Deterministic, pure logic shared by the relay pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod fingerprint;
pub mod outcome;
pub mod questions;
pub mod types;
