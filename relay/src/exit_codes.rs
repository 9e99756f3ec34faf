//! Stable exit codes for relay CLI commands.

/// Command succeeded (including a clean watch shutdown).
pub const OK: i32 = 0;
/// Invalid config, unusable directories, or any other failure.
pub const INVALID: i32 = 1;
/// `relay rename` target already exists or the project was already renamed.
pub const CONFLICT: i32 = 2;
