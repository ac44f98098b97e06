//! Stable exit codes for buildloop CLI commands.

/// Every target built.
pub const OK: i32 = 0;
/// Invalid config or target list, or the environment is broken (git, build
/// tool, or assistant could not be launched).
pub const INVALID: i32 = 1;
/// The run finished but at least one target exhausted its attempts.
pub const FAILED: i32 = 2;
/// The run was aborted early by policy (assistant failure or first exhausted
/// target).
pub const ABORTED: i32 = 3;
