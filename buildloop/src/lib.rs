//! Build-edit loop harness.
//!
//! Clones a repository into an ephemeral workspace and walks a fixed list of
//! build targets. For each target the harness probes the build tool, hands
//! failures to a coding assistant scoped to the target's build descriptor, and
//! re-probes until the target builds or the attempt budget runs out.
//!
//! - **[`core`]**: Pure logic (target parsing, naming, outcome types).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (git, build tool, assistant,
//!   filesystem). Each external tool sits behind a trait so tests can script it.
//!
//! Orchestration modules ([`controller`], [`recorder`], [`migrate`]) coordinate
//! core logic with I/O to implement the `run` command.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod migrate;
pub mod recorder;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
