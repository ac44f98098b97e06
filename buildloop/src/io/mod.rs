//! I/O adapters for the harness.

pub mod assistant;
pub mod build;
pub mod config;
pub mod git;
pub mod process;
pub mod prompt;
pub mod workspace;
