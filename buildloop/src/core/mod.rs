//! Pure logic for the build-edit loop.
//!
//! Nothing in this module spawns processes or touches the filesystem.

pub mod naming;
pub mod target;
pub mod types;
