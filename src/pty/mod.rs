//! PTY management module
//!
//! Starts `co` subprocesses on pseudo-terminals and reports their output and
//! exit as events. Uses portable-pty for cross-platform compatibility.

#[cfg(test)]
pub mod fake;
mod launch;
mod process;

pub use launch::*;
pub use process::*;
