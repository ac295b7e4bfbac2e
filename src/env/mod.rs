//! Environment module
//!
//! Reconstructs the interactive-shell environment child processes run with.

mod resolver;

pub use resolver::*;
