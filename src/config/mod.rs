//! Configuration module
//!
//! Launcher settings and the `~/.co` layout the bootstrap checks inspect.

mod home;
mod launcher;

pub use home::*;
pub use launcher::*;
