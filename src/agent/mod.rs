//! Agent supervision module
//!
//! Runs `co` through first-run setup and keeps one agent process alive,
//! streaming its output to subscribers.

mod bootstrap;
mod session;
mod supervisor;

pub use bootstrap::*;
pub use session::*;
pub use supervisor::*;
