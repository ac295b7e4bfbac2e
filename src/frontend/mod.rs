//! Front end module
//!
//! A line-oriented console that plays the role of the menu-bar popover:
//! start/stop requests and user input in, agent output and state out.

mod console;
mod protocol;

pub use console::*;
pub use protocol::*;
