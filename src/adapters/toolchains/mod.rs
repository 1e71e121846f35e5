//! Toolchain adapter implementations.

pub mod command;
mod diff;
pub mod scripted;

pub use command::CommandToolchain;
pub use diff::line_diff;
pub use scripted::{PhaseCall, ScriptedBehavior, ScriptedFailure, ScriptedToolchain};
