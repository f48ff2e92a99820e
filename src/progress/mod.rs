//! Progress parsing for SteamCMD output
//!
//! [`grammar`] knows what SteamCMD prints; [`ProgressParser`] keeps the
//! per-task state (partial lines, monotonic percent, terminal outcome).

pub mod grammar;
mod parser;

pub use grammar::{Marker, OutputGrammar, SteamCmdGrammar};
pub use parser::ProgressParser;
