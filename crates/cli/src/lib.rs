//! Operator tool for an in-process DHT ring.
//!
//! Provides commands for:
//! - Simulating joins and record migration end to end
//! - Looking up the owner of a key

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
