//! Command-line interface for costform.
//!
//! This module defines the commands and formats their output.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
