//! CLI module for the Convergent reconciliation tool.
//!
//! This module provides the command-line interface for planning, applying,
//! importing and verifying managed resources.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
