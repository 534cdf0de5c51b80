//! Command-line interface definitions and helpers.
//!
//! This module contains CLI argument parsing, the interactive console and
//! subcommand handlers.

mod args;
mod commands;
mod console;

pub use args::{Args, Command, ConfigAction};
pub use commands::{handle_config_action, list_cameras, run_calls, run_console};
