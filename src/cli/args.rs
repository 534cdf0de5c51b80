//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Front-camera preview with a transparent overlay, driven by method calls
#[derive(Parser, Debug)]
#[command(name = "tryon-view")]
#[command(version, about = "Front-camera preview with a transparent overlay", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Id of the view to create
    #[arg(long, default_value = "0", global = true)]
    pub view_id: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive console driving one view
    Run,
    /// Send method calls to a fresh view, in order, and print each response
    Call {
        /// METHOD or METHOD=ARG (setEffectBytes=PATH reads the image from a file)
        #[arg(required = true, value_parser = parse_call)]
        calls: Vec<CallArg>,
    },
    /// List available cameras
    ListCameras,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}

/// One `call` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallArg {
    pub method: String,
    pub argument: Option<String>,
}

/// Parse `METHOD` or `METHOD=ARG`
fn parse_call(s: &str) -> Result<CallArg, String> {
    let (method, argument) = match s.split_once('=') {
        Some((method, arg)) => (method, Some(arg.to_string())),
        None => (s, None),
    };
    if method.is_empty() {
        return Err(format!("Invalid call '{}'. Use METHOD or METHOD=ARG", s));
    }
    Ok(CallArg {
        method: method.to_string(),
        argument,
    })
}
