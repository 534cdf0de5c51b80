mod cli;

use clap::Parser;
use std::path::Path;

use cli::{Args, Command, ConfigAction};
use tryon_view::config::Config;
use tryon_view::coordinator::ViewId;
use tryon_view::logging::init_logging;

/// Load the config file.
///
/// An explicit `--config` must load; the default location falls back to
/// built-in settings with a warning.
fn load_config(path: Option<&Path>) -> Config {
    match Config::load(path) {
        Ok(config) => config,
        Err(e) if path.is_some() => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Warning: Failed to load config file: {}", e);
            eprintln!("Using default settings.\n");
            Config::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config_path = args.config.as_deref();
    let view_id = ViewId(args.view_id);

    match args.command {
        Command::Config {
            action: ConfigAction::Init,
        } => {
            cli::handle_config_action(ConfigAction::Init, config_path, &Config::default());
        }
        Command::Config { action } => {
            let config = load_config(config_path);
            cli::handle_config_action(action, config_path, &config);
        }
        Command::ListCameras => {
            let config = load_config(config_path);
            cli::list_cameras(&config);
        }
        Command::Call { calls } => {
            let config = load_config(config_path);
            match cli::run_calls(&config, view_id, &calls).await {
                Ok(true) => {}
                Ok(false) => std::process::exit(1),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::Run => {
            let config = load_config(config_path);
            if let Err(e) = cli::run_console(&config, view_id).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}
