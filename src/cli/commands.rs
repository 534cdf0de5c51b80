//! Subcommand handlers: run, call, list-cameras and config actions.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::args::{CallArg, ConfigAction};
use super::console::{parse_line, ConsoleAction, HELP};
use tryon_view::camera::{CaptureBackend, PlatformBackend};
use tryon_view::channel::{encode_response, MethodCall, Response};
use tryon_view::config::{default_path, Config, DEFAULT_CONFIG};
use tryon_view::coordinator::ViewId;
use tryon_view::permissions::{AuthorizationSource, PermissionGate};
use tryon_view::registry::ViewRegistry;

#[cfg(not(feature = "native"))]
fn platform_backend(config: &Config) -> PlatformBackend {
    use tryon_view::camera::SimulatedOptions;

    PlatformBackend::new(SimulatedOptions {
        front_camera: config.simulated.front_camera,
        start_latency: config.simulated.start_latency(),
        ..SimulatedOptions::default()
    })
}

#[cfg(feature = "native")]
fn platform_backend(_config: &Config) -> PlatformBackend {
    PlatformBackend::new()
}

#[cfg(not(feature = "native"))]
fn platform_authorization(config: &Config) -> Arc<dyn AuthorizationSource> {
    use tryon_view::permissions::StaticAuthorization;

    Arc::new(StaticAuthorization::new(
        config.simulated.permission,
        config.simulated.grant_on_prompt,
    ))
}

#[cfg(feature = "native")]
fn platform_authorization(_config: &Config) -> Arc<dyn AuthorizationSource> {
    Arc::new(tryon_view::camera::NativeAuthorization)
}

/// Registry backed by this build's platform camera stack.
pub fn platform_registry(config: &Config) -> ViewRegistry<PlatformBackend> {
    let gate = Arc::new(PermissionGate::new(platform_authorization(config)));
    let factory_config = config.clone();
    let registry = ViewRegistry::new(
        gate,
        config.session_settings(),
        config.preview_bounds(),
        move |_| platform_backend(&factory_config),
    );
    registry.attach_host();
    registry
}

fn print_response(response: &Response) {
    match encode_response(response) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error encoding response: {}", e),
    }
}

/// Turn a `call` argument into a method call.
fn resolve_call(arg: &CallArg) -> Result<MethodCall, String> {
    match (arg.method.as_str(), &arg.argument) {
        ("setEffectBytes", Some(path)) => {
            let bytes = std::fs::read(path)
                .map_err(|e| format!("Failed to read overlay image '{}': {}", path, e))?;
            Ok(MethodCall::with_bytes(&arg.method, &bytes))
        }
        (_, Some(value)) => Ok(MethodCall {
            method: arg.method.clone(),
            arguments: serde_json::Value::String(value.clone()),
        }),
        (_, None) => Ok(MethodCall::new(&arg.method)),
    }
}

/// Dispatch `calls` to a fresh view and print one JSON response per call.
///
/// Returns whether every call succeeded.
pub async fn run_calls(
    config: &Config,
    view_id: ViewId,
    calls: &[CallArg],
) -> Result<bool, String> {
    let registry = platform_registry(config);
    registry.create_view(view_id).map_err(|e| e.to_string())?;

    let mut all_ok = true;
    for arg in calls {
        let call = resolve_call(arg)?;
        let response = registry.dispatch(view_id, call).await;
        all_ok &= response.is_success();
        print_response(&response);
    }

    registry.dispose_all().await;
    Ok(all_ok)
}

/// Interactive console for one view. Ctrl+C disposes the view and exits.
pub async fn run_console(config: &Config, view_id: ViewId) -> Result<(), String> {
    let registry = platform_registry(config);
    let handle = registry.create_view(view_id).map_err(|e| e.to_string())?;

    let (interrupt_tx, mut interrupt_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })
    .map_err(|e| format!("Failed to set Ctrl+C handler: {}", e))?;

    println!("View {} ready. Type 'help' for commands.", view_id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = interrupt_rx.recv() => {
                eprintln!("\nInterrupted.");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Failed to read input: {}", e);
                    break;
                }
            },
        };

        let action = match parse_line(&line) {
            Ok(Some(action)) => action,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        match action {
            ConsoleAction::Call(call) => {
                print_response(&registry.dispatch(view_id, call).await);
            }
            ConsoleAction::Effect(path) => match std::fs::read(&path) {
                Ok(bytes) => {
                    let call = MethodCall::with_bytes("setEffectBytes", &bytes);
                    print_response(&registry.dispatch(view_id, call).await);
                }
                Err(e) => eprintln!("Failed to read '{}': {}", path.display(), e),
            },
            ConsoleAction::Status => match handle.status().await {
                Ok(status) => match serde_json::to_string(&status) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("Error encoding status: {}", e),
                },
                Err(e) => eprintln!("{}", e),
            },
            ConsoleAction::Resize(bounds) => match handle.resize(bounds).await {
                Ok(()) => println!("Preview resized to {}", bounds),
                Err(e) => eprintln!("{}", e),
            },
            ConsoleAction::Snapshot(path) => match handle.snapshot().await {
                Some(image) => match image.save(&path) {
                    Ok(()) => println!("Saved {}", path.display()),
                    Err(e) => eprintln!("Failed to save '{}': {}", path.display(), e),
                },
                None => eprintln!("View has been disposed"),
            },
            ConsoleAction::Help => println!("{}", HELP),
            ConsoleAction::Quit => break,
        }
    }

    registry.dispose_all().await;
    Ok(())
}

/// List available cameras and print them to stdout.
pub fn list_cameras(config: &Config) {
    match platform_backend(config).devices() {
        Ok(devices) => {
            if devices.is_empty() {
                println!("No cameras found.");
                println!();
                println!("Make sure your camera is connected and permissions are granted.");
                println!(
                    "On macOS, grant access in System Settings > Privacy & Security > Camera."
                );
            } else {
                println!("Available cameras:");
                for device in devices {
                    println!("  {}", device);
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle config subcommand actions.
pub fn handle_config_action(action: ConfigAction, path: Option<&Path>, config: &Config) {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_path);

    match action {
        ConfigAction::Show => {
            println!("Current configuration:");
            match toml::to_string_pretty(config) {
                Ok(text) => println!("{}", text),
                Err(e) => eprintln!("Error rendering configuration: {}", e),
            }

            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found)", config_path.display());
            }
        }
        ConfigAction::Init => {
            if config_path.exists() {
                eprintln!("Config file already exists: {}", config_path.display());
                eprintln!("Use 'tryon-view config show' to view current settings.");
                std::process::exit(1);
            }

            // Create parent directories if needed
            if let Some(parent) = config_path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    eprintln!("Error creating config directory: {}", e);
                    std::process::exit(1);
                }
            }

            if let Err(e) = std::fs::write(&config_path, DEFAULT_CONFIG) {
                eprintln!("Error writing config file: {}", e);
                std::process::exit(1);
            }

            println!("Created config file: {}", config_path.display());
        }
    }
}
