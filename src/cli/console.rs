//! Line commands of the interactive console.

use std::path::PathBuf;

use tryon_view::channel::{decode_call, MethodCall};
use tryon_view::preview::Size;

/// What a console line asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    /// Dispatch a method call to the view
    Call(MethodCall),
    /// Read an image file and send it as the overlay
    Effect(PathBuf),
    Status,
    Resize(Size),
    /// Save the composited preview as an image
    Snapshot(PathBuf),
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  start              start the camera preview
  stop               stop the camera preview
  effect <path>      show an image file as the overlay
  clear              remove the overlay
  status             print the view status
  resize <WxH>       resize the preview container
  snapshot <path>    save preview + overlay to an image file
  dispose            dispose the view
  call <method>      send any method call by name
  call <json>        send a raw call, e.g. {\"method\":\"setEffect\",\"arguments\":\"hat\"}
  help               show this help
  quit               dispose and exit";

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleAction>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let action = match word {
        "start" => ConsoleAction::Call(MethodCall::new("start")),
        "stop" => ConsoleAction::Call(MethodCall::new("stop")),
        "clear" => ConsoleAction::Call(MethodCall::new("clearEffect")),
        "dispose" => ConsoleAction::Call(MethodCall::new("dispose")),
        "effect" => ConsoleAction::Effect(required_path(word, rest)?),
        "snapshot" => ConsoleAction::Snapshot(required_path(word, rest)?),
        "resize" => ConsoleAction::Resize(rest.parse()?),
        "call" if rest.starts_with('{') => ConsoleAction::Call(
            decode_call(rest).map_err(|e| format!("Invalid method call JSON: {}", e))?,
        ),
        "call" if !rest.is_empty() => ConsoleAction::Call(MethodCall::new(rest)),
        "status" => ConsoleAction::Status,
        "help" | "?" => ConsoleAction::Help,
        "quit" | "exit" => ConsoleAction::Quit,
        other => return Err(format!("Unknown command '{}'. Type 'help'.", other)),
    };
    Ok(Some(action))
}

fn required_path(word: &str, rest: &str) -> Result<PathBuf, String> {
    if rest.is_empty() {
        Err(format!("Usage: {} <path>", word))
    } else {
        Ok(PathBuf::from(rest))
    }
}
