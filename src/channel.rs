//! Method-call surface of a view.
//!
//! The host sends [`MethodCall`]s (method name plus JSON arguments); each is
//! decoded into a typed [`Command`] and answered with exactly one
//! [`Response`]. Error codes are stable strings on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::camera::{ConfigError, StartError};
use crate::coordinator::ViewId;
use crate::overlay::DecodeError;
use crate::permissions::PermissionError;

/// Display name of the method channel registered for `view`.
pub fn channel_name(view: ViewId) -> String {
    format!("ar_tryon_view/method_{}", view)
}

/// Typed command for one view.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    /// Opaque effect id. Accepted and ignored.
    SetEffect(Option<String>),
    SetEffectBytes(Vec<u8>),
    ClearEffect,
    Dispose,
}

impl Command {
    /// Wire name of the command.
    pub fn method(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::SetEffect(_) => "setEffect",
            Command::SetEffectBytes(_) => "setEffectBytes",
            Command::ClearEffect => "clearEffect",
            Command::Dispose => "dispose",
        }
    }
}

/// Raw call as received from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Why a [`MethodCall`] could not become a [`Command`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    #[error("Method '{0}' is not implemented")]
    NotImplemented(String),
    #[error("Invalid arguments for '{method}': {message}")]
    InvalidArguments { method: String, message: String },
}

impl MethodCall {
    /// Call without arguments.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            arguments: serde_json::Value::Null,
        }
    }

    /// Call whose argument is a byte array.
    pub fn with_bytes(method: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            method: method.into(),
            arguments: serde_json::Value::from(bytes.to_vec()),
        }
    }

    pub fn parse(&self) -> Result<Command, CallError> {
        match self.method.as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "setEffect" => Ok(Command::SetEffect(
                self.arguments.as_str().map(str::to_string),
            )),
            "setEffectBytes" => serde_json::from_value::<Vec<u8>>(self.arguments.clone())
                .map(Command::SetEffectBytes)
                .map_err(|_| CallError::InvalidArguments {
                    method: self.method.clone(),
                    message: "Expected a byte array payload".to_string(),
                }),
            "clearEffect" => Ok(Command::ClearEffect),
            "dispose" => Ok(Command::Dispose),
            other => Err(CallError::NotImplemented(other.to_string())),
        }
    }
}

impl From<Command> for MethodCall {
    fn from(command: Command) -> Self {
        let method = command.method();
        match command {
            Command::SetEffect(Some(id)) => MethodCall {
                method: method.to_string(),
                arguments: serde_json::Value::String(id),
            },
            Command::SetEffectBytes(bytes) => MethodCall::with_bytes(method, &bytes),
            _ => MethodCall::new(method),
        }
    }
}

/// Stable wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoContext,
    NoCameraPermission,
    DeviceUnavailable,
    InputRejected,
    CameraConfigFailed,
    EffectBytesFailed,
    InstanceDisposed,
    UnknownView,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NoContext => "NO_CONTEXT",
            ErrorCode::NoCameraPermission => "NO_CAMERA_PERMISSION",
            ErrorCode::DeviceUnavailable => "DEVICE_UNAVAILABLE",
            ErrorCode::InputRejected => "INPUT_REJECTED",
            ErrorCode::CameraConfigFailed => "CAMERA_CONFIG_FAILED",
            ErrorCode::EffectBytesFailed => "EFFECT_BYTES_FAILED",
            ErrorCode::InstanceDisposed => "INSTANCE_DISPOSED",
            ErrorCode::UnknownView => "UNKNOWN_VIEW",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single command, as reported to the host.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn no_context() -> Self {
        Self::new(ErrorCode::NoContext, "No host context attached")
    }

    pub fn disposed() -> Self {
        Self::new(ErrorCode::InstanceDisposed, "View has been disposed")
    }
}

impl From<ConfigError> for CommandError {
    fn from(e: ConfigError) -> Self {
        let code = match e {
            ConfigError::DeviceUnavailable => ErrorCode::DeviceUnavailable,
            ConfigError::InputRejected(_) => ErrorCode::InputRejected,
            ConfigError::SessionConfigFailed(_) | ConfigError::Busy(_) => {
                ErrorCode::CameraConfigFailed
            }
            ConfigError::Disposed => ErrorCode::InstanceDisposed,
        };
        CommandError::new(code, e.to_string())
    }
}

impl From<StartError> for CommandError {
    fn from(e: StartError) -> Self {
        match e {
            StartError::NoPermission(state) => PermissionError { state }.into(),
            StartError::Config(e) => e.into(),
            StartError::StreamFailed(detail) => CommandError::new(
                ErrorCode::CameraConfigFailed,
                format!("Camera stream failed to start: {}", detail),
            ),
            StartError::Disposed => CommandError::disposed(),
        }
    }
}

impl From<PermissionError> for CommandError {
    fn from(e: PermissionError) -> Self {
        CommandError::new(ErrorCode::NoCameraPermission, e.to_string())
    }
}

impl From<DecodeError> for CommandError {
    fn from(e: DecodeError) -> Self {
        CommandError::new(ErrorCode::EffectBytesFailed, e.to_string())
    }
}

/// The single reply to a method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Success,
    Error { code: ErrorCode, message: String },
    NotImplemented { method: String },
}

impl Response {
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success)
    }

    /// Error code, if this is an error response.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Response::Error { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<CommandError> for Response {
    fn from(e: CommandError) -> Self {
        Response::Error {
            code: e.code,
            message: e.message,
        }
    }
}

impl From<Result<(), CommandError>> for Response {
    fn from(result: Result<(), CommandError>) -> Self {
        match result {
            Ok(()) => Response::Success,
            Err(e) => e.into(),
        }
    }
}

impl From<CallError> for Response {
    fn from(e: CallError) -> Self {
        match e {
            CallError::NotImplemented(method) => Response::NotImplemented { method },
            CallError::InvalidArguments { message, .. } => Response::Error {
                code: ErrorCode::EffectBytesFailed,
                message,
            },
        }
    }
}

/// Decode a JSON method call.
pub fn decode_call(json: &str) -> Result<MethodCall, serde_json::Error> {
    serde_json::from_str(json)
}

/// Encode a response as a single JSON line.
pub fn encode_response(response: &Response) -> Result<String, serde_json::Error> {
    serde_json::to_string(response)
}
