//! Camera types and data structures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Which way a camera faces relative to the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LensFacing {
    /// User-facing (selfie) camera
    Front,
    /// World-facing camera
    Back,
}

impl fmt::Display for LensFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LensFacing::Front => write!(f, "front"),
            LensFacing::Back => write!(f, "back"),
        }
    }
}

/// Information about an available camera device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device index for selection
    pub index: u32,
    /// Human-readable device name
    pub name: String,
    /// Lens direction
    pub facing: LensFacing,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.index, self.name, self.facing)
    }
}

/// Handle to a device input attached to a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputId(pub u64);

/// Camera resolution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const LOW: Resolution = Resolution {
        width: 320,
        height: 240,
    };

    pub const MEDIUM: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    pub const HIGH: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
}

/// Preview quality preset requested from the capture stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPreset {
    Low,
    Medium,
    #[default]
    High,
}

impl SessionPreset {
    /// Capture resolution for this preset.
    pub fn resolution(self) -> Resolution {
        match self {
            SessionPreset::Low => Resolution::LOW,
            SessionPreset::Medium => Resolution::MEDIUM,
            SessionPreset::High => Resolution::HIGH,
        }
    }
}

impl fmt::Display for SessionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPreset::Low => write!(f, "low"),
            SessionPreset::Medium => write!(f, "medium"),
            SessionPreset::High => write!(f, "high"),
        }
    }
}

/// Pixel format of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// RGB format (3 bytes per pixel)
    Rgb,
}

/// A captured camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data in RGB format
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format
    pub format: FrameFormat,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl Frame {
    /// Get the number of bytes per pixel (3 for RGB).
    pub fn bytes_per_pixel(&self) -> usize {
        match self.format {
            FrameFormat::Rgb => 3,
        }
    }
}

/// Settings applied when a capture session is configured.
///
/// There is no mirroring switch: the front preview is always mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSettings {
    /// Capture quality preset
    pub preset: SessionPreset,
}

/// Errors reported by a capture backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Failed to query camera devices
    #[error("Failed to query cameras: {0}")]
    QueryFailed(String),
    /// The device could not be attached as a session input
    #[error("Cannot add camera input: {0}")]
    InputRejected(String),
    /// The input handle is not attached to this session
    #[error("Input {0:?} is not attached")]
    UnknownInput(InputId),
    /// A configuration step is not supported by the device
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),
    /// Failed to start or stop the video stream
    #[error("Camera stream failed: {0}")]
    StreamFailed(String),
}
