//! Capture backend abstraction.
//!
//! A backend is the platform capture stack seen through one narrow interface:
//! device lookup, input attachment, session options, stream control and the
//! preview output. Exactly one implementation is compiled in as
//! [`PlatformBackend`]; the session and coordinator are generic over the trait
//! so tests can drive them with the simulated backend directly.
//!
//! All methods may block. Callers on an async runtime run stream start/stop
//! and configuration on a blocking worker.

use std::sync::Weak;

use super::types::{BackendError, DeviceInfo, InputId, LensFacing, SessionPreset};
use crate::preview::PreviewSurface;

/// Platform capture stack used for every view.
pub trait CaptureBackend: Send + Sync + 'static {
    /// Enumerate the cameras this backend can open.
    fn devices(&self) -> Result<Vec<DeviceInfo>, BackendError>;

    /// Attach `device` as an input of the session.
    fn attach_input(&self, device: &DeviceInfo) -> Result<InputId, BackendError>;

    /// Remove a previously attached input.
    fn detach_input(&self, input: InputId) -> Result<(), BackendError>;

    /// Request a quality preset for the session output.
    fn apply_preset(&self, preset: SessionPreset) -> Result<(), BackendError>;

    /// Enable or disable horizontal mirroring on the input's video connection.
    fn set_mirrored(&self, input: InputId, mirrored: bool) -> Result<(), BackendError>;

    /// Start the hardware stream. Returns once the hardware confirms activation.
    fn start_stream(&self) -> Result<(), BackendError>;

    /// Halt the hardware stream. Returns once the hardware has stopped.
    fn stop_stream(&self) -> Result<(), BackendError>;

    /// Route live frames to `output`, or stop delivering frames with `None`.
    ///
    /// The backend only keeps the weak reference; the surface belongs to the view.
    fn set_output(&self, output: Option<Weak<PreviewSurface>>);
}

/// Find the first device facing `facing`.
pub fn find_device<B: CaptureBackend + ?Sized>(
    backend: &B,
    facing: LensFacing,
) -> Result<Option<DeviceInfo>, BackendError> {
    Ok(backend.devices()?.into_iter().find(|d| d.facing == facing))
}

#[cfg(not(feature = "native"))]
pub type PlatformBackend = super::simulated::SimulatedBackend;

#[cfg(feature = "native")]
pub type PlatformBackend = super::native::NativeBackend;
