//! Camera capture module.
//!
//! - Backend abstraction via [`CaptureBackend`] with one platform variant
//!   ([`PlatformBackend`]) chosen at build time
//! - Session state machine via [`CaptureSession`]
//! - Process-wide device claims via [`DeviceArbiter`]

mod arbiter;
mod backend;
mod frame_utils;
#[cfg(feature = "native")]
mod native;
mod session;
mod simulated;
mod types;

pub use arbiter::DeviceArbiter;
pub use backend::{find_device, CaptureBackend, PlatformBackend};
pub use frame_utils::{mirror_horizontal, test_pattern};
#[cfg(feature = "native")]
pub use native::{list_devices, NativeAuthorization, NativeBackend};
pub use session::{
    run_blocking, Attachment, CaptureSession, ConfigError, JobKind, JobOutcome, SessionJob,
    SessionState, StartError, StartStep,
};
pub use simulated::{SimulatedBackend, SimulatedOptions, SimulatedStats};
pub use types::{
    BackendError, DeviceInfo, Frame, FrameFormat, InputId, LensFacing, Resolution, SessionPreset,
    SessionSettings,
};
