//! Hardware capture backend built on nokhwa.
//!
//! The camera is opened inside a background thread (nokhwa cameras are not
//! `Send` on every platform). `start_stream` spawns that thread and waits for
//! it to report that the stream is open; frames are converted to RGB,
//! mirrored when the input asks for it, and presented to the bound surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat as NokhwaFrameFormat, RequestedFormat,
    RequestedFormatType,
};
use nokhwa::Camera;

use super::backend::CaptureBackend;
use super::frame_utils::{convert_to_rgb, mirror_horizontal};
use super::types::{BackendError, DeviceInfo, InputId, LensFacing, Resolution, SessionPreset};
use crate::permissions::{AuthorizationSource, PermissionState};
use crate::preview::PreviewSurface;

const TARGET_FPS: u32 = 30;

/// List all available camera devices on the system.
pub fn list_devices() -> Result<Vec<DeviceInfo>, BackendError> {
    let devices =
        nokhwa::query(ApiBackend::Auto).map_err(|e| BackendError::QueryFailed(e.to_string()))?;

    Ok(devices
        .into_iter()
        .map(|d| {
            let name = d.human_name();
            DeviceInfo {
                index: d.index().as_index().unwrap_or(0),
                facing: facing_from_name(&name),
                name,
            }
        })
        .collect())
}

/// Desktop webcams face the user; only explicitly rear cameras count as back.
fn facing_from_name(name: &str) -> LensFacing {
    let lower = name.to_lowercase();
    if lower.contains("back") || lower.contains("rear") {
        LensFacing::Back
    } else {
        LensFacing::Front
    }
}

#[derive(Debug, Clone)]
struct Attached {
    device: DeviceInfo,
    mirrored: bool,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct NativeState {
    inputs: HashMap<InputId, Attached>,
    next_input: u64,
    preset: SessionPreset,
    worker: Option<Worker>,
}

/// nokhwa-backed capture stack.
#[derive(Default)]
pub struct NativeBackend {
    state: Mutex<NativeState>,
    output: Arc<Mutex<Option<Weak<PreviewSurface>>>>,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NativeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CaptureBackend for NativeBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        list_devices()
    }

    fn attach_input(&self, device: &DeviceInfo) -> Result<InputId, BackendError> {
        let devices = list_devices()?;
        if !devices.iter().any(|d| d.index == device.index) {
            return Err(BackendError::InputRejected(format!(
                "camera {} is no longer connected",
                device.index
            )));
        }

        let mut state = self.lock();
        if !state.inputs.is_empty() {
            return Err(BackendError::InputRejected(
                "session already has a camera input".to_string(),
            ));
        }
        state.next_input += 1;
        let id = InputId(state.next_input);
        state.inputs.insert(
            id,
            Attached {
                device: device.clone(),
                mirrored: false,
            },
        );
        Ok(id)
    }

    fn detach_input(&self, input: InputId) -> Result<(), BackendError> {
        match self.lock().inputs.remove(&input) {
            Some(_) => Ok(()),
            None => Err(BackendError::UnknownInput(input)),
        }
    }

    fn apply_preset(&self, preset: SessionPreset) -> Result<(), BackendError> {
        self.lock().preset = preset;
        Ok(())
    }

    fn set_mirrored(&self, input: InputId, mirrored: bool) -> Result<(), BackendError> {
        match self.lock().inputs.get_mut(&input) {
            Some(attached) => {
                attached.mirrored = mirrored;
                Ok(())
            }
            None => Err(BackendError::UnknownInput(input)),
        }
    }

    fn start_stream(&self) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Ok(());
        }
        let attached = state
            .inputs
            .values()
            .next()
            .cloned()
            .ok_or_else(|| BackendError::StreamFailed("no input attached".to_string()))?;
        let resolution = state.preset.resolution();

        let stop = Arc::new(AtomicBool::new(false));
        let (info_tx, info_rx) = mpsc::channel();
        let output = Arc::clone(&self.output);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            run_capture_loop(attached, resolution, output, thread_stop, info_tx);
        });

        match info_rx.recv() {
            Ok(Ok(())) => {
                state.worker = Some(Worker { stop, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                stop.store(true, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                let _ = handle.join();
                Err(BackendError::StreamFailed(
                    "Capture thread terminated unexpectedly".to_string(),
                ))
            }
        }
    }

    fn stop_stream(&self) -> Result<(), BackendError> {
        let worker = self.lock().worker.take();
        if let Some(worker) = worker {
            worker.stop.store(true, Ordering::SeqCst);
            if worker.handle.join().is_err() {
                return Err(BackendError::StreamFailed(
                    "capture thread panicked".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn set_output(&self, output: Option<Weak<PreviewSurface>>) {
        let mut slot = match self.output.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = output;
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        let _ = self.stop_stream();
    }
}

fn run_capture_loop(
    attached: Attached,
    resolution: Resolution,
    output: Arc<Mutex<Option<Weak<PreviewSurface>>>>,
    stop: Arc<AtomicBool>,
    info_tx: Sender<Result<(), BackendError>>,
) {
    let index = CameraIndex::Index(attached.device.index);
    let mut camera = match open_camera_with_fallback(&index, resolution) {
        Ok(cam) => cam,
        Err(e) => {
            let _ = info_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        let _ = info_tx.send(Err(BackendError::StreamFailed(e.to_string())));
        return;
    }
    let _ = info_tx.send(Ok(()));

    while !stop.load(Ordering::Relaxed) {
        if let Ok(raw_frame) = camera.frame() {
            if let Some(mut frame) = convert_to_rgb(&raw_frame) {
                if attached.mirrored {
                    mirror_horizontal(&mut frame);
                }
                let surface = match output.lock() {
                    Ok(slot) => slot.as_ref().and_then(Weak::upgrade),
                    Err(_) => None,
                };
                if let Some(surface) = surface {
                    surface.present(&frame);
                }
            }
        }
        thread::sleep(Duration::from_millis(1));
    }

    let _ = camera.stop_stream();
}

fn open_camera_with_fallback(
    index: &CameraIndex,
    resolution: Resolution,
) -> Result<Camera, BackendError> {
    let requested = nokhwa::utils::Resolution::new(resolution.width, resolution.height);
    let format_attempts = [
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
            requested,
            NokhwaFrameFormat::NV12,
            TARGET_FPS,
        ))),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
            requested,
            NokhwaFrameFormat::MJPEG,
            TARGET_FPS,
        ))),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution),
    ];

    let mut last_error = String::from("no format attempted");
    for requested in format_attempts {
        match Camera::new(index.clone(), requested) {
            Ok(cam) => return Ok(cam),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(BackendError::InputRejected(last_error))
}

/// Camera authorization as reported by nokhwa.
///
/// On macOS this goes through AVFoundation; elsewhere nokhwa reports access
/// as granted and failures surface when the device is opened.
#[derive(Debug, Default)]
pub struct NativeAuthorization;

impl AuthorizationSource for NativeAuthorization {
    fn status(&self) -> PermissionState {
        if nokhwa::nokhwa_check() {
            PermissionState::Granted
        } else {
            PermissionState::Undetermined
        }
    }

    fn request_access(&self) -> bool {
        let (tx, rx) = mpsc::channel();
        nokhwa::nokhwa_initialize(move |granted| {
            let _ = tx.send(granted);
        });
        rx.recv().unwrap_or(false)
    }
}
