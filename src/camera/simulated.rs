//! In-process capture backend.
//!
//! Behaves like a camera stack without touching hardware: devices are a fixed
//! list, inputs are counters, and frames are a synthetic test pattern pushed
//! on demand with [`SimulatedBackend::emit_frame`]. Failure injection and
//! start/stop gates let callers hold the hardware open mid-transition to
//! observe what happens to commands that arrive in the meantime.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::Duration;

use super::backend::CaptureBackend;
use super::frame_utils::{mirror_horizontal, test_pattern};
use super::types::{BackendError, DeviceInfo, InputId, LensFacing, SessionPreset};
use crate::preview::PreviewSurface;

/// Knobs for the simulated camera stack.
#[derive(Debug, Clone)]
pub struct SimulatedOptions {
    /// Report a front-facing camera
    pub front_camera: bool,
    /// Report a world-facing camera
    pub back_camera: bool,
    /// Time the hardware takes to confirm a stream start
    pub start_latency: Duration,
    /// Refuse every input attachment
    pub reject_input: bool,
    /// Refuse mirroring on the video connection
    pub reject_mirroring: bool,
    /// Fail stream activation
    pub fail_start: bool,
    /// Report an error from stream teardown (the stream still halts)
    pub fail_stop: bool,
}

impl Default for SimulatedOptions {
    fn default() -> Self {
        Self {
            front_camera: true,
            back_camera: true,
            start_latency: Duration::ZERO,
            reject_input: false,
            reject_mirroring: false,
            fail_start: false,
            fail_stop: false,
        }
    }
}

/// Snapshot of what the simulated hardware has been asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedStats {
    pub attached_inputs: usize,
    pub attach_calls: u64,
    pub detach_calls: u64,
    pub stream_starts: u64,
    pub stream_stops: u64,
    pub running: bool,
    pub output_bound: bool,
    pub mirrored: bool,
    pub preset: Option<SessionPreset>,
    pub pending_starts: usize,
    pub pending_stops: usize,
}

#[derive(Debug)]
struct SimState {
    options: SimulatedOptions,
    inputs: HashMap<InputId, bool>,
    next_input: u64,
    preset: Option<SessionPreset>,
    running: bool,
    output: Option<Weak<PreviewSurface>>,
    attach_calls: u64,
    detach_calls: u64,
    stream_starts: u64,
    stream_stops: u64,
    start_held: bool,
    stop_held: bool,
    pending_starts: usize,
    pending_stops: usize,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SimState>,
    gate: Condvar,
}

/// Simulated camera stack. Clones share the same hardware.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    shared: Arc<Shared>,
}

impl SimulatedBackend {
    pub fn new(options: SimulatedOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SimState {
                    options,
                    inputs: HashMap::new(),
                    next_input: 1,
                    preset: None,
                    running: false,
                    output: None,
                    attach_calls: 0,
                    detach_calls: 0,
                    stream_starts: 0,
                    stream_stops: 0,
                    start_held: false,
                    stop_held: false,
                    pending_starts: 0,
                    pending_stops: 0,
                }),
                gate: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current counters and flags.
    pub fn stats(&self) -> SimulatedStats {
        let state = self.lock();
        SimulatedStats {
            attached_inputs: state.inputs.len(),
            attach_calls: state.attach_calls,
            detach_calls: state.detach_calls,
            stream_starts: state.stream_starts,
            stream_stops: state.stream_stops,
            running: state.running,
            output_bound: state.output.is_some(),
            mirrored: state.inputs.values().any(|m| *m),
            preset: state.preset,
            pending_starts: state.pending_starts,
            pending_stops: state.pending_stops,
        }
    }

    /// Replace the failure-injection options. Takes effect on the next call.
    pub fn update_options(&self, f: impl FnOnce(&mut SimulatedOptions)) {
        f(&mut self.lock().options);
    }

    /// Block stream activations until [`release_start`](Self::release_start).
    pub fn hold_start(&self) {
        self.lock().start_held = true;
    }

    /// Let held stream activations complete.
    pub fn release_start(&self) {
        self.lock().start_held = false;
        self.shared.gate.notify_all();
    }

    /// Block stream teardown until [`release_stop`](Self::release_stop).
    pub fn hold_stop(&self) {
        self.lock().stop_held = true;
    }

    pub fn release_stop(&self) {
        self.lock().stop_held = false;
        self.shared.gate.notify_all();
    }

    fn wait_while<'a>(
        &'a self,
        mut state: MutexGuard<'a, SimState>,
        held: impl Fn(&SimState) -> bool,
    ) -> MutexGuard<'a, SimState> {
        while held(&state) {
            state = match self.shared.gate.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        state
    }

    /// Push one synthetic frame to the bound output.
    ///
    /// Returns false when the stream is not running or no live surface is bound.
    pub fn emit_frame(&self) -> bool {
        let (surface, mirrored, preset) = {
            let state = self.lock();
            if !state.running {
                return false;
            }
            let surface = match state.output.as_ref().and_then(Weak::upgrade) {
                Some(surface) => surface,
                None => return false,
            };
            (
                surface,
                state.inputs.values().any(|m| *m),
                state.preset.unwrap_or_default(),
            )
        };

        let resolution = preset.resolution();
        let mut frame = test_pattern(resolution.width, resolution.height);
        if mirrored {
            mirror_horizontal(&mut frame);
        }
        surface.present(&frame);
        true
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(SimulatedOptions::default())
    }
}

impl CaptureBackend for SimulatedBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        let state = self.lock();
        let mut devices = Vec::new();
        if state.options.back_camera {
            devices.push(DeviceInfo {
                index: devices.len() as u32,
                name: "Simulated Back Camera".to_string(),
                facing: LensFacing::Back,
            });
        }
        if state.options.front_camera {
            devices.push(DeviceInfo {
                index: devices.len() as u32,
                name: "Simulated Front Camera".to_string(),
                facing: LensFacing::Front,
            });
        }
        Ok(devices)
    }

    fn attach_input(&self, device: &DeviceInfo) -> Result<InputId, BackendError> {
        let mut state = self.lock();
        state.attach_calls += 1;
        if state.options.reject_input {
            return Err(BackendError::InputRejected(format!(
                "{} refused by the session",
                device.name
            )));
        }
        let id = InputId(state.next_input);
        state.next_input += 1;
        state.inputs.insert(id, false);
        Ok(id)
    }

    fn detach_input(&self, input: InputId) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.detach_calls += 1;
        match state.inputs.remove(&input) {
            Some(_) => Ok(()),
            None => Err(BackendError::UnknownInput(input)),
        }
    }

    fn apply_preset(&self, preset: SessionPreset) -> Result<(), BackendError> {
        self.lock().preset = Some(preset);
        Ok(())
    }

    fn set_mirrored(&self, input: InputId, mirrored: bool) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.options.reject_mirroring {
            return Err(BackendError::Unsupported(
                "video mirroring is not supported on this connection".to_string(),
            ));
        }
        match state.inputs.get_mut(&input) {
            Some(flag) => {
                *flag = mirrored;
                Ok(())
            }
            None => Err(BackendError::UnknownInput(input)),
        }
    }

    fn start_stream(&self) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.pending_starts += 1;
        state = self.wait_while(state, |s| s.start_held);

        let latency = state.options.start_latency;
        if !latency.is_zero() {
            drop(state);
            std::thread::sleep(latency);
            state = self.lock();
        }
        state.pending_starts -= 1;

        if state.options.fail_start {
            return Err(BackendError::StreamFailed(
                "hardware refused to activate".to_string(),
            ));
        }
        if state.inputs.is_empty() {
            return Err(BackendError::StreamFailed("no input attached".to_string()));
        }
        state.running = true;
        state.stream_starts += 1;
        Ok(())
    }

    fn stop_stream(&self) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.pending_stops += 1;
        state = self.wait_while(state, |s| s.stop_held);
        state.pending_stops -= 1;

        if state.running {
            state.running = false;
            state.stream_stops += 1;
        }
        if state.options.fail_stop {
            return Err(BackendError::StreamFailed("teardown reported an error".to_string()));
        }
        Ok(())
    }

    fn set_output(&self, output: Option<Weak<PreviewSurface>>) {
        self.lock().output = output;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::backend::find_device;
    use crate::preview::Size;

    fn front(backend: &SimulatedBackend) -> DeviceInfo {
        find_device(backend, LensFacing::Front).unwrap().unwrap()
    }

    #[test]
    fn test_attach_and_detach_inputs() {
        let backend = SimulatedBackend::default();
        let input = backend.attach_input(&front(&backend)).unwrap();
        assert_eq!(backend.stats().attached_inputs, 1);

        backend.detach_input(input).unwrap();
        assert_eq!(backend.stats().attached_inputs, 0);
        assert_eq!(
            backend.detach_input(input),
            Err(BackendError::UnknownInput(input))
        );
    }

    #[test]
    fn test_reject_input() {
        let backend = SimulatedBackend::new(SimulatedOptions {
            reject_input: true,
            ..SimulatedOptions::default()
        });
        let result = backend.attach_input(&front(&backend));
        assert!(matches!(result, Err(BackendError::InputRejected(_))));
        assert_eq!(backend.stats().attach_calls, 1);
        assert_eq!(backend.stats().attached_inputs, 0);
    }

    #[test]
    fn test_start_requires_input() {
        let backend = SimulatedBackend::default();
        assert!(backend.start_stream().is_err());
        assert!(!backend.stats().running);
    }

    #[test]
    fn test_start_stop_counts() {
        let backend = SimulatedBackend::default();
        backend.attach_input(&front(&backend)).unwrap();
        backend.start_stream().unwrap();
        assert!(backend.stats().running);

        backend.stop_stream().unwrap();
        backend.stop_stream().unwrap();
        let stats = backend.stats();
        assert!(!stats.running);
        assert_eq!(stats.stream_starts, 1);
        assert_eq!(stats.stream_stops, 1);
    }

    #[test]
    fn test_failed_stop_still_halts() {
        let backend = SimulatedBackend::default();
        backend.attach_input(&front(&backend)).unwrap();
        backend.start_stream().unwrap();
        backend.update_options(|o| o.fail_stop = true);

        assert!(backend.stop_stream().is_err());
        assert!(!backend.stats().running);
    }

    #[test]
    fn test_held_start_waits_for_release() {
        let backend = SimulatedBackend::default();
        backend.attach_input(&front(&backend)).unwrap();
        backend.hold_start();

        let worker = {
            let backend = backend.clone();
            std::thread::spawn(move || backend.start_stream())
        };
        while backend.stats().pending_starts == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!backend.stats().running);

        backend.release_start();
        worker.join().unwrap().unwrap();
        assert!(backend.stats().running);
    }

    #[test]
    fn test_held_stop_waits_for_release() {
        let backend = SimulatedBackend::default();
        backend.attach_input(&front(&backend)).unwrap();
        backend.start_stream().unwrap();
        backend.hold_stop();

        let worker = {
            let backend = backend.clone();
            std::thread::spawn(move || backend.stop_stream())
        };
        while backend.stats().pending_stops == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(backend.stats().running);

        backend.release_stop();
        worker.join().unwrap().unwrap();
        assert!(!backend.stats().running);
        assert_eq!(backend.stats().pending_stops, 0);
    }

    #[test]
    fn test_emit_frame_reaches_bound_surface() {
        let backend = SimulatedBackend::default();
        let input = backend.attach_input(&front(&backend)).unwrap();
        backend.set_mirrored(input, true).unwrap();
        backend.apply_preset(SessionPreset::Low).unwrap();

        let surface = Arc::new(PreviewSurface::new(Size::new(32, 24)));
        backend.set_output(Some(Arc::downgrade(&surface)));
        assert!(!backend.emit_frame(), "not running yet");

        backend.start_stream().unwrap();
        assert!(backend.emit_frame());
        assert_eq!(surface.frames_presented(), 1);

        drop(surface);
        assert!(!backend.emit_frame(), "surface is gone");
    }
}
