//! Capture session controller.
//!
//! [`CaptureSession`] owns one view's camera session and enforces its state
//! machine:
//!
//! ```text
//! Unconfigured ─configure─▶ Configuring ─┬─▶ Configured ─start─▶ Running ─stop─▶ Stopped
//!                                        └─▶ Failed                  ▲               │
//!                                                                    └─────start─────┘
//! ```
//!
//! Backend work is split from state changes. `begin_*` runs on the owner,
//! moves the state forward and returns a [`SessionJob`]. The job does the
//! (blocking) backend calls wherever the caller likes and produces a
//! [`JobOutcome`], which the owner feeds back through `finish_*`. Every job
//! carries the session epoch it was issued under; outcomes from an older
//! epoch (the session was disposed or reconfigured in between) are dropped.
//! Hardware a stale outcome left behind (a running stream, an attached input)
//! is queued as a release job; the owner collects those with
//! [`take_cleanup`](CaptureSession::take_cleanup) and runs them like any other
//! job. Dispose works the same way through
//! [`begin_dispose`](CaptureSession::begin_dispose).
//!
//! The `async` methods [`configure`](CaptureSession::configure),
//! [`start`](CaptureSession::start) and [`stop`](CaptureSession::stop) chain
//! the three steps for callers that own the session outright.

use std::sync::{Arc, Weak};

use serde::Serialize;

use super::backend::{find_device, CaptureBackend};
use super::types::{BackendError, DeviceInfo, InputId, LensFacing, SessionSettings};
use crate::permissions::{PermissionGate, PermissionState};
use crate::preview::PreviewSurface;

/// Lifecycle of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unconfigured,
    Configuring,
    Configured,
    Running,
    Stopped,
    Failed,
}

/// Why a configuration attempt failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Front camera not available.")]
    DeviceUnavailable,
    #[error("Cannot add camera input: {0}")]
    InputRejected(String),
    #[error("Session configuration failed: {0}")]
    SessionConfigFailed(String),
    #[error("Cannot configure while the session is {0:?}")]
    Busy(SessionState),
    #[error("Capture session has been disposed")]
    Disposed,
}

/// Why a start attempt failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StartError {
    #[error("Camera permission not granted ({0:?}).")]
    NoPermission(PermissionState),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Camera stream failed to start: {0}")]
    StreamFailed(String),
    #[error("Capture session has been disposed")]
    Disposed,
}

/// Input attached by a successful configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub device: DeviceInfo,
    pub input: InputId,
}

/// What a job did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Configure,
    Start,
    Stop,
    Release,
}

/// Result of running a [`SessionJob`], to be applied with the matching `finish_*`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Configured {
        epoch: u64,
        result: Result<Attachment, ConfigError>,
    },
    Started {
        epoch: u64,
        result: Result<(), BackendError>,
    },
    Stopped {
        epoch: u64,
        result: Result<(), BackendError>,
    },
    /// Teardown finished. Errors are per step; the remaining steps still ran.
    Released {
        epoch: u64,
        errors: Vec<BackendError>,
    },
}

impl JobOutcome {
    /// Outcome for a job that never produced a result (e.g. its worker panicked).
    pub fn abandoned(kind: JobKind, epoch: u64, reason: String) -> Self {
        match kind {
            JobKind::Configure => JobOutcome::Configured {
                epoch,
                result: Err(ConfigError::SessionConfigFailed(reason)),
            },
            JobKind::Start => JobOutcome::Started {
                epoch,
                result: Err(BackendError::StreamFailed(reason)),
            },
            JobKind::Stop => JobOutcome::Stopped {
                epoch,
                result: Err(BackendError::StreamFailed(reason)),
            },
            JobKind::Release => JobOutcome::Released {
                epoch,
                errors: vec![BackendError::StreamFailed(reason)],
            },
        }
    }
}

/// Unit of backend work issued by the session. Running it may block.
pub struct SessionJob<B: CaptureBackend> {
    backend: Arc<B>,
    epoch: u64,
    task: JobTask,
}

enum JobTask {
    Configure {
        previous: Option<InputId>,
        settings: SessionSettings,
    },
    Start,
    Stop,
    Release {
        stop_stream: bool,
        input: Option<InputId>,
    },
}

impl<B: CaptureBackend> SessionJob<B> {
    pub fn kind(&self) -> JobKind {
        match self.task {
            JobTask::Configure { .. } => JobKind::Configure,
            JobTask::Start => JobKind::Start,
            JobTask::Stop => JobKind::Stop,
            JobTask::Release { .. } => JobKind::Release,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Perform the backend calls.
    pub fn run(self) -> JobOutcome {
        let epoch = self.epoch;
        match self.task {
            JobTask::Configure { previous, settings } => JobOutcome::Configured {
                epoch,
                result: configure_inputs(self.backend.as_ref(), previous, settings),
            },
            JobTask::Start => JobOutcome::Started {
                epoch,
                result: self.backend.start_stream(),
            },
            JobTask::Stop => JobOutcome::Stopped {
                epoch,
                result: self.backend.stop_stream(),
            },
            JobTask::Release { stop_stream, input } => JobOutcome::Released {
                epoch,
                errors: release(self.backend.as_ref(), stop_stream, input),
            },
        }
    }
}

/// Halt the stream and detach `input`, attempting every step.
fn release<B: CaptureBackend + ?Sized>(
    backend: &B,
    stop_stream: bool,
    input: Option<InputId>,
) -> Vec<BackendError> {
    let mut errors = Vec::new();
    if stop_stream {
        if let Err(e) = backend.stop_stream() {
            errors.push(e);
        }
    }
    if let Some(input) = input {
        if let Err(e) = backend.detach_input(input) {
            errors.push(e);
        }
    }
    errors
}

/// Transactional input setup: every step succeeds or nothing stays attached.
fn configure_inputs<B: CaptureBackend + ?Sized>(
    backend: &B,
    previous: Option<InputId>,
    settings: SessionSettings,
) -> Result<Attachment, ConfigError> {
    if let Some(previous) = previous {
        if let Err(e) = backend.detach_input(previous) {
            log::warn!("Failed to remove previous camera input: {}", e);
        }
    }

    let device = find_device(backend, LensFacing::Front)
        .map_err(|e| ConfigError::SessionConfigFailed(e.to_string()))?
        .ok_or(ConfigError::DeviceUnavailable)?;

    backend
        .apply_preset(settings.preset)
        .map_err(|e| ConfigError::SessionConfigFailed(e.to_string()))?;

    let input = backend.attach_input(&device).map_err(|e| match e {
        BackendError::InputRejected(msg) => ConfigError::InputRejected(msg),
        other => ConfigError::InputRejected(other.to_string()),
    })?;

    // Selfie preview: the front camera is always shown mirrored.
    if let Err(e) = backend.set_mirrored(input, true) {
        if let Err(rollback) = backend.detach_input(input) {
            log::warn!("Rollback of camera input failed: {}", rollback);
        }
        return Err(ConfigError::SessionConfigFailed(e.to_string()));
    }

    log::debug!("Attached {} as input {:?}", device, input);
    Ok(Attachment { device, input })
}

/// Next step of a start request.
pub enum StartStep<B: CaptureBackend> {
    /// The stream is already running.
    AlreadyRunning,
    /// Configuration has to run first; call `begin_start` again after it finishes.
    Configure(SessionJob<B>),
    /// Configured; the job activates the hardware stream.
    Activate(SessionJob<B>),
}

/// One view's capture session.
pub struct CaptureSession<B: CaptureBackend> {
    backend: Arc<B>,
    settings: SessionSettings,
    state: SessionState,
    attachment: Option<Attachment>,
    output: Option<Weak<PreviewSurface>>,
    epoch: u64,
    disposed: bool,
    cleanup: Vec<SessionJob<B>>,
}

impl<B: CaptureBackend> CaptureSession<B> {
    pub fn new(backend: Arc<B>, settings: SessionSettings) -> Self {
        Self {
            backend,
            settings,
            state: SessionState::Unconfigured,
            attachment: None,
            output: None,
            epoch: 0,
            disposed: false,
            cleanup: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Device selected by the last successful configuration.
    pub fn device(&self) -> Option<&DeviceInfo> {
        self.attachment.as_ref().map(|a| &a.device)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Route the live stream to `surface`. Only a weak reference is kept.
    pub fn attach_output(&mut self, surface: Weak<PreviewSurface>) {
        if self.disposed {
            return;
        }
        self.backend.set_output(Some(surface.clone()));
        self.output = Some(surface);
    }

    /// Stop routing frames to the surface. Run state is untouched.
    pub fn detach_output(&mut self) -> bool {
        if self.output.take().is_some() {
            self.backend.set_output(None);
            true
        } else {
            false
        }
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    // ───────────────────────── configure ─────────────────────────

    pub fn begin_configure(&mut self) -> Result<SessionJob<B>, ConfigError> {
        if self.disposed {
            return Err(ConfigError::Disposed);
        }
        match self.state {
            SessionState::Configuring | SessionState::Running => {
                return Err(ConfigError::Busy(self.state))
            }
            _ => {}
        }

        self.epoch += 1;
        self.state = SessionState::Configuring;
        let previous = self.attachment.take().map(|a| a.input);
        Ok(SessionJob {
            backend: Arc::clone(&self.backend),
            epoch: self.epoch,
            task: JobTask::Configure {
                previous,
                settings: self.settings,
            },
        })
    }

    pub fn finish_configure(
        &mut self,
        epoch: u64,
        result: Result<Attachment, ConfigError>,
    ) -> Result<(), ConfigError> {
        if self.is_stale(epoch) {
            if let Ok(attachment) = result {
                log::debug!("Discarding stale configuration of {}", attachment.device);
                self.push_cleanup(false, Some(attachment.input));
            }
            return Err(ConfigError::Disposed);
        }

        match result {
            Ok(attachment) => {
                log::info!("Capture session configured with {}", attachment.device);
                self.attachment = Some(attachment);
                self.state = SessionState::Configured;
                Ok(())
            }
            Err(e) => {
                log::warn!("Capture session configuration failed: {}", e);
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    // ───────────────────────── start ─────────────────────────

    pub fn begin_start(&mut self) -> Result<StartStep<B>, StartError> {
        if self.disposed {
            return Err(StartError::Disposed);
        }
        match self.state {
            SessionState::Running => Ok(StartStep::AlreadyRunning),
            SessionState::Unconfigured | SessionState::Failed => {
                Ok(StartStep::Configure(self.begin_configure()?))
            }
            SessionState::Configuring => Err(ConfigError::Busy(self.state).into()),
            SessionState::Configured | SessionState::Stopped => Ok(StartStep::Activate(SessionJob {
                backend: Arc::clone(&self.backend),
                epoch: self.epoch,
                task: JobTask::Start,
            })),
        }
    }

    pub fn finish_start(
        &mut self,
        epoch: u64,
        result: Result<(), BackendError>,
    ) -> Result<(), StartError> {
        if self.is_stale(epoch) {
            if result.is_ok() {
                log::debug!("Stream came up after the session moved on; stopping it");
                self.push_cleanup(true, None);
            }
            return Err(StartError::Disposed);
        }

        match result {
            Ok(()) => {
                log::info!("Capture session running");
                self.state = SessionState::Running;
                Ok(())
            }
            Err(e) => {
                log::warn!("Camera stream failed to start: {}", e);
                self.state = SessionState::Failed;
                Err(StartError::StreamFailed(e.to_string()))
            }
        }
    }

    // ───────────────────────── stop ─────────────────────────

    /// `None` when there is nothing to stop.
    pub fn begin_stop(&mut self) -> Option<SessionJob<B>> {
        if self.disposed || self.state != SessionState::Running {
            return None;
        }
        Some(SessionJob {
            backend: Arc::clone(&self.backend),
            epoch: self.epoch,
            task: JobTask::Stop,
        })
    }

    pub fn finish_stop(&mut self, epoch: u64, result: Result<(), BackendError>) {
        if self.is_stale(epoch) {
            return;
        }
        if let Err(e) = result {
            log::warn!("Camera stream reported an error while stopping: {}", e);
        }
        if self.state == SessionState::Running {
            self.state = SessionState::Stopped;
            log::info!("Capture session stopped");
        }
    }

    // ───────────────────────── dispose ─────────────────────────

    /// Mark the session disposed and hand back the hardware teardown.
    ///
    /// The output is detached on the spot; stopping the stream and detaching
    /// the input are left to the returned job. The stream is stopped whatever
    /// the state, since a start may have reached the hardware without its
    /// outcome being applied yet. `None` when the session was already disposed.
    pub fn begin_dispose(&mut self) -> Option<SessionJob<B>> {
        if self.disposed {
            return None;
        }
        self.disposed = true;
        self.epoch += 1;
        self.detach_output();
        self.state = SessionState::Unconfigured;
        let input = self.attachment.take().map(|a| a.input);
        Some(self.release_job(true, input))
    }

    /// Apply a release outcome. Teardown errors are logged and swallowed.
    pub fn finish_release(&mut self, errors: &[BackendError]) {
        for e in errors {
            log::warn!("Ignoring camera teardown error: {}", e);
        }
    }

    /// Release jobs queued by stale outcomes, oldest first.
    pub fn take_cleanup(&mut self) -> Vec<SessionJob<B>> {
        std::mem::take(&mut self.cleanup)
    }

    /// Dispose and run every pending release on the calling thread.
    ///
    /// For teardown outside a runtime (e.g. `Drop`). Returns false when the
    /// session was already disposed.
    pub fn dispose(&mut self) -> bool {
        let job = self.begin_dispose();
        let disposed = job.is_some();
        for job in self.take_cleanup().into_iter().chain(job) {
            if let JobOutcome::Released { errors, .. } = job.run() {
                self.finish_release(&errors);
            }
        }
        if disposed {
            log::debug!("Capture session released");
        }
        disposed
    }

    fn release_job(&self, stop_stream: bool, input: Option<InputId>) -> SessionJob<B> {
        SessionJob {
            backend: Arc::clone(&self.backend),
            epoch: self.epoch,
            task: JobTask::Release { stop_stream, input },
        }
    }

    fn push_cleanup(&mut self, stop_stream: bool, input: Option<InputId>) {
        let job = self.release_job(stop_stream, input);
        self.cleanup.push(job);
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.disposed || epoch != self.epoch
    }

    // ───────────────────────── inline helpers ─────────────────────────

    /// Configure the session, running the backend work on a blocking worker.
    pub async fn configure(&mut self) -> Result<(), ConfigError> {
        let job = self.begin_configure()?;
        match run_blocking(job).await {
            JobOutcome::Configured { epoch, result } => self.finish_configure(epoch, result),
            other => unreachable_outcome(other),
        }
    }

    /// Start the stream, asking `gate` for permission and configuring first if needed.
    pub async fn start(&mut self, gate: &PermissionGate) -> Result<(), StartError> {
        if self.state == SessionState::Running {
            return Ok(());
        }
        match gate.check_or_request().await {
            PermissionState::Granted => {}
            other => return Err(StartError::NoPermission(other)),
        }

        loop {
            match self.begin_start()? {
                StartStep::AlreadyRunning => return Ok(()),
                StartStep::Configure(job) => match run_blocking(job).await {
                    JobOutcome::Configured { epoch, result } => {
                        self.finish_configure(epoch, result)?
                    }
                    other => return unreachable_outcome(other).map_err(StartError::from),
                },
                StartStep::Activate(job) => match run_blocking(job).await {
                    JobOutcome::Started { epoch, result } => {
                        return self.finish_start(epoch, result)
                    }
                    other => return unreachable_outcome(other).map_err(StartError::from),
                },
            }
        }
    }

    /// Stop the stream if it is running.
    pub async fn stop(&mut self) {
        if let Some(job) = self.begin_stop() {
            if let JobOutcome::Stopped { epoch, result } = run_blocking(job).await {
                self.finish_stop(epoch, result);
            }
        }
    }
}

/// Run a job on tokio's blocking pool, turning a worker panic into a failed outcome.
pub async fn run_blocking<B: CaptureBackend>(job: SessionJob<B>) -> JobOutcome {
    let kind = job.kind();
    let epoch = job.epoch();
    match tokio::task::spawn_blocking(move || job.run()).await {
        Ok(outcome) => outcome,
        Err(e) => JobOutcome::abandoned(kind, epoch, e.to_string()),
    }
}

fn unreachable_outcome(outcome: JobOutcome) -> Result<(), ConfigError> {
    Err(ConfigError::SessionConfigFailed(format!(
        "unexpected job outcome {:?}",
        outcome
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::simulated::{SimulatedBackend, SimulatedOptions};
    use crate::permissions::StaticAuthorization;

    fn session(options: SimulatedOptions) -> (CaptureSession<SimulatedBackend>, SimulatedBackend) {
        let backend = SimulatedBackend::new(options);
        let session = CaptureSession::new(Arc::new(backend.clone()), SessionSettings::default());
        (session, backend)
    }

    fn granted_gate() -> PermissionGate {
        PermissionGate::new(Arc::new(StaticAuthorization::new(
            PermissionState::Granted,
            true,
        )))
    }

    #[tokio::test]
    async fn test_configure_attaches_mirrored_front_input() {
        let (mut session, backend) = session(SimulatedOptions::default());
        session.configure().await.unwrap();

        assert_eq!(session.state(), SessionState::Configured);
        assert_eq!(session.device().unwrap().facing, LensFacing::Front);
        let stats = backend.stats();
        assert_eq!(stats.attached_inputs, 1);
        assert!(stats.mirrored);
    }

    #[tokio::test]
    async fn test_configure_without_front_camera() {
        let (mut session, backend) = session(SimulatedOptions {
            front_camera: false,
            ..SimulatedOptions::default()
        });
        assert_eq!(session.configure().await, Err(ConfigError::DeviceUnavailable));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(backend.stats().attach_calls, 0);
    }

    #[tokio::test]
    async fn test_configure_input_rejected() {
        let (mut session, backend) = session(SimulatedOptions {
            reject_input: true,
            ..SimulatedOptions::default()
        });
        let result = session.configure().await;
        assert!(matches!(result, Err(ConfigError::InputRejected(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(backend.stats().attached_inputs, 0);
    }

    #[tokio::test]
    async fn test_configure_rolls_back_when_mirroring_fails() {
        let (mut session, backend) = session(SimulatedOptions {
            reject_mirroring: true,
            ..SimulatedOptions::default()
        });
        let result = session.configure().await;
        assert!(matches!(result, Err(ConfigError::SessionConfigFailed(_))));
        assert_eq!(session.state(), SessionState::Failed);

        let stats = backend.stats();
        assert_eq!(stats.attach_calls, 1);
        assert_eq!(stats.detach_calls, 1);
        assert_eq!(stats.attached_inputs, 0, "partial attachment must be rolled back");
    }

    #[tokio::test]
    async fn test_reconfigure_replaces_previous_input() {
        let (mut session, backend) = session(SimulatedOptions::default());
        session.configure().await.unwrap();
        session.configure().await.unwrap();
        session.configure().await.unwrap();

        let stats = backend.stats();
        assert_eq!(stats.attach_calls, 3);
        assert_eq!(stats.attached_inputs, 1, "stale inputs must not accumulate");
    }

    #[tokio::test]
    async fn test_configure_while_running_is_refused() {
        let (mut session, _backend) = session(SimulatedOptions::default());
        session.start(&granted_gate()).await.unwrap();
        assert_eq!(
            session.configure().await,
            Err(ConfigError::Busy(SessionState::Running))
        );
        assert_eq!(session.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_start_configures_then_runs() {
        let (mut session, backend) = session(SimulatedOptions::default());
        session.start(&granted_gate()).await.unwrap();

        assert_eq!(session.state(), SessionState::Running);
        assert!(backend.stats().running);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let (mut session, backend) = session(SimulatedOptions::default());
        let gate = granted_gate();
        session.start(&gate).await.unwrap();
        session.start(&gate).await.unwrap();
        assert_eq!(backend.stats().stream_starts, 1);
        assert_eq!(backend.stats().attach_calls, 1);
    }

    #[tokio::test]
    async fn test_start_denied() {
        let (mut session, backend) = session(SimulatedOptions::default());
        let gate = PermissionGate::new(Arc::new(StaticAuthorization::new(
            PermissionState::Denied,
            false,
        )));
        assert_eq!(
            session.start(&gate).await,
            Err(StartError::NoPermission(PermissionState::Denied))
        );
        assert_eq!(session.state(), SessionState::Unconfigured);
        assert_eq!(backend.stats().attach_calls, 0);
    }

    #[tokio::test]
    async fn test_start_stream_failure_marks_failed() {
        let (mut session, _backend) = session(SimulatedOptions {
            fail_start: true,
            ..SimulatedOptions::default()
        });
        let result = session.start(&granted_gate()).await;
        assert!(matches!(result, Err(StartError::StreamFailed(_))));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_restart_after_failure_reconfigures() {
        let (mut session, backend) = session(SimulatedOptions {
            fail_start: true,
            ..SimulatedOptions::default()
        });
        let gate = granted_gate();
        assert!(session.start(&gate).await.is_err());

        backend.update_options(|o| o.fail_start = false);
        session.start(&gate).await.unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(backend.stats().attached_inputs, 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (mut session, backend) = session(SimulatedOptions::default());
        session.stop().await;
        assert_eq!(session.state(), SessionState::Unconfigured);

        session.start(&granted_gate()).await.unwrap();
        session.stop().await;
        session.stop().await;
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(backend.stats().stream_stops, 1);
    }

    #[tokio::test]
    async fn test_restart_from_stopped_keeps_configuration() {
        let (mut session, backend) = session(SimulatedOptions::default());
        let gate = granted_gate();
        session.start(&gate).await.unwrap();
        session.stop().await;
        session.start(&gate).await.unwrap();

        let stats = backend.stats();
        assert_eq!(stats.attach_calls, 1);
        assert_eq!(stats.stream_starts, 2);
        assert_eq!(session.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_dispose_releases_everything_once() {
        let (mut session, backend) = session(SimulatedOptions::default());
        session.start(&granted_gate()).await.unwrap();
        let surface = Arc::new(PreviewSurface::new(crate::preview::Size::new(10, 10)));
        session.attach_output(Arc::downgrade(&surface));

        assert!(session.dispose());
        assert!(!session.dispose());

        let stats = backend.stats();
        assert!(!stats.running);
        assert!(!stats.output_bound);
        assert_eq!(stats.attached_inputs, 0);
        assert_eq!(stats.detach_calls, 1);
        assert_eq!(stats.stream_stops, 1);
        assert!(session.is_disposed());
    }

    #[tokio::test]
    async fn test_dispose_swallows_teardown_errors() {
        let (mut session, backend) = session(SimulatedOptions::default());
        session.start(&granted_gate()).await.unwrap();
        backend.update_options(|o| o.fail_stop = true);

        assert!(session.dispose());
        assert!(!backend.stats().running);
        assert_eq!(backend.stats().attached_inputs, 0);
    }

    #[test]
    fn test_dispose_from_unconfigured() {
        let (mut session, backend) = session(SimulatedOptions::default());
        assert!(session.dispose());
        assert_eq!(backend.stats().detach_calls, 0);
        assert!(matches!(session.begin_configure(), Err(ConfigError::Disposed)));
        assert!(matches!(session.begin_start(), Err(StartError::Disposed)));
        assert!(session.begin_stop().is_none());
    }

    #[test]
    fn test_stale_start_outcome_is_stopped() {
        let (mut session, backend) = session(SimulatedOptions::default());

        let job = session.begin_configure().unwrap();
        if let JobOutcome::Configured { epoch, result } = job.run() {
            session.finish_configure(epoch, result).unwrap();
        }
        let job = match session.begin_start() {
            Ok(StartStep::Activate(job)) => job,
            _ => panic!("expected activation step"),
        };

        let outcome = job.run();
        assert!(backend.stats().running);

        // The session moves on before the activation result is applied.
        let _reconfigure = session.begin_configure().unwrap();
        if let JobOutcome::Started { epoch, result } = outcome {
            assert_eq!(session.finish_start(epoch, result), Err(StartError::Disposed));
        }
        assert_ne!(session.state(), SessionState::Running);
        assert!(backend.stats().running, "stop is deferred to a release job");

        let cleanup = session.take_cleanup();
        assert_eq!(cleanup.len(), 1);
        assert_eq!(cleanup[0].kind(), JobKind::Release);
        for job in cleanup {
            job.run();
        }
        assert!(!backend.stats().running, "stale start must be stopped");
        assert!(session.take_cleanup().is_empty());
    }

    #[test]
    fn test_stale_configure_outcome_is_detached() {
        let (mut session, backend) = session(SimulatedOptions::default());
        let job = session.begin_configure().unwrap();
        session.dispose();

        if let JobOutcome::Configured { epoch, result } = job.run() {
            assert_eq!(
                session.finish_configure(epoch, result),
                Err(ConfigError::Disposed)
            );
        }
        assert_eq!(backend.stats().attached_inputs, 1);

        for job in session.take_cleanup() {
            job.run();
        }
        assert_eq!(backend.stats().attached_inputs, 0);
    }

    #[tokio::test]
    async fn test_begin_dispose_defers_hardware_teardown() {
        let (mut session, backend) = session(SimulatedOptions::default());
        session.start(&granted_gate()).await.unwrap();
        let surface = Arc::new(PreviewSurface::new(crate::preview::Size::new(10, 10)));
        session.attach_output(Arc::downgrade(&surface));

        let job = session.begin_dispose().unwrap();
        assert!(session.is_disposed());
        assert!(session.begin_dispose().is_none());
        let stats = backend.stats();
        assert!(!stats.output_bound);
        assert!(stats.running, "stream halts only when the job runs");
        assert_eq!(stats.attached_inputs, 1);

        match run_blocking(job).await {
            JobOutcome::Released { errors, .. } => {
                assert!(errors.is_empty());
                session.finish_release(&errors);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let stats = backend.stats();
        assert!(!stats.running);
        assert_eq!(stats.attached_inputs, 0);
        assert_eq!(stats.stream_stops, 1);
    }

    #[test]
    fn test_release_attempts_every_step() {
        let backend = SimulatedBackend::new(SimulatedOptions {
            fail_stop: true,
            ..SimulatedOptions::default()
        });
        let errors = release(&backend, true, Some(InputId(99)));
        assert_eq!(errors.len(), 2);
        assert_eq!(backend.stats().detach_calls, 1);
    }

    #[test]
    fn test_abandoned_outcome_fails_configuration() {
        let (mut session, _backend) = session(SimulatedOptions::default());
        let job = session.begin_configure().unwrap();
        let epoch = job.epoch();
        drop(job);

        if let JobOutcome::Configured { epoch, result } =
            JobOutcome::abandoned(JobKind::Configure, epoch, "worker panicked".to_string())
        {
            assert!(session.finish_configure(epoch, result).is_err());
        }
        assert_eq!(session.state(), SessionState::Failed);
    }
}
