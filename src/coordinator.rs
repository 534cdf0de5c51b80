//! Per-view lifecycle coordinator.
//!
//! Each view runs as one tokio task that owns its capture session, overlay
//! and preview surface. Commands arrive over an mpsc channel and are answered
//! through a oneshot. Anything that may block (the permission prompt,
//! hardware configuration, stream start/stop) runs on a worker and reports
//! back as a completion event into the same task, so the owner never blocks
//! and never races with itself.
//!
//! ```text
//!   CoordinatorHandle ──Request──▶ ┌────────────┐ ──SessionJob──▶ blocking pool
//!                                  │ ViewActor  │
//!                     ◀──reply──── └────────────┘ ◀──Event─────── (completion)
//! ```
//!
//! Lifecycle: `Created ─start─▶ Starting ─▶ Running ─stop─▶ Stopped ─start─▶ Starting`,
//! `Starting ─▶ Failed`, and any state `─dispose─▶ Disposed`.
//!
//! Only one start/stop is in flight at a time; session commands that arrive
//! meanwhile are queued and applied in order once it resolves. Overlay
//! commands apply immediately. A dispose that arrives while hardware work is
//! in flight waits for that work to resolve, applies its outcome and then
//! tears everything down, so the camera is never left running. The camera
//! teardown itself is a job like any other; the view reports `Disposed` and
//! gives up its device claim once that job completes.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::camera::{
    run_blocking, CaptureBackend, CaptureSession, DeviceArbiter, JobKind, JobOutcome, LensFacing,
    SessionJob, SessionSettings, SessionState, StartError, StartStep,
};
use crate::channel::{Command, CommandError, ErrorCode};
use crate::overlay::OverlayCompositor;
use crate::permissions::{PermissionGate, PermissionState};
use crate::preview::{PreviewSurface, PreviewSurfaceBinder, Size};

const REQUEST_QUEUE_DEPTH: usize = 64;

/// Ticket for release jobs nobody waits on. Real tickets start at 1.
const CLEANUP_TICKET: u64 = 0;

/// Host-assigned view identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewId(pub u64);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether the host (activity/window) is currently attached.
///
/// Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    attached: Arc<AtomicBool>,
}

impl HostContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

/// Process-wide pieces every view shares.
#[derive(Clone)]
pub struct ViewContext {
    pub gate: Arc<PermissionGate>,
    pub arbiter: DeviceArbiter,
    pub host: HostContext,
    pub settings: SessionSettings,
    pub bounds: Size,
}

/// View lifecycle as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Created,
    Starting,
    Running,
    Stopped,
    Failed,
    Disposed,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Created => "created",
            Lifecycle::Starting => "starting",
            Lifecycle::Running => "running",
            Lifecycle::Stopped => "stopped",
            Lifecycle::Failed => "failed",
            Lifecycle::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Snapshot of a view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewStatus {
    pub id: ViewId,
    pub lifecycle: Lifecycle,
    pub session: SessionState,
    pub overlay_visible: bool,
    pub surface_bound: bool,
    pub device: Option<String>,
    pub queued_commands: usize,
}

type Reply<T> = oneshot::Sender<T>;

enum Request {
    Command {
        command: Command,
        reply: Reply<Result<(), CommandError>>,
    },
    Status {
        reply: Reply<ViewStatus>,
    },
    Resize {
        bounds: Size,
        reply: Reply<Result<(), CommandError>>,
    },
    Snapshot {
        reply: Reply<Option<RgbaImage>>,
    },
}

enum Event {
    Permission { ticket: u64, state: PermissionState },
    Job { ticket: u64, outcome: JobOutcome },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionOp {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Permission,
    Job(JobKind),
}

struct InFlight {
    op: SessionOp,
    phase: Phase,
    ticket: u64,
    reply: Reply<Result<(), CommandError>>,
}

struct Queued {
    op: SessionOp,
    reply: Reply<Result<(), CommandError>>,
}

struct ViewActor<B: CaptureBackend> {
    id: ViewId,
    context: ViewContext,
    lifecycle: Lifecycle,
    session: CaptureSession<B>,
    binder: PreviewSurfaceBinder,
    surface: Option<Arc<PreviewSurface>>,
    overlay: OverlayCompositor,
    in_flight: Option<InFlight>,
    queued: VecDeque<Queued>,
    dispose_waiters: Vec<Reply<Result<(), CommandError>>>,
    disposing: bool,
    teardown: Option<u64>,
    released: bool,
    cleanup_jobs: usize,
    claimed: bool,
    next_ticket: u64,
    events: mpsc::UnboundedSender<Event>,
}

impl<B: CaptureBackend> ViewActor<B> {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        let mut requests_open = true;
        loop {
            tokio::select! {
                Some(event) = events.recv() => self.handle_event(event),
                request = requests.recv(), if requests_open => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        requests_open = false;
                        if self.lifecycle != Lifecycle::Disposed {
                            log::debug!("View {}: all handles dropped, disposing", self.id);
                            self.begin_dispose(None);
                        }
                    }
                },
            }

            if !requests_open && self.lifecycle == Lifecycle::Disposed {
                break;
            }
        }
        log::debug!("View {}: coordinator exited", self.id);
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Command { command, reply } => self.handle_command(command, reply),
            Request::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Request::Resize { bounds, reply } => {
                let _ = reply.send(self.resize(bounds));
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_command(&mut self, command: Command, reply: Reply<Result<(), CommandError>>) {
        if self.lifecycle == Lifecycle::Disposed {
            let _ = reply.send(match command {
                Command::Dispose => Ok(()),
                _ => Err(CommandError::disposed()),
            });
            return;
        }
        if self.disposing {
            match command {
                Command::Dispose => self.dispose_waiters.push(reply),
                _ => {
                    let _ = reply.send(Err(CommandError::disposed()));
                }
            }
            return;
        }

        log::debug!("View {}: {}", self.id, command.method());
        match command {
            Command::SetEffect(_) => {
                let _ = reply.send(Ok(()));
            }
            Command::SetEffectBytes(bytes) => {
                let result = self.overlay.set_overlay(&bytes).map_err(CommandError::from);
                let _ = reply.send(result);
            }
            Command::ClearEffect => {
                self.overlay.clear_overlay();
                let _ = reply.send(Ok(()));
            }
            Command::Dispose => self.begin_dispose(Some(reply)),
            Command::Start => self.submit(SessionOp::Start, reply),
            Command::Stop => self.submit(SessionOp::Stop, reply),
        }
    }

    fn submit(&mut self, op: SessionOp, reply: Reply<Result<(), CommandError>>) {
        if self.in_flight.is_some() || !self.queued.is_empty() {
            self.queued.push_back(Queued { op, reply });
        } else {
            self.execute(op, reply);
        }
    }

    fn execute(&mut self, op: SessionOp, reply: Reply<Result<(), CommandError>>) {
        match op {
            SessionOp::Start => self.execute_start(reply),
            SessionOp::Stop => self.execute_stop(reply),
        }
    }

    fn drain_queue(&mut self) {
        while self.in_flight.is_none() {
            match self.queued.pop_front() {
                Some(Queued { op, reply }) => self.execute(op, reply),
                None => break,
            }
        }
    }

    // ───────────────────────── start ─────────────────────────

    fn execute_start(&mut self, reply: Reply<Result<(), CommandError>>) {
        if !self.context.host.is_attached() {
            let _ = reply.send(Err(CommandError::no_context()));
            return;
        }
        if self.session.state() == SessionState::Running {
            let _ = reply.send(Ok(()));
            return;
        }

        if let Err(holder) = self.context.arbiter.claim(LensFacing::Front, self.id) {
            log::warn!(
                "View {}: front camera is held by view {}",
                self.id,
                holder
            );
            self.lifecycle = Lifecycle::Failed;
            let _ = reply.send(Err(CommandError::new(
                ErrorCode::DeviceUnavailable,
                format!("Front camera is in use by view {}", holder),
            )));
            return;
        }
        self.claimed = true;
        self.lifecycle = Lifecycle::Starting;

        let ticket = self.issue_ticket();
        self.in_flight = Some(InFlight {
            op: SessionOp::Start,
            phase: Phase::Permission,
            ticket,
            reply,
        });

        let gate = Arc::clone(&self.context.gate);
        let events = self.events.clone();
        tokio::spawn(async move {
            let state = gate.check_or_request().await;
            let _ = events.send(Event::Permission { ticket, state });
        });
    }

    /// Move an in-flight start to its next backend step.
    fn advance_start(&mut self) {
        match self.session.begin_start() {
            Ok(StartStep::AlreadyRunning) => self.complete_start(),
            Ok(StartStep::Configure(job)) | Ok(StartStep::Activate(job)) => self.spawn_job(job),
            Err(e) => self.fail_start(e.into()),
        }
    }

    fn complete_start(&mut self) {
        self.lifecycle = Lifecycle::Running;
        log::info!("View {}: preview running", self.id);
        self.reply_in_flight(Ok(()));
    }

    fn fail_start(&mut self, error: CommandError) {
        log::warn!("View {}: start failed: {}", self.id, error);
        self.release_claim();
        self.lifecycle = Lifecycle::Failed;
        self.reply_in_flight(Err(error));
    }

    // ───────────────────────── stop ─────────────────────────

    fn execute_stop(&mut self, reply: Reply<Result<(), CommandError>>) {
        match self.session.begin_stop() {
            Some(job) => {
                let ticket = self.issue_ticket();
                self.in_flight = Some(InFlight {
                    op: SessionOp::Stop,
                    phase: Phase::Job(job.kind()),
                    ticket,
                    reply,
                });
                self.dispatch_job(ticket, job);
            }
            None => {
                // Nothing running: stop is a no-op whatever the lifecycle.
                let _ = reply.send(Ok(()));
            }
        }
    }

    // ───────────────────────── completion events ─────────────────────────

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Permission { ticket, state } => self.on_permission(ticket, state),
            Event::Job { ticket, outcome } => self.on_job(ticket, outcome),
        }

        for job in self.session.take_cleanup() {
            self.cleanup_jobs += 1;
            self.dispatch_job(CLEANUP_TICKET, job);
        }

        if self.in_flight.is_none() {
            if self.disposing {
                self.start_teardown();
            } else {
                self.drain_queue();
            }
        }
    }

    fn on_permission(&mut self, ticket: u64, state: PermissionState) {
        let current = matches!(
            &self.in_flight,
            Some(f) if f.ticket == ticket && f.phase == Phase::Permission
        );
        if !current {
            log::debug!("View {}: ignoring stale permission answer", self.id);
            return;
        }

        match state {
            PermissionState::Granted => self.advance_start(),
            other => self.fail_start(StartError::NoPermission(other).into()),
        }
    }

    fn on_job(&mut self, ticket: u64, outcome: JobOutcome) {
        if let JobOutcome::Released { errors, .. } = &outcome {
            self.session.finish_release(errors);
            if ticket == CLEANUP_TICKET {
                self.cleanup_jobs = self.cleanup_jobs.saturating_sub(1);
            } else if self.teardown == Some(ticket) {
                self.teardown = None;
                self.released = true;
            }
            return self.complete_dispose();
        }

        let current = matches!(&self.in_flight, Some(f) if f.ticket == ticket);

        // The session applies every outcome, current or not, so stale
        // hardware work is always undone.
        match outcome {
            JobOutcome::Configured { epoch, result } => {
                let result = self.session.finish_configure(epoch, result);
                if !current {
                    return;
                }
                if self.disposing {
                    return self.abandon_in_flight();
                }
                match result {
                    Ok(()) => self.advance_start(),
                    Err(e) => self.fail_start(e.into()),
                }
            }
            JobOutcome::Started { epoch, result } => {
                let result = self.session.finish_start(epoch, result);
                if !current {
                    return;
                }
                if self.disposing {
                    return self.abandon_in_flight();
                }
                match result {
                    Ok(()) => self.complete_start(),
                    Err(e) => self.fail_start(e.into()),
                }
            }
            JobOutcome::Stopped { epoch, result } => {
                self.session.finish_stop(epoch, result);
                if !current {
                    return;
                }
                self.release_claim();
                if !self.disposing {
                    self.lifecycle = Lifecycle::Stopped;
                    log::info!("View {}: preview stopped", self.id);
                }
                self.reply_in_flight(Ok(()));
            }
            JobOutcome::Released { .. } => {}
        }
    }

    // ───────────────────────── dispose ─────────────────────────

    fn begin_dispose(&mut self, reply: Option<Reply<Result<(), CommandError>>>) {
        for Queued { op, reply } in self.queued.drain(..) {
            let _ = reply.send(match op {
                SessionOp::Start => Err(CommandError::disposed()),
                SessionOp::Stop => Ok(()),
            });
        }

        let waiting_on_hardware = matches!(
            &self.in_flight,
            Some(f) if matches!(f.phase, Phase::Job(_))
        );
        if waiting_on_hardware {
            log::debug!(
                "View {}: dispose deferred until in-flight camera work resolves",
                self.id
            );
            self.disposing = true;
            if let Some(reply) = reply {
                self.dispose_waiters.push(reply);
            }
            return;
        }

        // A pending permission prompt is simply abandoned; its answer is
        // ignored when it arrives.
        self.abandon_in_flight();
        if let Some(reply) = reply {
            self.dispose_waiters.push(reply);
        }
        self.start_teardown();
    }

    /// Answer the in-flight command as superseded by dispose.
    fn abandon_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            let _ = in_flight.reply.send(match in_flight.op {
                SessionOp::Start => Err(CommandError::disposed()),
                SessionOp::Stop => Ok(()),
            });
        }
    }

    /// Release view-owned state now and send the camera teardown to a worker.
    fn start_teardown(&mut self) {
        if self.lifecycle == Lifecycle::Disposed || self.teardown.is_some() || self.released {
            return;
        }
        self.disposing = true;
        self.binder.unbind(&mut self.session);
        self.overlay.clear_overlay();
        self.surface = None;

        match self.session.begin_dispose() {
            Some(job) => {
                let ticket = self.issue_ticket();
                self.teardown = Some(ticket);
                self.dispatch_job(ticket, job);
            }
            None => {
                self.released = true;
                self.complete_dispose();
            }
        }
    }

    /// Finish dispose once the session and every stale leftover are released;
    /// only then can the device go to another view.
    fn complete_dispose(&mut self) {
        if !self.released || self.cleanup_jobs > 0 || self.lifecycle == Lifecycle::Disposed {
            return;
        }
        self.release_claim();
        self.disposing = false;
        self.lifecycle = Lifecycle::Disposed;
        log::info!("View {}: disposed", self.id);

        for waiter in self.dispose_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    // ───────────────────────── helpers ─────────────────────────

    fn issue_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn spawn_job(&mut self, job: SessionJob<B>) {
        let kind = job.kind();
        let ticket = match self.in_flight.as_mut() {
            Some(in_flight) => {
                in_flight.phase = Phase::Job(kind);
                in_flight.ticket
            }
            None => return,
        };
        self.dispatch_job(ticket, job);
    }

    fn dispatch_job(&self, ticket: u64, job: SessionJob<B>) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = run_blocking(job).await;
            let _ = events.send(Event::Job { ticket, outcome });
        });
    }

    fn reply_in_flight(&mut self, result: Result<(), CommandError>) {
        if let Some(in_flight) = self.in_flight.take() {
            let _ = in_flight.reply.send(result);
        }
    }

    fn release_claim(&mut self) {
        if self.claimed {
            self.context.arbiter.release(LensFacing::Front, self.id);
            self.claimed = false;
        }
    }

    fn status(&self) -> ViewStatus {
        ViewStatus {
            id: self.id,
            lifecycle: self.lifecycle,
            session: self.session.state(),
            overlay_visible: self.overlay.is_visible(),
            surface_bound: self.binder.is_bound(),
            device: self.session.device().map(|d| d.name.clone()),
            queued_commands: self.queued.len(),
        }
    }

    fn resize(&mut self, bounds: Size) -> Result<(), CommandError> {
        if self.lifecycle == Lifecycle::Disposed || self.disposing {
            return Err(CommandError::disposed());
        }
        if !self.binder.resize(bounds) {
            if let Some(surface) = &self.surface {
                self.binder.bind(&mut self.session, surface, bounds);
            }
        }
        Ok(())
    }

    /// Latest preview frame with the overlay composited on top.
    fn snapshot(&self) -> Option<RgbaImage> {
        let surface = self.surface.as_ref()?;
        let bounds = surface.bounds();
        let mut canvas = surface.latest_frame().unwrap_or_else(|| {
            RgbaImage::from_pixel(bounds.width, bounds.height, Rgba([0, 0, 0, 255]))
        });
        self.overlay.compose_onto(&mut canvas);
        Some(canvas)
    }
}

impl<B: CaptureBackend> Drop for ViewActor<B> {
    fn drop(&mut self) {
        // Runtime shutdown can drop the task mid-flight.
        if self.lifecycle != Lifecycle::Disposed {
            self.binder.unbind(&mut self.session);
            self.session.dispose();
            self.release_claim();
        }
    }
}

/// Sending side of a view coordinator. Cheap to clone.
///
/// The view disposes itself once every handle is dropped.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    id: ViewId,
    requests: mpsc::Sender<Request>,
    surface: Weak<PreviewSurface>,
}

impl CoordinatorHandle {
    pub fn id(&self) -> ViewId {
        self.id
    }

    /// Send a command and wait for its reply.
    pub async fn call(&self, command: Command) -> Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Command { command, reply })
            .await
            .map_err(|_| CommandError::disposed())?;
        rx.await.unwrap_or_else(|_| Err(CommandError::disposed()))
    }

    pub async fn start(&self) -> Result<(), CommandError> {
        self.call(Command::Start).await
    }

    pub async fn stop(&self) -> Result<(), CommandError> {
        self.call(Command::Stop).await
    }

    pub async fn set_overlay(&self, bytes: Vec<u8>) -> Result<(), CommandError> {
        self.call(Command::SetEffectBytes(bytes)).await
    }

    pub async fn clear_overlay(&self) -> Result<(), CommandError> {
        self.call(Command::ClearEffect).await
    }

    pub async fn dispose(&self) -> Result<(), CommandError> {
        self.call(Command::Dispose).await
    }

    pub async fn status(&self) -> Result<ViewStatus, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Status { reply })
            .await
            .map_err(|_| CommandError::disposed())?;
        rx.await.map_err(|_| CommandError::disposed())
    }

    /// Re-lay the preview at new container bounds. The session is untouched.
    pub async fn resize(&self, bounds: Size) -> Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Resize { bounds, reply })
            .await
            .map_err(|_| CommandError::disposed())?;
        rx.await.unwrap_or_else(|_| Err(CommandError::disposed()))
    }

    /// Composited frame (preview plus overlay). `None` once disposed.
    pub async fn snapshot(&self) -> Option<RgbaImage> {
        let (reply, rx) = oneshot::channel();
        self.requests.send(Request::Snapshot { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// The view's preview surface, while the view is alive.
    pub fn surface(&self) -> Option<Arc<PreviewSurface>> {
        self.surface.upgrade()
    }
}

/// Create a view and start its coordinator task.
///
/// Must be called from within a tokio runtime.
pub fn spawn_view<B: CaptureBackend>(
    id: ViewId,
    backend: B,
    context: ViewContext,
) -> CoordinatorHandle {
    let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let surface = Arc::new(PreviewSurface::new(context.bounds));
    let mut session = CaptureSession::new(Arc::new(backend), context.settings);
    let mut binder = PreviewSurfaceBinder::new();
    binder.bind(&mut session, &surface, context.bounds);

    let handle = CoordinatorHandle {
        id,
        requests: request_tx,
        surface: Arc::downgrade(&surface),
    };

    let actor = ViewActor {
        id,
        context,
        lifecycle: Lifecycle::Created,
        session,
        binder,
        surface: Some(surface),
        overlay: OverlayCompositor::new(),
        in_flight: None,
        queued: VecDeque::new(),
        dispose_waiters: Vec::new(),
        disposing: false,
        teardown: None,
        released: false,
        cleanup_jobs: 0,
        claimed: false,
        next_ticket: 0,
        events: event_tx,
    };
    log::debug!("View {}: created", id);
    tokio::spawn(actor.run(request_rx, event_rx));

    handle
}
