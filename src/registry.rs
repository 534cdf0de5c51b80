//! View registry: maps host view ids to their coordinators.
//!
//! The registry is what a host embedding talks to. It creates views with a
//! fresh backend from its factory, routes method calls by id, and tracks the
//! host context (activity/window) that `start` requires.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::camera::{CaptureBackend, DeviceArbiter, SessionSettings};
use crate::channel::{channel_name, Command, ErrorCode, MethodCall, Response};
use crate::coordinator::{spawn_view, CoordinatorHandle, HostContext, ViewContext, ViewId};
use crate::permissions::PermissionGate;
use crate::preview::Size;

/// Errors from registry bookkeeping.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("View {0} already exists")]
    AlreadyExists(ViewId),
}

type BackendFactory<B> = Box<dyn Fn(ViewId) -> B + Send + Sync>;

/// How many disposed ids are remembered. Older ones answer `UNKNOWN_VIEW`.
pub const RETIRED_LIMIT: usize = 256;

#[derive(Default)]
struct Views {
    live: HashMap<ViewId, CoordinatorHandle>,
    retired: VecDeque<ViewId>,
}

impl Views {
    fn is_retired(&self, id: ViewId) -> bool {
        self.retired.contains(&id)
    }

    fn unretire(&mut self, id: ViewId) -> bool {
        let before = self.retired.len();
        self.retired.retain(|retired| *retired != id);
        self.retired.len() != before
    }

    fn retire(&mut self, id: ViewId) {
        self.unretire(id);
        if self.retired.len() == RETIRED_LIMIT {
            self.retired.pop_front();
        }
        self.retired.push_back(id);
    }
}

/// All live views of the process.
pub struct ViewRegistry<B: CaptureBackend> {
    factory: BackendFactory<B>,
    context: ViewContext,
    views: Mutex<Views>,
}

impl<B: CaptureBackend> ViewRegistry<B> {
    /// `factory` builds the capture backend for each new view.
    pub fn new(
        gate: Arc<PermissionGate>,
        settings: SessionSettings,
        bounds: Size,
        factory: impl Fn(ViewId) -> B + Send + Sync + 'static,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            context: ViewContext {
                gate,
                arbiter: DeviceArbiter::new(),
                host: HostContext::new(),
                settings,
                bounds,
            },
            views: Mutex::new(Views::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Views> {
        match self.views.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn attach_host(&self) {
        self.context.host.attach();
        log::debug!("Host context attached");
    }

    pub fn detach_host(&self) {
        self.context.host.detach();
        log::debug!("Host context detached");
    }

    pub fn host(&self) -> &HostContext {
        &self.context.host
    }

    pub fn arbiter(&self) -> &DeviceArbiter {
        &self.context.arbiter
    }

    pub fn gate(&self) -> &Arc<PermissionGate> {
        &self.context.gate
    }

    /// Create the view `id` and start its coordinator.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_view(&self, id: ViewId) -> Result<CoordinatorHandle, RegistryError> {
        let mut views = self.lock();
        if views.live.contains_key(&id) {
            return Err(RegistryError::AlreadyExists(id));
        }
        views.unretire(id);

        let handle = spawn_view(id, (self.factory)(id), self.context.clone());
        views.live.insert(id, handle.clone());
        log::info!("Registered view {} on {}", id, channel_name(id));
        Ok(handle)
    }

    pub fn handle(&self, id: ViewId) -> Option<CoordinatorHandle> {
        self.lock().live.get(&id).cloned()
    }

    /// Ids of live views, in ascending order.
    pub fn view_ids(&self) -> Vec<ViewId> {
        let mut ids: Vec<ViewId> = self.lock().live.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route one method call to view `id` and return its single response.
    pub async fn dispatch(&self, id: ViewId, call: MethodCall) -> Response {
        let handle = {
            let views = self.lock();
            match views.live.get(&id) {
                Some(handle) => handle.clone(),
                None if views.is_retired(id) => {
                    // Disposing again is a no-op, like on a live handle.
                    if call.method == Command::Dispose.method() {
                        return Response::Success;
                    }
                    return Response::Error {
                        code: ErrorCode::InstanceDisposed,
                        message: format!("View {} has been disposed", id),
                    };
                }
                None => {
                    return Response::Error {
                        code: ErrorCode::UnknownView,
                        message: format!("No view registered with id {}", id),
                    }
                }
            }
        };

        let command = match call.parse() {
            Ok(command) => command,
            Err(e) => {
                log::debug!("View {}: {}", id, e);
                return e.into();
            }
        };

        let is_dispose = command == Command::Dispose;
        let response = Response::from(handle.call(command).await);
        if is_dispose {
            self.retire(id);
        }
        response
    }

    fn retire(&self, id: ViewId) {
        let mut views = self.lock();
        if views.live.remove(&id).is_some() {
            views.retire(id);
        }
    }

    /// Drop every record of a disposed view; later calls answer `UNKNOWN_VIEW`.
    ///
    /// Returns false when `id` is live or was never retired.
    pub fn forget_view(&self, id: ViewId) -> bool {
        self.lock().unretire(id)
    }

    /// Number of disposed ids still remembered.
    pub fn retired_len(&self) -> usize {
        self.lock().retired.len()
    }

    /// Dispose view `id` on behalf of the host. Returns false for unknown ids.
    pub async fn dispose_view(&self, id: ViewId) -> bool {
        let handle = match self.handle(id) {
            Some(handle) => handle,
            None => return false,
        };
        if let Err(e) = handle.dispose().await {
            log::warn!("View {}: dispose reported {}", id, e);
        }
        self.retire(id);
        true
    }

    /// Dispose every live view.
    pub async fn dispose_all(&self) {
        for id in self.view_ids() {
            self.dispose_view(id).await;
        }
    }
}
