//! Camera permission negotiation.
//!
//! [`PermissionGate`] answers "may this process capture video?" once per
//! process. An undetermined answer triggers the platform prompt (on a
//! blocking worker, since it waits on the user); a decided answer is cached
//! and returned without prompting again. A denial is terminal for the
//! lifetime of the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Capture authorization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    #[default]
    Undetermined,
}

impl PermissionState {
    fn is_decided(self) -> bool {
        self != PermissionState::Undetermined
    }
}

/// Platform side of camera authorization.
pub trait AuthorizationSource: Send + Sync + 'static {
    /// Current authorization without prompting.
    fn status(&self) -> PermissionState;

    /// Show the system prompt and block until the user answers.
    fn request_access(&self) -> bool;
}

/// Authorization with a fixed answer, for the simulated platform and tests.
#[derive(Debug)]
pub struct StaticAuthorization {
    status: Mutex<PermissionState>,
    grant_on_prompt: bool,
    prompts: AtomicU64,
}

impl StaticAuthorization {
    pub fn new(status: PermissionState, grant_on_prompt: bool) -> Self {
        Self {
            status: Mutex::new(status),
            grant_on_prompt,
            prompts: AtomicU64::new(0),
        }
    }

    /// How many times the prompt was shown.
    pub fn prompts_shown(&self) -> u64 {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl AuthorizationSource for StaticAuthorization {
    fn status(&self) -> PermissionState {
        match self.status.lock() {
            Ok(status) => *status,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn request_access(&self) -> bool {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let decided = if self.grant_on_prompt {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        match self.status.lock() {
            Ok(mut status) => *status = decided,
            Err(poisoned) => *poisoned.into_inner() = decided,
        }
        self.grant_on_prompt
    }
}

/// Error surfaced to callers when capture is not authorized.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionError {
    pub state: PermissionState,
}

impl std::fmt::Display for PermissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state {
            PermissionState::Denied => write!(
                f,
                "Camera permission denied/restricted.\n\n\
                Grant access in the system privacy settings (Privacy & Security > Camera) \
                and restart the application."
            ),
            PermissionState::Undetermined => write!(f, "Camera permission not granted."),
            PermissionState::Granted => write!(f, "Camera permission granted."),
        }
    }
}

impl std::error::Error for PermissionError {}

/// Process-wide camera authorization with a cached decision.
pub struct PermissionGate {
    source: Arc<dyn AuthorizationSource>,
    decided: Mutex<Option<PermissionState>>,
    prompt_lock: tokio::sync::Mutex<()>,
    prompts: AtomicU64,
}

impl PermissionGate {
    pub fn new(source: Arc<dyn AuthorizationSource>) -> Self {
        Self {
            source,
            decided: Mutex::new(None),
            prompt_lock: tokio::sync::Mutex::new(()),
            prompts: AtomicU64::new(0),
        }
    }

    /// Cached decision, if one has been made.
    pub fn cached(&self) -> Option<PermissionState> {
        match self.decided.lock() {
            Ok(decided) => *decided,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Prompts issued through this gate.
    pub fn prompt_count(&self) -> u64 {
        self.prompts.load(Ordering::SeqCst)
    }

    fn remember(&self, state: PermissionState) {
        if !state.is_decided() {
            return;
        }
        match self.decided.lock() {
            Ok(mut decided) => *decided = Some(state),
            Err(poisoned) => *poisoned.into_inner() = Some(state),
        }
    }

    /// Return the authorization state, prompting the user if it is undetermined.
    ///
    /// Concurrent callers share one prompt. `Undetermined` is only returned if
    /// the prompt itself could not run.
    pub async fn check_or_request(&self) -> PermissionState {
        if let Some(state) = self.cached() {
            return state;
        }

        let _prompt = self.prompt_lock.lock().await;
        if let Some(state) = self.cached() {
            return state;
        }

        let state = match self.source.status() {
            PermissionState::Undetermined => {
                self.prompts.fetch_add(1, Ordering::SeqCst);
                log::info!("Requesting camera permission");
                let source = Arc::clone(&self.source);
                match tokio::task::spawn_blocking(move || source.request_access()).await {
                    Ok(true) => PermissionState::Granted,
                    Ok(false) => PermissionState::Denied,
                    Err(e) => {
                        log::warn!("Camera permission prompt failed: {}", e);
                        PermissionState::Undetermined
                    }
                }
            }
            decided => decided,
        };

        if state == PermissionState::Denied {
            log::warn!("Camera permission denied");
        }
        self.remember(state);
        state
    }
}
