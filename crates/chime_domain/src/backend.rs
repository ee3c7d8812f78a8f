use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chime_core::{NotificationId, NotificationSpec, Trigger};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::registry::RegistryEntry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("backend rejected notification {id}: {reason}")]
    Rejected { id: NotificationId, reason: String },
}

/// What the backend needs to arm one notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub id: NotificationId,
    pub generation: u64,
    pub payload: NotificationSpec,
}

impl Registration {
    pub fn from_entry(entry: &RegistryEntry) -> Self {
        Self {
            id: entry.id(),
            generation: entry.generation,
            payload: entry.spec.clone(),
        }
    }

    pub fn trigger(&self) -> &Trigger {
        &self.payload.trigger
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendEventKind {
    Triggered,
    Clicked {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_id: Option<String>,
    },
}

/// Callback from the backend. `generation` echoes the registration that
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendEvent {
    pub id: NotificationId,
    pub generation: u64,
    #[serde(flatten)]
    pub kind: BackendEventKind,
}

impl BackendEvent {
    pub fn triggered(id: NotificationId, generation: u64) -> Self {
        Self {
            id,
            generation,
            kind: BackendEventKind::Triggered,
        }
    }

    pub fn clicked(id: NotificationId, generation: u64, action_id: Option<&str>) -> Self {
        Self {
            id,
            generation,
            kind: BackendEventKind::Clicked {
                action_id: action_id.map(str::to_string),
            },
        }
    }
}

/// OS specific delivery: arms timers or geofences and shows the notification.
/// Calls are fire-and-forget from the scheduler's point of view; results of
/// delivery come back as [`BackendEvent`]s through a [`BackendInbox`].
pub trait DeliveryBackend: Send + Sync {
    fn register_trigger(&self, registration: &Registration) -> Result<(), BackendError>;
    fn deregister(&self, id: NotificationId);
    /// Removes a shown notification without touching future occurrences.
    fn dismiss(&self, _id: NotificationId) {}
    fn has_permission(&self) -> bool;
    fn request_permission(&self) -> bool;
}

/// Thread-safe queue that serializes backend callbacks onto the scheduler's
/// thread. Backends push from wherever their callbacks arrive; the scheduler
/// drains it with `pump`.
#[derive(Debug, Clone, Default)]
pub struct BackendInbox {
    queue: Arc<Mutex<VecDeque<BackendEvent>>>,
}

impl BackendInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: BackendEvent) {
        self.queue.lock().push_back(event);
    }

    pub fn drain(&self) -> Vec<BackendEvent> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// Backend that only logs. Used when no platform backend is configured.
#[derive(Debug, Default)]
pub struct LoggingBackend;

impl DeliveryBackend for LoggingBackend {
    fn register_trigger(&self, registration: &Registration) -> Result<(), BackendError> {
        let trigger = registration.trigger();
        tracing::info!(
            id = registration.id,
            generation = registration.generation,
            occurrences = trigger.occurrences().len(),
            first_fire_at = ?trigger.first_fire_at(),
            "registering notification"
        );
        Ok(())
    }

    fn deregister(&self, id: NotificationId) {
        tracing::info!(id, "deregistering notification");
    }

    fn dismiss(&self, id: NotificationId) {
        tracing::info!(id, "dismissing notification");
    }

    fn has_permission(&self) -> bool {
        true
    }

    fn request_permission(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Register(Registration),
    Deregister(NotificationId),
    Dismiss(NotificationId),
}

#[derive(Debug)]
struct RecordingState {
    calls: Vec<BackendCall>,
    permission: bool,
    grant_on_request: bool,
    failing: HashSet<NotificationId>,
}

/// In-memory backend that records every call. Handy for tests and dry runs.
#[derive(Debug)]
pub struct RecordingBackend {
    state: Mutex<RecordingState>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RecordingState {
                calls: Vec::new(),
                permission: true,
                grant_on_request: true,
                failing: HashSet::new(),
            }),
        }
    }

    /// Starts without permission; `request_permission` grants it when
    /// `grant_on_request` is set.
    pub fn without_permission(grant_on_request: bool) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.lock();
            state.permission = false;
            state.grant_on_request = grant_on_request;
        }
        backend
    }

    /// Makes every future registration of `id` fail.
    pub fn fail_for(&self, id: NotificationId) {
        self.state.lock().failing.insert(id);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Register(registration) => Some(registration.clone()),
                _ => None,
            })
            .collect()
    }

    /// Generation of the most recent registration for `id`.
    pub fn current_generation(&self, id: NotificationId) -> Option<u64> {
        self.registrations()
            .iter()
            .rev()
            .find(|registration| registration.id == id)
            .map(|registration| registration.generation)
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }
}

impl DeliveryBackend for RecordingBackend {
    fn register_trigger(&self, registration: &Registration) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Register(registration.clone()));
        if !state.permission {
            return Err(BackendError::PermissionDenied);
        }
        if state.failing.contains(&registration.id) {
            return Err(BackendError::Rejected {
                id: registration.id,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn deregister(&self, id: NotificationId) {
        self.state.lock().calls.push(BackendCall::Deregister(id));
    }

    fn dismiss(&self, id: NotificationId) {
        self.state.lock().calls.push(BackendCall::Dismiss(id));
    }

    fn has_permission(&self) -> bool {
        self.state.lock().permission
    }

    fn request_permission(&self) -> bool {
        let mut state = self.state.lock();
        if state.grant_on_request {
            state.permission = true;
        }
        state.permission
    }
}
