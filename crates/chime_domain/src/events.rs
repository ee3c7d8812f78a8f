//! Synchronous pub/sub for lifecycle events.
//!
//! Listeners run on the caller's thread, in subscription order, inside the
//! operation that produced the event. A panicking listener is not caught:
//! the panic unwinds out of [`EventDispatcher::fire`] and the listeners
//! subscribed after it do not see that event.

use std::collections::HashMap;
use std::fmt;

use crate::registry::RegistryEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Schedule,
    Update,
    Trigger,
    Click,
    Clear,
    ClearAll,
    Cancel,
    CancelAll,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Schedule,
        EventKind::Update,
        EventKind::Trigger,
        EventKind::Click,
        EventKind::Clear,
        EventKind::ClearAll,
        EventKind::Cancel,
        EventKind::CancelAll,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Schedule => "schedule",
            EventKind::Update => "update",
            EventKind::Trigger => "trigger",
            EventKind::Click => "click",
            EventKind::Clear => "clear",
            EventKind::ClearAll => "clearall",
            EventKind::Cancel => "cancel",
            EventKind::CancelAll => "cancelall",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub kind: EventKind,
    /// Snapshot of the affected entry; `None` for `clearall`/`cancelall`.
    pub entry: Option<RegistryEntry>,
    /// Set on `click` events that came from an action button.
    pub action_id: Option<String>,
}

impl NotificationEvent {
    pub fn new(kind: EventKind, entry: Option<RegistryEntry>) -> Self {
        Self {
            kind,
            entry,
            action_id: None,
        }
    }
}

pub type Listener = Box<dyn FnMut(&NotificationEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct EventDispatcher {
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
    next_id: u64,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(event, listeners)| (event.as_str(), listeners.len()))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("listeners", &counts)
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &mut self,
        event: impl Into<String>,
        listener: impl FnMut(&NotificationEvent) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners
            .entry(event.into())
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    pub fn un(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(listeners) = self.listeners.get_mut(event) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(candidate, _)| *candidate != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            self.listeners.remove(event);
        }
        removed
    }

    /// Calls every listener of `event` in subscription order and returns how
    /// many ran.
    pub fn fire(&mut self, event: &str, payload: &NotificationEvent) -> usize {
        let Some(listeners) = self.listeners.get_mut(event) else {
            return 0;
        };
        for (_, listener) in listeners.iter_mut() {
            listener(payload);
        }
        listeners.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }
}
