use std::collections::BTreeMap;

use chime_core::{NotificationId, NotificationSpec};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Scheduled,
    Triggered,
    Clicked,
    Cleared,
    /// Only ever seen on the final snapshot handed to `cancel` listeners;
    /// canceled entries leave the registry.
    Canceled,
}

impl LifecycleState {
    /// Live entries block a second `schedule` for the same id.
    pub fn is_live(self) -> bool {
        matches!(self, LifecycleState::Scheduled | LifecycleState::Triggered)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Scheduled,
    Triggered,
    Unknown,
}

impl From<Option<LifecycleState>> for NotificationType {
    fn from(state: Option<LifecycleState>) -> Self {
        match state {
            Some(LifecycleState::Scheduled) => NotificationType::Scheduled,
            Some(LifecycleState::Triggered | LifecycleState::Clicked) => NotificationType::Triggered,
            _ => NotificationType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryEntry {
    pub spec: NotificationSpec,
    pub state: LifecycleState,
    /// Bumped on every schedule/update so late backend callbacks for an
    /// older registration can be told apart.
    pub generation: u64,
}

impl RegistryEntry {
    pub fn id(&self) -> NotificationId {
        self.spec.id
    }
}

/// In-memory id → entry store. Reads hand out clones.
#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<NotificationId, RegistryEntry>,
    next_generation: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from a snapshot without re-resolving anything.
    pub fn from_entries(entries: impl IntoIterator<Item = RegistryEntry>) -> Self {
        let entries: BTreeMap<_, _> = entries
            .into_iter()
            .filter(|entry| entry.state != LifecycleState::Canceled)
            .map(|entry| (entry.id(), entry))
            .collect();
        let next_generation = entries
            .values()
            .map(|entry| entry.generation + 1)
            .max()
            .unwrap_or(0);
        Self {
            entries,
            next_generation,
        }
    }

    fn bump(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    pub fn ensure_available(&self, id: NotificationId) -> Result<(), SchedulerError> {
        if self.is_live(id) {
            return Err(SchedulerError::DuplicateId(id));
        }
        Ok(())
    }

    /// Adds a new entry. A cleared or clicked entry under the same id is
    /// replaced and handed back so its registration can be torn down.
    pub fn insert(
        &mut self,
        spec: NotificationSpec,
    ) -> Result<(RegistryEntry, Option<RegistryEntry>), SchedulerError> {
        self.ensure_available(spec.id)?;
        Ok(self.replace(spec))
    }

    /// Swaps in `spec` wholesale under a fresh generation. Returns the new
    /// entry and whatever it replaced.
    pub fn replace(&mut self, spec: NotificationSpec) -> (RegistryEntry, Option<RegistryEntry>) {
        let entry = RegistryEntry {
            spec,
            state: LifecycleState::Scheduled,
            generation: self.bump(),
        };
        let previous = self.entries.insert(entry.id(), entry.clone());
        (entry, previous)
    }

    pub fn remove(&mut self, id: NotificationId) -> Option<RegistryEntry> {
        let mut entry = self.entries.remove(&id)?;
        entry.state = LifecycleState::Canceled;
        Some(entry)
    }

    pub fn remove_all(&mut self) -> Vec<RegistryEntry> {
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|mut entry| {
                entry.state = LifecycleState::Canceled;
                entry
            })
            .collect()
    }

    /// Dismisses a visible notification. Entries that have not fired yet
    /// are left alone.
    pub fn mark_cleared(&mut self, id: NotificationId) -> Option<RegistryEntry> {
        let entry = self.entries.get_mut(&id)?;
        if !matches!(entry.state, LifecycleState::Triggered | LifecycleState::Clicked) {
            return None;
        }
        entry.state = LifecycleState::Cleared;
        Some(entry.clone())
    }

    /// A one-shot entry fires once; only triggers that fire again may move
    /// back to `Triggered` after a click or clear.
    pub fn mark_triggered(&mut self, id: NotificationId, generation: u64) -> Option<RegistryEntry> {
        self.transition(id, generation, LifecycleState::Triggered, |entry| {
            entry.state == LifecycleState::Scheduled || entry.spec.trigger.fires_again()
        })
    }

    /// Clicks are only accepted for a notification that is showing.
    pub fn mark_clicked(&mut self, id: NotificationId, generation: u64) -> Option<RegistryEntry> {
        self.transition(id, generation, LifecycleState::Clicked, |entry| {
            matches!(entry.state, LifecycleState::Triggered | LifecycleState::Clicked)
        })
    }

    fn transition(
        &mut self,
        id: NotificationId,
        generation: u64,
        state: LifecycleState,
        allowed: impl Fn(&RegistryEntry) -> bool,
    ) -> Option<RegistryEntry> {
        let entry = self
            .entries
            .get_mut(&id)
            .filter(|entry| entry.generation == generation && allowed(entry))?;
        entry.state = state;
        Some(entry.clone())
    }

    pub fn get(&self, id: NotificationId) -> Option<RegistryEntry> {
        self.entries.get(&id).cloned()
    }

    pub fn get_many(&self, ids: &[NotificationId]) -> Vec<RegistryEntry> {
        ids.iter().filter_map(|id| self.get(*id)).collect()
    }

    pub fn all(&self) -> Vec<RegistryEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn state(&self, id: NotificationId) -> Option<LifecycleState> {
        self.entries.get(&id).map(|entry| entry.state)
    }

    pub fn contains(&self, id: NotificationId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn is_live(&self, id: NotificationId) -> bool {
        self.state(id).is_some_and(LifecycleState::is_live)
    }

    pub fn ids(&self) -> Vec<NotificationId> {
        self.entries.keys().copied().collect()
    }

    pub fn ids_in(&self, state: LifecycleState) -> Vec<NotificationId> {
        self.entries
            .values()
            .filter(|entry| entry.state == state)
            .map(RegistryEntry::id)
            .collect()
    }

    pub fn entries_in(&self, state: LifecycleState) -> Vec<RegistryEntry> {
        self.entries
            .values()
            .filter(|entry| entry.state == state)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
