use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chime_core::action::resolve_actions;
use chime_core::coerce::date_to_epoch_seconds;
use chime_core::{
    defaults_for, Action, ActionPolicy, Defaults, Diagnostics, Normalized, Normalizer,
    NotificationId, NotificationSpec, ResolveContext,
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    BackendError, BackendEvent, BackendEventKind, BackendInbox, DeliveryBackend, LoggingBackend,
    Registration,
};
use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::events::{EventDispatcher, EventKind, ListenerId, NotificationEvent};
use crate::registry::{LifecycleState, NotificationType, Registry, RegistryEntry};

/// Outcome of a `schedule`/`update` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleReport {
    pub ids: Vec<NotificationId>,
    pub diagnostics: Diagnostics,
    /// Registrations the backend refused. The entries stay `Scheduled` so the
    /// caller can retry with `update`.
    pub backend_errors: Vec<(NotificationId, BackendError)>,
}

impl ScheduleReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty() && self.backend_errors.is_empty()
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    defaults: Defaults,
    action_policy: ActionPolicy,
    action_groups: HashMap<String, Vec<Action>>,
    registry: Registry,
    dispatcher: EventDispatcher,
    backend: Arc<dyn DeliveryBackend>,
    clock: Arc<dyn Clock>,
    inbox: BackendInbox,
    permission: bool,
}

pub struct SchedulerBuilder {
    config: SchedulerConfig,
    backend: Option<Arc<dyn DeliveryBackend>>,
    clock: Option<Arc<dyn Clock>>,
    inbox: Option<BackendInbox>,
    entries: Vec<RegistryEntry>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            backend: None,
            clock: None,
            inbox: None,
            entries: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn DeliveryBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Shares an inbox the backend already pushes into.
    pub fn with_inbox(mut self, inbox: BackendInbox) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Seeds the registry from a previous [`Scheduler::snapshot`].
    pub fn restore(mut self, entries: Vec<RegistryEntry>) -> Self {
        self.entries = entries;
        self
    }

    pub fn build(self) -> Scheduler {
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(LoggingBackend) as Arc<dyn DeliveryBackend>);
        let permission = backend.has_permission();
        info!(platform = %self.config.platform, permission, "scheduler ready");
        Scheduler {
            defaults: defaults_for(self.config.platform),
            action_policy: self.config.action_policy(),
            action_groups: HashMap::new(),
            registry: Registry::from_entries(self.entries),
            dispatcher: EventDispatcher::new(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            inbox: self.inbox.unwrap_or_default(),
            config: self.config,
            backend,
            permission,
        }
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts either one request object or a list of them.
fn requests(input: &Value) -> &[Value] {
    match input {
        Value::Array(items) => items.as_slice(),
        single => std::slice::from_ref(single),
    }
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn inbox(&self) -> BackendInbox {
        self.inbox.clone()
    }

    /// Resolves one raw request against the current defaults and clock
    /// without touching the registry.
    pub fn normalize(&self, raw: &Value) -> Normalized {
        let context = ResolveContext {
            now: date_to_epoch_seconds(self.clock.now()),
            default_repeat_count: self.config.default_repeat_count,
        };
        let mut normalized =
            Normalizer::new(&self.defaults, &self.action_policy, context).normalize(raw);
        let spec = &mut normalized.spec;
        if spec.actions.is_empty() {
            if let Some(actions) = self.action_groups.get(&spec.action_group_id) {
                spec.actions = actions.clone();
            }
        }
        normalized
    }

    fn normalize_all(&self, input: &Value) -> (Vec<NotificationSpec>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let specs = requests(input)
            .iter()
            .map(|raw| {
                let normalized = self.normalize(raw);
                diagnostics.extend(normalized.diagnostics);
                normalized.spec
            })
            .collect();
        (specs, diagnostics)
    }

    /// Schedules one or more raw requests. The whole batch is rejected, and
    /// nothing inserted, when any id is still live or repeats in the batch.
    #[instrument(skip(self, input))]
    pub fn schedule(&mut self, input: &Value) -> Result<ScheduleReport, SchedulerError> {
        let (specs, diagnostics) = self.normalize_all(input);
        let mut report = self.schedule_specs(specs)?;
        report.diagnostics = diagnostics;
        Ok(report)
    }

    pub fn schedule_specs(
        &mut self,
        specs: Vec<NotificationSpec>,
    ) -> Result<ScheduleReport, SchedulerError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            self.registry.ensure_available(spec.id)?;
            if !seen.insert(spec.id) {
                return Err(SchedulerError::DuplicateId(spec.id));
            }
        }

        let mut report = ScheduleReport::default();
        for spec in specs {
            let (entry, previous) = self.registry.insert(spec)?;
            if let Some(previous) = previous {
                debug!(
                    id = previous.id(),
                    state = ?previous.state,
                    "replacing dismissed notification"
                );
                self.backend.deregister(previous.id());
            }
            info!(id = entry.id(), generation = entry.generation, "scheduled notification");
            self.register(&entry, &mut report);
            report.ids.push(entry.id());
            self.emit(EventKind::Schedule, Some(entry));
        }
        Ok(report)
    }

    /// Replaces existing notifications wholesale; unknown ids are scheduled.
    #[instrument(skip(self, input))]
    pub fn update(&mut self, input: &Value) -> ScheduleReport {
        let (specs, diagnostics) = self.normalize_all(input);
        let mut report = self.update_specs(specs);
        report.diagnostics = diagnostics;
        report
    }

    pub fn update_specs(&mut self, specs: Vec<NotificationSpec>) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        for spec in specs {
            let id = spec.id;
            let existed = self.registry.contains(id);
            if existed {
                self.backend.deregister(id);
            }
            let (entry, _) = self.registry.replace(spec);
            info!(id, generation = entry.generation, existed, "updated notification");
            self.register(&entry, &mut report);
            report.ids.push(id);
            let kind = if existed {
                EventKind::Update
            } else {
                EventKind::Schedule
            };
            self.emit(kind, Some(entry));
        }
        report
    }

    /// Removes the given notifications. Unknown ids are ignored. Returns the
    /// ids that were actually canceled.
    pub fn cancel(&mut self, ids: &[NotificationId]) -> Vec<NotificationId> {
        let mut canceled = Vec::new();
        for &id in ids {
            let Some(entry) = self.registry.remove(id) else {
                debug!(id, "cancel for unknown notification ignored");
                continue;
            };
            self.backend.deregister(id);
            canceled.push(id);
            self.emit(EventKind::Cancel, Some(entry));
        }
        canceled
    }

    pub fn cancel_all(&mut self) -> Vec<NotificationId> {
        let removed = self.registry.remove_all();
        let ids: Vec<NotificationId> = removed.iter().map(RegistryEntry::id).collect();
        for &id in &ids {
            self.backend.deregister(id);
        }
        info!(count = ids.len(), "canceled all notifications");
        self.emit(EventKind::CancelAll, None);
        ids
    }

    /// Dismisses shown notifications. Future occurrences stay armed.
    pub fn clear(&mut self, ids: &[NotificationId]) -> Vec<NotificationId> {
        let mut cleared = Vec::new();
        for &id in ids {
            let Some(entry) = self.registry.mark_cleared(id) else {
                continue;
            };
            self.backend.dismiss(id);
            cleared.push(id);
            self.emit(EventKind::Clear, Some(entry));
        }
        cleared
    }

    pub fn clear_all(&mut self) -> Vec<NotificationId> {
        let mut cleared = Vec::new();
        for id in self.registry.ids() {
            if self.registry.mark_cleared(id).is_some() {
                self.backend.dismiss(id);
                cleared.push(id);
            }
        }
        info!(count = cleared.len(), "cleared all notifications");
        self.emit(EventKind::ClearAll, None);
        cleared
    }

    /// Applies one backend callback. Callbacks for canceled ids or for an
    /// older generation are dropped and `false` is returned.
    pub fn handle_backend_event(&mut self, event: BackendEvent) -> bool {
        let BackendEvent {
            id,
            generation,
            kind,
        } = event;
        match kind {
            BackendEventKind::Triggered => {
                let Some(entry) = self.registry.mark_triggered(id, generation) else {
                    debug!(id, generation, "discarding stale trigger callback");
                    return false;
                };
                self.emit(EventKind::Trigger, Some(entry));
            }
            BackendEventKind::Clicked { action_id } => {
                let Some(entry) = self.registry.mark_clicked(id, generation) else {
                    debug!(id, generation, "discarding stale click callback");
                    return false;
                };
                let mut event = NotificationEvent::new(EventKind::Click, Some(entry));
                event.action_id = action_id.clone();
                self.dispatcher.fire(EventKind::Click.name(), &event);
                if let Some(action_id) = action_id {
                    self.dispatcher.fire(&action_id, &event);
                }
            }
        }
        true
    }

    /// Applies every callback waiting in the inbox, in arrival order.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        for event in self.inbox.drain() {
            if self.handle_backend_event(event) {
                applied += 1;
            }
        }
        applied
    }

    fn register(&self, entry: &RegistryEntry, report: &mut ScheduleReport) {
        let registration = Registration::from_entry(entry);
        if let Err(err) = self.backend.register_trigger(&registration) {
            warn!(id = entry.id(), %err, "backend refused notification");
            report.backend_errors.push((entry.id(), err));
        }
    }

    fn emit(&mut self, kind: EventKind, entry: Option<RegistryEntry>) {
        let event = NotificationEvent::new(kind, entry);
        self.dispatcher.fire(kind.name(), &event);
    }

    pub fn on(
        &mut self,
        event: impl Into<String>,
        listener: impl FnMut(&NotificationEvent) + 'static,
    ) -> ListenerId {
        self.dispatcher.on(event, listener)
    }

    pub fn un(&mut self, event: &str, listener: ListenerId) -> bool {
        self.dispatcher.un(event, listener)
    }

    pub fn get(&self, ids: &[NotificationId]) -> Vec<NotificationSpec> {
        self.registry
            .get_many(ids)
            .into_iter()
            .map(|entry| entry.spec)
            .collect()
    }

    pub fn get_all(&self) -> Vec<NotificationSpec> {
        self.registry.all().into_iter().map(|entry| entry.spec).collect()
    }

    pub fn get_scheduled(&self) -> Vec<NotificationSpec> {
        self.specs_in(LifecycleState::Scheduled)
    }

    pub fn get_triggered(&self) -> Vec<NotificationSpec> {
        self.specs_in(LifecycleState::Triggered)
    }

    /// Notifications dismissed with `clear`, kept for inspection until they
    /// are canceled or replaced.
    pub fn get_cleared(&self) -> Vec<NotificationSpec> {
        self.specs_in(LifecycleState::Cleared)
    }

    fn specs_in(&self, state: LifecycleState) -> Vec<NotificationSpec> {
        self.registry
            .entries_in(state)
            .into_iter()
            .map(|entry| entry.spec)
            .collect()
    }

    pub fn entry(&self, id: NotificationId) -> Option<RegistryEntry> {
        self.registry.get(id)
    }

    pub fn state(&self, id: NotificationId) -> Option<LifecycleState> {
        self.registry.state(id)
    }

    /// Every id the registry holds, cleared ones included. Use `is_present`
    /// to ask whether an id is still scheduled or showing.
    pub fn get_ids(&self) -> Vec<NotificationId> {
        self.registry.ids()
    }

    pub fn get_scheduled_ids(&self) -> Vec<NotificationId> {
        self.registry.ids_in(LifecycleState::Scheduled)
    }

    pub fn get_triggered_ids(&self) -> Vec<NotificationId> {
        self.registry.ids_in(LifecycleState::Triggered)
    }

    pub fn get_type(&self, id: NotificationId) -> NotificationType {
        NotificationType::from(self.registry.state(id))
    }

    pub fn is_present(&self, id: NotificationId) -> bool {
        self.get_type(id) != NotificationType::Unknown
    }

    pub fn is_scheduled(&self, id: NotificationId) -> bool {
        self.get_type(id) == NotificationType::Scheduled
    }

    pub fn is_triggered(&self, id: NotificationId) -> bool {
        self.get_type(id) == NotificationType::Triggered
    }

    pub fn get_defaults(&self) -> Value {
        Value::Object(self.defaults.as_map().clone())
    }

    /// Overrides default values for later requests. Unknown keys are
    /// reported, never added to the schema.
    pub fn set_defaults(&mut self, partial: &Value) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        match partial {
            Value::Object(map) => self.defaults.apply(map, &mut diagnostics),
            other => diagnostics.warn("defaults", format!("expected an object, got {other}")),
        }
        diagnostics
    }

    pub fn has_permission(&self) -> bool {
        self.permission
    }

    pub fn request_permission(&mut self) -> bool {
        self.permission = self.backend.request_permission();
        self.permission
    }

    /// Registers a reusable set of actions under `group_id`. Requests naming
    /// the group without inline actions inherit them.
    pub fn add_action_group(&mut self, group_id: &str, actions: &Value) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        let resolved = resolve_actions(
            actions,
            &Value::String(group_id.to_string()),
            &self.action_policy,
            &mut diagnostics,
        );
        self.action_groups
            .insert(resolved.action_group_id, resolved.actions);
        diagnostics
    }

    pub fn remove_action_group(&mut self, group_id: &str) -> bool {
        self.action_groups.remove(group_id).is_some()
    }

    pub fn has_action_group(&self, group_id: &str) -> bool {
        self.action_groups.contains_key(group_id)
    }

    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.registry.all()
    }

    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.registry.all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};
    use crate::clock::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn scheduler() -> (Scheduler, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 11, 7, 9, 0, 0).unwrap(),
        ));
        let scheduler = Scheduler::builder()
            .with_backend(backend.clone())
            .with_clock(clock)
            .build();
        (scheduler, backend)
    }

    #[test]
    fn update_deregisters_before_registering_again() {
        let (mut scheduler, backend) = scheduler();
        scheduler.schedule(&json!({ "id": 1, "title": "A" })).unwrap();
        backend.reset_calls();

        scheduler.update(&json!({ "id": 1, "title": "B" }));
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], BackendCall::Deregister(1));
        assert!(matches!(&calls[1], BackendCall::Register(reg) if reg.payload.title == "B"));
    }

    #[test]
    fn rescheduling_a_cleared_id_tears_down_the_old_registration() {
        let (mut scheduler, backend) = scheduler();
        scheduler
            .schedule(&json!({ "id": 6, "trigger": { "every": "hour" } }))
            .unwrap();
        let old = scheduler.entry(6).unwrap().generation;
        scheduler.handle_backend_event(BackendEvent::triggered(6, old));
        scheduler.clear(&[6]);
        backend.reset_calls();

        scheduler.schedule(&json!({ "id": 6, "title": "Again" })).unwrap();
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], BackendCall::Deregister(6));
        assert!(matches!(&calls[1], BackendCall::Register(reg) if reg.payload.title == "Again"));
        assert!(!scheduler.handle_backend_event(BackendEvent::triggered(6, old)));
        assert!(scheduler.is_scheduled(6));
    }

    #[test]
    fn duplicate_trigger_after_click_is_dropped() {
        let (mut scheduler, _) = scheduler();
        let events = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        for name in ["trigger", "click"] {
            let sink = events.clone();
            scheduler.on(name, move |event| sink.borrow_mut().push(event.kind));
        }
        scheduler.schedule(&json!({ "id": 5 })).unwrap();
        let generation = scheduler.entry(5).unwrap().generation;

        assert!(scheduler.handle_backend_event(BackendEvent::triggered(5, generation)));
        assert!(scheduler.handle_backend_event(BackendEvent::clicked(5, generation, None)));
        assert!(!scheduler.handle_backend_event(BackendEvent::triggered(5, generation)));
        assert_eq!(*events.borrow(), vec![EventKind::Trigger, EventKind::Click]);
        assert_eq!(scheduler.state(5), Some(LifecycleState::Clicked));
    }

    #[test]
    fn matcher_trigger_repeats_daily() {
        let (mut scheduler, _) = scheduler();
        scheduler
            .schedule(&json!({ "id": 8, "trigger": { "every": { "hour": 8, "minute": 0 }, "count": 2 } }))
            .unwrap();
        let trigger = &scheduler.get(&[8])[0].trigger;
        let first = Utc.with_ymd_and_hms(2025, 11, 8, 8, 0, 0).unwrap().timestamp();
        assert!(trigger.is_repeating());
        assert_eq!(trigger.occurrences(), vec![first, first + 86_400]);
    }

    #[test]
    fn batch_with_repeated_id_is_rejected_whole() {
        let (mut scheduler, backend) = scheduler();
        let result = scheduler.schedule(&json!([{ "id": 1 }, { "id": 2 }, { "id": 1 }]));
        assert_eq!(result, Err(SchedulerError::DuplicateId(1)));
        assert!(scheduler.get_ids().is_empty());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn update_of_unknown_id_schedules() {
        let (mut scheduler, _) = scheduler();
        let events = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = events.clone();
        scheduler.on("schedule", move |event| sink.borrow_mut().push(event.kind));
        scheduler.update(&json!({ "id": 9 }));
        assert!(scheduler.is_scheduled(9));
        assert_eq!(*events.borrow(), vec![EventKind::Schedule]);
    }

    #[test]
    fn action_groups_fill_in_missing_actions() {
        let (mut scheduler, _) = scheduler();
        let diagnostics = scheduler.add_action_group(
            "yes-no",
            &json!([{ "id": "yes", "title": "Yes" }, { "id": "no", "title": "No" }]),
        );
        assert!(diagnostics.is_empty());
        assert!(scheduler.has_action_group("yes-no"));

        scheduler
            .schedule(&json!({ "id": 1, "actionGroupId": "yes-no" }))
            .unwrap();
        let spec = &scheduler.get(&[1])[0];
        assert_eq!(spec.actions.len(), 2);

        assert!(scheduler.remove_action_group("yes-no"));
        assert!(!scheduler.has_action_group("yes-no"));
    }

    #[test]
    fn set_defaults_changes_later_requests() {
        let (mut scheduler, _) = scheduler();
        let diagnostics = scheduler.set_defaults(&json!({ "title": "Reminder", "nope": true }));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(scheduler.get_defaults()["title"], json!("Reminder"));

        scheduler.schedule(&json!({ "id": 2 })).unwrap();
        assert_eq!(scheduler.get(&[2])[0].title, "Reminder");
    }

    #[test]
    fn permission_is_queried_once_and_refreshed_on_request() {
        let backend = Arc::new(RecordingBackend::without_permission(true));
        let mut scheduler = Scheduler::builder().with_backend(backend).build();
        assert!(!scheduler.has_permission());
        assert!(scheduler.request_permission());
        assert!(scheduler.has_permission());
    }

    #[test]
    fn timespan_resolves_against_the_clock() {
        let (mut scheduler, _) = scheduler();
        scheduler
            .schedule(&json!({ "id": 3, "trigger": { "in": 10, "unit": "minute" } }))
            .unwrap();
        let at = Utc.with_ymd_and_hms(2025, 11, 7, 9, 10, 0).unwrap().timestamp();
        assert_eq!(scheduler.get(&[3])[0].trigger.first_fire_at(), Some(at));
    }

    #[test]
    fn snapshot_restores_without_re_resolution() {
        let (mut scheduler, backend) = scheduler();
        scheduler
            .schedule(&json!({ "id": 4, "trigger": { "every": "day" } }))
            .unwrap();
        let snapshot = scheduler.snapshot_json().unwrap();

        let entries: Vec<RegistryEntry> = serde_json::from_str(&snapshot).unwrap();
        let restored = Scheduler::builder()
            .with_backend(backend)
            .restore(entries)
            .build();
        assert_eq!(restored.get_all(), scheduler.get_all());
        assert!(restored.is_scheduled(4));
    }
}
