use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::action::{resolve_actions, Action, ActionPolicy};
use crate::coerce::{to_badge, to_id, to_json, to_text, NotificationId};
use crate::defaults::{fold_aliases, merge_defaults, Defaults};
use crate::diagnostics::Diagnostics;
use crate::trigger::{resolve_trigger, ResolveContext, Trigger};

/// Top-level keys from the pre-trigger request format. They are lifted out
/// before the closed-schema merge and only feed the trigger resolver.
pub const LEGACY_TRIGGER_KEYS: &[&str] = &["at", "firstAt", "date", "every"];

const STRUCTURAL_KEYS: &[&str] = &[
    "id",
    "title",
    "text",
    "badge",
    "sound",
    "data",
    "trigger",
    "actions",
    "actionGroupId",
];

/// A fully resolved notification, ready for the registry and the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSpec {
    pub id: NotificationId,
    pub title: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    pub trigger: Trigger,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    pub action_group_id: String,
    /// Cosmetic platform fields (icon, led, progressBar, ...), carried verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Value>,
}

impl NotificationSpec {
    /// The caller payload parsed back from its stored JSON form.
    pub fn data_value(&self) -> Option<Value> {
        let raw = self.data.as_deref()?;
        Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }
}

static NULL: Value = Value::Null;

fn field<'m>(merged: &'m Map<String, Value>, key: &str) -> &'m Value {
    merged.get(key).unwrap_or(&NULL)
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub spec: NotificationSpec,
    pub diagnostics: Diagnostics,
}

/// Turns raw requests into [`NotificationSpec`]s: alias folding, default
/// merge, coercion, then trigger and action resolution.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    pub defaults: &'a Defaults,
    pub actions: &'a ActionPolicy,
    pub context: ResolveContext,
}

impl<'a> Normalizer<'a> {
    pub fn new(defaults: &'a Defaults, actions: &'a ActionPolicy, context: ResolveContext) -> Self {
        Self {
            defaults,
            actions,
            context,
        }
    }

    pub fn normalize(&self, raw: &Value) -> Normalized {
        let mut diags = Diagnostics::new();
        let mut options = match raw {
            Value::Object(map) => map.clone(),
            other => {
                diags.warn("notification", format!("expected an object, got {other}"));
                Map::new()
            }
        };

        let legacy: Map<String, Value> = LEGACY_TRIGGER_KEYS
            .iter()
            .filter_map(|key| options.remove(*key).map(|value| (key.to_string(), value)))
            .collect();

        fold_aliases(&mut options, self.defaults);
        let merged = merge_defaults(&options, self.defaults, &mut diags);

        let id = to_id(field(&merged, "id"), &mut diags);
        let badge = to_badge(field(&merged, "badge"), &mut diags);
        let sound = self.resolve_sound(field(&merged, "sound"));

        let raw_trigger = match field(&merged, "trigger") {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                diags.warn("trigger", format!("trigger must be an object, got {other}"));
                Map::new()
            }
        };
        let trigger = resolve_trigger(&raw_trigger, &legacy, &self.context, &mut diags);
        let resolved = resolve_actions(
            field(&merged, "actions"),
            field(&merged, "actionGroupId"),
            self.actions,
            &mut diags,
        );

        let extras = merged
            .iter()
            .filter(|(key, value)| !STRUCTURAL_KEYS.contains(&key.as_str()) && !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let spec = NotificationSpec {
            id,
            title: to_text(field(&merged, "title")),
            text: to_text(field(&merged, "text")),
            data: to_json(field(&merged, "data")),
            badge,
            sound,
            trigger,
            actions: resolved.actions,
            action_group_id: resolved.action_group_id,
            extras,
        };

        Normalized {
            spec,
            diagnostics: diags,
        }
    }

    fn resolve_sound(&self, value: &Value) -> Option<String> {
        match value {
            Value::Null | Value::Bool(false) => None,
            Value::Bool(true) => self.defaults.get("sound").and_then(Value::as_str).map(str::to_string),
            other => Some(to_text(other)),
        }
    }
}
