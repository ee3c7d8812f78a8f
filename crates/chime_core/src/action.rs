use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coerce::{first_non_null, to_bool, to_text};
use crate::diagnostics::Diagnostics;

pub const DEFAULT_ACTION_GROUP: &str = "DEFAULT_GROUP";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    #[default]
    Button,
    Input,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub title: String,
    pub launch: bool,
    pub ui: bool,
    pub needs_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_title: Option<String>,
    pub editable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl Action {
    pub fn button(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActionKind::Button,
            title: title.into(),
            launch: true,
            ui: true,
            needs_auth: false,
            icon: None,
            empty_text: None,
            submit_title: None,
            editable: false,
            choices: Vec::new(),
            default_value: None,
        }
    }

    /// Reads one loosely-typed action declaration. Declarations without a
    /// usable id yield `None` and a diagnostic.
    pub fn from_value(value: &Value, diags: &mut Diagnostics) -> Option<Self> {
        let Some(raw) = value.as_object() else {
            diags.warn("actions", format!("action {value} is not an object and will not be added"));
            return None;
        };
        let title = raw.get("title").map(to_text).unwrap_or_default();
        let id = first_non_null(raw, &["id", "identifier"])
            .map(to_text)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        let Some(id) = id else {
            diags.warn(
                "actions",
                format!("action with title `{title}` has no id and will not be added"),
            );
            return None;
        };

        let kind = match raw.get("type").and_then(Value::as_str) {
            Some("input") => ActionKind::Input,
            _ => ActionKind::Button,
        };

        Some(Self {
            id,
            kind,
            title,
            launch: to_bool(raw.get("launch"), true),
            ui: to_bool(raw.get("ui"), true),
            needs_auth: to_bool(raw.get("needsAuth"), false),
            icon: optional_text(raw, "icon"),
            empty_text: optional_text(raw, "emptyText"),
            submit_title: optional_text(raw, "submitTitle"),
            editable: to_bool(raw.get("editable"), kind == ActionKind::Input),
            choices: raw
                .get("choices")
                .and_then(Value::as_array)
                .map(|choices| choices.iter().map(to_text).collect())
                .unwrap_or_default(),
            default_value: optional_text(raw, "defaultValue"),
        })
    }
}

fn optional_text(raw: &Map<String, Value>, key: &str) -> Option<String> {
    raw.get(key).filter(|value| !value.is_null()).map(to_text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPolicy {
    pub max_actions: usize,
    pub default_group: String,
}

impl Default for ActionPolicy {
    fn default() -> Self {
        Self {
            max_actions: 3,
            default_group: DEFAULT_ACTION_GROUP.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedActions {
    pub action_group_id: String,
    pub actions: Vec<Action>,
}

pub fn resolve_actions(
    raw_actions: &Value,
    raw_group_id: &Value,
    policy: &ActionPolicy,
    diags: &mut Diagnostics,
) -> ResolvedActions {
    let declared: &[Value] = match raw_actions {
        Value::Null => &[],
        Value::Array(items) => items.as_slice(),
        other => {
            diags.warn("actions", format!("actions must be a list, got {other}"));
            &[]
        }
    };

    let mut actions: Vec<Action> = declared
        .iter()
        .filter_map(|value| Action::from_value(value, diags))
        .collect();

    if actions.len() > policy.max_actions {
        for dropped in actions.drain(policy.max_actions..) {
            diags.warn(
                "actions",
                format!(
                    "action `{}` exceeds the limit of {} actions and will not be added",
                    dropped.id, policy.max_actions
                ),
            );
        }
    }

    ResolvedActions {
        action_group_id: resolve_group_id(raw_group_id, policy, diags),
        actions,
    }
}

fn resolve_group_id(raw: &Value, policy: &ActionPolicy, diags: &mut Diagnostics) -> String {
    match raw {
        Value::Null => policy.default_group.clone(),
        Value::String(id) if !id.is_empty() => id.clone(),
        Value::Number(id) => id.to_string(),
        other => {
            diags.warn(
                "actionGroupId",
                format!("invalid action group id {other}, using `{}`", policy.default_group),
            );
            policy.default_group.clone()
        }
    }
}
