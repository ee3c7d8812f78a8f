use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::coerce::{aliases_for, first_defined};
use crate::diagnostics::Diagnostics;

/// Keys whose explicit null survives a merge instead of being back-filled.
pub const NULL_PRESERVING_KEYS: &[&str] = &["data", "sound"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Android,
    Ios,
    Windows,
    Browser,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform `{0}`")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "windows" | "win32nt" | "wince" => Ok(Platform::Windows),
            "browser" => Ok(Platform::Browser),
            _ => Err(UnknownPlatform(raw.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Windows => "windows",
            Platform::Browser => "browser",
        };
        f.write_str(name)
    }
}

impl Platform {
    /// How many interactive actions the platform renders on one notification.
    pub fn max_actions(self) -> usize {
        match self {
            Platform::Ios => 4,
            _ => 3,
        }
    }
}

/// The closed schema of accepted request keys together with their fallback values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Defaults {
    platform: Platform,
    values: Map<String, Value>,
}

pub fn defaults_for(platform: Platform) -> Defaults {
    let mut values = match json!({
        "id": 0,
        "title": "",
        "text": "",
        "badge": null,
        "sound": "res://platform_default",
        "data": null,
        "trigger": null,
        "actions": null,
        "actionGroupId": null,
        "launch": true,
        "foreground": null,
        "group": null,
        "silent": false,
        "priority": 0,
        "vibrate": false,
        "wakeup": true,
        "attachments": null
    }) {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    if platform == Platform::Android {
        let android = json!({
            "icon": "res://icon",
            "smallIcon": "res://ic_popup_reminder",
            "ongoing": false,
            "autoClear": true,
            "led": "FFFFFF",
            "color": null,
            "channel": null,
            "progressBar": null,
            "sticky": false,
            "lockscreen": true,
            "number": null,
            "summary": null,
            "groupSummary": false,
            "showWhen": true,
            "mediaSession": null,
            "defaults": 0
        });
        if let Value::Object(extra) = android {
            values.extend(extra);
        }
    }

    Defaults { platform, values }
}

impl Defaults {
    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Overrides known keys; unknown keys are reported and ignored.
    pub fn apply(&mut self, partial: &Map<String, Value>, diags: &mut Diagnostics) {
        for (key, value) in partial {
            match self.values.get_mut(key) {
                Some(slot) => *slot = value.clone(),
                None => diags.warn(key.as_str(), format!("unknown property: {key}")),
            }
        }
    }
}

/// Resolves the field aliases that live outside the trigger.
pub fn fold_aliases(options: &mut Map<String, Value>, defaults: &Defaults) {
    fold(options, "text");
    fold(options, "data");
    if defaults.contains_key("autoClear") {
        fold(options, "autoClear");
    }

    let ongoing = options.get("ongoing").and_then(Value::as_bool).unwrap_or(false);
    let auto_clear = options.get("autoClear").and_then(Value::as_bool);
    if ongoing && auto_clear != Some(true) {
        options.insert("autoClear".into(), Value::Bool(false));
    }
}

fn fold(options: &mut Map<String, Value>, canonical: &str) {
    let keys = aliases_for(canonical);
    let Some(value) = first_defined(options, keys).cloned() else {
        return;
    };
    for key in keys {
        options.remove(*key);
    }
    options.insert(canonical.to_string(), value);
}

pub fn merge_defaults(
    input: &Map<String, Value>,
    defaults: &Defaults,
    diags: &mut Diagnostics,
) -> Map<String, Value> {
    let mut merged = Map::new();

    for (key, fallback) in defaults.iter() {
        let value = match input.get(key) {
            Some(value) if !value.is_null() => value.clone(),
            Some(_) if NULL_PRESERVING_KEYS.contains(&key.as_str()) => Value::Null,
            _ => fallback.clone(),
        };
        merged.insert(key.clone(), value);
    }

    for key in input.keys() {
        if !defaults.contains_key(key) {
            diags.warn(key.as_str(), format!("unknown property: {key}"));
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn android_profile_carries_platform_keys() {
        let android = defaults_for(Platform::Android);
        let ios = defaults_for(Platform::Ios);
        assert_eq!(android.get("led"), Some(&json!("FFFFFF")));
        assert!(android.contains_key("smallIcon"));
        assert!(!ios.contains_key("led"));
        assert_eq!(ios.get("sound"), Some(&json!("res://platform_default")));
    }

    #[test]
    fn merge_backfills_but_keeps_explicit_silence() {
        let defaults = defaults_for(Platform::Ios);
        let mut diags = Diagnostics::new();
        let merged = merge_defaults(
            &object(json!({ "title": "Hi", "sound": null, "badge": null })),
            &defaults,
            &mut diags,
        );
        assert_eq!(merged["title"], json!("Hi"));
        assert_eq!(merged["text"], json!(""));
        assert_eq!(merged["sound"], Value::Null);
        assert_eq!(merged["badge"], Value::Null);
        assert!(diags.is_empty());

        let merged = merge_defaults(&object(json!({})), &defaults, &mut diags);
        assert_eq!(merged["sound"], json!("res://platform_default"));
    }

    #[test]
    fn merge_is_idempotent() {
        let defaults = defaults_for(Platform::Android);
        let mut diags = Diagnostics::new();
        let input = object(json!({ "id": 3, "data": null, "sound": null, "typo": 1 }));
        let once = merge_defaults(&input, &defaults, &mut diags);
        let twice = merge_defaults(&once, &defaults, &mut diags);
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let defaults = defaults_for(Platform::Browser);
        let mut diags = Diagnostics::new();
        let merged = merge_defaults(&object(json!({ "titel": "oops" })), &defaults, &mut diags);
        assert!(!merged.contains_key("titel"));
        assert_eq!(diags.for_field("titel").count(), 1);
    }

    #[test]
    fn aliases_fold_into_canonical_keys() {
        let defaults = defaults_for(Platform::Android);
        let mut options = object(json!({ "message": "hello", "json": { "k": 1 }, "autoCancel": false }));
        fold_aliases(&mut options, &defaults);
        assert_eq!(options["text"], json!("hello"));
        assert_eq!(options["data"], json!({ "k": 1 }));
        assert_eq!(options["autoClear"], json!(false));
        assert!(!options.contains_key("message"));
    }

    #[test]
    fn ongoing_disables_auto_clear() {
        let defaults = defaults_for(Platform::Android);
        let mut options = object(json!({ "ongoing": true }));
        fold_aliases(&mut options, &defaults);
        assert_eq!(options["autoClear"], json!(false));
    }

    #[test]
    fn apply_overrides_known_keys_only() {
        let mut defaults = defaults_for(Platform::Ios);
        let mut diags = Diagnostics::new();
        defaults.apply(&object(json!({ "title": "Reminder", "bogus": 1 })), &mut diags);
        assert_eq!(defaults.get("title"), Some(&json!("Reminder")));
        assert!(!defaults.contains_key("bogus"));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn platform_parses_legacy_names() {
        assert_eq!("Win32NT".parse::<Platform>(), Ok(Platform::Windows));
        assert_eq!("iOS".parse::<Platform>(), Ok(Platform::Ios));
        assert!("symbian".parse::<Platform>().is_err());
    }
}
