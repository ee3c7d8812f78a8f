use anyhow::Result;
use chime_core::{trigger::DEFAULT_REPEAT_COUNT, ActionPolicy, Platform, DEFAULT_ACTION_GROUP};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub platform: Platform,
    /// Occurrences armed for `every` triggers that do not set `count`.
    pub default_repeat_count: u32,
    /// Overrides the platform's action ceiling when set.
    pub max_actions: Option<usize>,
    pub default_action_group: String,
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SchedulerConfig::from_env`] but reads through `lookup`.
    /// Unparseable values are skipped and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(platform) = lookup("CHIME_PLATFORM") {
            match platform.parse::<Platform>() {
                Ok(value) => config.platform = value,
                Err(err) => warn!(%err, "ignoring CHIME_PLATFORM"),
            }
        }
        if let Some(count) = lookup("CHIME_DEFAULT_REPEAT_COUNT") {
            if let Ok(value) = count.trim().parse::<u32>() {
                if value > 0 {
                    config.default_repeat_count = value;
                }
            }
        }
        if let Some(max) = lookup("CHIME_MAX_ACTIONS") {
            if let Ok(value) = max.trim().parse::<usize>() {
                config.max_actions = Some(value);
            }
        }
        if let Some(group) = lookup("CHIME_DEFAULT_GROUP") {
            let group = group.trim();
            if !group.is_empty() {
                config.default_action_group = group.to_string();
            }
        }
        info!(platform = %config.platform, "scheduler configuration loaded");
        Ok(config)
    }

    pub fn action_policy(&self) -> ActionPolicy {
        ActionPolicy {
            max_actions: self
                .max_actions
                .unwrap_or_else(|| self.platform.max_actions()),
            default_group: self.default_action_group.clone(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            default_repeat_count: DEFAULT_REPEAT_COUNT,
            max_actions: None,
            default_action_group: DEFAULT_ACTION_GROUP.to_string(),
        }
    }
}
